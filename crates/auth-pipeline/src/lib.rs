//! Authenticated request pipeline
//!
//! Wraps a `Transport` so every call to the protected API carries the current
//! access credential, expiring credentials are renewed before use, and calls
//! rejected with 401 are replayed once after a single shared renewal.
//!
//! Request lifecycle:
//! 1. `Dispatcher` (outbound) classifies the target, renews early if the access
//!    token is near expiry, attaches `Authorization: Bearer`, sends
//! 2. `ResponseGuard` (inbound) passes successes through, surfaces 403 and other
//!    statuses, and turns 401 into renew + replay through the dispatcher
//! 3. `RenewalCoordinator` makes sure concurrent renewals collapse into one
//!    network call and enforces a 5 second window between attempts
//! 4. When renewal cannot fix the session, the guard clears credentials and
//!    asks the `Navigator` for a sign-in redirect (unless the caller opted out)
//!
//! `AuthClient` ties the stages together and is the type applications hold.

pub mod client;
pub mod coordinator;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod navigation;

#[cfg(test)]
mod test_support;

pub use client::AuthClient;
pub use coordinator::{
    COOLDOWN_WINDOW, Renewal, RenewalCoordinator, RenewalPhase, RenewalTrigger,
};
pub use dispatcher::{Dispatched, Dispatcher};
pub use endpoints::{Endpoints, Target};
pub use error::{Error, RenewalError, Result};
pub use guard::{ResponseGuard, SETTLE_DELAY};
pub use navigation::Navigator;
