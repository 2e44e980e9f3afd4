//! Session credential handling
//!
//! Holds the credential pair (short-lived access token plus renewal token),
//! reads the access token's expiry without verifying its signature, and talks
//! to the renewal endpoint. Deliberately free of any coordination logic: the
//! single-flight and cooldown rules live in `auth-pipeline`.
//!
//! Credential flow:
//! 1. Sign-in stores a pair via `CredentialStore::set_access` / `set_renewal`
//! 2. `inspector::is_near_expiry()` tells the pipeline when to renew early
//! 3. `renewal::renew()` exchanges the renewal token for a new access token
//! 4. The pipeline writes the result back, unless the session changed meanwhile
//! 5. Sign-out calls `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod inspector;
pub mod renewal;

pub use constants::*;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use inspector::{Claims, claims_of, expiry_of, is_near_expiry, now_unix};
pub use renewal::{RenewalResponse, renew};
