//! Navigation collaborator
//!
//! The pipeline never decides *how* a user gets back to sign-in; it only says
//! when. UIs map this to a route change, the sidecar maps it to a signed-out
//! flag.

pub trait Navigator: Send + Sync {
    /// Send the user to the sign-in page. Called after credentials were cleared.
    fn navigate_to_sign_in(&self);

    /// True when the user is already somewhere that needs no session (sign-in,
    /// registration). Redirecting from there would loop.
    fn current_path_is_public(&self) -> bool;
}
