//! Session endpoint defaults and fixed thresholds

/// An access token expiring within this many seconds is renewed before use.
pub const NEAR_EXPIRY_THRESHOLD_SECS: u64 = 60;

/// Default path of the renewal endpoint on the protected API.
pub const DEFAULT_RENEWAL_PATH: &str = "/auth/refresh";

/// Default sign-in and registration paths. Calls to these never carry a credential.
pub const DEFAULT_SIGN_IN_PATHS: &[&str] = &["/auth/login", "/auth/register"];

/// Default session-scoped paths (session polling). A failed renewal on these
/// never forces a sign-in redirect.
pub const DEFAULT_SESSION_PATHS: &[&str] = &["/auth/session"];
