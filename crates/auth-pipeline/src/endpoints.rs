//! Protected API surface and its special endpoints

use session_auth::{DEFAULT_RENEWAL_PATH, DEFAULT_SESSION_PATHS, DEFAULT_SIGN_IN_PATHS};

/// What a request targets, as far as credential handling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Outside the protected API; forwarded untouched.
    External,
    /// Sign-in or registration; never carries a credential.
    SignIn,
    /// The renewal endpoint itself.
    Renewal,
    /// Session-scoped endpoint (session polling). Never forces a redirect.
    Session,
    /// Any other protected endpoint.
    Protected,
}

/// Base URL of the protected API plus the paths that get special treatment.
///
/// Paths are relative to the base URL and matched exactly, ignoring the query
/// string and a trailing slash.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
    renewal_path: String,
    sign_in_paths: Vec<String>,
    session_paths: Vec<String>,
}

impl Endpoints {
    /// Endpoints rooted at `base_url` with the default special paths.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            renewal_path: normalize(DEFAULT_RENEWAL_PATH),
            sign_in_paths: DEFAULT_SIGN_IN_PATHS.iter().map(|p| normalize(p)).collect(),
            session_paths: DEFAULT_SESSION_PATHS.iter().map(|p| normalize(p)).collect(),
        }
    }

    pub fn with_renewal_path(mut self, path: &str) -> Self {
        self.renewal_path = normalize(path);
        self
    }

    pub fn with_sign_in_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sign_in_paths = paths.into_iter().map(|p| normalize(p.as_ref())).collect();
        self
    }

    pub fn with_session_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.session_paths = paths.into_iter().map(|p| normalize(p.as_ref())).collect();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn renewal_url(&self) -> String {
        self.url_for(&self.renewal_path)
    }

    /// Absolute URL for a path (and optional query) on the protected API.
    pub fn url_for(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base_url, path_and_query)
        } else {
            format!("{}/{}", self.base_url, path_and_query)
        }
    }

    pub fn classify(&self, url: &str) -> Target {
        let Some(rest) = url.strip_prefix(self.base_url.as_str()) else {
            return Target::External;
        };
        // "https://api.example.com.evil" must not match "https://api.example.com"
        if !(rest.is_empty() || rest.starts_with(['/', '?', '#'])) {
            return Target::External;
        }

        let path = normalize(rest.split(['?', '#']).next().unwrap_or(""));
        if path == self.renewal_path {
            Target::Renewal
        } else if self.sign_in_paths.contains(&path) {
            Target::SignIn
        } else if self.session_paths.contains(&path) {
            Target::Session
        } else {
            Target::Protected
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("https://api.example.com/v1/")
    }

    #[test]
    fn classifies_default_paths() {
        let e = endpoints();
        assert_eq!(e.classify("https://api.example.com/v1/auth/refresh"), Target::Renewal);
        assert_eq!(e.classify("https://api.example.com/v1/auth/login"), Target::SignIn);
        assert_eq!(e.classify("https://api.example.com/v1/auth/register/"), Target::SignIn);
        assert_eq!(e.classify("https://api.example.com/v1/auth/session?poll=1"), Target::Session);
        assert_eq!(e.classify("https://api.example.com/v1/items"), Target::Protected);
        assert_eq!(e.classify("https://api.example.com/v1"), Target::Protected);
    }

    #[test]
    fn other_hosts_and_prefix_lookalikes_are_external() {
        let e = endpoints();
        assert_eq!(e.classify("https://cdn.example.com/v1/items"), Target::External);
        assert_eq!(e.classify("https://api.example.com/v10/items"), Target::External);
        assert_eq!(e.classify("https://api.example.com/v1.evil/items"), Target::External);
    }

    #[test]
    fn fragment_right_after_base_is_protected() {
        let e = endpoints();
        assert_eq!(e.classify("https://api.example.com/v1#top"), Target::Protected);
        assert_eq!(e.classify("https://api.example.com/v1/auth/login#form"), Target::SignIn);
    }

    #[test]
    fn custom_paths_replace_defaults() {
        let e = endpoints()
            .with_renewal_path("token/renew")
            .with_sign_in_paths(["/signin"])
            .with_session_paths(Vec::<String>::new());
        assert_eq!(e.classify("https://api.example.com/v1/token/renew"), Target::Renewal);
        assert_eq!(e.classify("https://api.example.com/v1/auth/refresh"), Target::Protected);
        assert_eq!(e.classify("https://api.example.com/v1/signin"), Target::SignIn);
        assert_eq!(e.classify("https://api.example.com/v1/auth/session"), Target::Protected);
    }

    #[test]
    fn builds_urls_against_base() {
        let e = endpoints();
        assert_eq!(e.base_url(), "https://api.example.com/v1");
        assert_eq!(e.renewal_url(), "https://api.example.com/v1/auth/refresh");
        assert_eq!(e.url_for("/items?page=2"), "https://api.example.com/v1/items?page=2");
        assert_eq!(e.url_for("items"), "https://api.example.com/v1/items");
    }
}
