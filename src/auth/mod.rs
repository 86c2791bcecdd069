//! Authentication for GitLab API requests.

use crate::errors::{GitLabError, GitLabErrorKind, GitLabResult};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

/// Header used by GitLab personal, project, and group access tokens.
pub const PRIVATE_TOKEN_HEADER: &str = "private-token";

/// Authentication method for GitLab API.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// `Authorization: Bearer <token>` (OAuth or access token).
    Bearer(SecretString),
    /// `PRIVATE-TOKEN: <token>`.
    PrivateToken(SecretString),
}

impl AuthMethod {
    /// Creates a bearer token authentication method.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(SecretString::new(token.into()))
    }

    /// Creates a private token authentication method.
    pub fn private_token(token: impl Into<String>) -> Self {
        Self::PrivateToken(SecretString::new(token.into()))
    }

    fn secret(&self) -> &SecretString {
        match self {
            Self::Bearer(t) | Self::PrivateToken(t) => t,
        }
    }

    /// Returns true if no token is configured.
    pub fn is_empty(&self) -> bool {
        self.secret().expose_secret().trim().is_empty()
    }

    /// Gets the token prefix for logging.
    pub fn token_prefix(&self) -> &'static str {
        let exposed = self.secret().expose_secret();
        if exposed.starts_with("glpat-") {
            "glpat-***"
        } else if exposed.starts_with("gloas-") {
            "gloas-***"
        } else {
            "***"
        }
    }

    /// Builds the header carrying the credential.
    pub fn header(&self) -> GitLabResult<(HeaderName, HeaderValue)> {
        let (name, raw) = match self {
            Self::Bearer(t) => (AUTHORIZATION, format!("Bearer {}", t.expose_secret())),
            Self::PrivateToken(t) => (
                HeaderName::from_static(PRIVATE_TOKEN_HEADER),
                t.expose_secret().to_string(),
            ),
        };

        let mut value = HeaderValue::from_str(&raw).map_err(|_| {
            GitLabError::new(
                GitLabErrorKind::MissingAuth,
                "Token contains characters not allowed in a header",
            )
        })?;
        value.set_sensitive(true);

        Ok((name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let (name, value) = AuthMethod::bearer("glpat-abc").header().unwrap();
        assert_eq!(name, AUTHORIZATION);
        assert_eq!(value.to_str().unwrap(), "Bearer glpat-abc");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_private_token_header() {
        let (name, value) = AuthMethod::private_token("glpat-abc").header().unwrap();
        assert_eq!(name.as_str(), PRIVATE_TOKEN_HEADER);
        assert_eq!(value.to_str().unwrap(), "glpat-abc");
    }

    #[test]
    fn test_token_prefix() {
        assert_eq!(AuthMethod::bearer("glpat-xyz").token_prefix(), "glpat-***");
        assert_eq!(AuthMethod::bearer("other").token_prefix(), "***");
    }

    #[test]
    fn test_invalid_header_value() {
        let err = AuthMethod::bearer("bad\ntoken").header().unwrap_err();
        assert_eq!(err.kind(), GitLabErrorKind::MissingAuth);
    }

    #[test]
    fn test_is_empty() {
        assert!(AuthMethod::bearer("  ").is_empty());
        assert!(!AuthMethod::private_token("t").is_empty());
    }
}
