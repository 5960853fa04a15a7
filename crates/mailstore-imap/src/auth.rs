//! SASL authenticators.

use std::fmt;

/// XOAUTH2 (Google/Microsoft proprietary) client response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01`. The `imap` client
/// base64-encodes the response before sending it.
pub struct XOAuth2 {
    user: String,
    access_token: String,
}

impl XOAuth2 {
    /// Creates an authenticator for a user and `OAuth2` access token.
    #[must_use]
    pub fn new(user: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            access_token: access_token.into(),
        }
    }
}

impl imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&self, _challenge: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

impl fmt::Debug for XOAuth2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XOAuth2")
            .field("user", &self.user)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use imap::Authenticator;

    use super::*;

    #[test]
    fn test_xoauth2_response() {
        let auth = XOAuth2::new("user@example.com", "ya29.token");
        assert_eq!(
            auth.process(b""),
            "user=user@example.com\x01auth=Bearer ya29.token\x01\x01"
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let auth = XOAuth2::new("user@example.com", "ya29.token");
        let debug = format!("{auth:?}");
        assert!(!debug.contains("ya29"));
        assert!(debug.contains("user@example.com"));
    }
}
