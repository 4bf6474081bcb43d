//! Stream credentials.
//!
//! Credentials come from an external vault; the daemon only ever sees the
//! decrypted token long enough to send the handshake frame.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque credentials for the telemetry stream.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account / user the token belongs to
    pub user: String,
    /// Bearer token sent in the handshake
    token: String,
}

impl Credentials {
    /// Wrap a user and token.
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }

    /// Expose the token for the handshake.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("alice", "s3cret");
        let debug = format!("{:?}", creds);

        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
        assert_eq!(creds.token(), "s3cret");
    }
}
