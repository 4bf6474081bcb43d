//! Broker endpoint allow-list.
//!
//! Checked before every submission, independently of what the credentials
//! would allow.

use crate::error::{ExecError, ExecResult};

/// Refuses broker endpoints that do not contain the allowed substring.
#[derive(Debug, Clone)]
pub struct EndpointGuard {
    allowed: String,
}

impl EndpointGuard {
    pub fn new(allowed: impl Into<String>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    /// Substring every endpoint must contain.
    pub fn allowed(&self) -> &str {
        &self.allowed
    }

    /// An empty allow-list matches nothing.
    pub fn check(&self, endpoint: &str) -> ExecResult<()> {
        if self.allowed.is_empty() || !endpoint.contains(&self.allowed) {
            return Err(ExecError::EndpointNotAllowed {
                endpoint: endpoint.to_string(),
                allowed: self.allowed.clone(),
            });
        }
        Ok(())
    }
}
