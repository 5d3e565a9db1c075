//! Caller identity threaded through a run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and correlation ids of the caller that submitted a run.
///
/// Passed explicitly to the orchestrator; never read from global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Normalized caller email.
    pub user_email: String,
    /// Whether the caller holds administrator rights.
    #[serde(default)]
    pub is_admin: bool,
    /// Request correlation id.
    pub request_id: Uuid,
    /// Session id, if the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl RunContext {
    /// Creates a context for a caller with a fresh request id.
    #[must_use]
    pub fn new(user_email: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into().trim().to_lowercase(),
            is_admin: false,
            request_id: Uuid::new_v4(),
            session_id: None,
        }
    }

    /// Marks the caller as an administrator.
    #[must_use]
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_normalized() {
        let ctx = RunContext::new("  Owner@Example.COM ");
        assert_eq!(ctx.user_email, "owner@example.com");
        assert!(!ctx.is_admin);
    }

    #[test]
    fn test_builders() {
        let session = Uuid::new_v4();
        let ctx = RunContext::new("a@b.co").with_admin(true).with_session_id(session);
        assert!(ctx.is_admin);
        assert_eq!(ctx.session_id, Some(session));
    }
}
