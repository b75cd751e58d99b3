//! Identifier generation for executions and sessions.

use uuid::Uuid;

/// A fresh execution id.
#[must_use]
pub fn execution_id() -> String {
    format!("exec-{}", Uuid::new_v4())
}

/// A fresh session id.
#[must_use]
pub fn session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}
