//! Hook into the external notification bus.
//!
//! The actor calls [`CommandNotifier::notify`] once per accepted command,
//! before executing it. The call is synchronous; a rejection aborts the
//! command with `notify_failed`.

use crate::core::commands::Command;
use crate::core::common::EdisError;

pub trait CommandNotifier: Send + Sync {
    fn notify(&self, db: usize, command: &Command) -> Result<(), EdisError>;
}

/// Notifier that logs every accepted command and never rejects.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl CommandNotifier for TracingNotifier {
    fn notify(&self, db: usize, command: &Command) -> Result<(), EdisError> {
        tracing::debug!(db, command = %command, "command accepted");
        Ok(())
    }
}
