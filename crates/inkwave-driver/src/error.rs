//! Driver error types

use std::io;

/// Errors surfaced by synchronous driver entry points
///
/// Background threads never propagate errors across the thread boundary;
/// they log and shut down cleanly instead.
#[derive(Debug)]
pub enum DisplayError {
    /// The framebuffer geometry does not match the panel specification
    InvalidFramebuffer(String),
    /// A syscall failed, with the operation that failed for context
    Io {
        context: &'static str,
        source: io::Error,
    },
}

impl DisplayError {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        DisplayError::Io { context, source }
    }

    pub(crate) fn last_os_error(context: &'static str) -> Self {
        DisplayError::Io {
            context,
            source: io::Error::last_os_error(),
        }
    }
}

impl std::fmt::Display for DisplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayError::InvalidFramebuffer(msg) => write!(f, "invalid framebuffer: {msg}"),
            DisplayError::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for DisplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DisplayError::Io { source, .. } => Some(source),
            DisplayError::InvalidFramebuffer(_) => None,
        }
    }
}
