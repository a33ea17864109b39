//! Error types for the wire layer.

use thiserror::Error;

/// Convenience alias for results carrying a [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Transport-level failures.
///
/// The line codec never fails on content: over-long lines are discarded and
/// invalid UTF-8 is replaced, so the only decode error is I/O. Encoding can
/// additionally reject characters that would break framing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An outgoing line carries a control character that would corrupt framing.
    #[error("illegal control character: {0:?}")]
    IllegalControlChar(char),
}

/// Reasons a single line cannot be turned into a [`crate::Message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Nothing but whitespace (or tags/prefix with no command).
    #[error("empty message")]
    EmptyMessage,

    /// The command token is neither letters nor a three-digit numeric.
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    /// The prefix is present but unusable.
    #[error("invalid prefix: {0:?}")]
    InvalidPrefix(String),
}
