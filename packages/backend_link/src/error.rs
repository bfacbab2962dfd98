use std::io;

/// Errors that can occur while opening or driving a backend link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The configured backend address did not resolve to anything
    #[error("no address found for {0}")]
    Unresolved(String),
    /// Socket-level failure (refused, reset, timed out)
    #[error("{0}")]
    Io(#[from] io::Error),
    /// The blocking worker running the call went away
    #[error("link worker unavailable: {0}")]
    Worker(String),
    /// The link was already closed
    #[error("link closed")]
    Closed,
}

impl LinkError {
    /// Render as the textual error result used on the wire.
    pub fn to_reply(&self) -> String {
        format!("{}{}", crate::link::TRANSPORT_ERROR_PREFIX, self)
    }
}
