use thiserror::Error;

/// Failure taxonomy for the action primitives and the dispatch boundary.
///
/// The `Display` strings are the wire contract: the orchestrator matches on
/// them verbatim, so they must never change shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// A selector or text query resolved to nothing.
    #[error("element not found")]
    NotFound,

    /// A type target selector resolved to nothing.
    #[error("input not found")]
    InputNotFound,

    /// The element resolved but is not interactable right now.
    #[error("element disabled or hidden")]
    DisabledOrHidden,

    /// A bounded wait expired before its condition held.
    #[error("timeout")]
    Timeout,

    /// The dispatch envelope itself was malformed.
    #[error("bad request")]
    BadRequest,

    /// The tool name is not in the registry.
    #[error("unknown tool")]
    UnknownTool,

    /// Any uncaught fault during primitive execution.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl ActionError {
    /// Wrap a driver-level fault, flattening the anyhow chain into one line.
    pub fn unexpected(err: &anyhow::Error) -> Self {
        ActionError::Unexpected(format!("{err:#}"))
    }
}
