use thiserror::Error;

/// everything that can go wrong between the ui, the store and the ollama host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// generation endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    /// 2xx response that carried an `error` field.
    #[error("{message}")]
    Api { message: String },

    /// transport failure (refused connection, dns, timeout, ...).
    #[error("network error: {0}")]
    Network(String),

    /// persisted record exists but is not valid json for its type.
    #[error("corrupt stored record: {0}")]
    Parse(String),

    /// 2xx response whose body is not the expected json shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// store write/remove failed.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type ChatResult<T> = Result<T, ChatError>;
