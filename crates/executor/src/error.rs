use thiserror::Error;
use uuid::Uuid;

/// Error returned by a user callback or a [`Waitable`](crate::Waitable) execute.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the executor, its collection and its entities.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{operation}() called while already spinning")]
    AlreadySpinning { operation: &'static str },

    #[error("node '{node}' has already been added to an executor")]
    NodeAlreadyAttached { node: String },

    #[error("callback group {group} has already been added to an executor")]
    CallbackGroupAlreadyAttached { group: Uuid },

    #[error("node '{node}' is not attached to this executor")]
    NodeNotAttached { node: String },

    #[error("callback group {group} is not attached to this executor")]
    CallbackGroupNotAttached { group: Uuid },

    #[error("callback group {group} does not belong to node '{node}'")]
    GroupNotOwnedByNode { group: Uuid, node: String },

    #[error("take_data() called on {entity} without a preceding successful is_ready()")]
    TakeWithoutReady { entity: String },

    #[error("callback of {entity} failed: {source}")]
    Callback {
        entity: String,
        #[source]
        source: CallbackError,
    },

    #[error("service '{service}' is not available")]
    ServiceUnavailable { service: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("context has been shut down")]
    ContextShutDown,

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether the error is a broken internal contract rather than a
    /// recoverable usage or callback failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutorError::TakeWithoutReady { .. })
    }
}
