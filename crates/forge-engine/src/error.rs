use thiserror::Error;

/// Errors surfaced by a generation engine run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine ran but the generation itself failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The engine process emitted something we could not understand.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// The engine process exited before reporting completion.
    #[error("engine exited unexpectedly: {0}")]
    Interrupted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
