use std::path::PathBuf;

use async_trait::async_trait;

use crate::callbacks::RunCallbacks;
use crate::error::EngineError;

/// Request for a fresh generation run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub project_name: String,
    pub requirement: String,
}

/// Request to continue work inside an existing workspace. The prompt
/// already carries the conversation history; the engine may add a
/// summary of the existing files on top.
#[derive(Debug, Clone)]
pub struct ContinuationRequest {
    pub project_name: String,
    pub prompt: String,
    pub workspace_path: PathBuf,
}

/// The seam between the server and whatever actually generates code.
///
/// Both operations run to completion, firing [`RunCallbacks`] along the
/// way, and return the workspace path holding the generated project.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError>;

    async fn continue_generation(
        &self,
        request: ContinuationRequest,
        callbacks: &dyn RunCallbacks,
    ) -> Result<PathBuf, EngineError>;
}
