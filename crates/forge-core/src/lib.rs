pub mod frames;
pub mod ids;
pub mod message;
pub mod progress;

pub use frames::{ClientFrame, ServerFrame};
pub use ids::{MessageId, ProjectId, QuestionId, UserId};
pub use message::{MessageKind, QuestionMode};
pub use progress::{AgentState, ProgressSnapshot, ProgressTracker, StageState};
