//! Generation engine boundary.
//!
//! The server never talks to an agent framework directly. It drives a
//! [`GenerationEngine`], which emits agent activity through the
//! [`RunCallbacks`] seam. The production implementation
//! ([`CommandEngine`]) wraps an external agent process speaking
//! line-delimited JSON; [`ScriptedEngine`] replays canned activity for
//! tests.

pub mod callbacks;
pub mod command;
pub mod context;
pub mod error;
pub mod scripted;
pub mod service;
pub mod templates;

pub use callbacks::{RunCallbacks, TaskUpdate};
pub use command::CommandEngine;
pub use error::EngineError;
pub use scripted::{ScriptStep, ScriptedEngine};
pub use service::{ContinuationRequest, GenerationEngine, GenerationRequest};
pub use templates::{all_templates, get_template, render_prompt, ProjectTemplate};
