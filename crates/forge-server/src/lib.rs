//! WebSocket server for the forge backend.
//!
//! One socket per client, one registry entry per socket. Commands arrive
//! as JSON frames, generation runs execute in spawned tasks, and the
//! orchestrator streams activity back through the registry.

pub mod auth;
pub mod client;
pub mod gateway;
pub mod orchestrator;
pub mod questions;
pub mod server;

pub use auth::{StoreTokenVerifier, TokenVerifier};
pub use client::{ClientId, ClientRegistry};
pub use orchestrator::Orchestrator;
pub use questions::PendingQuestions;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
