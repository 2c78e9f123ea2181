//! Message gateway: turns raw inbound text into handler invocations.
//!
//! Run commands are spawned so the receive loop keeps draining; question
//! responses are handled inline so they can unblock a waiting run
//! without queueing behind anything.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use forge_core::{ClientFrame, ServerFrame};

use crate::client::{ClientId, ClientRegistry};
use crate::orchestrator::Orchestrator;

/// Drain the inbound channel until every socket reader is gone.
pub async fn process_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        dispatch(&orchestrator, &registry, &client_id, &raw).await;
    }
}

/// Route one raw inbound message.
pub async fn dispatch(
    orchestrator: &Arc<Orchestrator>,
    registry: &Arc<ClientRegistry>,
    client_id: &ClientId,
    raw: &str,
) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            registry.send(client_id, &ServerFrame::error("Invalid message format"));
            return;
        }
    };

    let frame = match serde_json::from_value::<ClientFrame>(value.clone()) {
        Ok(frame) => frame,
        Err(_) => {
            let ty = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown");
            registry.send(
                client_id,
                &ServerFrame::error(format!("Unknown message type: {ty}")),
            );
            return;
        }
    };
    debug!(client_id = %client_id, frame = ?frame, "Inbound frame");

    match frame {
        ClientFrame::CreateProject { name, requirement } => {
            let orchestrator = Arc::clone(orchestrator);
            let client_id = client_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_create_project(&client_id, name, requirement)
                    .await;
            });
        }
        ClientFrame::CreateFromTemplate {
            template_id,
            name,
            features,
            custom_requirements,
        } => {
            let orchestrator = Arc::clone(orchestrator);
            let client_id = client_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_create_from_template(
                        &client_id,
                        template_id,
                        name,
                        features,
                        custom_requirements,
                    )
                    .await;
            });
        }
        ClientFrame::ContinueConversation {
            project_id,
            message,
        } => {
            let orchestrator = Arc::clone(orchestrator);
            let client_id = client_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_continue_conversation(&client_id, project_id, message)
                    .await;
            });
        }
        ClientFrame::RegenerateProject { project_id } => {
            let orchestrator = Arc::clone(orchestrator);
            let client_id = client_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_regenerate_project(&client_id, project_id)
                    .await;
            });
        }
        ClientFrame::RetryProject { project_id } => {
            let orchestrator = Arc::clone(orchestrator);
            let client_id = client_id.clone();
            tokio::spawn(async move {
                orchestrator.handle_retry_project(&client_id, project_id).await;
            });
        }
        // Handled inline: must be able to race ahead of a blocked run.
        ClientFrame::UserResponse {
            question_id,
            response,
            project_id,
        } => {
            orchestrator
                .handle_user_response(client_id, question_id, response, project_id)
                .await;
        }
        ClientFrame::SkipQuestion { question_id } => {
            orchestrator.handle_skip_question(client_id, question_id).await;
        }
        ClientFrame::Ping => {
            registry.send(client_id, &ServerFrame::Pong);
        }
    }
}
