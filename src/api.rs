use std::sync::PoisonError;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    models::Category,
    transport::{self, CollectingSink, InboundMessage},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    user_id: Option<String>,
    text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub user_id: String,
    pub replies: Vec<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(message_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// Espejo web del transporte de mensajería: mismo motor, mismas sesiones.
#[axum::debug_handler]
async fn message_handler(
    State(state): State<AppState>,
    Json(payload): Json<MessagePayload>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<serde_json::Value>)> {
    if payload.text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "El mensaje no puede estar vacío."})),
        ));
    }

    let user_id = match payload.user_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => format!("web:{}", Uuid::new_v4()),
    };

    let sink = CollectingSink::new();
    let message = InboundMessage::new(user_id.clone(), payload.text);
    transport::dispatch(&state.engine, &message, &sink).await;

    let replies = sink.take().into_iter().map(|(_, text)| text).collect();
    Ok(Json(MessageResponse { user_id, replies }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let corpus = state.engine.scenarios().corpus();
    Json(Status {
        units: corpus.len(),
        emergency: corpus.count(Category::Emergency),
        communication: corpus.count(Category::Communication),
        generic: corpus.count(Category::Generic),
        sessions: state.engine.store().len(),
        batch_size: state.config.batch_size,
    })
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        config::AppConfig,
        llm::CompletionService,
        models::Corpus,
        rag::Assessor,
        session::{EngineSettings, SessionEngine, GREETING},
        vector_store::Retriever,
    };

    const FEEDBACK: &str = "1. Phù hợp\n2. ⭐⭐⭐\n3. Cần nói rõ hơn.";

    struct FixedFeedback;

    #[async_trait]
    impl CompletionService for FixedFeedback {
        async fn complete(&self, _prompt: &str, _t: f64, _max: u64) -> Result<String> {
            Ok(FEEDBACK.to_string())
        }
    }

    fn state() -> AppState {
        let corpus = Corpus::from_fragments(vec![
            ("Giới thiệu tài liệu".to_string(), Category::Generic),
            ("1. Ngừng tim. Cần thực hiện: ép tim".to_string(), Category::Emergency),
            ("1. Người nhà lo lắng. Gợi ý trả lời: trấn an".to_string(), Category::Communication),
            ("2. Bệnh nhân từ chối ăn.".to_string(), Category::Communication),
        ])
        .unwrap();
        let scenarios = Arc::new(Retriever::new(corpus));
        let assessor = Assessor::new(scenarios.clone(), Arc::new(FixedFeedback), 0.2, 200);
        let engine = Arc::new(SessionEngine::new(
            scenarios,
            assessor,
            EngineSettings {
                batch_size: 4,
                continue_delay: Duration::ZERO,
            },
        ));
        let config = AppConfig::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk".to_string()),
            "TRANSPORT" => Some("web".to_string()),
            _ => None,
        })
        .unwrap();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        AppState::new(config, engine, shutdown_tx)
    }

    fn payload(user_id: Option<&str>, text: &str) -> Json<MessagePayload> {
        Json(MessagePayload {
            user_id: user_id.map(str::to_string),
            text: text.to_string(),
        })
    }

    #[tokio::test]
    async fn blank_text_is_a_bad_request() {
        let state = state();
        let Err((code, _)) = message_handler(State(state.clone()), payload(Some("w1"), "  \n")).await
        else {
            panic!("un mensaje vacío debe rechazarse");
        };
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(state.engine.store().is_empty());
    }

    #[tokio::test]
    async fn missing_user_id_gets_a_fresh_web_id() {
        let state = state();
        let Ok(Json(first)) = message_handler(State(state.clone()), payload(None, "hello")).await
        else {
            panic!("respuesta esperada");
        };
        let Ok(Json(second)) =
            message_handler(State(state.clone()), payload(Some("   "), "hello")).await
        else {
            panic!("respuesta esperada");
        };
        assert!(first.user_id.starts_with("web:"));
        assert!(second.user_id.starts_with("web:"));
        assert_ne!(first.user_id, second.user_id);
        assert_eq!(state.engine.store().len(), 2);
    }

    #[tokio::test]
    async fn replies_follow_the_conversation_order() {
        let state = state();
        let Ok(Json(opened)) = message_handler(State(state.clone()), payload(Some("w1"), "hi")).await
        else {
            panic!("respuesta esperada");
        };
        assert_eq!(opened.user_id, "w1");
        assert_eq!(opened.replies.len(), 1);
        assert!(opened.replies[0].starts_with(GREETING));

        let Ok(Json(graded)) =
            message_handler(State(state.clone()), payload(Some("w1"), "Tôi gọi hỗ trợ")).await
        else {
            panic!("respuesta esperada");
        };
        assert_eq!(graded.replies.len(), 2);
        assert_eq!(graded.replies[0], FEEDBACK);
        assert!(graded.replies[1].starts_with("💬 TÌNH HUỐNG GIAO TIẾP"));

        let session = state.engine.snapshot("w1").await.unwrap();
        assert_eq!(session.round_history, vec![3]);
    }

    #[tokio::test]
    async fn status_counts_units_and_sessions() {
        let state = state();
        let Json(before) = status_handler(State(state.clone())).await;
        assert_eq!(before.units, 4);
        assert_eq!(before.emergency, 1);
        assert_eq!(before.communication, 2);
        assert_eq!(before.generic, 1);
        assert_eq!(before.sessions, 0);
        assert_eq!(before.batch_size, 4);

        let _ = message_handler(State(state.clone()), payload(Some("w1"), "hello")).await;
        let Json(after) = status_handler(State(state)).await;
        assert_eq!(after.sessions, 1);
    }
}
