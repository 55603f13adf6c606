//! Interfaz abstracta de mensajería y frontera de despacho por petición.
//!
//! El motor sólo conoce pares `(user_id, texto)`; Telegram y el formulario
//! web implementan [`MessageSink`] cada uno a su manera.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::session::SessionEngine;

/// Mensaje entrante de cualquier transporte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
        }
    }
}

/// Destino de los mensajes salientes.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<()>;
}

/// Acumula las respuestas en memoria (formulario web y pruebas).
#[derive(Debug, Default)]
pub struct CollectingSink {
    sent: Mutex<Vec<(String, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vacía y devuelve los mensajes acumulados.
    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl MessageSink for CollectingSink {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

const INTERNAL_ERROR_REPLY: &str = "⚠️ Đã có lỗi xảy ra, bạn vui lòng thử lại sau.";

/// Entrega un mensaje al motor. Los errores por petición se registran y se
/// convierten en un aviso al usuario; nunca se propagan al bucle del transporte.
pub async fn dispatch(engine: &SessionEngine, message: &InboundMessage, sink: &dyn MessageSink) {
    if message.text.trim().is_empty() {
        warn!("Mensaje vacío de {} ignorado.", message.user_id);
        return;
    }

    if let Err(err) = engine
        .handle_message(&message.user_id, &message.text, sink)
        .await
    {
        error!("Error procesando mensaje de {}: {err:#}", message.user_id);
        if let Err(send_err) = sink.send(&message.user_id, INTERNAL_ERROR_REPLY).await {
            error!("No se pudo avisar a {}: {send_err:#}", message.user_id);
        }
    }
}

/// Una cola por usuario con su propia tarea: los mensajes de un mismo
/// usuario se procesan en orden de llegada y los de usuarios distintos
/// avanzan en paralelo. Las colas viven tanto como el proceso, igual que
/// las sesiones.
pub struct UserQueues {
    engine: Arc<SessionEngine>,
    sink: Arc<dyn MessageSink>,
    queues: HashMap<String, mpsc::UnboundedSender<InboundMessage>>,
}

impl UserQueues {
    pub fn new(engine: Arc<SessionEngine>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            engine,
            sink,
            queues: HashMap::new(),
        }
    }

    /// Encola el mensaje detrás de los pendientes del mismo usuario.
    pub fn push(&mut self, mut message: InboundMessage) {
        if let Some(queue) = self.queues.get(&message.user_id) {
            match queue.send(message) {
                Ok(()) => return,
                // La tarea del usuario terminó; se crea una nueva.
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }

        debug!("Nueva cola de mensajes para {}", message.user_id);
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let engine = self.engine.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dispatch(&engine, &message, sink.as_ref()).await;
            }
        });

        let user_id = message.user_id.clone();
        if tx.send(message).is_err() {
            error!("La cola de {user_id} se cerró antes de recibir el mensaje.");
        }
        self.queues.insert(user_id, tx);
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
