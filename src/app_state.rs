use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, session::SessionEngine};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<SessionEngine>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Arc<SessionEngine>, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            config,
            engine,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }
}

/// Instantánea del estado del servicio para `/api/status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub units: usize,
    pub emergency: usize,
    pub communication: usize,
    pub generic: usize,
    pub sessions: usize,
    pub batch_size: usize,
}
