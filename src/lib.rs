//! Asistente de entrenamiento por escenarios: indexación TF-IDF de documentos,
//! recuperación por similitud, sesiones por usuario y evaluación con LLM.

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod rating;
pub mod session;
pub mod telegram;
pub mod transport;
pub mod vector_store;
