//! Taxonomía de errores del motor de escenarios.
//!
//! Los errores de arranque (`Indexing`, `NoScenarioAvailable`) abortan el
//! proceso; `AssessmentUnavailable` es recuperable y se convierte en un
//! mensaje de disculpa en la frontera de despacho.

use thiserror::Error;

use crate::models::Category;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Documento ilegible o corpus vacío tras la segmentación.
    #[error("Error de indexación: {0}")]
    Indexing(String),

    /// Una categoría configurada no tiene ningún escenario.
    #[error("No hay escenarios disponibles para la categoría {0}")]
    NoScenarioAvailable(Category),

    /// Falló la llamada al servicio de completado.
    #[error("Evaluación no disponible: {0}")]
    AssessmentUnavailable(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
