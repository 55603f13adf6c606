//! Máquina de estados por usuario: entrega de escenarios, recogida de
//! respuestas, evaluación, resumen por lotes y pregunta de continuación.
//!
//! ```text
//! IDLE ──► AWAITING_RESPONSE ──► AWAITING_RESPONSE (siguiente ronda)
//!                    │
//!                    └──(lote completo)──► AWAITING_CONTINUE ──(sí)──► AWAITING_RESPONSE
//! ```
//!
//! Cada sesión vive tras su propio `tokio::sync::Mutex`: los mensajes de un
//! mismo usuario se serializan y los de usuarios distintos nunca se bloquean.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
    error::{EngineError, EngineResult},
    models::{Category, TextUnit},
    rag::Assessor,
    transport::MessageSink,
    vector_store::Retriever,
};

pub const GREETING: &str =
    "👋 Xin chào! Mình là trợ lý luyện tập xử trí tình huống. Hãy đọc tình huống sau và trả lời nhé.";
pub const APOLOGY: &str =
    "😔 Xin lỗi, hiện mình chưa chấm được câu trả lời. Bạn vui lòng gửi lại câu trả lời sau ít phút.";
pub const CONTINUE_QUESTION: &str = "Bạn có muốn tiếp tục luyện tập không? (có/không)";
pub const DEFER_ACK: &str = "Không sao, mình sẽ hỏi lại sau ít phút nhé. ⏳";
pub const UNRECOGNIZED_HINT: &str = "Mình chưa hiểu ý bạn.";

const AFFIRMATIVE: &[&str] = &[
    "có", "co", "yes", "y", "ok", "okay", "oke", "tiếp", "tiếp tục", "tiep", "tiep tuc",
    "sẵn sàng", "đồng ý", "được", "luôn",
];
const NEGATIVE: &[&str] = &[
    "không", "khong", "ko", "k", "no", "n", "chưa", "chua", "để sau", "de sau", "thôi", "thoi",
    "nghỉ",
];

pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    AwaitingResponse,
    AwaitingContinue,
}

/// Categoría que se está sirviendo; alterna en cada nuevo escenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Emergency,
    Communication,
}

impl Mode {
    pub fn category(self) -> Category {
        match self {
            Self::Emergency => Category::Emergency,
            Self::Communication => Category::Communication,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Emergency => Self::Communication,
            Self::Communication => Self::Emergency,
        }
    }
}

/// Modo con el que arranca toda sesión nueva.
pub const INITIAL_MODE: Mode = Mode::Emergency;

/// Categorías que el motor necesita tener en el corpus.
pub const SERVED_CATEGORIES: [Category; 2] = [Category::Emergency, Category::Communication];

/// Estado conversacional de un usuario. Sólo vive en memoria.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub status: SessionStatus,
    pub mode: Mode,
    pub current_unit: Option<TextUnit>,
    pub round_history: Vec<u8>,
    pub round_count: usize,
    pub total_rounds: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            status: SessionStatus::Idle,
            mode: INITIAL_MODE,
            current_unit: None,
            round_history: Vec::new(),
            round_count: 0,
            total_rounds: 0,
            created_at: now,
            last_activity: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Excellent,
    Solid,
    NeedsPractice,
}

impl Verdict {
    pub fn from_mean(mean: f32) -> Self {
        if mean >= 4.5 {
            Self::Excellent
        } else if mean >= 3.5 {
            Self::Solid
        } else {
            Self::NeedsPractice
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Excellent => "Xuất sắc 🌟",
            Self::Solid => "Vững vàng 👍",
            Self::NeedsPractice => "Cần luyện tập thêm 💪",
        })
    }
}

/// Resumen de un lote de rondas.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub ratings: Vec<u8>,
    pub mean: f32,
    pub verdict: Verdict,
}

impl Summary {
    pub fn from_ratings(ratings: &[u8]) -> Self {
        let mean = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|&r| r as f32).sum::<f32>() / ratings.len() as f32
        };
        Self {
            ratings: ratings.to_vec(),
            mean,
            verdict: Verdict::from_mean(mean),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stars: Vec<String> = self.ratings.iter().map(|r| format!("{r}⭐")).collect();
        write!(
            f,
            "📊 Tổng kết {} tình huống: {}\nĐiểm trung bình: {:.1}/5 - {}",
            self.ratings.len(),
            stars.join(", "),
            self.mean,
            self.verdict
        )
    }
}

/// Respuesta a la pregunta de continuación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueReply {
    Affirmative,
    Negative,
    Unrecognized,
}

impl ContinueReply {
    pub fn classify(text: &str) -> Self {
        let normalized = text
            .trim()
            .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | '…'))
            .to_lowercase();
        let matches_any = |vocabulary: &[&str]| {
            vocabulary.iter().any(|word| {
                normalized == *word
                    || normalized
                        .strip_prefix(word)
                        .and_then(|rest| rest.chars().next())
                        .is_some_and(|c| c.is_whitespace() || c.is_ascii_punctuation())
            })
        };

        if matches_any(NEGATIVE) {
            Self::Negative
        } else if matches_any(AFFIRMATIVE) {
            Self::Affirmative
        } else {
            Self::Unrecognized
        }
    }
}

/// Almacén de sesiones. El mapa sólo se bloquea para localizar o crear la
/// entrada; la mutación de cada sesión usa su propio candado.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<UserId, Arc<AsyncMutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devuelve la sesión del usuario, creándola en `IDLE` si no existe.
    pub fn get_or_create_session(&self, user_id: &str) -> Arc<AsyncMutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                info!("Nueva sesión para el usuario {user_id}");
                Arc::new(AsyncMutex::new(Session::new(user_id)))
            })
            .clone()
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<AsyncMutex<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parámetros del motor.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Rondas por lote antes de emitir el resumen.
    pub batch_size: usize,
    /// Espera pasiva antes de repetir la pregunta tras un "no".
    pub continue_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: 4,
            continue_delay: Duration::from_secs(60),
        }
    }
}

pub struct SessionEngine {
    store: SessionStore,
    scenarios: Arc<Retriever>,
    assessor: Assessor,
    settings: EngineSettings,
}

impl SessionEngine {
    pub fn new(scenarios: Arc<Retriever>, assessor: Assessor, settings: EngineSettings) -> Self {
        Self {
            store: SessionStore::new(),
            scenarios,
            assessor,
            settings,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn scenarios(&self) -> &Retriever {
        &self.scenarios
    }

    /// Copia del estado actual de una sesión, si existe.
    pub async fn snapshot(&self, user_id: &str) -> Option<Session> {
        let session = self.store.get(user_id)?;
        let snapshot = session.lock().await.clone();
        Some(snapshot)
    }

    /// Procesa un mensaje entrante. Toda la transición ocurre con el candado
    /// de la sesión tomado y se aplica sobre una copia: el estado sólo se
    /// confirma cuando todas las respuestas se entregaron al usuario.
    pub async fn handle_message(
        &self,
        user_id: &str,
        text: &str,
        sink: &dyn MessageSink,
    ) -> Result<()> {
        let session = self.store.get_or_create_session(user_id);
        let mut session = session.lock().await;
        session.last_activity = Utc::now();
        debug!("Usuario {user_id} en estado {:?}", session.status);

        let mut staged = session.clone();
        match staged.status {
            SessionStatus::Idle => {
                let scenario = self.present_next(&mut staged)?;
                sink.send(user_id, &format!("{GREETING}\n\n{scenario}")).await?;
            }
            SessionStatus::AwaitingResponse => {
                self.on_answer(&mut staged, text, sink).await?;
            }
            SessionStatus::AwaitingContinue => {
                self.on_continue(&mut staged, text, sink).await?;
            }
        }
        *session = staged;
        Ok(())
    }

    /// Elige el siguiente escenario (alternando el modo salvo en el primero),
    /// lo fija como actual y devuelve su texto visible.
    fn present_next(&self, session: &mut Session) -> EngineResult<String> {
        let mode = if session.current_unit.is_some() {
            session.mode.toggled()
        } else {
            session.mode
        };
        let unit = self.scenarios.pick_random(mode.category())?.clone();
        let shown = unit.visible_text();

        session.mode = mode;
        session.current_unit = Some(unit);
        session.status = SessionStatus::AwaitingResponse;
        Ok(shown)
    }

    async fn on_answer(
        &self,
        session: &mut Session,
        answer: &str,
        sink: &dyn MessageSink,
    ) -> Result<()> {
        let user_id = session.user_id.clone();
        let Some(scenario) = session.current_unit.clone() else {
            warn!("Sesión {user_id} esperaba respuesta sin escenario; se presenta uno nuevo.");
            let shown = self.present_next(session)?;
            sink.send(&user_id, &shown).await?;
            return Ok(());
        };

        let assessment = match self.assessor.assess(answer, &scenario).await {
            Ok(assessment) => assessment,
            Err(EngineError::AssessmentUnavailable(reason)) => {
                warn!("Evaluación no disponible para {user_id}: {reason}");
                sink.send(&user_id, APOLOGY).await?;
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };

        session.round_history.push(assessment.rating);
        session.round_count += 1;
        session.total_rounds += 1;
        info!(
            "Usuario {user_id}: ronda {} calificada con {}",
            session.round_count, assessment.rating
        );

        if session.round_count >= self.settings.batch_size {
            let summary = Summary::from_ratings(&session.round_history);
            session.status = SessionStatus::AwaitingContinue;
            sink.send(&user_id, &assessment.feedback).await?;
            sink.send(&user_id, &format!("{summary}\n\n{CONTINUE_QUESTION}"))
                .await?;
        } else {
            let next = self.present_next(session)?;
            sink.send(&user_id, &assessment.feedback).await?;
            sink.send(&user_id, &next).await?;
        }
        Ok(())
    }

    async fn on_continue(
        &self,
        session: &mut Session,
        text: &str,
        sink: &dyn MessageSink,
    ) -> Result<()> {
        let user_id = session.user_id.clone();
        match ContinueReply::classify(text) {
            ContinueReply::Affirmative => {
                session.round_history.clear();
                session.round_count = 0;
                let next = self.present_next(session)?;
                sink.send(&user_id, &next).await?;
            }
            ContinueReply::Negative => {
                sink.send(&user_id, DEFER_ACK).await?;
                // Espera pasiva con el candado de la sesión tomado: sólo
                // afecta a este usuario.
                tokio::time::sleep(self.settings.continue_delay).await;
                sink.send(&user_id, CONTINUE_QUESTION).await?;
            }
            ContinueReply::Unrecognized => {
                sink.send(&user_id, &format!("{UNRECOGNIZED_HINT} {CONTINUE_QUESTION}"))
                    .await?;
            }
        }
        Ok(())
    }
}
