//! Evaluación de respuestas con contexto recuperado (RAG).
//!
//! Flujo:
//!   1. Recuperar los `SUPPORT_PASSAGES` pasajes más similares al escenario.
//!   2. Componer la petición con escenario, respuesta y pasajes.
//!   3. El LLM devuelve una valoración con formato enumerado.
//!   4. Se extrae la calificación numérica del texto.

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    error::{EngineError, EngineResult},
    llm::CompletionService,
    models::{Category, TextUnit},
    rating,
    vector_store::Retriever,
};

/// Pasajes de apoyo solicitados al recuperador por cada evaluación.
pub const SUPPORT_PASSAGES: usize = 3;

/// Resultado de evaluar una respuesta.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    /// Texto que se muestra tal cual al usuario.
    pub feedback: String,
    /// Calificación 1–5 consumida por el motor de sesiones.
    pub rating: u8,
}

/// Orquestador: recuperador + servicio de completado + extractor.
#[derive(Clone)]
pub struct Assessor {
    references: Arc<Retriever>,
    llm: Arc<dyn CompletionService>,
    temperature: f64,
    max_tokens: u64,
}

impl Assessor {
    pub fn new(
        references: Arc<Retriever>,
        llm: Arc<dyn CompletionService>,
        temperature: f64,
        max_tokens: u64,
    ) -> Self {
        Self {
            references,
            llm,
            temperature,
            max_tokens,
        }
    }

    /// Evalúa la respuesta del usuario a un escenario. Los fallos del
    /// servicio externo se propagan como `AssessmentUnavailable`, sin reintentos.
    pub async fn assess(&self, user_answer: &str, scenario: &TextUnit) -> EngineResult<Assessment> {
        let passages: Vec<&TextUnit> = self
            .references
            .top_k(&scenario.raw_text, SUPPORT_PASSAGES)
            .map(|hit| hit.unit)
            .collect();
        debug!(
            "Escenario {} evaluado con pasajes {:?}",
            scenario.id,
            passages.iter().map(|p| p.id).collect::<Vec<_>>()
        );

        let prompt = build_prompt(scenario, user_answer, &passages);
        let feedback = self
            .llm
            .complete(&prompt, self.temperature, self.max_tokens)
            .await
            .map_err(|e| {
                error!("Error del servicio de completado: {e:#}");
                EngineError::AssessmentUnavailable(e.to_string())
            })?;

        let rating = rating::extract(&feedback);
        Ok(Assessment { feedback, rating })
    }
}

/// Compone la petición estructurada para el servicio de completado.
pub fn build_prompt(scenario: &TextUnit, user_answer: &str, passages: &[&TextUnit]) -> String {
    let context = passages
        .iter()
        .map(|p| p.raw_text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let mut instructions = String::from(
        "Trả lời đúng theo danh sách đánh số sau:\n\
         1. Nhận xét: câu trả lời có phù hợp với tình huống hay không và vì sao.\n\
         2. Đánh giá: chấm từ 1 đến 5, viết đúng dạng \"N sao\" (ví dụ: 4 sao).\n\
         3. Một câu động viên ngắn, không lặp lại các câu đã dùng.\n",
    );
    if scenario.category == Category::Emergency {
        let procedure = scenario
            .expected_answer()
            .or_else(|| passages.first().map(|p| p.raw_text.as_str()))
            .unwrap_or("");
        instructions.push_str(
            "4. Trích dẫn nguyên văn quy trình chuẩn dưới đây, không diễn giải lại.\n",
        );
        instructions.push_str(&format!("Quy trình chuẩn:\n{procedure}\n"));
    }

    format!(
        "Tình huống:\n{}\n\nCâu trả lời của học viên:\n{}\n\nTài liệu tham khảo:\n{}\n\n{}",
        scenario.prompt_text(),
        user_answer.trim(),
        context,
        instructions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Corpus;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, prompt: &str, _t: f64, _m: u64) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn corpus() -> Arc<Retriever> {
        Arc::new(Retriever::new(
            Corpus::from_fragments(vec![
                (
                    "1. Ngừng tim. Bệnh nhân bất tỉnh. Cần thực hiện: gọi hỗ trợ, ép tim".to_string(),
                    Category::Emergency,
                ),
                ("2. Người nhà hỏi chi phí.".to_string(), Category::Communication),
            ])
            .unwrap(),
        ))
    }

    fn assessor(reply: Result<String, String>) -> (Assessor, Arc<Scripted>) {
        let llm = Arc::new(Scripted {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        (Assessor::new(corpus(), llm.clone(), 0.2, 200), llm)
    }

    #[tokio::test]
    async fn assess_returns_feedback_and_rating() {
        let (assessor, llm) = assessor(Ok("1. Phù hợp\n2. 4 sao\n3. Cố lên!".to_string()));
        let scenario = corpus().corpus().get(0).unwrap().clone();
        let result = assessor.assess("Ép tim ngay", &scenario).await.unwrap();
        assert_eq!(result.rating, 4);
        assert!(result.feedback.contains("Cố lên"));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("Ép tim ngay"));
        assert!(prompts[0].contains("gọi hỗ trợ, ép tim"));
        assert!(prompts[0].contains("4. Trích dẫn"));
    }

    #[tokio::test]
    async fn small_corpus_uses_all_passages() {
        let (assessor, llm) = assessor(Ok("không có điểm".to_string()));
        let scenario = corpus().corpus().get(1).unwrap().clone();
        let result = assessor.assess("Giải thích rõ ràng", &scenario).await.unwrap();
        assert_eq!(result.rating, rating::DEFAULT_RATING);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("Người nhà hỏi chi phí"));
        assert!(prompts[0].contains("Ngừng tim"));
        assert!(!prompts[0].contains("4. Trích dẫn"));
    }

    #[tokio::test]
    async fn service_failure_is_assessment_unavailable() {
        let (assessor, _) = assessor(Err("timeout".to_string()));
        let scenario = corpus().corpus().get(0).unwrap().clone();
        let err = assessor.assess("x", &scenario).await.unwrap_err();
        assert!(matches!(err, EngineError::AssessmentUnavailable(_)));
    }

    #[test]
    fn prompt_hides_expected_answer_from_scenario_section() {
        let r = corpus();
        let scenario = r.corpus().get(0).unwrap();
        let prompt = build_prompt(scenario, "trả lời", &[]);
        let scenario_part = prompt.split("Câu trả lời của học viên").next().unwrap();
        assert!(!scenario_part.contains("ép tim"));
    }
}
