//! Abstracción sobre Rig para el servicio de completado (OpenAI).

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::Prompt;

use crate::config::{AppConfig, LlmProvider};

const SYSTEM_PROMPT: &str = r#"
Bạn là giảng viên điều dưỡng đang chấm bài tập xử trí tình huống.
Luôn trả lời bằng tiếng Việt, ngắn gọn, đúng định dạng được yêu cầu.
Chỉ dựa vào tài liệu tham khảo được cung cấp.
"#;

/// Contrato estrecho con el servicio de texto generativo.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f64, max_tokens: u64) -> Result<String>;
}

/// Gestor de LLMs para chat/completado.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn complete_with_openai(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u64,
    ) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        // OPENAI_API_KEY ya se validó al cargar la configuración.
        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(SYSTEM_PROMPT)
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl CompletionService for LlmManager {
    async fn complete(&self, prompt: &str, temperature: f64, max_tokens: u64) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(prompt, temperature, max_tokens).await,
        }
    }
}
