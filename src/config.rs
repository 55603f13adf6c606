//! Carga y gestión de configuración de la aplicación (transportes, corpus y LLM).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

use crate::models::Category;

/// Proveedores con servicio de completado implementado.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("LLM_PROVIDER no soportado: {other} (disponible: openai)")),
        }
    }
}

/// Transportes de mensajería activos.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    Telegram,
    Web,
    Both,
}

impl TransportMode {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "web" => Ok(Self::Web),
            "both" => Ok(Self::Both),
            other => Err(anyhow!("Transporte no soportado: {other}")),
        }
    }

    pub fn telegram(&self) -> bool {
        matches!(self, Self::Telegram | Self::Both)
    }

    pub fn web(&self) -> bool {
        matches!(self, Self::Web | Self::Both)
    }
}

/// Documento de escenarios, opcionalmente etiquetado con una categoría.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioDoc {
    pub path: PathBuf,
    pub category: Option<Category>,
}

impl ScenarioDoc {
    /// Acepta `ruta` o `categoría=ruta`.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        match entry.split_once('=') {
            Some((category, path)) => Ok(Self {
                path: PathBuf::from(path.trim()),
                category: Some(Category::from_str(category)?),
            }),
            None => Ok(Self {
                path: PathBuf::from(entry),
                category: None,
            }),
        }
    }

    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        let docs: Vec<Self> = list
            .split(',')
            .filter(|e| !e.trim().is_empty())
            .map(Self::parse)
            .collect::<Result<_>>()?;
        if docs.is_empty() {
            return Err(anyhow!("SCENARIO_DOCS no contiene ningún documento"));
        }
        Ok(docs)
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub transport: TransportMode,
    pub telegram_token: Option<String>,
    pub server_addr: String,
    pub open_browser: bool,

    pub scenario_docs: Vec<ScenarioDoc>,
    pub reference_doc: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u64,

    pub batch_size: usize,
    pub continue_delay: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        var("OPENAI_API_KEY").ok_or_else(|| anyhow!("Falta OPENAI_API_KEY en el entorno"))?;

        let transport = TransportMode::from_str(
            &var("TRANSPORT").unwrap_or_else(|| "telegram".to_string()),
        )?;
        let telegram_token = var("TELEGRAM_TOKEN");
        if transport.telegram() && telegram_token.is_none() {
            return Err(anyhow!(
                "Falta TELEGRAM_TOKEN en el entorno (requerido con TRANSPORT={transport:?})"
            ));
        }

        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());
        let open_browser = parse_or(&var, "OPEN_BROWSER", false)?;

        let scenario_docs = ScenarioDoc::parse_list(
            &var("SCENARIO_DOCS").unwrap_or_else(|| "data/tinh_huong.txt".to_string()),
        )?;
        let reference_doc = var("REFERENCE_DOC").map(PathBuf::from);
        let chunk_size = parse_or(&var, "CHUNK_SIZE", 300usize)?;
        let chunk_overlap = parse_or(&var, "CHUNK_OVERLAP", 0usize)?;

        let llm_provider =
            LlmProvider::from_str(&var("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string()))?;
        let llm_chat_model = var("LLM_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let llm_temperature = parse_or(&var, "LLM_TEMPERATURE", 0.4f64)?;
        let llm_max_tokens = parse_or(&var, "LLM_MAX_TOKENS", 500u64)?;

        let batch_size = parse_or(&var, "BATCH_SIZE", 4usize)?;
        if batch_size == 0 {
            return Err(anyhow!("BATCH_SIZE debe ser mayor que 0"));
        }
        let continue_delay = Duration::from_secs(parse_or(&var, "CONTINUE_DELAY_SECS", 60u64)?);

        Ok(Self {
            transport,
            telegram_token,
            server_addr,
            open_browser,
            scenario_docs,
            reference_doc,
            chunk_size,
            chunk_overlap,
            llm_provider,
            llm_chat_model,
            llm_temperature,
            llm_max_tokens,
            batch_size,
            continue_delay,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_required_secrets() {
        let cfg = load(&[("OPENAI_API_KEY", "sk"), ("TELEGRAM_TOKEN", "t")]).unwrap();
        assert_eq!(cfg.transport, TransportMode::Telegram);
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.continue_delay, Duration::from_secs(60));
        assert_eq!(cfg.chunk_size, 300);
        assert_eq!(cfg.scenario_docs.len(), 1);
        assert!(cfg.reference_doc.is_none());
    }

    #[test]
    fn missing_completion_key_is_fatal() {
        let err = load(&[("TELEGRAM_TOKEN", "t")]).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn telegram_token_only_required_for_telegram() {
        assert!(load(&[("OPENAI_API_KEY", "sk")]).is_err());
        let cfg = load(&[("OPENAI_API_KEY", "sk"), ("TRANSPORT", "web")]).unwrap();
        assert!(cfg.transport.web());
        assert!(!cfg.transport.telegram());
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = load(&[
            ("OPENAI_API_KEY", "sk"),
            ("TRANSPORT", "web"),
            ("BATCH_SIZE", "cuatro"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));
    }

    #[test]
    fn unimplemented_llm_provider_is_fatal() {
        for provider in ["gemini", "ollama", "otro"] {
            let err = load(&[
                ("OPENAI_API_KEY", "sk"),
                ("TRANSPORT", "web"),
                ("LLM_PROVIDER", provider),
            ])
            .unwrap_err();
            assert!(err.to_string().contains("LLM_PROVIDER"), "{provider}");
        }
        let cfg = load(&[
            ("OPENAI_API_KEY", "sk"),
            ("TRANSPORT", "web"),
            ("LLM_PROVIDER", "OpenAI"),
        ])
        .unwrap();
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
    }

    #[test]
    fn scenario_docs_accept_category_tags() {
        let docs =
            ScenarioDoc::parse_list("emergency=data/cc.pdf, communication=data/gt.txt,data/x.pdf")
                .unwrap();
        assert_eq!(docs[0].category, Some(Category::Emergency));
        assert_eq!(docs[1].path, PathBuf::from("data/gt.txt"));
        assert_eq!(docs[2].category, None);
        assert!(ScenarioDoc::parse("otro=data/a.pdf").is_err());
    }
}
