//! Transporte Telegram por long-polling (`getUpdates` / `sendMessage`).
//!
//! Cada chat tiene su propia cola ([`UserQueues`]): sus mensajes se evalúan
//! en orden de llegada y una evaluación lenta de un usuario no retrasa la
//! entrega a los demás.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    session::SessionEngine,
    transport::{InboundMessage, MessageSink, UserQueues},
};

const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Longitud máxima de un mensaje de Telegram, en caracteres.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Convierte una actualización en mensaje para el motor. Se ignoran las que
/// no traen texto y los comandos distintos de `/start`.
pub fn to_inbound(update: &Update) -> Option<InboundMessage> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?.trim();
    if text.starts_with('/') && !text.starts_with("/start") {
        return None;
    }
    Some(InboundMessage::new(message.chat.id.to_string(), text))
}

/// Trocea un texto largo respetando el límite de Telegram, preferentemente
/// en saltos de línea.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                parts.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

pub struct TelegramTransport {
    client: reqwest::Client,
    base: Url,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Result<Self> {
        let base = Url::parse(&format!("{API_BASE}/bot{token}/"))
            .context("Token de Telegram inválido")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self { client, base })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        Ok(self.base.join(method)?)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = self.method_url("getUpdates")?;
        let response: ApiResponse<Vec<Update>> = self
            .client
            .get(url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(anyhow!(
                "getUpdates rechazado: {}",
                response.description.unwrap_or_default()
            ));
        }
        Ok(response.result.unwrap_or_default())
    }

    /// Bucle de long-polling; sólo termina si el proceso se detiene.
    pub async fn run(self: Arc<Self>, engine: Arc<SessionEngine>) -> Result<()> {
        info!("🤖 Transporte Telegram escuchando (long-polling).");
        let mut offset = 0;
        let sink: Arc<dyn MessageSink> = self.clone();
        let mut queues = UserQueues::new(engine, sink);

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(err) => {
                    warn!("Fallo consultando Telegram: {err:#}. Reintentando...");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = to_inbound(&update) else {
                    debug!("Actualización {} ignorada.", update.update_id);
                    continue;
                };

                queues.push(message);
            }
        }
    }
}

#[async_trait]
impl MessageSink for TelegramTransport {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        let chat_id: i64 = user_id
            .parse()
            .with_context(|| format!("Id de chat de Telegram inválido: {user_id}"))?;
        let url = self.method_url("sendMessage")?;

        for part in split_message(text, MAX_MESSAGE_CHARS) {
            let response: ApiResponse<serde_json::Value> = self
                .client
                .post(url.clone())
                .json(&SendMessage {
                    chat_id,
                    text: &part,
                })
                .send()
                .await?
                .json()
                .await?;
            if !response.ok {
                let reason = response.description.unwrap_or_default();
                error!("sendMessage rechazado para {chat_id}: {reason}");
                return Err(anyhow!("sendMessage rechazado: {reason}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<Update> {
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(response.ok);
        response.result.unwrap()
    }

    #[test]
    fn text_updates_become_inbound_messages() {
        let updates = parse(
            r#"{"ok":true,"result":[
                {"update_id":10,"message":{"chat":{"id":42},"text":" hello "}},
                {"update_id":11,"message":{"chat":{"id":42},"sticker":{}}},
                {"update_id":12,"edited_message":{"chat":{"id":1},"text":"x"}},
                {"update_id":13,"message":{"chat":{"id":7},"text":"/help"}},
                {"update_id":14,"message":{"chat":{"id":7},"text":"/start"}}
            ]}"#,
        );
        let inbound: Vec<InboundMessage> = updates.iter().filter_map(to_inbound).collect();
        assert_eq!(
            inbound,
            vec![
                InboundMessage::new("42", "hello"),
                InboundMessage::new("7", "/start"),
            ]
        );
    }

    #[test]
    fn long_messages_are_split_on_lines() {
        let text = "aaaa\nbbbb\ncccc";
        let parts = split_message(text, 10);
        assert_eq!(parts, vec!["aaaa\nbbbb\n", "cccc"]);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn overlong_line_is_hard_split() {
        let parts = split_message("abcdefghij", 4);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn token_builds_method_urls() {
        let transport = TelegramTransport::new("123:ABC").unwrap();
        assert_eq!(
            transport.method_url("getUpdates").unwrap().as_str(),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }
}
