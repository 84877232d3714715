use super::NotificationSink;
use crate::config::TelegramConfig;
use crate::text::split_chunks;
use async_trait::async_trait;
use serde_json::json;

/// Telegram rejects messages longer than this many characters.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Sends notifications through the Telegram Bot API `sendMessage` call.
pub struct TelegramSink {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: DEFAULT_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config; `None` unless both token and chat id are set.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let sink = Self::new(
            config.bot_token.clone().unwrap_or_default(),
            config.chat_id.clone().unwrap_or_default(),
        );
        Some(match &config.api_base {
            Some(base) => sink.with_api_base(base.clone()),
            None => sink,
        })
    }

    /// Point at a different API host (self-hosted Bot API server, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_owned();
        self
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn id(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        for chunk in split_chunks(text, TELEGRAM_MAX_MESSAGE_CHARS) {
            let body = json!({
                "chat_id": self.chat_id,
                "text": chunk,
            });
            // reqwest errors embed the request URL, which carries the bot token.
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("telegram send failed: {}", e.without_url()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("telegram send failed: {status} {body}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({"chat_id": "42", "text": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = TelegramSink::new("TOKEN", "42").with_api_base(server.uri());
        sink.send("hi").await.unwrap();
    }

    #[tokio::test]
    async fn long_text_is_split() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let sink = TelegramSink::new("TOKEN", "42").with_api_base(server.uri());
        sink.send(&"a".repeat(TELEGRAM_MAX_MESSAGE_CHARS + 10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let sink = TelegramSink::new("TOKEN", "42").with_api_base(server.uri());
        let err = sink.send("hi").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn transport_error_hides_bot_token() {
        let sink = TelegramSink::new("SECRET123", "42").with_api_base("http://127.0.0.1:1");
        let err = sink.send("hi").await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("telegram send failed"));
        assert!(!text.contains("SECRET123"), "token leaked: {text}");
    }

    #[test]
    fn from_config_requires_both_fields() {
        let mut config = TelegramConfig::default();
        assert!(TelegramSink::from_config(&config).is_none());
        config.bot_token = Some("t".to_owned());
        config.chat_id = Some("1".to_owned());
        assert!(TelegramSink::from_config(&config).is_some());
    }
}
