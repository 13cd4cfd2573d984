use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::TelegramConfig;
use crate::error::{AppError, Result};
use crate::notify::{ButtonAction, NotificationMessage, NotificationTransport};

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage` with inline keyboards.
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    admin_chat_id: String,
    info_chat_id: Option<String>,
}

// Manual Debug impl to avoid leaking the bot token
impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("api_base", &self.api_base)
            .field("admin_chat_id", &self.admin_chat_id)
            .field("info_chat_id", &self.info_chat_id)
            .finish()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<Value>,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() || config.admin_chat_id.is_empty() {
            return Err(AppError::Config(
                "telegram.bot_token and telegram.admin_chat_id are required when telegram is enabled".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()?,
            api_base: API_BASE.to_string(),
            bot_token: config.bot_token.clone(),
            admin_chat_id: config.admin_chat_id.clone(),
            info_chat_id: config.info_chat_id.clone().filter(|id| !id.is_empty()),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn send(&self, chat_id: &str, message: &NotificationMessage) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text: &message.text,
            parse_mode: message.parse_mode,
            disable_web_page_preview: true,
            reply_markup: inline_keyboard(message),
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Telegram sendMessage returned {status}: {detail}"
            )));
        }
        Ok(())
    }
}

/// `reply_markup` for the message's buttons, if it has any.
pub fn inline_keyboard(message: &NotificationMessage) -> Option<Value> {
    if message.buttons.is_empty() {
        return None;
    }
    let rows: Vec<Vec<Value>> = message
        .buttons
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match &button.action {
                    ButtonAction::Url(url) => serde_json::json!({ "text": button.label, "url": url }),
                    ButtonAction::Callback(data) => {
                        serde_json::json!({ "text": button.label, "callback_data": data })
                    }
                })
                .collect()
        })
        .collect();
    Some(serde_json::json!({ "inline_keyboard": rows }))
}

#[async_trait]
impl NotificationTransport for TelegramTransport {
    async fn send_to_admin(&self, message: &NotificationMessage) -> Result<()> {
        self.send(&self.admin_chat_id, message).await
    }

    /// Falls back to the admin chat when no info channel is configured.
    async fn send_to_info_channel(&self, message: &NotificationMessage) -> Result<()> {
        let chat = self.info_chat_id.as_deref().unwrap_or(&self.admin_chat_id);
        self.send(chat, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Button;

    #[test]
    fn test_inline_keyboard_shape() {
        let message = NotificationMessage {
            text: "hi".to_string(),
            parse_mode: "HTML",
            buttons: vec![vec![
                Button::url("View", "https://example.com"),
                Button::callback("Approve", "approve:1".to_string()),
            ]],
        };
        let markup = inline_keyboard(&message).unwrap();
        assert_eq!(markup["inline_keyboard"][0][0]["url"], "https://example.com");
        assert_eq!(markup["inline_keyboard"][0][1]["callback_data"], "approve:1");

        let plain = NotificationMessage {
            buttons: Vec::new(),
            ..message
        };
        assert!(inline_keyboard(&plain).is_none());
    }

    #[test]
    fn test_requires_credentials() {
        let config = TelegramConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(TelegramTransport::new(&config).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = TelegramConfig {
            enabled: true,
            bot_token: "123:secret".to_string(),
            admin_chat_id: "42".to_string(),
            ..Default::default()
        };
        let transport = TelegramTransport::new(&config).unwrap();
        assert!(!format!("{transport:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_send_failure_is_an_error() {
        let config = TelegramConfig {
            enabled: true,
            bot_token: "123:secret".to_string(),
            admin_chat_id: "42".to_string(),
            ..Default::default()
        };
        let transport = TelegramTransport::new(&config)
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        let message = NotificationMessage {
            text: "hi".to_string(),
            parse_mode: "HTML",
            buttons: Vec::new(),
        };
        assert!(transport.send_to_admin(&message).await.is_err());
    }
}
