//! Best-effort failure notifications.
//!
//! One HTTP POST per terminal failure. Delivery problems are logged and
//! swallowed: a broken alert channel must never change the run's outcome.

use crate::config::NotifyConfig;
use crate::utils::errors::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram caps messages at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    endpoint: Option<Endpoint>,
    host: String,
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        let endpoint = match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Some(Endpoint {
                url: format!("{}/bot{}/sendMessage", config.api_url.trim_end_matches('/'), token),
                chat_id: chat_id.clone(),
            }),
            _ => None,
        };
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self { endpoint, host }
    }

    /// A notifier that never sends anything.
    pub fn disabled() -> Self {
        Self {
            endpoint: None,
            host: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Send `subject`/`detail` if a channel is configured. Never fails.
    pub async fn notify(&self, subject: &str, detail: &str) {
        let Some(endpoint) = &self.endpoint else {
            debug!(subject, "Notification channel not configured, skipping");
            return;
        };

        let text = self.format(subject, detail);
        match send(endpoint, &text).await {
            Ok(()) => info!(subject, "Failure notification sent"),
            Err(e) => warn!(subject, error = %e, "Failed to send notification"),
        }
    }

    fn format(&self, subject: &str, detail: &str) -> String {
        let text = format!("[{}] {}\n{}", self.host, subject, detail.trim());
        truncate_chars(&text, MAX_MESSAGE_CHARS)
    }
}

async fn send(endpoint: &Endpoint, text: &str) -> Result<()> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    client
        .post(&endpoint.url)
        .json(&SendMessage {
            chat_id: &endpoint.chat_id,
            text,
        })
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
