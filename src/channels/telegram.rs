//! Telegram Bot API channel — the destination side of the bridge.
//!
//! Sends are HTML-formatted with a plain-text retry (Telegram rejects the
//! whole message when it dislikes the markup), media arrives as in-memory
//! bytes re-uploaded via multipart, and [`Channel::listen`] runs a
//! `getUpdates` long-poll so chat members can issue bridge commands.

use super::traits::{Channel, ChannelMessage};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

/// Telegram's maximum message length for text messages.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;
/// Reserve room for the "(continued)" / "(continues...)" markers.
const TELEGRAM_CONTINUATION_OVERHEAD: usize = 30;
/// Long-poll timeout passed to getUpdates.
const TELEGRAM_POLL_TIMEOUT_SECS: u64 = 30;

/// Escape text destined for a `parse_mode: HTML` payload.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Split a message into chunks respecting Telegram's 4096-char limit,
/// preferring newline and then space boundaries over hard cuts.
fn split_message_for_telegram(message: &str) -> Vec<String> {
    if message.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH {
        return vec![message.to_string()];
    }

    let chunk_limit = TELEGRAM_MAX_MESSAGE_LENGTH - TELEGRAM_CONTINUATION_OVERHEAD;
    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH {
            chunks.push(remaining.to_string());
            break;
        }

        let hard_split = remaining
            .char_indices()
            .nth(chunk_limit)
            .map_or(remaining.len(), |(idx, _)| idx);
        let window = &remaining[..hard_split];

        // A break point in the first half of the window would waste too much
        // of the chunk; fall through to the next candidate instead.
        let min_useful = window
            .char_indices()
            .nth(chunk_limit / 2)
            .map_or(0, |(idx, _)| idx);

        let cut = window
            .rfind('\n')
            .filter(|pos| *pos >= min_useful)
            .or_else(|| window.rfind(' ').filter(|pos| *pos >= min_useful))
            .map_or(hard_split, |pos| pos + 1);

        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }

    chunks
}

fn wrap_continuation(chunks: &[String], index: usize) -> String {
    let chunk = &chunks[index];
    if chunks.len() == 1 {
        chunk.clone()
    } else if index == 0 {
        format!("{chunk}\n\n(continues...)")
    } else if index == chunks.len() - 1 {
        format!("(continued)\n\n{chunk}")
    } else {
        format!("(continued)\n\n{chunk}\n\n(continues...)")
    }
}

fn extract_message_id(value: &serde_json::Value) -> Option<i64> {
    value.get("result")?.get("message_id")?.as_i64()
}

/// Media kinds the Bot API accepts as multipart uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TgMedia {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
}

impl TgMedia {
    fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Video => "sendVideo",
            Self::Document => "sendDocument",
            Self::Audio => "sendAudio",
            Self::Voice => "sendVoice",
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
        }
    }
}

/// Bot API client bound to one destination chat.
pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API host (local test servers).
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// One sendMessage attempt with HTML markup, retried without
    /// `parse_mode` when Telegram rejects the markup. Returns the new
    /// message id when the response carries one.
    async fn send_html_with_plain_retry(&self, text: &str) -> anyhow::Result<Option<i64>> {
        let html_body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&html_body)
            .send()
            .await?;

        if resp.status().is_success() {
            let data: serde_json::Value = resp.json().await?;
            return Ok(extract_message_id(&data));
        }

        let html_status = resp.status();
        let html_err = resp.text().await.unwrap_or_default();
        tracing::warn!(
            status = ?html_status,
            "Telegram sendMessage with HTML failed; retrying as plain text"
        );

        let plain_body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let plain_status = resp.status();
            let plain_err = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Telegram sendMessage failed (html {html_status}: {html_err}; plain {plain_status}: {plain_err})"
            );
        }

        let data: serde_json::Value = resp.json().await?;
        Ok(extract_message_id(&data))
    }

    /// Send text of any length, chunked to the 4096-char limit.
    pub async fn send_text_chunks(&self, message: &str) -> anyhow::Result<()> {
        let chunks = split_message_for_telegram(message);
        for index in 0..chunks.len() {
            let text = wrap_continuation(&chunks, index);
            self.send_html_with_plain_retry(&text).await?;
            if index < chunks.len() - 1 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(())
    }

    /// Send one message and return its Telegram message id, needed for the
    /// edit/delete mapping. Oversized texts degrade to a chunked send and
    /// return no id (edits can no longer target them as one message).
    pub async fn send_message_returning_id(&self, text: &str) -> anyhow::Result<Option<i64>> {
        if text.chars().count() > TELEGRAM_MAX_MESSAGE_LENGTH {
            self.send_text_chunks(text).await?;
            return Ok(None);
        }
        self.send_html_with_plain_retry(text).await
    }

    /// Rewrite a previously sent message in place.
    pub async fn edit_message(&self, message_id: i64, text: &str) -> anyhow::Result<()> {
        let html_body = serde_json::json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&html_body)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }

        let html_status = resp.status();
        let html_err = resp.text().await.unwrap_or_default();

        let plain_body = serde_json::json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "text": text,
        });
        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&plain_body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let plain_status = resp.status();
            let plain_err = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Telegram editMessageText failed (html {html_status}: {html_err}; plain {plain_status}: {plain_err})"
            );
        }
        Ok(())
    }

    pub async fn delete_message(&self, message_id: i64) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.api_url("deleteMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "message_id": message_id,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram deleteMessage failed: {err}");
        }
        Ok(())
    }

    /// Re-upload media bytes via multipart. Returns the new message id.
    pub async fn send_media_bytes(
        &self,
        kind: TgMedia,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> anyhow::Result<Option<i64>> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let mut form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .part(kind.field(), part);
        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url(kind.method()))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram {} failed: {err}", kind.method());
        }

        tracing::info!("Telegram {} sent: {file_name}", kind.method());
        let data: serde_json::Value = resp.json().await?;
        Ok(extract_message_id(&data))
    }

    /// Stickers can be sent straight from a URL (Telegram fetches WebP
    /// itself); callers fall back to a document upload when this fails.
    pub async fn send_sticker_by_url(&self, url: &str) -> anyhow::Result<Option<i64>> {
        let resp = self
            .client
            .post(self.api_url("sendSticker"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "sticker": url,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendSticker by URL failed: {err}");
        }

        let data: serde_json::Value = resp.json().await?;
        Ok(extract_message_id(&data))
    }

    /// Extract a command-bearing message from one getUpdates entry.
    /// Messages from other chats (or without text) are ignored — the bridge
    /// serves exactly one destination chat.
    fn parse_update(&self, update: &serde_json::Value) -> Option<ChannelMessage> {
        let message = update.get("message")?;
        let chat_id = message.get("chat")?.get("id")?;
        if chat_id.to_string() != self.chat_id {
            return None;
        }

        let text = message.get("text")?.as_str()?.to_string();
        let from = message.get("from");
        let sender = from
            .and_then(|f| f.get("username").and_then(serde_json::Value::as_str))
            .or_else(|| {
                from.and_then(|f| f.get("first_name").and_then(serde_json::Value::as_str))
            })
            .unwrap_or("unknown")
            .to_string();

        Some(ChannelMessage {
            id: message
                .get("message_id")
                .map(|id| id.to_string())
                .unwrap_or_default(),
            sender,
            content: text,
            chat_id: self.chat_id.clone(),
            timestamp: message.get("date").and_then(serde_json::Value::as_u64).unwrap_or(0),
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str) -> anyhow::Result<()> {
        self.send_text_chunks(message).await
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;
        tracing::info!("Telegram channel listening for commands...");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": TELEGRAM_POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            });

            let resp = match self
                .client
                .post(self.api_url("getUpdates"))
                .timeout(Duration::from_secs(TELEGRAM_POLL_TIMEOUT_SECS + 15))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let ok = data
                .get("ok")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true);
            if !ok {
                let error_code = data
                    .get("error_code")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or_default();
                let description = data
                    .get("description")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown Telegram API error");

                if error_code == 409 {
                    tracing::warn!(
                        "Telegram polling conflict (409): {description}. \
Ensure only one wabridge process is using this bot token."
                    );
                    tokio::time::sleep(Duration::from_secs(2)).await;
                } else {
                    tracing::warn!("Telegram getUpdates API error (code={error_code}): {description}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                continue;
            }

            if let Some(updates) = data.get("result").and_then(serde_json::Value::as_array) {
                for update in updates {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(msg) = self.parse_update(update) else {
                        continue;
                    };
                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        match tokio::time::timeout(
            Duration::from_secs(5),
            self.client.get(self.api_url("getMe")).send(),
        )
        .await
        {
            Ok(Ok(resp)) => resp.status().is_success(),
            Ok(Err(e)) => {
                tracing::debug!("Telegram health check failed: {e}");
                false
            }
            Err(_) => {
                tracing::debug!("Telegram health check timed out after 5s");
                false
            }
        }
    }
}
