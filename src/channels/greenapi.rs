//! Green-API client — the WhatsApp-gateway side of the bridge.
//!
//! Green-API exposes the instance over plain HTTP with the method name in the
//! path: `/waInstance{id}/{method}/{token}`. The bridge only needs four
//! methods: `getChatHistory` (the poll target), `getContactInfo` (sender-name
//! fallback, cached), `getStateInstance` (doctor probe) and a raw GET of the
//! `downloadUrl` carried by media records.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GreenApiError {
    #[error("green-api request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("green-api {method} returned {status}: {body}")]
    Api {
        method: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed green-api payload: {0}")]
    Payload(String),
}

/// Direction-agnostic media kinds found in chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaMediaKind {
    Image,
    Video,
    Document,
    Audio,
    Voice,
}

/// Reply-quote context attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaQuote {
    pub participant: Option<String>,
    pub text: String,
}

/// Normalized body of one history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaPayload {
    Text {
        text: String,
        quote: Option<WaQuote>,
    },
    Media {
        kind: WaMediaKind,
        url: String,
        file_name: Option<String>,
        caption: Option<String>,
        quote: Option<WaQuote>,
    },
    Sticker {
        url: String,
    },
    Edited {
        target_id: String,
        new_text: String,
    },
    Deleted {
        target_id: String,
    },
    Unsupported {
        type_message: String,
    },
}

/// One normalized `getChatHistory` record.
#[derive(Debug, Clone)]
pub struct WaMessage {
    pub id: String,
    pub outgoing: bool,
    pub timestamp: u64,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub payload: WaPayload,
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Message text lives in `textMessage` for plain messages and under
/// `extendedTextMessage.text` for link-preview/quoted variants; history
/// records are not consistent about which one they fill.
fn text_of(value: &serde_json::Value) -> String {
    str_field(value, "textMessage")
        .or_else(|| {
            value
                .get("extendedTextMessage")
                .and_then(|ext| str_field(ext, "text"))
        })
        .unwrap_or_default()
}

fn quote_of(value: &serde_json::Value) -> Option<WaQuote> {
    let quoted = value.get("quotedMessage")?;
    let text = {
        let direct = text_of(quoted);
        if direct.is_empty() {
            // Quoted media carries no text; show its kind instead.
            match str_field(quoted, "typeMessage").as_deref() {
                Some("imageMessage") => "[photo]".to_string(),
                Some("videoMessage") => "[video]".to_string(),
                Some("documentMessage") => "[document]".to_string(),
                Some("audioMessage") => "[audio]".to_string(),
                Some("stickerMessage") => "[sticker]".to_string(),
                _ => "[message]".to_string(),
            }
        } else {
            direct
        }
    };

    Some(WaQuote {
        participant: str_field(quoted, "participant"),
        text,
    })
}

fn media_of(value: &serde_json::Value, kind: WaMediaKind) -> Option<WaPayload> {
    let url = str_field(value, "downloadUrl")?;
    Some(WaPayload::Media {
        kind,
        url,
        file_name: str_field(value, "fileName"),
        caption: str_field(value, "caption"),
        quote: quote_of(value),
    })
}

impl WaMessage {
    /// Normalize one raw history record. Records without an `idMessage` are
    /// unusable for dedup and are dropped by returning `None`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let id = str_field(value, "idMessage")?;
        let outgoing = str_field(value, "type").as_deref() == Some("outgoing");
        let timestamp = value
            .get("timestamp")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let sender_id = str_field(value, "senderId").unwrap_or_default();
        let sender_name =
            str_field(value, "senderName").or_else(|| str_field(value, "senderContactName"));

        // A record of a known type that is missing its key field (no
        // downloadUrl, no edit target) degrades to Unsupported instead of
        // being dropped, so it still lands in the seen set exactly once.
        let unsupported = |type_message: &str| WaPayload::Unsupported {
            type_message: type_message.to_string(),
        };

        let type_message = str_field(value, "typeMessage").unwrap_or_default();
        let payload = match type_message.as_str() {
            "textMessage" | "extendedTextMessage" | "quotedMessage" => WaPayload::Text {
                text: text_of(value),
                quote: quote_of(value),
            },
            "imageMessage" => {
                media_of(value, WaMediaKind::Image).unwrap_or_else(|| unsupported("imageMessage"))
            }
            "videoMessage" => {
                media_of(value, WaMediaKind::Video).unwrap_or_else(|| unsupported("videoMessage"))
            }
            "documentMessage" => media_of(value, WaMediaKind::Document)
                .unwrap_or_else(|| unsupported("documentMessage")),
            "audioMessage" => {
                // Voice notes arrive as audioMessage with an ogg/opus mime.
                let kind = if str_field(value, "mimeType")
                    .map(|m| m.contains("ogg"))
                    .unwrap_or(false)
                {
                    WaMediaKind::Voice
                } else {
                    WaMediaKind::Audio
                };
                media_of(value, kind).unwrap_or_else(|| unsupported("audioMessage"))
            }
            "stickerMessage" => match str_field(value, "downloadUrl") {
                Some(url) => WaPayload::Sticker { url },
                None => unsupported("stickerMessage"),
            },
            "editedMessage" => match str_field(value, "editedMessageId") {
                Some(target_id) => WaPayload::Edited {
                    target_id,
                    new_text: text_of(value),
                },
                None => unsupported("editedMessage"),
            },
            "deletedMessage" => match str_field(value, "deletedMessageId") {
                Some(target_id) => WaPayload::Deleted { target_id },
                None => unsupported("deletedMessage"),
            },
            other => unsupported(other),
        };

        Some(Self {
            id,
            outgoing,
            timestamp,
            sender_id,
            sender_name,
            payload,
        })
    }
}

/// HTTP client for one Green-API instance.
pub struct GreenApiClient {
    api_url: String,
    id_instance: String,
    api_token: String,
    client: reqwest::Client,
    contact_names: Mutex<HashMap<String, String>>,
}

impl GreenApiClient {
    pub fn new(api_url: String, id_instance: String, api_token: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            id_instance,
            api_token,
            client: reqwest::Client::new(),
            contact_names: Mutex::new(HashMap::new()),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/waInstance{}/{}/{}",
            self.api_url, self.id_instance, method, self.api_token
        )
    }

    async fn check_status(
        method: &'static str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, GreenApiError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(GreenApiError::Api {
            method,
            status,
            body,
        })
    }

    /// Fetch the newest `count` records of the source chat. Returns the
    /// normalized records oldest-first (the wire order is newest-first)
    /// together with the raw payload for diagnostics dumps.
    pub async fn chat_history(
        &self,
        chat_id: &str,
        count: u32,
    ) -> Result<(Vec<WaMessage>, serde_json::Value), GreenApiError> {
        let resp = self
            .client
            .post(self.method_url("getChatHistory"))
            .timeout(Duration::from_secs(30))
            .json(&serde_json::json!({ "chatId": chat_id, "count": count }))
            .send()
            .await?;
        let resp = Self::check_status("getChatHistory", resp).await?;
        let raw: serde_json::Value = resp.json().await?;

        let records = raw.as_array().ok_or_else(|| {
            GreenApiError::Payload("getChatHistory did not return an array".to_string())
        })?;

        let mut messages: Vec<WaMessage> = Vec::with_capacity(records.len());
        for record in records {
            match WaMessage::from_value(record) {
                Some(msg) => messages.push(msg),
                None => tracing::debug!("Skipping history record without idMessage"),
            }
        }
        messages.reverse();
        Ok((messages, raw))
    }

    /// Contact display name, cached per chat id. Failures degrade to `None`;
    /// the caller falls back to the bare id.
    pub async fn contact_name(&self, contact_id: &str) -> Option<String> {
        if contact_id.is_empty() {
            return None;
        }
        if let Some(name) = self.contact_names.lock().get(contact_id) {
            return Some(name.clone());
        }

        let resp = self
            .client
            .post(self.method_url("getContactInfo"))
            .timeout(Duration::from_secs(15))
            .json(&serde_json::json!({ "chatId": contact_id }))
            .send()
            .await;

        let value: serde_json::Value = match resp {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("getContactInfo parse error for {contact_id}: {e}");
                    return None;
                }
            },
            Ok(r) => {
                tracing::debug!("getContactInfo for {contact_id} returned {}", r.status());
                return None;
            }
            Err(e) => {
                tracing::debug!("getContactInfo failed for {contact_id}: {e}");
                return None;
            }
        };

        let name = str_field(&value, "name").or_else(|| str_field(&value, "contactName"))?;
        self.contact_names
            .lock()
            .insert(contact_id.to_string(), name.clone());
        Some(name)
    }

    /// Download media bytes from the record's `downloadUrl`, enforcing the
    /// configured size cap before and after the transfer.
    pub async fn download_media(
        &self,
        url: &str,
        max_bytes: u64,
    ) -> Result<Vec<u8>, GreenApiError> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;
        let resp = Self::check_status("downloadUrl", resp).await?;

        if let Some(len) = resp.content_length() {
            if len > max_bytes {
                return Err(GreenApiError::Payload(format!(
                    "media of {len} bytes exceeds cap of {max_bytes}"
                )));
            }
        }

        let bytes = resp.bytes().await?;
        if bytes.len() as u64 > max_bytes {
            return Err(GreenApiError::Payload(format!(
                "media of {} bytes exceeds cap of {max_bytes}",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }

    /// Instance authorization state; "authorized" means the poll can work.
    pub async fn state_instance(&self) -> Result<String, GreenApiError> {
        let resp = self
            .client
            .get(self.method_url("getStateInstance"))
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        let resp = Self::check_status("getStateInstance", resp).await?;
        let value: serde_json::Value = resp.json().await?;
        str_field(&value, "stateInstance").ok_or_else(|| {
            GreenApiError::Payload("getStateInstance response missing stateInstance".to_string())
        })
    }
}
