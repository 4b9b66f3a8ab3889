//! The forwarding engine.
//!
//! One fixed-interval loop polls the source chat's history and mirrors what
//! changed into the destination chat. Dedup, edit/delete targeting and the
//! `/h` replay buffer are all process-local and bounded — the bridge keeps
//! no persistent state and makes no delivery promise stronger than
//! at-most-once.

pub mod dedup;
pub mod render;

use crate::channels::greenapi::{GreenApiClient, WaMediaKind, WaMessage, WaPayload};
use crate::channels::telegram::{TelegramChannel, TgMedia};
use crate::channels::ChannelMessage;
use crate::config::BridgeConfig;
use dedup::{ForwardMap, SeenIds};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic counters served by the gateway's `/status` endpoint.
#[derive(Default)]
pub struct BridgeCounters {
    pub polls: AtomicU64,
    pub poll_errors: AtomicU64,
    pub forwarded: AtomicU64,
    pub edited: AtomicU64,
    pub deleted: AtomicU64,
    pub skipped: AtomicU64,
}

impl BridgeCounters {
    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::json!({
            "polls": self.polls.load(Ordering::Relaxed),
            "poll_errors": self.poll_errors.load(Ordering::Relaxed),
            "forwarded": self.forwarded.load(Ordering::Relaxed),
            "edited": self.edited.load(Ordering::Relaxed),
            "deleted": self.deleted.load(Ordering::Relaxed),
            "skipped": self.skipped.load(Ordering::Relaxed),
        })
    }
}

/// State shared between the poll loop, the command worker and the gateway.
pub struct BridgeState {
    seen: Mutex<SeenIds>,
    forwards: Mutex<ForwardMap>,
    replay: Mutex<VecDeque<String>>,
    replay_cap: usize,
    last_payload: Mutex<Option<serde_json::Value>>,
    primed: AtomicBool,
    pub counters: BridgeCounters,
}

impl BridgeState {
    pub fn new(cfg: &BridgeConfig) -> Self {
        Self {
            seen: Mutex::new(SeenIds::new(cfg.seen_cache_size)),
            forwards: Mutex::new(ForwardMap::new(cfg.seen_cache_size)),
            replay: Mutex::new(VecDeque::new()),
            replay_cap: cfg.replay_limit.max(1),
            last_payload: Mutex::new(None),
            primed: AtomicBool::new(false),
            counters: BridgeCounters::default(),
        }
    }

    fn push_replay(&self, entry: String) {
        let mut replay = self.replay.lock();
        replay.push_back(entry);
        while replay.len() > self.replay_cap {
            replay.pop_front();
        }
    }

    fn replay_tail(&self, n: usize) -> Vec<String> {
        let replay = self.replay.lock();
        let skip = replay.len().saturating_sub(n);
        replay.iter().skip(skip).cloned().collect()
    }

    fn last_payload(&self) -> Option<serde_json::Value> {
        self.last_payload.lock().clone()
    }
}

/// The poll-and-forward engine.
pub struct Bridge {
    green: Arc<GreenApiClient>,
    telegram: Arc<TelegramChannel>,
    state: Arc<BridgeState>,
    cfg: BridgeConfig,
    source_chat: String,
}

impl Bridge {
    pub fn new(
        green: Arc<GreenApiClient>,
        telegram: Arc<TelegramChannel>,
        state: Arc<BridgeState>,
        cfg: BridgeConfig,
        source_chat: String,
    ) -> Self {
        Self {
            green,
            telegram,
            state,
            cfg,
            source_chat,
        }
    }

    /// Fixed-interval poll loop. Every failure is logged and absorbed; the
    /// loop itself never ends.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            "Bridge polling {} every {}s",
            self.source_chat,
            self.cfg.poll_interval_secs
        );

        loop {
            self.state.counters.polls.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.poll_once().await {
                self.state
                    .counters
                    .poll_errors
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("History poll failed: {e}");
            }
            tokio::time::sleep(Duration::from_secs(self.cfg.poll_interval_secs.max(1))).await;
        }
    }

    /// One history fetch plus dispatch of everything not yet seen.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let (messages, raw) = self
            .green
            .chat_history(&self.source_chat, self.cfg.history_depth)
            .await?;
        *self.state.last_payload.lock() = Some(raw);

        // Warm start: the first successful poll only seeds the seen set, so
        // a restart never re-blasts old history into the destination chat.
        if !self.state.primed.swap(true, Ordering::SeqCst) {
            let mut seen = self.state.seen.lock();
            for msg in &messages {
                seen.insert(msg.id.clone());
            }
            tracing::info!(
                "Seeded {} history ids; forwarding starts with the next poll",
                seen.len()
            );
            return Ok(());
        }

        for msg in messages {
            let newly_seen = self.state.seen.lock().insert(msg.id.clone());
            if !newly_seen {
                continue;
            }

            if msg.outgoing && !self.cfg.forward_outgoing {
                self.state.counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // A single bad message must not sink the rest of the batch. The
            // id stays seen either way: duplicate suppression wins over
            // redelivery.
            if let Err(e) = self.dispatch(&msg).await {
                tracing::warn!("Forwarding {} failed: {e}", msg.id);
            }
        }

        Ok(())
    }

    async fn dispatch(&self, msg: &WaMessage) -> anyhow::Result<()> {
        match &msg.payload {
            WaPayload::Text { text, quote } => {
                self.forward_text(msg, text, quote.as_ref()).await
            }
            WaPayload::Media {
                kind,
                url,
                file_name,
                caption,
                quote,
            } => {
                self.forward_media(msg, *kind, url, file_name.as_deref(), caption.as_deref(), quote.as_ref())
                    .await
            }
            WaPayload::Sticker { url } => self.forward_sticker(msg, url).await,
            WaPayload::Edited {
                target_id,
                new_text,
            } => self.apply_edit(msg, target_id, new_text).await,
            WaPayload::Deleted { target_id } => self.apply_delete(msg, target_id).await,
            WaPayload::Unsupported { type_message } => {
                tracing::debug!("Skipping unsupported message type {type_message}");
                self.state.counters.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn resolve_sender(&self, msg: &WaMessage) -> String {
        if msg.sender_name.is_none() && !msg.sender_id.is_empty() {
            if let Some(name) = self.green.contact_name(&msg.sender_id).await {
                return name;
            }
        }
        render::sender_display(msg)
    }

    async fn forward_text(
        &self,
        msg: &WaMessage,
        text: &str,
        quote: Option<&crate::channels::greenapi::WaQuote>,
    ) -> anyhow::Result<()> {
        let sender = self.resolve_sender(msg).await;
        let rendered = render::render_text(&sender, text, quote, self.cfg.quote_preview_chars);

        let tg_id = self.telegram.send_message_returning_id(&rendered).await?;
        if let Some(tg_id) = tg_id {
            self.state.forwards.lock().insert(msg.id.clone(), tg_id);
        }
        self.state.push_replay(rendered);
        self.state.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn forward_media(
        &self,
        msg: &WaMessage,
        kind: WaMediaKind,
        url: &str,
        file_name: Option<&str>,
        caption: Option<&str>,
        quote: Option<&crate::channels::greenapi::WaQuote>,
    ) -> anyhow::Result<()> {
        let sender = self.resolve_sender(msg).await;
        let tg_kind = match kind {
            WaMediaKind::Image => TgMedia::Photo,
            WaMediaKind::Video => TgMedia::Video,
            WaMediaKind::Document => TgMedia::Document,
            WaMediaKind::Audio => TgMedia::Audio,
            WaMediaKind::Voice => TgMedia::Voice,
        };

        match self
            .green
            .download_media(url, self.cfg.media_max_bytes)
            .await
        {
            Ok(bytes) => {
                let file_name = file_name.unwrap_or(default_media_file_name(kind));
                let tg_caption = render::caption_for(&sender, caption);
                let tg_id = self
                    .telegram
                    .send_media_bytes(tg_kind, bytes, file_name, Some(&tg_caption))
                    .await?;
                if let Some(tg_id) = tg_id {
                    self.state.forwards.lock().insert(msg.id.clone(), tg_id);
                }
            }
            Err(e) => {
                // Oversized or unfetchable media degrades to a link so the
                // message is not lost entirely.
                tracing::warn!("Media download failed for {}: {e}; sending link", msg.id);
                let body = format!("{} {url}", render::media_placeholder(kind));
                let rendered =
                    render::render_text(&sender, &body, quote, self.cfg.quote_preview_chars);
                let tg_id = self.telegram.send_message_returning_id(&rendered).await?;
                if let Some(tg_id) = tg_id {
                    self.state.forwards.lock().insert(msg.id.clone(), tg_id);
                }
            }
        }

        self.state
            .push_replay(render::render_media_note(&sender, kind, caption));
        self.state.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn forward_sticker(&self, msg: &WaMessage, url: &str) -> anyhow::Result<()> {
        let sender = self.resolve_sender(msg).await;

        let tg_id = match self.telegram.send_sticker_by_url(url).await {
            Ok(tg_id) => tg_id,
            Err(e) => {
                // Telegram could not fetch or accept the WebP; re-upload it
                // as a document instead.
                tracing::warn!("sendSticker by URL failed for {}: {e}; re-uploading", msg.id);
                let bytes = self
                    .green
                    .download_media(url, self.cfg.media_max_bytes)
                    .await?;
                self.telegram
                    .send_media_bytes(
                        TgMedia::Document,
                        bytes,
                        "sticker.webp",
                        Some(&render::caption_for(&sender, None)),
                    )
                    .await?
            }
        };

        if let Some(tg_id) = tg_id {
            self.state.forwards.lock().insert(msg.id.clone(), tg_id);
        }
        self.state
            .push_replay(format!("<b>{}:</b>\n[sticker]", crate::channels::telegram::escape_html(&sender)));
        self.state.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn apply_edit(
        &self,
        msg: &WaMessage,
        target_id: &str,
        new_text: &str,
    ) -> anyhow::Result<()> {
        let sender = self.resolve_sender(msg).await;
        let rendered = render::render_edited(&sender, new_text, None, self.cfg.quote_preview_chars);

        let mapped = self.state.forwards.lock().get(target_id);
        match mapped {
            Some(tg_id) => {
                self.telegram.edit_message(tg_id, &rendered).await?;
            }
            None => {
                // Mapping evicted (or the original predates this process);
                // a standalone banner is the best we can do.
                self.telegram.send_message_returning_id(&rendered).await?;
            }
        }

        self.state.push_replay(rendered);
        self.state.counters.edited.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn apply_delete(&self, msg: &WaMessage, target_id: &str) -> anyhow::Result<()> {
        let sender = self.resolve_sender(msg).await;
        let tombstone = render::render_deleted(&sender);

        let mapped = self.state.forwards.lock().remove(target_id);
        match mapped {
            Some(tg_id) => {
                if let Err(e) = self.telegram.edit_message(tg_id, &tombstone).await {
                    // Some messages cannot be edited (e.g. media); drop the
                    // forwarded copy instead so the delete is still mirrored.
                    tracing::warn!("Tombstone edit failed for {target_id}: {e}; deleting");
                    self.telegram.delete_message(tg_id).await?;
                }
            }
            None => {
                self.telegram.send_message_returning_id(&tombstone).await?;
            }
        }

        self.state.counters.deleted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn default_media_file_name(kind: WaMediaKind) -> &'static str {
    match kind {
        WaMediaKind::Image => "photo.jpg",
        WaMediaKind::Video => "video.mp4",
        WaMediaKind::Document => "file",
        WaMediaKind::Audio => "audio.mp3",
        WaMediaKind::Voice => "voice.ogg",
    }
}

// ── Chat commands ────────────────────────────────────────────────

const COMMAND_USAGE: &str =
    "Commands: /h [n] — replay the last n forwarded messages; /dump — raw history snapshot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Replay(Option<usize>),
    Dump,
    Unknown,
}

/// Parse a destination-chat message into a bridge command. Returns `None`
/// for ordinary chatter. Telegram appends `@botname` to commands issued in
/// groups; the suffix is ignored.
pub fn parse_command(text: &str) -> Option<BridgeCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next()?.split('@').next().unwrap_or_default();
    match command {
        "/h" => Some(BridgeCommand::Replay(
            parts.next().and_then(|arg| arg.parse().ok()),
        )),
        "/dump" => Some(BridgeCommand::Dump),
        _ => Some(BridgeCommand::Unknown),
    }
}

/// Consume destination-chat messages and act on the ones that are commands.
pub async fn run_command_worker(
    mut rx: tokio::sync::mpsc::Receiver<ChannelMessage>,
    state: Arc<BridgeState>,
    telegram: Arc<TelegramChannel>,
    cfg: BridgeConfig,
) -> anyhow::Result<()> {
    while let Some(msg) = rx.recv().await {
        let Some(command) = parse_command(&msg.content) else {
            continue;
        };
        tracing::info!("Command from {}: {}", msg.sender, msg.content);

        let outcome = match command {
            BridgeCommand::Replay(n) => {
                let cap = cfg.replay_limit.max(1);
                let limit = n.unwrap_or(cap).clamp(1, cap);
                let entries = state.replay_tail(limit);
                if entries.is_empty() {
                    telegram.send_text_chunks("No forwarded messages yet.").await
                } else {
                    let digest = format!(
                        "<b>Last {} forwarded message(s)</b>\n\n{}",
                        entries.len(),
                        entries.join("\n\n")
                    );
                    telegram.send_text_chunks(&digest).await
                }
            }
            BridgeCommand::Dump => match state.last_payload() {
                Some(payload) => {
                    let bytes = serde_json::to_vec_pretty(&payload)
                        .unwrap_or_else(|_| b"{}".to_vec());
                    let file_name = format!(
                        "greenapi-history-{}.json",
                        chrono::Utc::now().format("%Y%m%d-%H%M%S")
                    );
                    telegram
                        .send_media_bytes(
                            TgMedia::Document,
                            bytes,
                            &file_name,
                            Some("Raw history snapshot"),
                        )
                        .await
                        .map(|_| ())
                }
                None => telegram.send_text_chunks("No poll data captured yet.").await,
            },
            BridgeCommand::Unknown => telegram.send_text_chunks(COMMAND_USAGE).await,
        };

        if let Err(e) = outcome {
            tracing::warn!("Command handling failed: {e}");
        }
    }
    Ok(())
}
