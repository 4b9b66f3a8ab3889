//! Message rendering: WhatsApp records → Telegram HTML.
//!
//! Every rendered form starts with a bold sender line. Reply quotes become a
//! single italic preview line so a busy group stays readable on the Telegram
//! side. Captions stay plain text — Telegram applies no parse mode to them
//! here, so they need no escaping.

use crate::channels::greenapi::{WaMediaKind, WaMessage, WaQuote};
use crate::channels::telegram::escape_html;
use crate::util::truncate_with_ellipsis;

/// Display name for a record: explicit sender name, else the bare id with
/// the `@c.us` / `@g.us` suffix stripped, else a fixed fallback.
pub fn sender_display(msg: &WaMessage) -> String {
    if let Some(name) = &msg.sender_name {
        return name.clone();
    }
    let bare = msg.sender_id.split('@').next().unwrap_or("");
    if bare.is_empty() {
        "unknown".to_string()
    } else {
        bare.to_string()
    }
}

fn sender_line(sender: &str) -> String {
    format!("<b>{}:</b>", escape_html(sender))
}

fn quote_line(quote: &WaQuote, preview_chars: usize) -> String {
    let mut preview = truncate_with_ellipsis(quote.text.trim(), preview_chars);
    if preview.is_empty() {
        preview = "[message]".to_string();
    }
    match &quote.participant {
        Some(participant) => {
            let who = participant.split('@').next().unwrap_or(participant);
            format!("<i>↩ {}: {}</i>", escape_html(who), escape_html(&preview))
        }
        None => format!("<i>↩ {}</i>", escape_html(&preview)),
    }
}

/// Full HTML rendering of a text message.
pub fn render_text(
    sender: &str,
    text: &str,
    quote: Option<&WaQuote>,
    quote_preview_chars: usize,
) -> String {
    let mut out = sender_line(sender);
    if let Some(quote) = quote {
        out.push('\n');
        out.push_str(&quote_line(quote, quote_preview_chars));
    }
    out.push('\n');
    out.push_str(&escape_html(text));
    out
}

/// Plain-text caption attached to re-uploaded media.
pub fn caption_for(sender: &str, caption: Option<&str>) -> String {
    match caption {
        Some(caption) if !caption.is_empty() => format!("{sender}:\n{caption}"),
        _ => format!("{sender}:"),
    }
}

/// Short tag used when media degrades to a text link and in replay entries.
pub fn media_placeholder(kind: WaMediaKind) -> &'static str {
    match kind {
        WaMediaKind::Image => "[photo]",
        WaMediaKind::Video => "[video]",
        WaMediaKind::Document => "[document]",
        WaMediaKind::Audio => "[audio]",
        WaMediaKind::Voice => "[voice]",
    }
}

/// Replay-buffer entry for a media message (the bytes are not kept).
pub fn render_media_note(sender: &str, kind: WaMediaKind, caption: Option<&str>) -> String {
    let mut out = sender_line(sender);
    out.push('\n');
    out.push_str(media_placeholder(kind));
    if let Some(caption) = caption {
        if !caption.is_empty() {
            out.push(' ');
            out.push_str(&escape_html(caption));
        }
    }
    out
}

/// Rendering applied when the source message was edited.
pub fn render_edited(
    sender: &str,
    new_text: &str,
    quote: Option<&WaQuote>,
    quote_preview_chars: usize,
) -> String {
    let mut out = sender_line(sender);
    if let Some(quote) = quote {
        out.push('\n');
        out.push_str(&quote_line(quote, quote_preview_chars));
    }
    out.push_str("\n✏️ <i>edited</i>\n");
    out.push_str(&escape_html(new_text));
    out
}

/// Tombstone left in place of a deleted message.
pub fn render_deleted(sender: &str) -> String {
    format!("{}\n🗑 <i>message deleted</i>", sender_line(sender))
}
