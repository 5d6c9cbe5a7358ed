//! Reply egress: code-fence-aware chunking under Telegram's 4096-char
//! limit, MarkdownV2 with plain-text fallback, and outbound attachment
//! detection for agent-produced files.

use std::path::{Path, PathBuf};

use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode, ThreadId};
use tracing::warn;

/// Maximum characters per Telegram message (limit is 4096; 4090 for safety).
const CHUNK_MAX: usize = 4090;

/// Send a response: any sanctioned attachment path on its own line goes out
/// as a photo/document, the remaining text as chunked messages.
pub async fn send_response(
    bot: &Bot,
    chat: ChatId,
    thread: Option<ThreadId>,
    text: &str,
    attachments_dir: &Path,
) {
    let (paths, remaining) = split_outbound_attachments(text, attachments_dir);

    for path in paths {
        let is_image = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("jpg" | "jpeg" | "png" | "gif" | "webp")
        );
        let result = if is_image {
            let mut req = bot.send_photo(chat, InputFile::file(path.clone()));
            req.message_thread_id = thread;
            req.await
        } else {
            let mut req = bot.send_document(chat, InputFile::file(path.clone()));
            req.message_thread_id = thread;
            req.await
        };
        if let Err(e) = result {
            warn!(path = %path.display(), "attachment send failed: {e}");
        }
    }

    if remaining.trim().is_empty() {
        return;
    }
    for chunk in split_chunks_smart(&remaining) {
        send_chunk(bot, chat, thread, &chunk).await;
    }
}

/// MarkdownV2 first; plain text when Telegram rejects the formatting.
async fn send_chunk(bot: &Bot, chat: ChatId, thread: Option<ThreadId>, chunk: &str) {
    let mut req = bot.send_message(chat, chunk.to_string());
    req.message_thread_id = thread;
    req.parse_mode = Some(ParseMode::MarkdownV2);
    if req.await.is_ok() {
        return;
    }
    let mut plain = bot.send_message(chat, chunk.to_string());
    plain.message_thread_id = thread;
    if let Err(e) = plain.await {
        warn!("message send failed: {e}");
    }
}

/// Pull out lines that are paths inside the sanctioned attachments
/// directory. Paths outside it stay in the text untouched.
pub fn split_outbound_attachments(text: &str, attachments_dir: &Path) -> (Vec<PathBuf>, String) {
    let mut paths = Vec::new();
    let mut remaining = Vec::new();
    for line in text.lines() {
        match sanctioned_path(attachments_dir, line.trim()) {
            Some(path) => paths.push(path),
            None => remaining.push(line),
        }
    }
    (paths, remaining.join("\n"))
}

/// Accept `candidate` only when it resolves to an existing file under
/// `dir`. Symlinks and `..` segments are resolved before the containment
/// check, so escapes are rejected.
pub fn sanctioned_path(dir: &Path, candidate: &str) -> Option<PathBuf> {
    if !candidate.starts_with('/') || candidate.contains(char::is_whitespace) {
        return None;
    }
    let resolved = std::fs::canonicalize(candidate).ok()?;
    let root = std::fs::canonicalize(dir).ok()?;
    if resolved.starts_with(&root) && resolved.is_file() {
        Some(resolved)
    } else {
        None
    }
}

/// Code-fence-aware splitter: when a split lands inside a fenced block the
/// fence is closed before the boundary and reopened in the next chunk.
pub fn split_chunks_smart(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in text.split('\n') {
        let cost = if current.is_empty() {
            line.len()
        } else {
            1 + line.len()
        };

        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(ref lang) = fence_lang {
                current.push_str("```");
                current.push_str(lang);
                current.push('\n');
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after) = trimmed.strip_prefix("```") {
            fence_lang = match fence_lang {
                Some(_) => None,
                None => Some(after.trim().to_string()),
            };
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Force-split any single line that still exceeds the cap.
    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
            continue;
        }
        let mut remaining = chunk.as_str();
        while remaining.len() > CHUNK_MAX {
            let split_at = remaining[..CHUNK_MAX]
                .rfind('\n')
                .or_else(|| remaining[..CHUNK_MAX].rfind(' '))
                .unwrap_or(CHUNK_MAX);
            result.push(remaining[..split_at].to_string());
            remaining = remaining[split_at..].trim_start();
        }
        if !remaining.is_empty() {
            result.push(remaining.to_string());
        }
    }
    result
}

/// Escape the characters MarkdownV2 reserves.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|' | '{'
            | '}' | '.' | '!' | '>' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}
