//! Inbound media: download Telegram files into the sanctioned attachments
//! directory and hand the engine a path reference. A TTL reaper keeps the
//! directory bounded.
//!
//! When a payload qualifies as more than one kind, interception order is
//! deterministic: image, then audio, then document.

use std::path::{Path, PathBuf};

use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::{debug, warn};

use herald_core::types::EventKind;

/// Download the message's media, if any, returning the kind and saved path.
pub async fn extract_media(bot: &Bot, msg: &Message, dir: &Path) -> Option<(EventKind, PathBuf)> {
    // photo: highest resolution is last
    if let Some(photo) = msg.photo().and_then(|p| p.last()) {
        return download(bot, photo.file.id.clone(), dir, EventKind::Image, "jpg").await;
    }
    if let Some(sticker) = msg.sticker() {
        return download(bot, sticker.file.id.clone(), dir, EventKind::Image, "webp").await;
    }
    if let Some(voice) = msg.voice() {
        return download(bot, voice.file.id.clone(), dir, EventKind::Audio, "ogg").await;
    }
    if let Some(audio) = msg.audio() {
        return download(bot, audio.file.id.clone(), dir, EventKind::Audio, "mp3").await;
    }
    if let Some(doc) = msg.document() {
        let ext = doc
            .file_name
            .as_deref()
            .and_then(|n| n.rsplit('.').next())
            .unwrap_or("bin")
            .to_string();
        return download(bot, doc.file.id.clone(), dir, EventKind::Document, &ext).await;
    }
    None
}

async fn download(
    bot: &Bot,
    file_id: String,
    dir: &Path,
    kind: EventKind,
    ext: &str,
) -> Option<(EventKind, PathBuf)> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!("get_file failed: {e}");
            return None;
        }
    };

    let name = format!("{}.{}", uuid::Uuid::new_v4().simple(), sanitize_ext(ext));
    let path = dir.join(name);
    let mut dest = match tokio::fs::File::create(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), "cannot create attachment file: {e}");
            return None;
        }
    };
    if let Err(e) = bot.download_file(&file.path, &mut dest).await {
        warn!("download_file failed: {e}");
        let _ = tokio::fs::remove_file(&path).await;
        return None;
    }
    debug!(path = %path.display(), kind = %kind, "attachment saved");
    Some((kind, path))
}

fn sanitize_ext(ext: &str) -> String {
    let cleaned: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned.to_lowercase()
    }
}

/// Delete attachments older than `ttl_hours`. Returns how many went.
pub fn reap_once(dir: &Path, ttl_hours: u64) -> usize {
    let ttl = std::time::Duration::from_secs(ttl_hours * 3600);
    let now = std::time::SystemTime::now();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= ttl);
        if expired && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(removed, "attachment reaper pass");
    }
    removed
}

/// Periodic reaper task.
pub fn spawn_reaper(dir: PathBuf, ttl_hours: u64, interval_ms: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1000)));
        loop {
            interval.tick().await;
            reap_once(&dir, ttl_hours);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaper_removes_expired_keeps_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.jpg"), b"x").unwrap();
        // ttl 0: everything counts as expired
        assert_eq!(reap_once(dir.path(), 0), 1);

        std::fs::write(dir.path().join("fresh.jpg"), b"x").unwrap();
        assert_eq!(reap_once(dir.path(), 24), 0);
        assert!(dir.path().join("fresh.jpg").exists());
    }

    #[test]
    fn extensions_are_sanitized() {
        assert_eq!(sanitize_ext("PnG"), "png");
        assert_eq!(sanitize_ext("../../etc"), "etc");
        assert_eq!(sanitize_ext(""), "bin");
        assert_eq!(sanitize_ext("waytoolongextension"), "waytoolo");
    }
}
