//! Retention sweeper.
//!
//! Messages and their media are permanently removed after the configured
//! retention window. Runs as a periodic background task; nothing else in
//! the server assumes a message older than the window remains retrievable.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use parley_shared::constants::RETENTION_SWEEP_INTERVAL_SECS;

use crate::dispatch::SharedStore;
use crate::media::MediaStore;

/// Spawn the periodic sweep task.
pub fn spawn_retention_sweeper(
    store: SharedStore,
    media: Arc<MediaStore>,
    retention_days: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sweep_once(&store, &media, retention_days).await;
        }
    })
}

/// Purge everything older than the retention window and unlink the media
/// files the purged messages referenced.
pub async fn sweep_once(store: &SharedStore, media: &MediaStore, retention_days: i64) {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);

    let result = { store.lock().await.delete_older_than(cutoff) };
    match result {
        Ok((purged, urls)) => {
            let mut removed = 0usize;
            for url in &urls {
                match media.remove_by_url(url).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => debug!(url = %url, error = %e, "failed to remove media file"),
                }
            }
            if purged > 0 {
                info!(purged, media_removed = removed, "purged expired messages");
            }
        }
        Err(e) => error!(error = %e, "retention sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_store::{Database, NewMessage, User};
    use rusqlite::params;
    use tokio::sync::Mutex;

    async fn backdate(store: &SharedStore, id: parley_shared::MessageId, days: i64) {
        let store = store.lock().await;
        store
            .conn()
            .execute(
                "UPDATE messages SET created_at = ?2 WHERE id = ?1",
                params![
                    id.to_string(),
                    (Utc::now() - Duration::days(days)).to_rfc3339()
                ],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_purges_messages_and_media() {
        let dir = tempfile::TempDir::new().unwrap();
        let media = MediaStore::new(dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        let store: SharedStore = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));

        let (alice, bob) = {
            let db = store.lock().await;
            let alice = User::new("alice");
            let bob = User::new("bob");
            db.create_user(&alice).unwrap();
            db.create_user(&bob).unwrap();
            (alice.id, bob.id)
        };

        let item = media
            .store_upload(Some("old.png"), Some("image/png"), b"bytes")
            .await
            .unwrap();

        let old_id = {
            let db = store.lock().await;
            db.create_message(&NewMessage {
                sender: alice,
                receiver: Some(bob),
                text: String::new(),
                media: vec![item.clone()],
                ..Default::default()
            })
            .unwrap()
        };
        backdate(&store, old_id, 60).await;

        let fresh_id = {
            let db = store.lock().await;
            db.create_message(&NewMessage {
                sender: alice,
                receiver: Some(bob),
                text: "still here".into(),
                ..Default::default()
            })
            .unwrap()
        };

        sweep_once(&store, &media, 45).await;

        let db = store.lock().await;
        assert!(db.get_message(old_id).is_err());
        assert!(db.get_message(fresh_id).is_ok());
        drop(db);

        // The media file is gone too.
        let name = item.url.strip_prefix("/uploads/").unwrap();
        assert!(media.read(name).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_is_a_noop_within_the_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let media = MediaStore::new(dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        let store: SharedStore = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));

        let id = {
            let db = store.lock().await;
            let alice = User::new("alice");
            let bob = User::new("bob");
            db.create_user(&alice).unwrap();
            db.create_user(&bob).unwrap();
            db.create_message(&NewMessage {
                sender: alice.id,
                receiver: Some(bob.id),
                text: "recent".into(),
                ..Default::default()
            })
            .unwrap()
        };

        sweep_once(&store, &media, 45).await;
        assert!(store.lock().await.get_message(id).is_ok());
    }
}
