use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, warn};

use crate::semantic::{decode_embedding_blob, embedding_text_hash, encode_embedding_blob};
use crate::util::{ensure_parent_directory, now_utc_string};

use super::{EmbeddingClient, ServiceError, ServiceResult};

/// Persistent embedding cache keyed by `(model_id, sha256(text))`.
pub struct EmbeddingStore {
    connection: Connection,
}

impl EmbeddingStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_directory(path)?;
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open embedding cache: {}", path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL for embedding cache")?;

        Self::with_connection(connection)
    }

    pub fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS embedding_cache (
                  model_id TEXT NOT NULL,
                  text_hash TEXT NOT NULL,
                  embedding BLOB NOT NULL,
                  embedding_dim INTEGER NOT NULL,
                  generated_at TEXT NOT NULL,
                  PRIMARY KEY (model_id, text_hash)
                );
                ",
            )
            .context("failed to create embedding_cache table")?;

        Ok(Self { connection })
    }

    pub fn load(&self, model_id: &str, text: &str) -> Result<Option<Vec<f32>>> {
        let row = self
            .connection
            .query_row(
                "
                SELECT embedding, embedding_dim
                FROM embedding_cache
                WHERE model_id = ?1 AND text_hash = ?2
                LIMIT 1
                ",
                params![model_id, embedding_text_hash(text)],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(blob, dim)| decode_embedding_blob(&blob, dim.max(0) as usize)))
    }

    pub fn save(&self, model_id: &str, text: &str, embedding: &[f32]) -> Result<()> {
        self.connection.execute(
            "
            INSERT INTO embedding_cache(model_id, text_hash, embedding, embedding_dim, generated_at)
            VALUES(?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(model_id, text_hash) DO UPDATE SET
              embedding=excluded.embedding,
              embedding_dim=excluded.embedding_dim,
              generated_at=excluded.generated_at
            ",
            params![
                model_id,
                embedding_text_hash(text),
                encode_embedding_blob(embedding),
                embedding.len() as i64,
                now_utc_string(),
            ],
        )?;

        Ok(())
    }
}

/// Memoises embeddings for the lifetime of a run so the question and the
/// schema corpus are each embedded once, optionally persisting them across
/// runs. Cache failures are logged and never fail the embedding call.
pub struct EmbeddingMemo<E> {
    inner: E,
    memory: Mutex<HashMap<String, Vec<f32>>>,
    store: Option<Mutex<EmbeddingStore>>,
}

impl<E: EmbeddingClient> EmbeddingMemo<E> {
    pub fn new(inner: E, store: Option<EmbeddingStore>) -> Self {
        Self {
            inner,
            memory: Mutex::new(HashMap::new()),
            store: store.map(Mutex::new),
        }
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        let memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = memory.get(text) {
            return Some(hit.clone());
        }
        drop(memory);

        let store = self.store.as_ref()?;
        let store = store.lock().unwrap_or_else(PoisonError::into_inner);
        match store.load(self.inner.model_id(), text) {
            Ok(Some(hit)) => {
                self.remember(text, &hit);
                Some(hit)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "embedding cache lookup failed");
                None
            }
        }
    }

    fn remember(&self, text: &str, embedding: &[f32]) {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.to_string(), embedding.to_vec());
    }

    fn persist(&self, text: &str, embedding: &[f32]) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let store = store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = store.save(self.inner.model_id(), text, embedding) {
            warn!(error = %err, "embedding cache write failed");
        }
    }
}

impl<E: EmbeddingClient> EmbeddingClient for EmbeddingMemo<E> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn embed_batch(&self, texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>> {
        let mut resolved = texts
            .iter()
            .map(|text| self.lookup(text))
            .collect::<Vec<Option<Vec<f32>>>>();

        let mut missing = Vec::<&str>::new();
        for (text, slot) in texts.iter().zip(resolved.iter()) {
            if slot.is_none() && !missing.contains(text) {
                missing.push(*text);
            }
        }

        if !missing.is_empty() {
            debug!(
                model_id = %self.inner.model_id(),
                requested = texts.len(),
                missing = missing.len(),
                "embedding cache miss"
            );
            let fetched = self.inner.embed_batch(&missing)?;
            for (text, embedding) in missing.iter().zip(fetched.iter()) {
                self.remember(text, embedding);
                self.persist(text, embedding);
            }
            for (text, slot) in texts.iter().zip(resolved.iter_mut()) {
                if slot.is_none() {
                    let position = missing.iter().position(|value| value == text);
                    *slot = position.and_then(|index| fetched.get(index).cloned());
                }
            }
        }

        resolved
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| ServiceError::InvalidResponse {
                    service: "embedding",
                    message: format!("no embedding resolved for input {index}"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::services::LocalHashEmbedder;

    struct CountingEmbedder {
        inner: LocalHashEmbedder,
        texts_embedded: AtomicUsize,
    }

    impl EmbeddingClient for CountingEmbedder {
        fn model_id(&self) -> &str {
            "counting"
        }

        fn embed_batch(&self, texts: &[&str]) -> ServiceResult<Vec<Vec<f32>>> {
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed_batch(texts)
        }
    }

    fn counting() -> CountingEmbedder {
        CountingEmbedder {
            inner: LocalHashEmbedder::new(32),
            texts_embedded: AtomicUsize::new(0),
        }
    }

    #[test]
    fn memo_embeds_each_distinct_text_once() {
        let memo = EmbeddingMemo::new(counting(), None);

        let first = memo.embed_batch(&["alpha", "beta", "alpha"]).expect("batch");
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], first[2]);

        let again = memo.embed("beta").expect("cached");
        assert_eq!(again, first[1]);
        assert_eq!(memo.inner.texts_embedded.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn store_serves_embeddings_across_memo_instances() {
        let dir = crate::util::scratch_dir("embedding-cache");
        let path = dir.join("cache.sqlite");

        let first = EmbeddingMemo::new(counting(), Some(EmbeddingStore::open(&path).expect("open")));
        let original = first.embed("county flood claims").expect("embed");
        drop(first);

        let second =
            EmbeddingMemo::new(counting(), Some(EmbeddingStore::open(&path).expect("reopen")));
        let cached = second.embed("county flood claims").expect("cached");
        assert_eq!(cached, original);
        assert_eq!(second.inner.texts_embedded.load(Ordering::SeqCst), 0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn store_round_trips_through_in_memory_connection() {
        let store = EmbeddingStore::with_connection(Connection::open_in_memory().expect("memory"))
            .expect("schema");
        store.save("m", "text", &[0.5, -0.5]).expect("save");
        assert_eq!(store.load("m", "text").expect("load"), Some(vec![0.5, -0.5]));
        assert_eq!(store.load("other", "text").expect("load"), None);
    }
}
