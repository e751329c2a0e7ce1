//! Per-message embedding and compression caches
//!
//! Message text is immutable, so a computed value stays valid for the
//! message's lifetime. Slots are keyed by message position and hold a
//! `OnceCell`: concurrent packs for the same conversation wait on a single
//! provider call, and a failed call leaves the slot empty for a later retry.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

type Slot<T> = Arc<OnceCell<T>>;

/// Session-owned cache of derived per-message values
#[derive(Default)]
pub struct MessageCache {
    embeddings: DashMap<usize, Slot<Arc<Vec<f32>>>>,
    compressions: DashMap<usize, Slot<Arc<str>>>,
}

/// Where a cached value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<T> {
    pub value: T,
    pub hit: bool,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached embedding for `position`, computing it with `init` on a miss
    pub async fn embedding<F, Fut, E>(
        &self,
        position: usize,
        init: F,
    ) -> Result<Lookup<Arc<Vec<f32>>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>>,
    {
        let slot = Arc::clone(&self.embeddings.entry(position).or_default());
        get_or_try_init(&slot, move || async move { init().await.map(Arc::new) }).await
    }

    /// Cached compressed text for `position`, computing it with `init` on a miss
    pub async fn compression<F, Fut, E>(
        &self,
        position: usize,
        init: F,
    ) -> Result<Lookup<Arc<str>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let slot = Arc::clone(&self.compressions.entry(position).or_default());
        get_or_try_init(&slot, move || async move { init().await.map(Arc::from) }).await
    }

    pub fn cached_compression(&self, position: usize) -> Option<Arc<str>> {
        self.compressions
            .get(&position)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn has_embedding(&self, position: usize) -> bool {
        self.embeddings
            .get(&position)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.embeddings.clear();
        self.compressions.clear();
    }
}

async fn get_or_try_init<T, F, Fut, E>(slot: &OnceCell<T>, init: F) -> Result<Lookup<T>, E>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(value) = slot.get() {
        return Ok(Lookup {
            value: value.clone(),
            hit: true,
        });
    }
    let mut computed = false;
    let value = slot
        .get_or_try_init(|| {
            computed = true;
            init()
        })
        .await?
        .clone();
    // Another caller may have filled the slot while we waited.
    Ok(Lookup {
        value,
        hit: !computed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_compression_computed_once() {
        let cache = MessageCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let lookup = cache
                .compression(7, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>("short".to_string())
                })
                .await
                .unwrap();
            assert_eq!(&*lookup.value, "short");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_compression(7).as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn test_hit_flag() {
        let cache = MessageCache::new();
        let first = cache
            .embedding(1, || async { Ok::<_, ()>(vec![1.0]) })
            .await
            .unwrap();
        let second = cache
            .embedding(1, || async { Ok::<_, ()>(vec![2.0]) })
            .await
            .unwrap();
        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(*second.value, vec![1.0]);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = MessageCache::new();
        let failed = cache
            .embedding(3, || async { Err::<Vec<f32>, _>("down") })
            .await;
        assert!(failed.is_err());
        assert!(!cache.has_embedding(3));

        let retried = cache
            .embedding(3, || async { Ok::<_, &str>(vec![0.5]) })
            .await
            .unwrap();
        assert!(!retried.hit);
        assert!(cache.has_embedding(3));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MessageCache::new();
        cache
            .compression(0, || async { Ok::<_, ()>("x".to_string()) })
            .await
            .unwrap();
        cache.clear();
        assert!(cache.cached_compression(0).is_none());
    }
}
