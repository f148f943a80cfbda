//! In-memory implementation of the store contract for local development
//! and tests.
//!
//! Leases are tracked as expiry instants and checked lazily on every
//! operation, so a paused test clock is enough to simulate expiry.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, Instant};

use super::metastore::{KvPair, MetaEvent, MetaEventKind, MetaStore, MetaStoreError};

struct Entry {
    value: String,
    lease: Option<i64>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<MetaEvent>,
}

#[derive(Default)]
struct Inner {
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<i64, Instant>,
    next_lease: i64,
    rev: i64,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn lease_alive(&self, lease: i64) -> bool {
        self.leases
            .get(&lease)
            .is_some_and(|exp| *exp > Instant::now())
    }

    /// Drops entries whose lease ran out, as the real store would, and
    /// tells watchers about it.
    fn expire(&mut self) {
        let now = Instant::now();
        let dead: Vec<i64> = self
            .leases
            .iter()
            .filter(|(_, exp)| **exp <= now)
            .map(|(id, _)| *id)
            .collect();
        if dead.is_empty() {
            return;
        }
        for id in &dead {
            self.leases.remove(id);
        }
        let gone: Vec<String> = self
            .kvs
            .iter()
            .filter(|(_, e)| e.lease.is_some_and(|l| dead.contains(&l)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in gone {
            self.kvs.remove(&key);
            self.rev += 1;
            self.notify(MetaEventKind::Delete, &key);
        }
    }

    fn notify(&mut self, kind: MetaEventKind, key: &str) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for w in &self.watchers {
            if key.starts_with(&w.prefix) {
                let value = match kind {
                    MetaEventKind::Put => self.kvs.get(key).map(|e| e.value.clone()),
                    MetaEventKind::Delete => None,
                };
                let _ = w.tx.try_send(MetaEvent {
                    kind,
                    key: key.to_string(),
                    value: value.unwrap_or_default(),
                });
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryMetaStore {
    inner: Mutex<Inner>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock().await;
        inner.expire();
        inner.kvs.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease: None,
            },
        );
        inner.rev += 1;
        inner.notify(MetaEventKind::Put, key);
        Ok(())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: i64,
    ) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock().await;
        inner.expire();
        if !inner.lease_alive(lease) {
            return Err(MetaStoreError::LeaseNotFound(lease));
        }
        inner.kvs.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease: Some(lease),
            },
        );
        inner.rev += 1;
        inner.notify(MetaEventKind::Put, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<KvPair>, MetaStoreError> {
        let mut inner = self.inner.lock().await;
        inner.expire();
        Ok(inner
            .kvs
            .get(key)
            .map(|e| KvPair {
                key: key.to_string(),
                value: e.value.clone(),
            })
            .into_iter()
            .collect())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<(Vec<KvPair>, i64), MetaStoreError> {
        let mut inner = self.inner.lock().await;
        inner.expire();
        let items = inner
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KvPair {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect();
        Ok((items, inner.rev))
    }

    async fn delete(&self, key: &str) -> Result<(), MetaStoreError> {
        let mut inner = self.inner.lock().await;
        inner.expire();
        if inner.kvs.remove(key).is_some() {
            inner.rev += 1;
            inner.notify(MetaEventKind::Delete, key);
        }
        Ok(())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<i64, MetaStoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_lease += 1;
        let id = inner.next_lease;
        inner
            .leases
            .insert(id, Instant::now() + Duration::from_secs(ttl_secs.max(0) as u64));
        Ok(id)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        _start_rev: i64,
    ) -> Result<mpsc::Receiver<MetaEvent>, MetaStoreError> {
        // delivers changes from the moment of subscription; replay from an
        // older revision is not supported here
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock().await;
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn leased_key_expires() {
        let store = MemoryMetaStore::new();
        let lease = store.grant_lease(10).await.unwrap();
        store
            .put_with_lease("/registry/workers/w1", "127.0.0.1:1", lease)
            .await
            .unwrap();

        assert_eq!(store.get("/registry/workers/w1").await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("/registry/workers/w1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_lease_rejects_put() {
        let store = MemoryMetaStore::new();
        let lease = store.grant_lease(1).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let err = store
            .put_with_lease("/registry/workers/w1", "addr", lease)
            .await
            .unwrap_err();
        assert!(matches!(err, MetaStoreError::LeaseNotFound(id) if id == lease));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_sees_puts_deletes_and_expiry() {
        let store = MemoryMetaStore::new();
        let mut events = store.watch_prefix("/registry/chunks/", 0).await.unwrap();

        store.put("/registry/chunks/c1", "{}").await.unwrap();
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, MetaEventKind::Put);
        assert_eq!(ev.key, "/registry/chunks/c1");
        assert_eq!(ev.value, "{}");

        store.delete("/registry/chunks/c1").await.unwrap();
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, MetaEventKind::Delete);
        assert!(ev.value.is_empty());

        // untouched prefixes stay silent
        store.put("/registry/files/f1", "{}").await.unwrap();

        let lease = store.grant_lease(5).await.unwrap();
        store
            .put_with_lease("/registry/chunks/c2", "{}", lease)
            .await
            .unwrap();
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.key, "/registry/chunks/c2");

        tokio::time::advance(Duration::from_secs(6)).await;
        store.get("/registry/chunks/c2").await.unwrap();
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, MetaEventKind::Delete);
        assert_eq!(ev.key, "/registry/chunks/c2");
    }

    #[tokio::test]
    async fn prefix_scan_is_bounded() {
        let store = MemoryMetaStore::new();
        store.put("/registry/chunks/a", "1").await.unwrap();
        store.put("/registry/chunks/b", "2").await.unwrap();
        store.put("/registry/files/c", "3").await.unwrap();

        let (items, rev) = store.get_prefix("/registry/chunks/").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(rev >= 3);
    }
}
