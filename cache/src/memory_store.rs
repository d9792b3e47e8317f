use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use errors::CacheError;
use resilience::HealthProbe;

use crate::store::CacheStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-process store with the same contract as Redis. Backs tests and
/// single-node deployments; supports the `*` glob subset the workspace
/// actually uses in patterns.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self, key: &str) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|entry| entry.expired())
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
        }
        expired
    }
}

/// Matches `*` wildcards anywhere in the pattern; no `?` or character
/// classes, which the key scheme never needs.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    if !text.starts_with(first) {
        return false;
    }
    let mut remainder = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match remainder.find(part) {
            Some(idx) => remainder = &remainder[idx + part.len()..],
            None => return false,
        }
    }
    let last = parts[parts.len() - 1];
    last.is_empty() || remainder.ends_with(last)
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.purge_expired(key) {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        if self.purge_expired(key) {
            return Ok(false);
        }
        Ok(self.entries.contains_key(key))
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        if self.purge_expired(key) {
            return Ok(-2);
        }
        match self.entries.get(key) {
            None => Ok(-2),
            Some(entry) => match entry.expires_at {
                None => Ok(-1),
                Some(at) => Ok(at.saturating_duration_since(Instant::now()).as_secs() as i64),
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        if self.purge_expired(key) {
            return Ok(false);
        }
        match self.entries.get_mut(key) {
            None => Ok(false),
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        let mut stale = Vec::new();
        for entry in self.entries.iter() {
            if entry.value().expired() {
                stale.push(entry.key().clone());
            } else if glob_match(pattern, entry.key()) {
                keys.push(entry.key().clone());
            }
        }
        for key in stale {
            self.entries.remove(&key);
        }
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for MemoryStore {
    async fn check(&self) -> Result<(), CacheError> {
        CacheStore::ping(self).await
    }
}
