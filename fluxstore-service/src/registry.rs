// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Limiter registry (C2): a concurrent map from client identity to limiter,
//! plus a background janitor that ages out idle entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fluxstore_error::{make_err, Code, Error};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::limiter::ClientLimiter;

type Hook = Arc<dyn Fn(String) + Send + Sync>;

struct Entry {
    limiter: Arc<ClientLimiter>,
    last_seen: Instant,
}

struct Shared {
    clients: Mutex<HashMap<String, Entry>>,
    bulk_capacity: usize,
    list_capacity: usize,
    idle_ttl: Duration,
    max_tracked_clients: usize,
    on_new_client: Mutex<Option<Hook>>,
    on_purge: Mutex<Option<Hook>>,
}

/// Owns every client's [`ClientLimiter`] and ages out idle ones. Construct
/// once per server lifetime; [`LimiterRegistry::close`] stops the janitor
/// deterministically.
pub struct LimiterRegistry {
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl LimiterRegistry {
    pub fn new(bulk_capacity: usize, list_capacity: usize, idle_ttl: Duration, max_tracked_clients: usize) -> Self {
        let shared = Arc::new(Shared {
            clients: Mutex::new(HashMap::new()),
            bulk_capacity,
            list_capacity,
            idle_ttl,
            max_tracked_clients,
            on_new_client: Mutex::new(None),
            on_purge: Mutex::new(None),
        });
        let shutdown = Arc::new(Notify::new());
        let janitor = spawn_janitor(shared.clone(), shutdown.clone());
        Self {
            shared,
            shutdown,
            closed: AtomicBool::new(false),
            janitor: Mutex::new(Some(janitor)),
        }
    }

    /// Registers a hook fired (on a detached task, outside the registry
    /// lock) the first time a client identity is seen.
    pub fn on_new_client(&self, hook: impl Fn(String) + Send + Sync + 'static) {
        *self.shared.on_new_client.lock() = Some(Arc::new(hook));
    }

    /// Registers a hook fired (on a detached task, outside the registry
    /// lock) whenever the janitor evicts a client identity.
    pub fn on_purge(&self, hook: impl Fn(String) + Send + Sync + 'static) {
        *self.shared.on_purge.lock() = Some(Arc::new(hook));
    }

    /// Returns the limiter for `client_id`, creating one on first use and
    /// refreshing its `last_seen` timestamp. Fails with `ResourceExhausted`
    /// if admitting a new identity would breach `max_tracked_clients`.
    pub fn get(&self, client_id: &str) -> Result<Arc<ClientLimiter>, Error> {
        let mut clients = self.shared.clients.lock();
        if let Some(entry) = clients.get_mut(client_id) {
            entry.last_seen = Instant::now();
            return Ok(entry.limiter.clone());
        }

        if clients.len() >= self.shared.max_tracked_clients {
            return Err(make_err!(
                Code::ResourceExhausted,
                "Limiter registry is tracking the maximum of {} client identities",
                self.shared.max_tracked_clients
            ));
        }

        let limiter = Arc::new(ClientLimiter::new(self.shared.bulk_capacity, self.shared.list_capacity));
        clients.insert(
            client_id.to_string(),
            Entry {
                limiter: limiter.clone(),
                last_seen: Instant::now(),
            },
        );
        drop(clients);

        if let Some(hook) = self.shared.on_new_client.lock().clone() {
            let id = client_id.to_string();
            fluxstore_util::spawn!("limiter_registry_on_new_client", async move { hook(id) });
        }

        Ok(limiter)
    }

    #[cfg(test)]
    pub fn contains(&self, client_id: &str) -> bool {
        self.shared.clients.lock().contains_key(client_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.shared.clients.lock().len()
    }

    /// Stops the janitor. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_one();
    }
}

impl Drop for LimiterRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_janitor(shared: Arc<Shared>, shutdown: Arc<Notify>) -> JoinHandle<()> {
    let period = (shared.idle_ttl / 2).max(Duration::from_millis(1));
    fluxstore_util::spawn!("limiter_registry_janitor", async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep(&shared),
                _ = shutdown.notified() => return,
            }
        }
    })
}

fn sweep(shared: &Arc<Shared>) {
    let now = Instant::now();
    let mut purged = Vec::new();
    {
        let mut clients = shared.clients.lock();
        clients.retain(|id, entry| {
            let stale = now.duration_since(entry.last_seen) > shared.idle_ttl;
            let idle = entry.limiter.is_idle();
            if stale && idle {
                purged.push(id.clone());
                false
            } else {
                true
            }
        });
    }
    if purged.is_empty() {
        return;
    }
    if let Some(hook) = shared.on_purge.lock().clone() {
        for id in purged {
            let hook = hook.clone();
            fluxstore_util::spawn!("limiter_registry_on_purge", async move { hook(id) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn creates_limiter_on_first_use_and_reuses_it() {
        let registry = LimiterRegistry::new(4, 4, Duration::from_secs(60), 100);
        let a = registry.get("client-a").unwrap();
        let b = registry.get("client-a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        registry.close();
    }

    #[tokio::test]
    async fn janitor_evicts_idle_entries_but_spares_occupied_ones() {
        let registry = LimiterRegistry::new(4, 4, Duration::from_millis(40), 100);
        let idle_limiter = registry.get("idle-client").unwrap();
        let _ = idle_limiter; // no occupancy held

        let busy_limiter = registry.get("busy-client").unwrap();
        assert!(busy_limiter.try_acquire_bulk());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!registry.contains("idle-client"));
        assert!(registry.contains("busy-client"));
        registry.close();
    }

    #[tokio::test]
    async fn overflow_rejects_new_identities() {
        let registry = LimiterRegistry::new(1, 1, Duration::from_secs(60), 1);
        registry.get("first").unwrap();
        let err = registry.get("second").unwrap_err();
        assert_eq!(err.code, Code::ResourceExhausted);
        registry.close();
    }

    #[tokio::test]
    async fn hooks_fire_without_blocking_get() {
        let registry = LimiterRegistry::new(4, 4, Duration::from_secs(60), 100);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        registry.on_new_client(move |_id| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.get("client-a").unwrap();
        // Hook runs on a detached task; give it a tick to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        registry.close();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = LimiterRegistry::new(1, 1, Duration::from_secs(60), 10);
        registry.close();
        registry.close();
    }
}
