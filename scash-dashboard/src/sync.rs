//! Status synchronization.
//!
//! Three resources are polled: status, logs and hashrate history. Each
//! fetch is stamped with a [`Generation`] when it is issued. Results are
//! full replacements, so the session only has to drop a result that is
//! older than the one it already shows; see
//! [`DashboardSession::apply`](crate::session::DashboardSession::apply).
//!
//! The background [`Poller`] issues one fetch per resource per tick. A
//! resource whose previous fetch has not come back yet is skipped, so a
//! hung request delays only that resource and ticks never pile up.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strum::{Display, EnumIter, IntoEnumIterator};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api_client::types::{HashratePoint, MinerStatus};
use crate::api_client::{Client, Reply, TransportError};
use crate::session::DashboardSession;
use crate::tracing::prelude::*;

/// Issue order of a fetch. Larger is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

/// Shared source of [`Generation`]s.
///
/// The poller and the foreground dispatcher draw from the same counter so
/// their results can be ordered against each other.
#[derive(Debug, Clone, Default)]
pub struct Generations(Arc<AtomicU64>);

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Generation {
        Generation(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// A polled backend resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    Status,
    Logs,
    History,
}

/// Result of one fetch, as handed to the session.
#[derive(Debug)]
pub enum FetchResult {
    Status(Result<Reply<MinerStatus>, TransportError>),
    Logs(Result<Reply<String>, TransportError>),
    History(Result<Reply<Vec<HashratePoint>>, TransportError>),
}

impl FetchResult {
    pub fn resource(&self) -> Resource {
        match self {
            FetchResult::Status(_) => Resource::Status,
            FetchResult::Logs(_) => Resource::Logs,
            FetchResult::History(_) => Resource::History,
        }
    }
}

#[derive(Debug)]
pub struct Fetched {
    pub generation: Generation,
    pub result: FetchResult,
}

/// Fetch one resource.
pub async fn fetch(client: &Client, resource: Resource, generation: Generation) -> Fetched {
    let result = match resource {
        Resource::Status => FetchResult::Status(client.get_status().await),
        Resource::Logs => FetchResult::Logs(client.get_logs().await),
        Resource::History => FetchResult::History(client.get_hashrate_history().await),
    };
    Fetched { generation, result }
}

/// Fetch every resource in turn without applying anything, for callers
/// that cannot hold the session while waiting.
pub async fn fetch_all(client: &Client, generations: &Generations) -> Vec<Fetched> {
    let mut fetched = Vec::new();
    for resource in Resource::iter() {
        fetched.push(fetch(client, resource, generations.next()).await);
    }
    fetched
}

/// One foreground cycle: status, then logs, then history, each applied
/// as soon as it arrives.
///
/// Failures are absorbed by the session, so a dead status endpoint still
/// lets logs and history through.
pub async fn refresh_all(client: &Client, generations: &Generations, session: &mut DashboardSession) {
    for resource in Resource::iter() {
        let fetched = fetch(client, resource, generations.next()).await;
        session.apply(fetched);
    }
}

/// Background refresh task.
pub struct Poller {
    client: Client,
    generations: Generations,
    interval: Duration,
    updates_tx: mpsc::Sender<Fetched>,
}

impl Poller {
    pub fn new(
        client: Client,
        generations: Generations,
        interval: Duration,
        updates_tx: mpsc::Sender<Fetched>,
    ) -> Self {
        Self {
            client,
            generations,
            interval,
            updates_tx,
        }
    }

    /// Poll until `cancellation` fires. The first tick is immediate.
    pub async fn run(self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut busy: HashMap<tokio::task::Id, Resource> = HashMap::new();

        debug!(interval_ms = self.interval.as_millis() as u64, "Poller started");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    for resource in Resource::iter() {
                        if busy.values().any(|r| *r == resource) {
                            debug!(%resource, "Previous fetch still in flight, skipping");
                            continue;
                        }
                        let client = self.client.clone();
                        let tx = self.updates_tx.clone();
                        let generation = self.generations.next();
                        let handle = in_flight.spawn(async move {
                            let fetched = fetch(&client, resource, generation).await;
                            if tx.send(fetched).await.is_err() {
                                trace!(%resource, "Update channel closed");
                            }
                        });
                        busy.insert(handle.id(), resource);
                    }
                }
                Some(done) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    let id = match done {
                        Ok((id, ())) => id,
                        Err(e) => {
                            warn!(error = %e, "Fetch task failed");
                            e.id()
                        }
                    };
                    busy.remove(&id);
                }
            }
        }

        in_flight.shutdown().await;
        debug!("Poller stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancellation: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancellation))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api_client::{HISTORY_PATH, LOGS_PATH, STATUS_PATH};
    use crate::setup::Catalog;
    use crate::test_support::MockBackend;
    use crate::view::ViewMode;

    #[test]
    fn generations_increase() {
        let generations = Generations::new();
        let shared = generations.clone();
        let a = generations.next();
        let b = shared.next();
        assert!(b > a);
    }

    #[tokio::test]
    async fn refresh_all_applies_every_resource() {
        let backend = MockBackend::running().await;
        backend.respond(LOGS_PATH, 200, json!({ "ok": true, "logs": "[2025-12-01 11:36:55] accepted: 1/1" }));
        backend.respond(
            HISTORY_PATH,
            200,
            json!({ "ok": true, "points": [{ "ts": 1000, "hs": 500.0, "ewma_hs": 480.0 }] }),
        );

        let client = Client::with_base_url(backend.url());
        let mut session = DashboardSession::new(Catalog::default());
        refresh_all(&client, &Generations::new(), &mut session).await;

        assert_eq!(session.mode(), Some(ViewMode::Dashboard));
        assert_eq!(session.dashboard().wallet, "abc");
        assert!(session.logs().contains("accepted"));
        assert_eq!(session.chart().hashrate, vec![[1_000_000.0, 500.0]]);

        let order: Vec<_> = backend.calls().into_iter().map(|c| c.path).collect();
        assert_eq!(order, vec![STATUS_PATH, LOGS_PATH, HISTORY_PATH]);
    }

    #[tokio::test]
    async fn broken_status_does_not_block_logs_or_chart() {
        let backend = MockBackend::running().await;
        backend.respond_raw(STATUS_PATH, 502, "<html>Bad Gateway</html>");
        backend.respond(LOGS_PATH, 200, json!({ "ok": true, "logs": "miner started" }));
        backend.respond(
            HISTORY_PATH,
            200,
            json!({ "ok": true, "points": [{ "ts": 5, "hs": 1.0, "ewma_hs": 1.0 }] }),
        );

        let client = Client::with_base_url(backend.url());
        let mut session = DashboardSession::new(Catalog::default());
        refresh_all(&client, &Generations::new(), &mut session).await;

        assert_eq!(session.mode(), None);
        assert!(session.dash_msg().unwrap().starts_with("获取状态失败"));
        assert_eq!(session.logs(), "miner started");
        assert!(!session.chart().is_empty());
    }

    #[tokio::test]
    async fn poller_delivers_updates_until_cancelled() {
        let backend = MockBackend::running().await;
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let poller = Poller::new(
            Client::with_base_url(backend.url()),
            Generations::new(),
            Duration::from_secs(60),
            tx,
        );
        let handle = poller.spawn(cancel.clone());

        let mut seen = Vec::new();
        for _ in 0..3 {
            let fetched = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(fetched.result.resource());
        }
        seen.sort_by_key(|r| r.to_string());
        assert_eq!(seen, vec![Resource::History, Resource::Logs, Resource::Status]);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn hung_resource_is_not_refetched_while_in_flight() {
        let backend = MockBackend::running().await;
        backend.respond_after(
            STATUS_PATH,
            Duration::from_secs(2),
            json!({ "ok": true, "needs_setup": false, "running": true }),
        );

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            Client::with_base_url(backend.url()),
            Generations::new(),
            Duration::from_millis(50),
            tx,
        );
        let handle = poller.spawn(cancel.clone());

        // Drain for a while; logs keep flowing while status hangs.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
        let mut logs_updates = 0;
        while let Ok(Some(fetched)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if fetched.result.resource() == Resource::Logs {
                logs_updates += 1;
            }
        }

        assert!(logs_updates >= 3, "only {logs_updates} log updates");
        assert_eq!(backend.calls_to(STATUS_PATH).len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
