//! Background pass scheduling.
//!
//! A [`SyncScheduler`] owns one worker task. Requests are queued on an mpsc
//! channel and, if the configuration sets a sync interval, a timer adds
//! periodic passes. Each pass runs on the blocking pool and is awaited before
//! the next one starts, so passes never overlap.

use crate::coordinator::{SyncCoordinator, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::remote::RemoteStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

const QUEUE_DEPTH: usize = 16;

enum Request {
    Sync(Option<oneshot::Sender<SyncResult<SyncOutcome>>>),
    Shutdown,
}

/// Runs sync passes in the background.
pub struct SyncScheduler {
    sender: mpsc::Sender<Request>,
    worker: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<L, R>(coordinator: Arc<SyncCoordinator<L, R>>) -> Self
    where
        L: LocalStore + 'static,
        R: RemoteStore + 'static,
    {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(run_worker(coordinator, receiver));
        Self { sender, worker }
    }

    /// Queues a pass and waits for its outcome.
    pub async fn request_sync(&self) -> SyncResult<SyncOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send(Request::Sync(Some(reply)))
            .await
            .map_err(|_| SyncError::Unknown("sync scheduler stopped".into()))?;
        outcome
            .await
            .map_err(|_| SyncError::Unknown("sync scheduler dropped the request".into()))?
    }

    /// Queues a pass without waiting. Returns false if the queue is full.
    pub fn trigger(&self) -> bool {
        self.sender.try_send(Request::Sync(None)).is_ok()
    }

    /// Stops the worker after the queued requests ran.
    pub async fn shutdown(self) {
        if self.sender.send(Request::Shutdown).await.is_err() {
            return;
        }
        if let Err(e) = self.worker.await {
            warn!(error = %e, "sync scheduler worker panicked");
        }
    }
}

async fn run_worker<L, R>(
    coordinator: Arc<SyncCoordinator<L, R>>,
    mut receiver: mpsc::Receiver<Request>,
) where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    let mut ticker = coordinator.config().sync_interval.map(|period| {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let reply = tokio::select! {
            request = receiver.recv() => match request {
                Some(Request::Sync(reply)) => reply,
                Some(Request::Shutdown) | None => break,
            },
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                debug!("scheduled sync pass");
                None
            }
        };

        let pass = Arc::clone(&coordinator);
        let result = tokio::task::spawn_blocking(move || pass.sync_queued())
            .await
            .unwrap_or_else(|e| Err(SyncError::Unknown(format!("sync pass panicked: {e}"))));

        match reply {
            Some(reply) => {
                if let Err(unclaimed) = reply.send(result) {
                    debug!(
                        succeeded = unclaimed.is_ok(),
                        "sync requester went away before the pass finished"
                    );
                }
            }
            None => {
                if let Err(e) = result {
                    warn!(error = %e, "background sync pass failed");
                }
            }
        }
    }

    debug!("sync scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_log::ChangeLog;
    use crate::config::SyncConfig;
    use crate::cursor::MemoryCursorStore;
    use crate::local::MemoryLocalStore;
    use crate::remote::MockRemoteStore;
    use std::time::Duration;
    use zonesync_protocol::{EntitySchema, FieldKind, SchemaRegistry, Snapshot};

    fn coordinator(
        config: SyncConfig,
    ) -> (
        Arc<SyncCoordinator<MemoryLocalStore, MockRemoteStore>>,
        Arc<MemoryLocalStore>,
    ) {
        let schemas =
            SchemaRegistry::new().register(EntitySchema::new("Folder").field("name", FieldKind::Text));
        let log = Arc::new(ChangeLog::in_memory());
        let local = Arc::new(MemoryLocalStore::new(schemas, log.clone()));
        let coordinator = SyncCoordinator::new(
            config,
            local.clone(),
            Arc::new(MockRemoteStore::new()),
            log,
            Arc::new(MemoryCursorStore::new()),
        );
        (Arc::new(coordinator), local)
    }

    #[tokio::test]
    async fn requested_pass_reports_outcome() {
        let (coordinator, local) = coordinator(SyncConfig::new("Notes"));
        local
            .insert(Snapshot::new("f1", "Folder").with_field("name", "Inbox"))
            .unwrap();

        let scheduler = SyncScheduler::spawn(coordinator.clone());
        let outcome = scheduler.request_sync().await.unwrap();
        assert_eq!(outcome.pushed_saves, 1);

        assert!(scheduler.trigger());
        scheduler.shutdown().await;
        assert_eq!(coordinator.stats().passes_completed, 2);
    }

    #[tokio::test]
    async fn abandoned_request_still_runs_and_worker_keeps_serving() {
        let (coordinator, _local) = coordinator(SyncConfig::new("Notes"));
        let scheduler = SyncScheduler::spawn(coordinator.clone());

        let (reply, outcome) = oneshot::channel();
        drop(outcome);
        scheduler
            .sender
            .send(Request::Sync(Some(reply)))
            .await
            .unwrap();

        scheduler.request_sync().await.unwrap();
        scheduler.shutdown().await;
        assert_eq!(coordinator.stats().passes_completed, 2);
    }

    #[tokio::test]
    async fn interval_runs_passes_without_requests() {
        let config = SyncConfig::new("Notes").with_sync_interval(Duration::from_millis(10));
        let (coordinator, _local) = coordinator(config);

        let scheduler = SyncScheduler::spawn(coordinator.clone());
        let mut waited = 0;
        while coordinator.stats().passes_completed < 2 && waited < 200 {
            time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        scheduler.shutdown().await;

        assert!(coordinator.stats().passes_completed >= 2);
        assert_eq!(coordinator.remote().call_count("zone_exists"), 1);
    }
}
