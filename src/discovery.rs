//! Pair Discovery
//!
//! One loop per (network, exchange) group. Polls the factory for
//! `PairCreated` logs between the last seen block and the current head and
//! hands every event to its own task in the shared `TaskSet`:
//! qualification first, then the lifecycle engine on a pass.
//!
//! Consecutive poll failures are retried up to `max_retry_attempts`, each
//! after a longer wait and a fresh session. Past that budget the loop ends
//! with an error; sibling loops are unaffected.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use crate::config::{secs, DiscoverySettings};
use crate::error::CallResult;
use crate::facade::ContractFacade;
use crate::lifecycle::LifecycleEngine;
use crate::qualification::QualificationPipeline;
use crate::tasks::TaskSet;
use crate::types::{PairCreated, QualificationVerdict};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub struct DiscoveryLoop {
    facade: Arc<dyn ContractFacade>,
    pipeline: Arc<QualificationPipeline>,
    engine: Arc<LifecycleEngine>,
    settings: DiscoverySettings,
    tasks: TaskSet,
    shutdown: watch::Receiver<bool>,
    /// Last block whose logs were read; `None` until the first poll
    cursor: Option<u64>,
}

impl DiscoveryLoop {
    pub fn new(
        facade: Arc<dyn ContractFacade>,
        pipeline: Arc<QualificationPipeline>,
        engine: Arc<LifecycleEngine>,
        settings: DiscoverySettings,
        tasks: TaskSet,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            facade,
            pipeline,
            engine,
            settings,
            tasks,
            shutdown,
            cursor: None,
        }
    }

    fn group(&self) -> String {
        format!("{}/{}", self.facade.network(), self.facade.exchange())
    }

    pub async fn run(mut self) -> Result<()> {
        let group = self.group();
        match self.facade.acquire_fresh_session().await {
            Ok(url) => info!("📡 {} discovery starting on {}", group, url),
            Err(e) => warn!("{} initial session failed: {}", group, e),
        }

        let interval = secs(self.settings.polling_interval);
        let mut failures: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                info!("{} discovery stopping on shutdown", group);
                return Ok(());
            }

            let wait = match self.poll_once().await {
                Ok(dispatched) => {
                    failures = 0;
                    if dispatched > 0 {
                        debug!("{} dispatched {} candidate(s)", group, dispatched);
                    }
                    interval
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.settings.max_retry_attempts {
                        error!("🛑 {} discovery giving up after {} failed polls: {}", group, failures, e);
                        return Err(anyhow!("{} discovery exhausted: {}", group, e));
                    }
                    warn!(
                        "{} poll failed ({}/{}): {}",
                        group, failures, self.settings.max_retry_attempts, e
                    );
                    interval * failures
                }
            };

            if self.wait_or_shutdown(wait).await {
                info!("{} discovery stopping on shutdown", group);
                return Ok(());
            }

            if failures > 0 {
                if let Err(e) = self.facade.acquire_fresh_session().await {
                    warn!("{} session refresh failed: {}", group, e);
                }
            }
        }
    }

    /// True when shutdown fired during the wait
    async fn wait_or_shutdown(&mut self, wait: Duration) -> bool {
        let changed = tokio::select! {
            _ = sleep(wait) => return false,
            changed = self.shutdown.changed() => changed,
        };
        changed.is_err() || *self.shutdown.borrow()
    }

    /// Read logs for `(cursor, head]` and spawn one task per event. The first
    /// poll only records the head. Returns how many events were dispatched.
    pub async fn poll_once(&mut self) -> CallResult<usize> {
        let head = self.facade.get_chain_height().await?;
        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                info!("{} watching from block {}", self.group(), head);
                self.cursor = Some(head);
                return Ok(0);
            }
        };
        if head <= cursor {
            return Ok(0);
        }

        let events = self.facade.get_pair_created_logs(cursor + 1, head).await?;
        if !events.is_empty() {
            info!("🆕 {} new pair(s) on {} in blocks {}..={}", events.len(), self.group(), cursor + 1, head);
        }
        let dispatched = events.len();
        for event in events {
            self.dispatch(event);
        }

        self.cursor = Some(head);
        Ok(dispatched)
    }

    fn dispatch(&self, event: PairCreated) {
        let pipeline = self.pipeline.clone();
        let engine = self.engine.clone();
        self.tasks.spawn(async move {
            match pipeline.qualify_event(&event).await {
                Ok(QualificationVerdict::Pass(qualified)) => {
                    engine.spawn(qualified);
                }
                Ok(QualificationVerdict::Fail { .. }) => {}
                Err(e) => warn!("Qualification of pair {:#x} aborted: {}", event.pair, e),
            }
        });
    }
}
