//! Background maintenance actor for the cache.
//!
//! Runs generation rotation, trimming, and saving on one spawned task so the
//! three never overlap, which is the intended deployment shape: many
//! producers call `add`, readers hold views, and a single maintenance actor
//! owns the housekeeping schedule.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::cache::{Cache, SaveReport, TrimReport};
use crate::error::{CacheError, CacheResult};

/// A work item for the maintenance actor.
#[derive(Debug)]
pub enum MaintenanceTask {
    /// Advance the generation counter.
    Rotate {
        /// Receives the new generation value.
        reply: oneshot::Sender<u64>,
    },
    /// Trim the cache down to a block-slack target.
    Trim {
        /// Block-slack byte target.
        target: u64,
        /// Receives the trim outcome.
        reply: oneshot::Sender<CacheResult<TrimReport>>,
    },
    /// Persist the cache.
    Save {
        /// Receives the save outcome.
        reply: oneshot::Sender<CacheResult<SaveReport>>,
    },
    /// Stop the actor.
    Shutdown,
}

/// Configuration for the maintenance actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Channel capacity for queued tasks.
    pub channel_capacity: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// Counters published by the maintenance actor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceStats {
    /// Generation rotations performed.
    pub rotations: u64,
    /// Trim operations completed.
    pub trims: u64,
    /// Save operations completed.
    pub saves: u64,
    /// Entries evicted across all trims.
    pub entries_evicted: u64,
}

/// Handle to the maintenance actor for submitting work and reading stats.
pub struct MaintenanceHandle {
    sender: mpsc::Sender<MaintenanceTask>,
    stats: watch::Receiver<MaintenanceStats>,
}

impl MaintenanceHandle {
    /// Spawns the maintenance actor over a shared cache and returns the
    /// handle for submitting tasks.
    pub fn spawn(cache: Arc<Cache>, config: MaintenanceConfig) -> Self {
        let (task_tx, task_rx) = mpsc::channel(config.channel_capacity);
        let (stats_tx, stats_rx) = watch::channel(MaintenanceStats::default());

        tokio::spawn(run(cache, task_rx, stats_tx));

        Self {
            sender: task_tx,
            stats: stats_rx,
        }
    }

    /// Advances the generation counter; returns the new value.
    pub async fn rotate(&self) -> CacheResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(MaintenanceTask::Rotate { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Trims the cache to the given block-slack target.
    pub async fn trim(&self, target: u64) -> CacheResult<TrimReport> {
        let (reply, rx) = oneshot::channel();
        self.send(MaintenanceTask::Trim { target, reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Persists the cache.
    pub async fn save(&self) -> CacheResult<SaveReport> {
        let (reply, rx) = oneshot::channel();
        self.send(MaintenanceTask::Save { reply }).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Stops the actor. Tasks already queued are processed first.
    pub async fn shutdown(&self) -> CacheResult<()> {
        self.send(MaintenanceTask::Shutdown).await
    }

    /// Snapshot of the actor's counters.
    pub fn stats(&self) -> MaintenanceStats {
        self.stats.borrow().clone()
    }

    /// True while the actor is accepting tasks.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, task: MaintenanceTask) -> CacheResult<()> {
        self.sender.send(task).await.map_err(|_| stopped())
    }
}

fn stopped() -> CacheError {
    CacheError::Io(io::Error::other("maintenance actor shut down"))
}

async fn run(
    cache: Arc<Cache>,
    mut rx: mpsc::Receiver<MaintenanceTask>,
    stats_tx: watch::Sender<MaintenanceStats>,
) {
    let mut stats = MaintenanceStats::default();
    while let Some(task) = rx.recv().await {
        match task {
            MaintenanceTask::Rotate { reply } => {
                let generation = cache.next_generation();
                stats.rotations += 1;
                let _ = reply.send(generation);
            }
            MaintenanceTask::Trim { target, reply } => {
                let result = cache.trim(target).await;
                stats.trims += 1;
                if let Ok(report) = &result {
                    stats.entries_evicted += report.entries_evicted;
                }
                let _ = reply.send(result);
            }
            MaintenanceTask::Save { reply } => {
                let result = cache.save().await;
                stats.saves += 1;
                let _ = reply.send(result);
            }
            MaintenanceTask::Shutdown => break,
        }
        let _ = stats_tx.send(stats.clone());
    }
    debug!("maintenance actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    fn test_cache(dir: &tempfile::TempDir) -> Arc<Cache> {
        Arc::new(
            Cache::create_new(
                dir.path().join("cache.idx"),
                dir.path().join("cache.dat"),
                CacheConfig {
                    max_items: 64,
                    capacity_bytes: 1 << 20,
                },
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rotate_through_actor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let handle = MaintenanceHandle::spawn(cache.clone(), MaintenanceConfig::default());

        assert_eq!(handle.rotate().await.unwrap(), 1);
        assert_eq!(handle.rotate().await.unwrap(), 2);
        assert_eq!(cache.generation(), 2);
        assert_eq!(handle.stats().rotations, 2);
    }

    #[tokio::test]
    async fn test_trim_and_save_through_actor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let handle = MaintenanceHandle::spawn(cache.clone(), MaintenanceConfig::default());

        for i in 0..8u8 {
            cache.add(&[i; 100]).unwrap();
        }
        handle.rotate().await.unwrap();
        cache.add(b"fresh").unwrap();

        let report = handle.trim(64).await.unwrap();
        assert_eq!(report.entries_evicted, 8);
        assert_eq!(cache.num_items(), 1);

        let saved = handle.save().await.unwrap();
        assert_eq!(saved.entries_saved, 1);

        let stats = handle.stats();
        assert_eq!(stats.trims, 1);
        assert_eq!(stats.saves, 1);
        assert_eq!(stats.entries_evicted, 8);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_work() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let handle = MaintenanceHandle::spawn(cache, MaintenanceConfig::default());

        handle.shutdown().await.unwrap();
        // The channel closes once the actor drains the shutdown message.
        let result = handle.rotate().await;
        assert!(result.is_err());
        assert!(!handle.is_running());
    }
}
