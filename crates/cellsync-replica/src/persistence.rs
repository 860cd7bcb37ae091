//! Snapshot loading and debounced flushing.
//!
//! Each resident replica gets one flush task. Every applied update re-arms a
//! quiet-period timer; the first pending update also fixes a hard deadline.
//! The task flushes when either fires, so under sustained editing a change is
//! stored at most `max_wait` after it was made. Running every flush of a
//! document on its task keeps flushes of that document strictly sequential.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use cellsync_protocols::{DocumentId, MetadataStore};

use crate::error::ReplicaError;
use crate::replica::{Replica, ReplicaUpdate};

/// Debounce and retry policy of the persistence writer.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub debounce: Duration,
    pub max_wait: Duration,
    /// Retries after the first failed write of one flush.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(10),
            max_wait: Duration::from_secs(20),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

impl PersistenceSettings {
    /// Exponential backoff delay before retry `attempt` (zero based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.retry_max_delay)
    }
}

/// Loads replicas from the metadata store and attaches flush tasks to them.
#[derive(Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn MetadataStore>,
    settings: PersistenceSettings,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn MetadataStore>, settings: PersistenceSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Build a replica from the latest snapshot, or seed one if none exists.
    pub async fn load(&self, document: &DocumentId) -> Result<Replica, ReplicaError> {
        let replica = Replica::new(document.clone());
        match self.store.load_snapshot(document).await? {
            Some(snapshot) => {
                replica.load_snapshot(&snapshot)?;
                debug!("Loaded snapshot of {} ({} bytes)", document, snapshot.len());
            }
            None => {
                replica.seed_default();
                info!("No snapshot for {}, starting from default content", document);
            }
        }
        Ok(replica)
    }

    /// Start the flush task of a resident replica.
    pub fn attach(&self, replica: Arc<Replica>) -> FlushHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = FlushTask {
            updates: replica.subscribe(),
            replica,
            store: self.store.clone(),
            settings: self.settings.clone(),
            commands: receiver,
            pending: None,
        };
        let document = task.replica.document().clone();
        let handle = tokio::spawn(task.run());
        FlushHandle {
            document,
            commands,
            task: parking_lot::Mutex::new(Some(handle)),
        }
    }
}

enum FlushCommand {
    Schedule,
    FlushNow(oneshot::Sender<Result<(), ReplicaError>>),
    Close(oneshot::Sender<Result<(), ReplicaError>>),
}

/// Control handle of one replica's flush task.
pub struct FlushHandle {
    document: DocumentId,
    commands: mpsc::UnboundedSender<FlushCommand>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl FlushHandle {
    /// Debounce a flush. Applied updates schedule one on their own.
    pub fn schedule(&self) {
        let _ = self.commands.send(FlushCommand::Schedule);
    }

    /// Flush immediately and wait for the write to finish.
    pub async fn flush_now(&self) -> Result<(), ReplicaError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(FlushCommand::FlushNow(ack))
            .map_err(|_| self.closed())?;
        done.await.map_err(|_| self.closed())?
    }

    /// Flush pending changes, then stop the task.
    pub async fn close(&self) -> Result<(), ReplicaError> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(FlushCommand::Close(ack)).is_err() {
            return Ok(());
        }
        let result = done.await.map_err(|_| self.closed())?;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        result
    }

    fn closed(&self) -> ReplicaError {
        ReplicaError::Closed(self.document.to_string())
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Deadlines of a pending flush: (quiet period end, hard deadline).
type Pending = (Instant, Instant);

struct FlushTask {
    replica: Arc<Replica>,
    store: Arc<dyn MetadataStore>,
    settings: PersistenceSettings,
    updates: broadcast::Receiver<ReplicaUpdate>,
    commands: mpsc::UnboundedReceiver<FlushCommand>,
    pending: Option<Pending>,
}

impl FlushTask {
    async fn run(mut self) {
        loop {
            let due = self.pending.map(|(quiet, hard)| quiet.min(hard));
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(FlushCommand::Schedule) => self.bump(),
                    Some(FlushCommand::FlushNow(ack)) => {
                        let result = self.flush().await;
                        let _ = ack.send(result);
                    }
                    Some(FlushCommand::Close(ack)) => {
                        self.drain_updates();
                        let result = if self.pending.is_some() {
                            self.flush().await
                        } else {
                            Ok(())
                        };
                        let _ = ack.send(result);
                        break;
                    }
                    None => break,
                },
                update = self.updates.recv() => match update {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => self.bump(),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    if let Err(e) = self.flush().await {
                        error!("Giving up flushing {}: {}", self.replica.document(), e);
                    }
                }
            }
        }
        debug!("Flush task for {} stopped", self.replica.document());
    }

    /// Account for updates published but not yet received.
    fn drain_updates(&mut self) {
        loop {
            match self.updates.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => self.bump(),
                Err(_) => break,
            }
        }
    }

    fn bump(&mut self) {
        let now = Instant::now();
        let quiet = now + self.settings.debounce;
        self.pending = Some(match self.pending {
            Some((_, hard)) => (quiet, hard),
            None => (quiet, now + self.settings.max_wait),
        });
    }

    /// Write the whole replica, retrying with bounded backoff.
    async fn flush(&mut self) -> Result<(), ReplicaError> {
        self.pending = None;
        let document = self.replica.document().clone();
        let snapshot = self.replica.snapshot();

        let mut attempt = 0;
        loop {
            match self.store.save_snapshot(&document, &snapshot).await {
                Ok(()) => {
                    debug!("Flushed {} ({} bytes)", document, snapshot.len());
                    return Ok(());
                }
                Err(e) if attempt < self.settings.max_retries => {
                    let delay = self.settings.delay_for_attempt(attempt);
                    warn!(
                        "Flush of {} failed (attempt {}), retrying in {:?}: {}",
                        document,
                        attempt + 1,
                        delay,
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    // Keep the changes dirty so the next deadline tries again.
                    self.bump();
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
