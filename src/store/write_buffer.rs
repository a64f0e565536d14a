//! Single-writer queue for store mutations
//!
//! Handlers never touch the file. Mutations are sent to one background task
//! which applies them in arrival order, persists the document once per batch
//! and then acknowledges every command in the batch. Concurrent requests can
//! therefore never lose each other's increments.

use chrono::{DateTime, Local, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

use super::{persist, AnalyticsStore, ButtonClickRecord, StoreError, StoreLimits, StatsReport};

const BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub enum WriteCommand {
    PageView { is_unique: bool, referrer: String },
    ButtonClick { button_id: String, button_name: String, referrer: String },
    Clear,
    PruneBefore(NaiveDate),
}

/// What a command did to the store
#[derive(Debug, Clone)]
pub enum Applied {
    PageView { date: NaiveDate, is_unique: bool, referrer: String },
    ButtonClick(ButtonClickRecord),
    Cleared,
    Pruned(usize),
}

struct QueuedWrite {
    command: WriteCommand,
    at: DateTime<Local>,
    ack: oneshot::Sender<Applied>,
}

/// Cloneable handle injected into request handlers
#[derive(Clone)]
pub struct StoreHandle {
    state: Arc<RwLock<AnalyticsStore>>,
    tx: mpsc::UnboundedSender<QueuedWrite>,
    limits: StoreLimits,
}

/// Start the writer task over an already loaded store
pub fn start_write_buffer(path: PathBuf, store: AnalyticsStore, limits: StoreLimits) -> StoreHandle {
    let state = Arc::new(RwLock::new(store));
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(write_buffer_task(path, state.clone(), rx));

    StoreHandle { state, tx, limits }
}

impl StoreHandle {
    /// Queue a mutation stamped with the current local time and wait until it is applied
    pub async fn submit(&self, command: WriteCommand) -> Result<Applied, StoreError> {
        self.submit_at(command, Local::now()).await
    }

    pub async fn submit_at(&self, command: WriteCommand, at: DateTime<Local>) -> Result<Applied, StoreError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(QueuedWrite { command, at, ack })
            .map_err(|_| StoreError::Closed)?;
        done.await.map_err(|_| StoreError::Closed)
    }

    pub async fn record_page_view(&self, is_unique: bool, referrer: String) -> Result<Applied, StoreError> {
        self.submit(WriteCommand::PageView { is_unique, referrer }).await
    }

    pub async fn record_button_click(
        &self,
        button_id: String,
        button_name: String,
        referrer: String,
    ) -> Result<Applied, StoreError> {
        self.submit(WriteCommand::ButtonClick {
            button_id,
            button_name,
            referrer,
        })
        .await
    }

    /// Run a read-only query against the current state
    pub async fn read<R>(&self, f: impl FnOnce(&AnalyticsStore) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    pub async fn report(&self, today: NaiveDate, days: u32) -> StatsReport {
        let limits = self.limits;
        self.read(|store| store.report(today, days, limits)).await
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }
}

fn apply(store: &mut AnalyticsStore, command: WriteCommand, at: DateTime<Local>) -> Applied {
    match command {
        WriteCommand::PageView { is_unique, referrer } => {
            let date = at.date_naive();
            store.record_page_view(date, is_unique, &referrer);
            Applied::PageView {
                date,
                is_unique,
                referrer,
            }
        }
        WriteCommand::ButtonClick {
            button_id,
            button_name,
            referrer,
        } => {
            let record = ButtonClickRecord::new(button_id, button_name, referrer, at);
            store.record_button_click(record.clone());
            Applied::ButtonClick(record)
        }
        WriteCommand::Clear => {
            store.clear();
            Applied::Cleared
        }
        WriteCommand::PruneBefore(cutoff) => Applied::Pruned(store.prune_before(cutoff)),
    }
}

/// Background task that owns the write path
async fn write_buffer_task(
    path: PathBuf,
    state: Arc<RwLock<AnalyticsStore>>,
    mut rx: mpsc::UnboundedReceiver<QueuedWrite>,
) {
    let mut batch: Vec<QueuedWrite> = Vec::with_capacity(BATCH_SIZE);

    info!(path = %path.display(), batch_size = BATCH_SIZE, "Write buffer started");

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < BATCH_SIZE {
            match rx.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }

        let mut acks = Vec::with_capacity(batch.len());
        let snapshot = {
            let mut store = state.write().await;
            for queued in batch.drain(..) {
                let applied = apply(&mut store, queued.command, queued.at);
                acks.push((queued.ack, applied));
            }
            store.clone()
        };

        let count = acks.len();
        match persist(&path, &snapshot).await {
            Ok(()) => debug!("Persisted {} analytics mutations", count),
            // In-memory state stays authoritative; the next batch retries the write
            Err(e) => error!(path = %path.display(), error = %e, "Failed to persist {} analytics mutations", count),
        }

        for (ack, applied) in acks {
            let _ = ack.send(applied);
        }
    }

    info!("Write buffer shutting down");
}
