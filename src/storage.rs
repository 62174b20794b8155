//! Background image persistence.
//!
//! The saver is a fire-and-forget worker: the scheduler enqueues a frame with
//! its destination and metadata and moves on to the next capture without
//! waiting for the write. Whatever happens to the write, the frame's device
//! buffer is released exactly once, so a full disk can never starve the
//! device's buffer pool.

use crate::camera::image::{BurstBatch, RawImage};
use crate::error::{AppResult, CaptureError};
use crate::experiment::{sample_id, SampleType};
use crate::metadata::ShotMetadata;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// One frame queued for persistence.
#[derive(Debug)]
pub struct SaveJob {
    /// The frame; its buffer is released when the job finishes.
    pub image: RawImage,
    /// Directory the file lands in; created on demand.
    pub folder: PathBuf,
    /// File-name prefix.
    pub sample_type: SampleType,
    /// Zero-padded suffix; an empty string omits the suffix entirely.
    pub sample_id: String,
    /// Tags persisted alongside the payload.
    pub metadata: ShotMetadata,
}

impl SaveJob {
    fn file_name(&self) -> String {
        let extension = self.image.format().extension();
        if self.sample_id.is_empty() {
            format!("{}.{}", self.sample_type.as_str(), extension)
        } else {
            format!(
                "{}_{}.{}",
                self.sample_type.as_str(),
                self.sample_id,
                extension
            )
        }
    }
}

enum SaveCommand {
    Persist(Box<SaveJob>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the persistence worker. Cloneable; the worker drains and exits
/// once every handle is dropped.
#[derive(Clone)]
pub struct ImageSaver {
    tx: mpsc::UnboundedSender<SaveCommand>,
}

impl ImageSaver {
    /// Starts the worker task.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_saver(rx));
        (Self { tx }, task)
    }

    /// Queues one frame. Fire-and-forget: errors are logged by the worker,
    /// and a dead worker still releases the frame via drop.
    pub fn enqueue(&self, job: SaveJob) {
        if self.tx.send(SaveCommand::Persist(Box::new(job))).is_err() {
            tracing::error!("image saver is gone; frame released unsaved");
        }
    }

    /// Queues every frame of a burst into `folder`, named by arrival order.
    pub fn enqueue_batch(&self, batch: BurstBatch, folder: PathBuf, metadata: ShotMetadata) {
        let images = batch.into_images();
        let count = images.len();
        for (index, image) in images.into_iter().enumerate() {
            self.enqueue(SaveJob {
                image,
                folder: folder.clone(),
                sample_type: SampleType::Barcode,
                sample_id: sample_id(count, index),
                metadata: metadata.clone(),
            });
        }
    }

    /// Waits until every job queued before this call has been processed.
    pub async fn flush(&self) -> AppResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SaveCommand::Flush(done_tx))
            .map_err(|_| CaptureError::Storage("image saver stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| CaptureError::Storage("image saver stopped during flush".to_string()))
    }
}

async fn run_saver(mut rx: mpsc::UnboundedReceiver<SaveCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            SaveCommand::Persist(job) => persist(*job).await,
            SaveCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("image saver drained");
}

async fn persist(job: SaveJob) {
    let path = job.folder.join(job.file_name());
    let image = job.image;

    if let Err(err) = write_payload(&path, &job.folder, image.bytes()).await {
        tracing::error!(path = %path.display(), error = %err, "failed to write image payload");
    }

    // Metadata is attached even when the payload write failed.
    if let Err(err) = write_metadata(&path, &job.metadata).await {
        tracing::error!(path = %path.display(), error = %err, "failed to write image metadata");
    }

    // The buffer goes back to the device pool no matter what happened above;
    // drop would catch a missed path, this makes it explicit.
    image.release();
}

async fn write_payload(path: &Path, folder: &Path, bytes: &[u8]) -> AppResult<()> {
    tokio::fs::create_dir_all(folder).await?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn write_metadata(image_path: &Path, metadata: &ShotMetadata) -> AppResult<()> {
    let path = image_path.with_extension("json");
    let body = serde_json::to_vec_pretty(metadata)
        .map_err(|err| CaptureError::Storage(err.to_string()))?;
    tokio::fs::write(path, body).await?;
    Ok(())
}
