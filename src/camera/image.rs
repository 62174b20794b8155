//! Captured frames and the accounting around their buffers.
//!
//! The device owns a small pool of image buffers; every frame handed out must
//! be returned exactly once or the pool starves and acquisition stalls. A
//! [`RawImage`] therefore tracks its release state itself: callers may
//! release explicitly, and `Drop` covers every other path (errors, panics,
//! stray frames nobody claimed).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pixel container format of a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    /// JPEG-compressed frame, ready to persist as-is.
    Jpeg,
}

impl ImageFormat {
    /// File extension used when persisting this format.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// Shared acquire/release counters for a device's buffer pool.
///
/// The backend bumps `acquired` when it hands out a frame; releasing the
/// frame bumps `released`. The two must converge to equality once all frames
/// are done with.
#[derive(Debug, Default)]
pub struct BufferLedger {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl BufferLedger {
    /// Creates an empty ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one buffer handed out by the device.
    pub fn record_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn record_release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    /// Total buffers handed out so far.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Total buffers returned so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers currently held by consumers.
    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released()
    }
}

/// One captured frame, owned by exactly one holder at a time.
///
/// Ownership moves device → scheduler → persistence worker; whoever holds the
/// value last releases the buffer, implicitly on drop if not explicitly.
#[derive(Debug)]
pub struct RawImage {
    data: Option<Vec<u8>>,
    width: u32,
    height: u32,
    format: ImageFormat,
    timestamp_ns: i64,
    ledger: Option<Arc<BufferLedger>>,
}

impl RawImage {
    /// Wraps a frame buffer handed out by the device.
    ///
    /// The caller is expected to have recorded the acquisition on `ledger`.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: ImageFormat,
        timestamp_ns: i64,
        ledger: Arc<BufferLedger>,
    ) -> Self {
        Self {
            data: Some(data),
            width,
            height,
            format,
            timestamp_ns,
            ledger: Some(ledger),
        }
    }

    /// Frame payload. Empty once the buffer has been released.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Container format of the payload.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Device timestamp of the exposure, nanoseconds.
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Returns the buffer to the device pool.
    ///
    /// Safe to call once; dropping an unreleased image does the same thing.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if self.data.take().is_some() {
            if let Some(ledger) = self.ledger.take() {
                ledger.record_release();
            }
        }
    }
}

impl Drop for RawImage {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// A bounded, ordered collection of frames from one burst request.
///
/// Filled incrementally as frames arrive; handed to the consumer only once
/// full, as a unit.
#[derive(Debug)]
pub struct BurstBatch {
    images: Vec<RawImage>,
    capacity: usize,
}

impl BurstBatch {
    /// Creates an empty batch for `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            images: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a frame in arrival order. Frames past capacity are refused
    /// and returned to the caller.
    pub fn push(&mut self, image: RawImage) -> Result<(), RawImage> {
        if self.images.len() >= self.capacity {
            return Err(image);
        }
        self.images.push(image);
        Ok(())
    }

    /// Configured burst length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames collected so far.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True when no frames have arrived yet.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// True once the batch holds exactly `capacity` frames.
    pub fn is_full(&self) -> bool {
        self.images.len() == self.capacity
    }

    /// Consumes the batch, yielding frames in arrival order.
    pub fn into_images(self) -> Vec<RawImage> {
        self.images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(ledger: &Arc<BufferLedger>) -> RawImage {
        ledger.record_acquire();
        RawImage::new(
            vec![0xFF, 0xD8, 0xFF, 0xD9],
            64,
            48,
            ImageFormat::Jpeg,
            0,
            Arc::clone(ledger),
        )
    }

    #[test]
    fn test_explicit_release_is_counted_once() {
        let ledger = BufferLedger::new();
        let image = test_image(&ledger);
        assert_eq!(ledger.outstanding(), 1);

        image.release();
        assert_eq!(ledger.acquired(), 1);
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let ledger = BufferLedger::new();
        {
            let _image = test_image(&ledger);
        }
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_bytes_empty_after_release_path() {
        let ledger = BufferLedger::new();
        let image = test_image(&ledger);
        assert_eq!(image.bytes().len(), 4);
        image.release();
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn test_burst_batch_refuses_overflow() {
        let ledger = BufferLedger::new();
        let mut batch = BurstBatch::with_capacity(2);
        assert!(batch.push(test_image(&ledger)).is_ok());
        assert!(batch.push(test_image(&ledger)).is_ok());
        assert!(batch.is_full());

        let refused = batch.push(test_image(&ledger));
        assert!(refused.is_err());
        drop(refused);
        drop(batch);
        assert_eq!(ledger.acquired(), ledger.released());
    }
}
