//! Pixel buffers and the readback cache.
//!
//! Readback crosses the frame channel, so a region read is always one frame behind: the first
//! read of a region returns nothing and queues a request, later reads return the last captured
//! copy while a fresh request refreshes it in the background.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::frame::{FrameChannel, PendingPixels, PixelPoll, PixelRegion, MAX_SURFACE_DIMENSION};

/// Readback copies kept per runtime; the least recently read region is dropped first.
pub const MAX_CACHED_REGIONS: usize = 64;

/// Flat RGBA pixel data with 0-indexed `(x, y)` addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer. Sides are capped at [`MAX_SURFACE_DIMENSION`].
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_rgba(width, height, Vec::new())
    }

    /// Wraps readback bytes. Short input is zero-padded, long input truncated.
    pub fn from_rgba(width: u32, height: u32, mut data: Vec<u8>) -> Self {
        let (width, height) = (width.min(MAX_SURFACE_DIMENSION), height.min(MAX_SURFACE_DIMENSION));
        data.resize(PixelRegion::new(0, 0, width, height).byte_len(), 0);
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 4)
    }

    /// Out-of-bounds reads yield transparent black.
    pub fn get_pixel(&self, x: i64, y: i64) -> [u8; 4] {
        match self.offset(x, y) {
            Some(idx) => [self.data[idx], self.data[idx + 1], self.data[idx + 2], self.data[idx + 3]],
            None => [0, 0, 0, 0],
        }
    }

    /// Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: i64, y: i64, rgba: [u8; 4]) {
        if let Some(idx) = self.offset(x, y) {
            self.data[idx..idx + 4].copy_from_slice(&rgba);
        }
    }
}

/// Readback cache keyed by exact region, with at most one request in flight per key.
#[derive(Default)]
pub struct PixelCache {
    entries: HashMap<PixelRegion, CachedPixels>,
    in_flight: HashMap<PixelRegion, PendingPixels>,
    reads: u64,
}

struct CachedPixels {
    bytes: Vec<u8>,
    last_read: u64,
}

impl PixelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last captured copy of `region`, if any, and makes sure a refresh is queued.
    pub fn get_image_data(
        &mut self,
        region: PixelRegion,
        channel: &mut dyn FrameChannel,
    ) -> EngineResult<Option<PixelBuffer>> {
        if region.width == 0 || region.height == 0 {
            return Ok(None);
        }
        self.collect_completed();
        self.reads += 1;
        let cached = self.entries.get_mut(&region).map(|entry| {
            entry.last_read = self.reads;
            PixelBuffer::from_rgba(region.width, region.height, entry.bytes.clone())
        });
        if !self.in_flight.contains_key(&region) {
            let pending = channel.request_image_data(region)?;
            debug!(?region, "queued pixel readback");
            self.in_flight.insert(region, pending);
        }
        Ok(cached)
    }

    /// Moves finished readbacks into the cache. Each entry is replaced whole.
    pub fn collect_completed(&mut self) {
        let mut finished = Vec::new();
        for (region, pending) in &self.in_flight {
            match pending.poll() {
                PixelPoll::Ready(bytes) => finished.push((*region, Some(bytes))),
                PixelPoll::Cancelled => finished.push((*region, None)),
                PixelPoll::Pending => {}
            }
        }
        for (region, bytes) in finished {
            self.in_flight.remove(&region);
            if let Some(bytes) = bytes {
                let last_read = self.entries.get(&region).map_or(self.reads, |entry| entry.last_read);
                self.entries.insert(region, CachedPixels { bytes, last_read });
            }
        }
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > MAX_CACHED_REGIONS {
            let Some(oldest) = self.entries.iter().min_by_key(|(_, entry)| entry.last_read).map(|(region, _)| *region)
            else {
                return;
            };
            debug!(region = ?oldest, "evicted pixel readback");
            self.entries.remove(&oldest);
        }
    }

    pub fn is_in_flight(&self, region: &PixelRegion) -> bool {
        self.in_flight.contains_key(region)
    }

    pub fn cached_regions(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }
}

/// Allocates a zero-filled buffer, independent of the cache.
pub fn create_image_data(width: u32, height: u32) -> EngineResult<PixelBuffer> {
    check_dimensions(i64::from(width), i64::from(height))?;
    Ok(PixelBuffer::new(width, height))
}

/// Rejects sides larger than [`MAX_SURFACE_DIMENSION`].
pub fn check_dimensions(width: i64, height: i64) -> EngineResult<()> {
    let limit = i64::from(MAX_SURFACE_DIMENSION);
    if width > limit || height > limit {
        return Err(EngineError::TooLarge { width, height, limit: MAX_SURFACE_DIMENSION });
    }
    Ok(())
}
