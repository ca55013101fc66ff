//! Soundcard sink with lock-striped sub-blocks.
//!
//! The period buffer is split into frame ranges, each behind its own lock,
//! so several recall instances can write into one hardware buffer at once.
//! A writer that cannot take a sub-block within its budget skips it for this
//! period (see [`Soundcard::try_lock_sub_block`]).

use crate::buffer::{copy_buffer_to_buffer, Buffer, CopyMode, SoundFormat};
use crate::config::EngineConfig;
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundcardPresets {
    pub channels: usize,
    pub samplerate: u32,
    pub buffer_size: usize,
    pub format: SoundFormat,
}

impl SoundcardPresets {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            channels: config.soundcard_channels,
            samplerate: config.samplerate,
            buffer_size: config.buffer_size,
            format: config.format,
        }
    }
}

/// Exclusive access to one sub-block; unlocks on drop.
pub struct SubBlockGuard<'a> {
    index: usize,
    frames: Range<usize>,
    channels: usize,
    buffer: MutexGuard<'a, Buffer>,
}

impl<'a> SubBlockGuard<'a> {
    pub fn new(
        index: usize,
        frames: Range<usize>,
        channels: usize,
        buffer: MutexGuard<'a, Buffer>,
    ) -> Self {
        Self {
            index,
            frames,
            channels,
            buffer,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Frames of the period this sub-block covers.
    pub fn frames(&self) -> Range<usize> {
        self.frames.clone()
    }

    /// Interleaved samples of the covered frames.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    /// Mix the covered frames of a mono period chunk into `channel`.
    pub fn mix_channel(&mut self, channel: usize, source: &Buffer, mode: CopyMode) -> Result<()> {
        if channel >= self.channels {
            return Ok(());
        }
        copy_buffer_to_buffer(
            &mut self.buffer,
            channel,
            self.channels,
            source,
            self.frames.start,
            1,
            self.frames.len(),
            mode,
        )
    }
}

/// The output device boundary.
pub trait Soundcard: Send + Sync {
    fn presets(&self) -> SoundcardPresets;

    fn sub_block_count(&self) -> usize;

    /// Block until the sub-block is free.
    fn lock_sub_block(&self, index: usize) -> Result<SubBlockGuard<'_>>;

    /// Give up with [`Error::SubBlockLockTimeout`] after `timeout`.
    fn try_lock_sub_block(&self, index: usize, timeout: Duration) -> Result<SubBlockGuard<'_>>;

    /// Silence the buffer for a new period.
    fn begin_period(&self);

    /// Hand the rendered period to the device.
    fn commit_period(&self);

    /// Last committed period, interleaved.
    fn get_buffer(&self) -> Buffer;
}

/// In-memory sink, for offline rendering and tests.
pub struct MemorySoundcard {
    presets: SoundcardPresets,
    sub_blocks: Vec<Mutex<Buffer>>,
    ranges: Vec<Range<usize>>,
    committed: Mutex<Buffer>,
    capture: Option<Mutex<Vec<Buffer>>>,
    periods: AtomicU64,
}

impl MemorySoundcard {
    pub fn new(presets: SoundcardPresets, sub_blocks: usize) -> Self {
        let count = sub_blocks.clamp(1, presets.buffer_size.max(1));
        let ranges: Vec<Range<usize>> = (0..count)
            .map(|i| {
                (i * presets.buffer_size / count)..((i + 1) * presets.buffer_size / count)
            })
            .collect();
        let sub_blocks = ranges
            .iter()
            .map(|r| Mutex::new(Buffer::zeroed(presets.format, r.len() * presets.channels)))
            .collect();
        Self {
            committed: Mutex::new(Buffer::zeroed(
                presets.format,
                presets.buffer_size * presets.channels,
            )),
            presets,
            sub_blocks,
            ranges,
            capture: None,
            periods: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(SoundcardPresets::from_config(config), config.sub_blocks)
    }

    /// Keep every committed period.
    pub fn with_capture(mut self) -> Self {
        self.capture = Some(Mutex::new(Vec::new()));
        self
    }

    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Acquire)
    }

    /// Committed periods since the last call, oldest first.
    pub fn take_capture(&self) -> Vec<Buffer> {
        self.capture
            .as_ref()
            .map(|c| std::mem::take(&mut *c.lock()))
            .unwrap_or_default()
    }

    fn guard<'a>(&'a self, index: usize, buffer: MutexGuard<'a, Buffer>) -> SubBlockGuard<'a> {
        SubBlockGuard::new(index, self.ranges[index].clone(), self.presets.channels, buffer)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.sub_blocks.len() {
            Ok(())
        } else {
            Err(Error::InvalidGraph(format!(
                "sub-block {index} out of range ({} blocks)",
                self.sub_blocks.len()
            )))
        }
    }
}

impl Soundcard for MemorySoundcard {
    fn presets(&self) -> SoundcardPresets {
        self.presets
    }

    fn sub_block_count(&self) -> usize {
        self.sub_blocks.len()
    }

    fn lock_sub_block(&self, index: usize) -> Result<SubBlockGuard<'_>> {
        self.check_index(index)?;
        Ok(self.guard(index, self.sub_blocks[index].lock()))
    }

    fn try_lock_sub_block(&self, index: usize, timeout: Duration) -> Result<SubBlockGuard<'_>> {
        self.check_index(index)?;
        match self.sub_blocks[index].try_lock_for(timeout) {
            Some(buffer) => Ok(self.guard(index, buffer)),
            None => Err(Error::SubBlockLockTimeout { index }),
        }
    }

    fn begin_period(&self) {
        for block in &self.sub_blocks {
            block.lock().clear();
        }
    }

    fn commit_period(&self) {
        let channels = self.presets.channels;
        let mut committed = Buffer::zeroed(
            self.presets.format,
            self.presets.buffer_size * channels,
        );
        // same format on both sides
        if let Ok(mode) = CopyMode::resolve(self.presets.format, self.presets.format) {
            for (block, range) in self.sub_blocks.iter().zip(&self.ranges) {
                let block = block.lock();
                let _ = copy_buffer_to_buffer(
                    &mut committed,
                    range.start * channels,
                    1,
                    &block,
                    0,
                    1,
                    block.len(),
                    mode,
                );
            }
        }
        if let Some(capture) = &self.capture {
            capture.lock().push(committed.clone());
        }
        *self.committed.lock() = committed;
        self.periods.fetch_add(1, Ordering::AcqRel);
    }

    fn get_buffer(&self) -> Buffer {
        self.committed.lock().clone()
    }
}
