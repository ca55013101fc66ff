//! Ordered sequence of period-sized chunks.

use super::{copy_buffer_to_buffer, Buffer, CopyMode, SoundFormat};
use crate::{Error, Result};

/// The chunk sequence of one audio signal, one chunk per period.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    format: SoundFormat,
    buffer_size: usize,
    stride: usize,
    chunks: Vec<Buffer>,
}

impl Stream {
    /// Empty mono stream.
    pub fn new(format: SoundFormat, buffer_size: usize) -> Self {
        Self::interleaved(format, buffer_size, 1)
    }

    /// Empty stream whose chunks hold `stride` interleaved channels.
    pub fn interleaved(format: SoundFormat, buffer_size: usize, stride: usize) -> Self {
        Self {
            format,
            buffer_size,
            stride: stride.max(1),
            chunks: Vec::new(),
        }
    }

    /// Chunk a mono run of normalized samples, zero-padding the last chunk.
    pub fn from_normalized(format: SoundFormat, buffer_size: usize, samples: &[f64]) -> Self {
        let mut stream = Self::new(format, buffer_size);
        for frames in samples.chunks(buffer_size.max(1)) {
            let mut padded = frames.to_vec();
            padded.resize(buffer_size, 0.0);
            stream.chunks.push(Buffer::from_normalized(format, &padded));
        }
        stream
    }

    pub fn format(&self) -> SoundFormat {
        self.format
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, index: usize) -> Option<&Buffer> {
        self.chunks.get(index)
    }

    pub fn chunk_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        self.chunks.get_mut(index)
    }

    pub fn chunks(&self) -> &[Buffer] {
        &self.chunks
    }

    /// Append one silent chunk.
    pub fn push_zeroed(&mut self) {
        self.chunks
            .push(Buffer::zeroed(self.format, self.buffer_size * self.stride));
    }

    /// Grow with silent chunks or truncate to `len` chunks.
    pub fn resize(&mut self, len: usize) {
        if len < self.chunks.len() {
            self.chunks.truncate(len);
        }
        while self.chunks.len() < len {
            self.push_zeroed();
        }
    }

    /// Drop the first `count` chunks.
    pub fn drop_front(&mut self, count: usize) {
        let count = count.min(self.chunks.len());
        self.chunks.drain(..count);
    }

    /// Silence every chunk.
    pub fn clear(&mut self) {
        self.chunks.iter_mut().for_each(Buffer::clear);
    }

    /// Mix `source` into this stream starting `attack` frames into chunk `index`.
    ///
    /// The first `frame_count - attack` source frames land in chunk `index`
    /// at offset `attack`; the remaining `attack` frames land at the start of
    /// chunk `index + 1`, which is appended when missing.
    pub fn copy_with_attack(
        &mut self,
        index: usize,
        dest_stride: usize,
        source: &Buffer,
        source_stride: usize,
        attack: usize,
        frame_count: usize,
    ) -> Result<()> {
        if attack > 0 && attack >= frame_count {
            return Err(Error::InvalidGraph(format!(
                "attack {attack} must be below frame count {frame_count}"
            )));
        }
        let mode = CopyMode::resolve(self.format, source.format())?;
        let dest_stride = dest_stride.max(1);
        let source_stride = source_stride.max(1);

        while self.chunks.len() <= index {
            self.push_zeroed();
        }
        copy_buffer_to_buffer(
            &mut self.chunks[index],
            attack * dest_stride,
            dest_stride,
            source,
            0,
            source_stride,
            frame_count - attack,
            mode,
        )?;

        if attack != 0 {
            if self.chunks.len() <= index + 1 {
                self.push_zeroed();
            }
            copy_buffer_to_buffer(
                &mut self.chunks[index + 1],
                0,
                dest_stride,
                source,
                (frame_count - attack) * source_stride,
                source_stride,
                attack,
                mode,
            )?;
        }
        Ok(())
    }

    /// Re-chunk the content into a new period size, keeping `frame_count` frames.
    pub fn realloc_buffer_size(&mut self, buffer_size: usize, frame_count: usize) -> Result<()> {
        if buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be non-zero".into()));
        }
        if buffer_size == self.buffer_size {
            return Ok(());
        }
        let mode = CopyMode::resolve(self.format, self.format)?;
        let old = std::mem::take(&mut self.chunks);
        let old_size = self.buffer_size;
        self.buffer_size = buffer_size;
        self.resize(frame_count.div_ceil(buffer_size));

        for frame in 0..frame_count {
            let (src_chunk, src_frame) = (frame / old_size, frame % old_size);
            let (dst_chunk, dst_frame) = (frame / buffer_size, frame % buffer_size);
            let Some(source) = old.get(src_chunk) else {
                break;
            };
            for channel in 0..self.stride {
                copy_buffer_to_buffer(
                    &mut self.chunks[dst_chunk],
                    dst_frame * self.stride + channel,
                    self.stride,
                    source,
                    src_frame * self.stride + channel,
                    self.stride,
                    1,
                    mode,
                )?;
            }
        }
        Ok(())
    }

    /// Normalized samples of every chunk concatenated.
    pub fn to_normalized(&self) -> Vec<f64> {
        self.chunks
            .iter()
            .flat_map(|chunk| (0..chunk.len()).filter_map(move |i| chunk.sample(i)))
            .collect()
    }
}
