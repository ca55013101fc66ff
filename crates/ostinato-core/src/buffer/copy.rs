//! Additive, stride-aware copies between buffers of any format.
//!
//! The conversion is resolved once per call into a [`CopyMode`]. Integer to
//! integer copies scale by the ratio of full-scale values (`s8 -> s16` is
//! `32767 / 127`), integer to float divides by the source full scale and
//! float to integer multiplies by the destination full scale. Results
//! saturate, they never wrap.

use super::{Buffer, Sample, SoundFormat};
use crate::{Error, Result};
use num_complex::Complex32;

/// A resolved format conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyMode {
    pub dest: SoundFormat,
    pub source: SoundFormat,
    scale: f64,
}

impl CopyMode {
    /// Resolve the conversion from `source` into `dest`.
    ///
    /// Complex and real samples cannot be mixed into each other.
    pub fn resolve(dest: SoundFormat, source: SoundFormat) -> Result<Self> {
        if dest.is_complex() != source.is_complex() {
            return Err(Error::UnsupportedFormatConversion {
                from: source,
                to: dest,
            });
        }
        Ok(Self {
            dest,
            source,
            scale: dest.full_scale() / source.full_scale(),
        })
    }

    /// Multiplier applied to each source sample.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn is_identity(&self) -> bool {
        self.dest == self.source
    }
}

/// Number of strided frames available from `offset`.
#[inline]
fn available(len: usize, offset: usize, stride: usize) -> usize {
    if offset >= len {
        0
    } else {
        (len - offset).div_ceil(stride)
    }
}

#[inline]
fn mix_same<T: Sample>(
    dest: &mut [T],
    dest_offset: usize,
    dest_stride: usize,
    source: &[T],
    source_offset: usize,
    source_stride: usize,
    count: usize,
) {
    let dst = dest.iter_mut().skip(dest_offset).step_by(dest_stride);
    let src = source.iter().skip(source_offset).step_by(source_stride);
    for (d, s) in dst.zip(src).take(count) {
        *d = d.mix(*s);
    }
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn mix_scaled<D: Sample, S: Sample>(
    dest: &mut [D],
    dest_offset: usize,
    dest_stride: usize,
    source: &[S],
    source_offset: usize,
    source_stride: usize,
    count: usize,
    scale: f64,
) {
    let dst = dest.iter_mut().skip(dest_offset).step_by(dest_stride);
    let src = source.iter().skip(source_offset).step_by(source_stride);
    for (d, s) in dst.zip(src).take(count) {
        *d = d.mix(D::from_f64(s.to_f64() * scale));
    }
}

#[allow(clippy::too_many_arguments)]
fn mix_from<D: Sample>(
    dest: &mut [D],
    dest_offset: usize,
    dest_stride: usize,
    source: &Buffer,
    source_offset: usize,
    source_stride: usize,
    count: usize,
    scale: f64,
) {
    super::with_samples!(source,
        s => mix_scaled(dest, dest_offset, dest_stride, s, source_offset, source_stride, count, scale),
        _c => {}
    )
}

/// Mix `count` frames of `source` into `dest`.
///
/// Offsets are in samples, strides in samples per frame. `count` is clamped
/// to what both buffers can address. Nothing is written when `mode` does not
/// match the buffer formats.
#[allow(clippy::too_many_arguments)]
pub fn copy_buffer_to_buffer(
    dest: &mut Buffer,
    dest_offset: usize,
    dest_stride: usize,
    source: &Buffer,
    source_offset: usize,
    source_stride: usize,
    count: usize,
    mode: CopyMode,
) -> Result<()> {
    if mode.dest != dest.format() || mode.source != source.format() {
        return Err(Error::UnsupportedFormatConversion {
            from: source.format(),
            to: dest.format(),
        });
    }
    let dest_stride = dest_stride.max(1);
    let source_stride = source_stride.max(1);
    let count = count
        .min(available(dest.len(), dest_offset, dest_stride))
        .min(available(source.len(), source_offset, source_stride));
    if count == 0 {
        return Ok(());
    }

    let args = (dest_offset, dest_stride, source_offset, source_stride, count);
    match (dest, source) {
        (Buffer::S8(d), Buffer::S8(s)) => mix_same(d, args.0, args.1, s, args.2, args.3, args.4),
        (Buffer::S16(d), Buffer::S16(s)) => mix_same(d, args.0, args.1, s, args.2, args.3, args.4),
        (Buffer::S24(d), Buffer::S24(s)) => mix_same(d, args.0, args.1, s, args.2, args.3, args.4),
        (Buffer::S32(d), Buffer::S32(s)) => mix_same(d, args.0, args.1, s, args.2, args.3, args.4),
        (Buffer::S64(d), Buffer::S64(s)) => mix_same(d, args.0, args.1, s, args.2, args.3, args.4),
        (Buffer::Float(d), Buffer::Float(s)) => {
            mix_same(d, args.0, args.1, s, args.2, args.3, args.4)
        }
        (Buffer::Double(d), Buffer::Double(s)) => {
            mix_same(d, args.0, args.1, s, args.2, args.3, args.4)
        }
        (Buffer::Complex(d), Buffer::Complex(s)) => mix_complex(d, s, args),
        (dest, source) => {
            let scale = mode.scale;
            super::with_samples!(dest,
                d => mix_from(d, args.0, args.1, source, args.2, args.3, args.4, scale),
                _c => {}
            )
        }
    }
    Ok(())
}

fn mix_complex(
    dest: &mut [Complex32],
    source: &[Complex32],
    (dest_offset, dest_stride, source_offset, source_stride, count): (usize, usize, usize, usize, usize),
) {
    let dst = dest.iter_mut().skip(dest_offset).step_by(dest_stride);
    let src = source.iter().skip(source_offset).step_by(source_stride);
    for (d, s) in dst.zip(src).take(count) {
        *d += *s;
    }
}
