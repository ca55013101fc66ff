//! Raw sample storage.
//!
//! A [`Buffer`] is one period-sized chunk in one [`SoundFormat`]. A
//! [`Stream`] is the ordered chunk sequence owned by an audio signal.

use crate::{Error, Result};
use num_complex::Complex32;

/// One chunk of interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    S8(Vec<i8>),
    S16(Vec<i16>),
    S24(Vec<I24>),
    S32(Vec<i32>),
    S64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Complex(Vec<Complex32>),
}

/// Runs `$body` with `$s` bound to the typed sample slice of a real-valued
/// buffer, or `$complex` with `$c` bound to the complex slice.
macro_rules! with_samples {
    ($buf:expr, $s:ident => $body:expr, $c:ident => $complex:expr) => {
        match $buf {
            Buffer::S8($s) => $body,
            Buffer::S16($s) => $body,
            Buffer::S24($s) => $body,
            Buffer::S32($s) => $body,
            Buffer::S64($s) => $body,
            Buffer::Float($s) => $body,
            Buffer::Double($s) => $body,
            Buffer::Complex($c) => $complex,
        }
    };
}

pub(crate) use with_samples;

mod copy;
mod format;
mod stream;

pub use copy::{copy_buffer_to_buffer, CopyMode};
pub use format::{Sample, SoundFormat, I24};
pub use stream::Stream;

impl Buffer {
    /// Allocate a silent buffer of `len` samples.
    pub fn zeroed(format: SoundFormat, len: usize) -> Self {
        match format {
            SoundFormat::S8 => Self::S8(vec![0; len]),
            SoundFormat::S16 => Self::S16(vec![0; len]),
            SoundFormat::S24 => Self::S24(vec![I24::default(); len]),
            SoundFormat::S32 => Self::S32(vec![0; len]),
            SoundFormat::S64 => Self::S64(vec![0; len]),
            SoundFormat::Float => Self::Float(vec![0.0; len]),
            SoundFormat::Double => Self::Double(vec![0.0; len]),
            SoundFormat::Complex => Self::Complex(vec![Complex32::new(0.0, 0.0); len]),
        }
    }

    /// Build a buffer from normalized (-1.0..=1.0) samples.
    pub fn from_normalized(format: SoundFormat, samples: &[f64]) -> Self {
        let mut buffer = Self::zeroed(format, samples.len());
        let scale = format.full_scale();
        with_samples!(&mut buffer,
            s => {
                for (dst, src) in s.iter_mut().zip(samples) {
                    *dst = Sample::from_f64(src * scale);
                }
            },
            c => {
                for (dst, src) in c.iter_mut().zip(samples) {
                    *dst = Complex32::new(*src as f32, 0.0);
                }
            }
        );
        buffer
    }

    pub fn format(&self) -> SoundFormat {
        match self {
            Self::S8(_) => SoundFormat::S8,
            Self::S16(_) => SoundFormat::S16,
            Self::S24(_) => SoundFormat::S24,
            Self::S32(_) => SoundFormat::S32,
            Self::S64(_) => SoundFormat::S64,
            Self::Float(_) => SoundFormat::Float,
            Self::Double(_) => SoundFormat::Double,
            Self::Complex(_) => SoundFormat::Complex,
        }
    }

    pub fn len(&self) -> usize {
        with_samples!(self, s => s.len(), c => c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Silence every sample.
    pub fn clear(&mut self) {
        with_samples!(self,
            s => s.iter_mut().for_each(|x| *x = Default::default()),
            c => c.iter_mut().for_each(|x| *x = Complex32::new(0.0, 0.0))
        )
    }

    /// Normalized value of sample `index`; the real part for complex buffers.
    pub fn sample(&self, index: usize) -> Option<f64> {
        let scale = self.format().full_scale();
        with_samples!(self,
            s => s.get(index).map(|x| x.to_f64() / scale),
            c => c.get(index).map(|x| x.re as f64)
        )
    }

    /// Whether every sample is zero.
    pub fn is_silent(&self) -> bool {
        with_samples!(self,
            s => s.iter().all(|x| x.to_f64() == 0.0),
            c => c.iter().all(|x| x.re == 0.0 && x.im == 0.0)
        )
    }

    /// Multiply `count` frames starting at `offset` by a per-frame gain.
    pub fn apply_gain<F>(&mut self, offset: usize, stride: usize, count: usize, mut gain: F)
    where
        F: FnMut(usize) -> f64,
    {
        let stride = stride.max(1);
        with_samples!(self,
            s => {
                for (frame, x) in s.iter_mut().skip(offset).step_by(stride).take(count).enumerate() {
                    *x = Sample::from_f64(x.to_f64() * gain(frame));
                }
            },
            c => {
                for (frame, x) in c.iter_mut().skip(offset).step_by(stride).take(count).enumerate() {
                    *x *= gain(frame) as f32;
                }
            }
        )
    }

    /// Add a normalized per-frame value to `count` frames.
    pub fn add_normalized<F>(&mut self, offset: usize, stride: usize, count: usize, mut value: F)
    where
        F: FnMut(usize) -> f64,
    {
        let stride = stride.max(1);
        let scale = self.format().full_scale();
        with_samples!(self,
            s => {
                for (frame, x) in s.iter_mut().skip(offset).step_by(stride).take(count).enumerate() {
                    *x = x.mix(Sample::from_f64(value(frame) * scale));
                }
            },
            c => {
                for (frame, x) in c.iter_mut().skip(offset).step_by(stride).take(count).enumerate() {
                    x.re += value(frame) as f32;
                }
            }
        )
    }

    /// Read frames as normalized `f32`, e.g. for an effect unit.
    pub fn read_f32(&self, offset: usize, stride: usize, out: &mut [f32]) -> Result<()> {
        let stride = stride.max(1);
        let scale = self.format().full_scale();
        with_samples!(self,
            s => {
                for (dst, x) in out.iter_mut().zip(s.iter().skip(offset).step_by(stride)) {
                    *dst = (x.to_f64() / scale) as f32;
                }
                Ok(())
            },
            _c => Err(Error::UnsupportedFormatConversion {
                from: SoundFormat::Complex,
                to: SoundFormat::Float,
            })
        )
    }

    /// Overwrite frames from normalized `f32`, saturating at the format range.
    pub fn write_f32(&mut self, offset: usize, stride: usize, input: &[f32]) -> Result<()> {
        let stride = stride.max(1);
        let scale = self.format().full_scale();
        with_samples!(self,
            s => {
                for (x, src) in s.iter_mut().skip(offset).step_by(stride).zip(input) {
                    *x = Sample::from_f64(*src as f64 * scale);
                }
                Ok(())
            },
            _c => Err(Error::UnsupportedFormatConversion {
                from: SoundFormat::Float,
                to: SoundFormat::Complex,
            })
        )
    }
}
