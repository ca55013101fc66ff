//! Sample formats and per-sample conversion.

use serde::{Deserialize, Serialize};

/// Sample representation of a buffer chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SoundFormat {
    S8,
    #[default]
    S16,
    /// 24-bit signed, stored in the low bits of an `i32`.
    S24,
    S32,
    S64,
    Float,
    Double,
    Complex,
}

impl SoundFormat {
    /// Bits of precision per sample (per component for complex).
    pub fn bits(self) -> u32 {
        match self {
            Self::S8 => 8,
            Self::S16 => 16,
            Self::S24 => 24,
            Self::S32 => 32,
            Self::S64 => 64,
            Self::Float => 32,
            Self::Double => 64,
            Self::Complex => 32,
        }
    }

    /// Largest positive sample value, `1.0` for floating point formats.
    pub fn full_scale(self) -> f64 {
        match self {
            Self::S8 => i8::MAX as f64,
            Self::S16 => i16::MAX as f64,
            Self::S24 => I24::MAX as f64,
            Self::S32 => i32::MAX as f64,
            Self::S64 => i64::MAX as f64,
            Self::Float | Self::Double | Self::Complex => 1.0,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::S8 | Self::S16 | Self::S24 | Self::S32 | Self::S64
        )
    }

    pub fn is_complex(self) -> bool {
        self == Self::Complex
    }
}

/// 24-bit signed sample held in an `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct I24(pub i32);

impl I24 {
    pub const MAX: i32 = (1 << 23) - 1;
    pub const MIN: i32 = -(1 << 23);

    #[inline]
    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }
}

/// A real-valued sample type.
///
/// Conversion goes through `f64` scaled by the format's full-scale value and
/// saturates at the destination range.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    const FORMAT: SoundFormat;

    fn to_f64(self) -> f64;

    /// Saturating conversion from an already scaled value.
    fn from_f64(value: f64) -> Self;

    /// Saturating addition.
    fn mix(self, other: Self) -> Self;
}

macro_rules! impl_int_sample {
    ($ty:ty, $format:ident) => {
        impl Sample for $ty {
            const FORMAT: SoundFormat = SoundFormat::$format;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                // float to int casts saturate
                value.round() as $ty
            }

            #[inline]
            fn mix(self, other: Self) -> Self {
                self.saturating_add(other)
            }
        }
    };
}

impl_int_sample!(i8, S8);
impl_int_sample!(i16, S16);
impl_int_sample!(i32, S32);
impl_int_sample!(i64, S64);

impl Sample for I24 {
    const FORMAT: SoundFormat = SoundFormat::S24;

    #[inline]
    fn to_f64(self) -> f64 {
        self.0 as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        Self((value.round() as i32).clamp(Self::MIN, Self::MAX))
    }

    #[inline]
    fn mix(self, other: Self) -> Self {
        Self::new(self.0.saturating_add(other.0))
    }
}

impl Sample for f32 {
    const FORMAT: SoundFormat = SoundFormat::Float;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn mix(self, other: Self) -> Self {
        self + other
    }
}

impl Sample for f64 {
    const FORMAT: SoundFormat = SoundFormat::Double;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn mix(self, other: Self) -> Self {
        self + other
    }
}
