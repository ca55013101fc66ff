//! Tolerance constants for audio testing.

/// Exact float operations (passthrough, unity gain).
pub const FLOAT_EPSILON: f64 = 1e-6;

/// 16-bit quantization step size.
pub const INT16_EPSILON: f64 = 1.0 / 32767.0;

/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f64 = 1e-4;
