//! Telemetry decoding.
//!
//! The analysis server answers an upload with a flat stream of 32-byte
//! frames, eight big-endian `f32`s each, one frame per fixed interval of the
//! source media. This module turns that payload into emotion values for an
//! arbitrary playback timestamp.

pub mod decoder;
pub mod emotion;

pub use decoder::{Frame, Interpolation, TelemetryDecoder, FRAME_BYTES};
pub use emotion::{Emotion, EmotionValues, FieldOrder};
