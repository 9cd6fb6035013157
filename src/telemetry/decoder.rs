use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::emotion::{Emotion, EmotionValues, FieldOrder};
use crate::config::TelemetryConfig;
use crate::error::DecodeError;

/// Size of one frame record: eight big-endian `f32`s.
pub const FRAME_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Show the frame covering the timestamp as-is.
    Nearest,
    /// Blend the covering frame with the next one.
    #[default]
    Linear,
}

/// Raw field values of one frame, in wire order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame(pub [f32; Emotion::COUNT]);

impl Frame {
    fn decode(record: &[u8]) -> Self {
        let mut fields = [0.0f32; Emotion::COUNT];
        for (field, chunk) in fields.iter_mut().zip(record.chunks_exact(4)) {
            *field = f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self(fields)
    }

    /// `self + (next - self) * elapsed / interval`, component-wise.
    fn lerp(&self, next: &Frame, elapsed: u64, interval: u64) -> Frame {
        let mut out = self.0;
        for (value, target) in out.iter_mut().zip(next.0) {
            *value += (target - *value) * elapsed as f32 / interval as f32;
        }
        Frame(out)
    }
}

/// Time-addressable view over a telemetry payload.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    data: Bytes,
    frame_interval_ms: u64,
    field_order: FieldOrder,
    interpolation: Interpolation,
}

impl TelemetryDecoder {
    pub fn new(data: impl Into<Bytes>, config: &TelemetryConfig) -> Result<Self, DecodeError> {
        let data = data.into();
        if data.len() < FRAME_BYTES {
            return Err(DecodeError::TooShort(data.len()));
        }
        Ok(Self {
            data,
            frame_interval_ms: config.frame_interval_ms.max(1),
            field_order: config.field_order,
            interpolation: config.interpolation,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / FRAME_BYTES
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.frame_count() as u64 * self.frame_interval_ms
    }

    /// Decode the 32 bytes at `byte_offset`. Offsets whose window would run
    /// past the end read the last 32 bytes of the payload instead.
    pub fn frame_at(&self, byte_offset: usize) -> Frame {
        let last = self.data.len() - FRAME_BYTES;
        let start = if byte_offset.saturating_add(FRAME_BYTES) > self.data.len() {
            last
        } else {
            byte_offset
        };
        Frame::decode(&self.data[start..start + FRAME_BYTES])
    }

    pub fn frame(&self, index: usize) -> Frame {
        self.frame_at(index.saturating_mul(FRAME_BYTES))
    }

    fn frame_index(&self, time_ms: u64) -> usize {
        usize::try_from(time_ms / self.frame_interval_ms).unwrap_or(usize::MAX)
    }

    /// Frame covering `time_ms`, no blending.
    pub fn nearest_frame(&self, time_ms: u64) -> Frame {
        self.frame(self.frame_index(time_ms))
    }

    /// Covering frame blended towards the next one. Both reads clamp at the
    /// tail, so past the end this repeats the last frame.
    pub fn interpolated_frame(&self, time_ms: u64) -> Frame {
        let k = self.frame_index(time_ms);
        let curr = self.frame(k);
        let next = self.frame(k.saturating_add(1));
        curr.lerp(&next, time_ms % self.frame_interval_ms, self.frame_interval_ms)
    }

    pub fn value_at(&self, time_ms: u64) -> EmotionValues {
        self.value_at_with(time_ms, self.interpolation)
    }

    pub fn value_at_with(&self, time_ms: u64, interpolation: Interpolation) -> EmotionValues {
        let frame = match interpolation {
            Interpolation::Nearest => self.nearest_frame(time_ms),
            Interpolation::Linear => self.interpolated_frame(time_ms),
        };
        self.field_order.label(frame.0)
    }
}
