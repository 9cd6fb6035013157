use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Emotion categories in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Anger,
    Contempt,
    Disgust,
    Fear,
    Happiness,
    Neutral,
    Sadness,
    Surprise,
}

impl Emotion {
    pub const COUNT: usize = 8;

    pub const ALL: [Emotion; Self::COUNT] = [
        Emotion::Anger,
        Emotion::Contempt,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happiness,
        Emotion::Neutral,
        Emotion::Sadness,
        Emotion::Surprise,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Anger => "Anger",
            Self::Contempt => "Contempt",
            Self::Disgust => "Disgust",
            Self::Fear => "Fear",
            Self::Happiness => "Happiness",
            Self::Neutral => "Neutral",
            Self::Sadness => "Sadness",
            Self::Surprise => "Surprise",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which emotion each of the eight 4-byte fields of a frame carries.
/// Field order is a contract with the analysis server, not derivable
/// from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldOrder([Emotion; Emotion::COUNT]);

impl FieldOrder {
    /// Returns `None` unless every emotion appears exactly once.
    pub fn new(fields: [Emotion; Emotion::COUNT]) -> Option<Self> {
        let mut seen = [false; Emotion::COUNT];
        for emotion in fields {
            if std::mem::replace(&mut seen[emotion.index()], true) {
                return None;
            }
        }
        Some(Self(fields))
    }

    pub fn is_permutation(&self) -> bool {
        Self::new(self.0).is_some()
    }

    pub fn fields(&self) -> &[Emotion; Emotion::COUNT] {
        &self.0
    }

    /// Label raw field values with their emotions.
    pub fn label(&self, raw: [f32; Emotion::COUNT]) -> EmotionValues {
        let mut values = [0.0; Emotion::COUNT];
        for (emotion, value) in self.0.iter().zip(raw) {
            values[emotion.index()] = value;
        }
        EmotionValues(values)
    }
}

impl Default for FieldOrder {
    fn default() -> Self {
        Self(Emotion::ALL)
    }
}

/// One value per emotion, iterated in display order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmotionValues([f32; Emotion::COUNT]);

impl EmotionValues {
    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().map(|&e| (e, self.get(e)))
    }

    /// Strongest emotion; ties resolve to the earlier category.
    pub fn dominant(&self) -> (Emotion, f32) {
        self.iter().fold((Emotion::Anger, f32::NEG_INFINITY), |best, cur| {
            if cur.1 > best.1 {
                cur
            } else {
                best
            }
        })
    }
}

impl Serialize for EmotionValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Emotion::COUNT))?;
        for (emotion, value) in self.iter() {
            map.serialize_entry(&emotion, &value)?;
        }
        map.end()
    }
}
