use crate::rect::Rect;
use serde::{Deserialize, Serialize};

/*------------------------------------------------------------------------------
Detection struct
------------------------------------------------------------------------------*/

/// A single detector output for one frame, already filtered by class and
/// confidence upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    rect: Rect<f32>,
    prob: f32,
}

impl Detection {
    pub fn new(rect: Rect<f32>, prob: f32) -> Self {
        Self { rect, prob }
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, prob: f32) -> Self {
        Self::new(Rect::from_xyxy(x1, y1, x2, y2), prob)
    }

    pub fn get_rect(&self) -> &Rect<f32> {
        &self.rect
    }

    pub fn get_prob(&self) -> f32 {
        self.prob
    }

    /// Every box coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.rect.get_xyxy().iter().all(|v| v.is_finite())
    }

    /// Map a processing-resolution detection back onto the original frame.
    ///
    /// `scale` is processing width over original width; non-positive or
    /// non-finite scales leave the box untouched.
    pub fn rescaled(&self, scale: f32) -> Self {
        if !(scale.is_finite() && scale > 0.0) {
            return self.clone();
        }
        Self {
            rect: self.rect.unscaled(scale),
            prob: self.prob,
        }
    }
}

/*------------------------------------------------------------------------------
Serialized form
------------------------------------------------------------------------------*/

/// Flat `[x1, y1, x2, y2]` + score record used by detection dumps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default = "default_score")]
    pub score: f32,
}

fn default_score() -> f32 {
    1.0
}

impl From<DetectionRecord> for Detection {
    fn from(record: DetectionRecord) -> Self {
        Detection::from_xyxy(record.x1, record.y1, record.x2, record.y2, record.score)
    }
}
