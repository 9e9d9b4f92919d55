// THEORY:
// The `sticker_classifier` turns a sample buffer into one of four sticker states.
// Raw per-pixel hue voting is fragile: glare and shadow split a single physical
// color into several readings and a bright background speck can outvote a dull
// sticker. The classifier therefore works on k-means centroids instead of pixels:
//
// 1.  **Band Matching**: every centroid is converted to HSV and matched against
//     fixed hue bands (green, yellow, red with wrap-around). Centroids below the
//     low-signal floor in saturation or value are `unknown` whatever their hue;
//     that rejects gray packaging, white glare and dark shadow.
// 2.  **Dominance Scoring**: among matched centroids the winner maximises
//     `saturation * member_share`. A vivid cluster that covers a real area beats
//     both a dull dominant background and a tiny saturated specular artifact.
// 3.  **Graceful Degradation**: classification never fails. No match means
//     `unknown` with confidence 0, which the pipeline turns into a retry request.

use crate::core_modules::cluster::{Centroid, run_kmeans};
use crate::core_modules::pixel::pixel::{Hsv, Pixel};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CLUSTER_COUNT: usize = 5;
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
/// Saturation or value (percent) below which a centroid carries no usable color.
pub const DEFAULT_LOW_SIGNAL_FLOOR: f32 = 15.0;

const GREEN_HUE: (f32, f32) = (75.0, 170.0);
const YELLOW_HUE: (f32, f32) = (30.0, 75.0);
const RED_HUE_LOW: (f32, f32) = (0.0, 30.0);
const RED_HUE_HIGH: (f32, f32) = (330.0, 360.0);

/// The discrete state read off a thermochromic sticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickerColor {
    Green,
    Yellow,
    Red,
    Unknown,
}

/// Safety category a sticker color stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyCategory {
    Safe,
    Warning,
    Danger,
    Unknown,
}

/// Operator-facing wording for a sticker color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorInfo {
    pub label: &'static str,
    pub status: &'static str,
    pub message: &'static str,
}

impl StickerColor {
    pub fn category(self) -> SafetyCategory {
        match self {
            StickerColor::Green => SafetyCategory::Safe,
            StickerColor::Yellow => SafetyCategory::Warning,
            StickerColor::Red => SafetyCategory::Danger,
            StickerColor::Unknown => SafetyCategory::Unknown,
        }
    }

    pub fn is_danger(self) -> bool {
        self.category() == SafetyCategory::Danger
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StickerColor::Green => "green",
            StickerColor::Yellow => "yellow",
            StickerColor::Red => "red",
            StickerColor::Unknown => "unknown",
        }
    }

    pub fn info(self) -> ColorInfo {
        match self {
            StickerColor::Green => ColorInfo {
                label: "Green (Safe)",
                status: "SAFE",
                message: "Temperature sticker indicates safe storage conditions.",
            },
            StickerColor::Yellow => ColorInfo {
                label: "Yellow (Warning)",
                status: "WARNING",
                message: "Temperature sticker shows elevated exposure. Monitor closely.",
            },
            StickerColor::Red => ColorInfo {
                label: "Red (Danger)",
                status: "INVALIDATED",
                message: "Temperature sticker indicates heat damage. Batch will be invalidated.",
            },
            StickerColor::Unknown => ColorInfo {
                label: "Unknown",
                status: "UNKNOWN",
                message: "Could not detect sticker color.",
            },
        }
    }

    /// Default reading (°C) proposed to the operator before they type the real one.
    pub fn estimated_temperature(self) -> f64 {
        match self {
            StickerColor::Green => 22.0,
            StickerColor::Yellow => 32.0,
            StickerColor::Red => 45.0,
            StickerColor::Unknown => 25.0,
        }
    }
}

impl fmt::Display for StickerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized sticker color: {0}")]
pub struct ColorParseError(pub String);

impl FromStr for StickerColor {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" | "safe" => Ok(StickerColor::Green),
            "yellow" | "warning" => Ok(StickerColor::Yellow),
            "red" | "danger" => Ok(StickerColor::Red),
            "unknown" => Ok(StickerColor::Unknown),
            _ => Err(ColorParseError(s.to_string())),
        }
    }
}

/// Result of classifying one sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub color: StickerColor,
    /// 0..=100; share of samples in the winning cluster, scaled so half the frame is full confidence.
    pub confidence: u8,
    /// Centroid color of the winning cluster.
    pub representative: Pixel,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            color: StickerColor::Unknown,
            confidence: 0,
            representative: Pixel::neutral_gray(),
        }
    }

    pub fn category(&self) -> SafetyCategory {
        self.color.category()
    }

    pub fn is_unknown(&self) -> bool {
        self.color == StickerColor::Unknown
    }
}

/// Tunable k-means classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StickerClassifier {
    pub k: usize,
    pub max_iterations: usize,
    pub low_signal_floor: f32,
}

impl Default for StickerClassifier {
    fn default() -> Self {
        Self {
            k: DEFAULT_CLUSTER_COUNT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            low_signal_floor: DEFAULT_LOW_SIGNAL_FLOOR,
        }
    }
}

impl StickerClassifier {
    pub fn new(k: usize, max_iterations: usize, low_signal_floor: f32) -> Self {
        Self { k, max_iterations, low_signal_floor }
    }

    pub fn classify<R: Rng + ?Sized>(&self, samples: &[Pixel], rng: &mut R) -> Classification {
        if samples.is_empty() {
            return Classification::unknown();
        }
        let centroids = run_kmeans(samples, self.k, self.max_iterations, rng);
        self.select_dominant(&centroids, samples.len())
    }

    /// Maps one HSV color onto a sticker band.
    pub fn classify_hsv(&self, hsv: &Hsv) -> StickerColor {
        if hsv.saturation < self.low_signal_floor || hsv.value < self.low_signal_floor {
            return StickerColor::Unknown;
        }
        let within = |(low, high): (f32, f32)| hsv.hue >= low && hsv.hue <= high;

        if within(GREEN_HUE) {
            StickerColor::Green
        } else if within(YELLOW_HUE) {
            StickerColor::Yellow
        } else if within(RED_HUE_LOW) || within(RED_HUE_HIGH) {
            StickerColor::Red
        } else {
            StickerColor::Unknown
        }
    }

    fn select_dominant(&self, centroids: &[Centroid], total_samples: usize) -> Classification {
        let mut best: Option<(f32, Classification)> = None;

        for centroid in centroids {
            let hsv = centroid.pixel.hsv();
            let color = self.classify_hsv(&hsv);
            if color == StickerColor::Unknown {
                continue;
            }

            let share = centroid.member_count as f32 / total_samples as f32;
            let score = hsv.saturation * share;
            if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                let confidence = (share * 200.0).round().min(100.0) as u8;
                best = Some((
                    score,
                    Classification {
                        color,
                        confidence,
                        representative: centroid.pixel,
                    },
                ));
            }
        }

        best.map(|(_, classification)| classification)
            .unwrap_or_else(Classification::unknown)
    }
}

/// Classifies `samples` with the default low-signal floor.
pub fn classify<R: Rng + ?Sized>(
    samples: &[Pixel],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Classification {
    StickerClassifier::new(k, max_iterations, DEFAULT_LOW_SIGNAL_FLOOR).classify(samples, rng)
}
