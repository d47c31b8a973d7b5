//! Face descriptor types

use std::collections::HashMap;

/// A 2D point in frame coordinates
pub type Point = (f32, f32);

/// Landmark schemes a face analyser may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkKind {
    /// 5 points straight from the detector
    Five,
    /// 5 points derived from the 68-point landmarker
    FiveFrom68,
    /// 68 points from the landmarker
    SixtyEight,
}

impl LandmarkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkKind::Five => "5",
            LandmarkKind::FiveFrom68 => "5/68",
            LandmarkKind::SixtyEight => "68",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Detected face, read-only to the restorer
#[derive(Debug, Clone)]
pub struct Face {
    pub bounding_box: BoundingBox,
    pub score: f32,
    pub landmarks: HashMap<LandmarkKind, Vec<Point>>,
    /// L2-normalized identity embedding, used for reference matching
    pub embedding: Option<Vec<f32>>,
}

impl Face {
    pub fn new(bounding_box: BoundingBox, score: f32) -> Self {
        Self {
            bounding_box,
            score,
            landmarks: HashMap::new(),
            embedding: None,
        }
    }

    pub fn with_landmarks(mut self, kind: LandmarkKind, points: Vec<Point>) -> Self {
        self.landmarks.insert(kind, points);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// The 5-point set used for crop alignment.
    ///
    /// Prefers the landmarker-refined set and falls back to the detector's.
    pub fn landmark_5(&self) -> Option<&[Point]> {
        self.landmarks
            .get(&LandmarkKind::FiveFrom68)
            .or_else(|| self.landmarks.get(&LandmarkKind::Five))
            .map(Vec::as_slice)
            .filter(|points| points.len() == 5)
    }
}
