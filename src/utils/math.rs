//! Math utility functions

/// Cosine of the angle between two embeddings; 0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| (dot + x * y, na + x * x, nb + y * y));

    let norm = (norm_a * norm_b).sqrt();
    if norm > f32::EPSILON {
        dot / norm
    } else {
        0.0
    }
}

/// Face distance in `[0, 2]`: 0 for identical directions
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Linearly remap `value` from `[from_min, from_max]` to `[to_min, to_max]`
pub fn map_float(value: f32, from_min: f32, from_max: f32, to_min: f32, to_max: f32) -> f32 {
    to_min + (value - from_min) * (to_max - to_min) / (from_max - from_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance_range() {
        assert!(cosine_distance(&[0.6, 0.8], &[0.6, 0.8]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 3.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 1.0], &[-2.0, -2.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_map_float() {
        assert!((map_float(100.0, 0.0, 200.0, 0.0, 2.0) - 1.0).abs() < 1e-6);
        assert!((map_float(0.0, 0.0, 200.0, 0.0, 2.0)).abs() < 1e-6);
        assert!((map_float(200.0, 0.0, 200.0, 0.0, 2.0) - 2.0).abs() < 1e-6);
    }
}
