//! Angle utilities (degrees) shared by the cone-space stages.

/// Normalizes an angle into `[0, 360)`.
#[inline]
pub fn normalize_degrees(angle: f64) -> f64 {
    let norm = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if norm >= 360.0 {
        0.0
    } else {
        norm
    }
}

/// Signed shortest-arc difference `to - from`, in `(-180, 180]`.
#[inline]
pub fn shortest_arc(from: f64, to: f64) -> f64 {
    let mut diff = to - from;
    diff = diff.rem_euclid(360.0);
    if diff > 180.0 {
        diff -= 360.0;
    }
    diff
}

/// Interpolates from `from` toward `to` along the shorter arc.
///
/// `t = 0` yields `from`, `t = 1` yields `to`; the result is normalized into
/// `[0, 360)`.
#[inline]
pub fn lerp_shortest(from: f64, to: f64, t: f64) -> f64 {
    normalize_degrees(from + shortest_arc(from, to) * t)
}

/// Whether `angle` lies on the shorter arc between `a` and `b` (inclusive).
pub fn on_shorter_arc(angle: f64, a: f64, b: f64, tolerance: f64) -> bool {
    let span = shortest_arc(a, b);
    let offset = shortest_arc(a, angle);
    if span >= 0.0 {
        offset >= -tolerance && offset <= span + tolerance
    } else {
        offset <= tolerance && offset >= span - tolerance
    }
}

/// Median of a slice (NaNs are ignored). `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize() {
        assert_relative_eq!(normalize_degrees(-10.0), 350.0);
        assert_relative_eq!(normalize_degrees(720.5), 0.5, epsilon = 1e-9);
        assert!(normalize_degrees(-1e-18) < 360.0);
    }

    #[test]
    fn test_shortest_arc_wraps() {
        assert_relative_eq!(shortest_arc(351.0, 9.0), 18.0);
        assert_relative_eq!(shortest_arc(9.0, 351.0), -18.0);
        assert_relative_eq!(shortest_arc(10.0, 100.0), 90.0);
    }

    #[test]
    fn test_lerp_across_seam() {
        let mid = lerp_shortest(351.0, 9.0, 0.5);
        assert!(mid < 2.0 || mid > 358.0, "got {mid}");
    }

    #[test]
    fn test_on_shorter_arc() {
        assert!(on_shorter_arc(355.0, 351.0, 9.0, 1e-9));
        assert!(on_shorter_arc(3.0, 351.0, 9.0, 1e-9));
        assert!(!on_shorter_arc(180.0, 351.0, 9.0, 1e-9));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
