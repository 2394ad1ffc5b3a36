//! Landmark metric extraction
//!
//! Converts 68-point facial geometry into normalized scalar features. Each
//! metric is a geometric ratio between named landmarks, divided by a
//! calibration constant and clamped to [0, 1].
//!
//! The pixel constants in [`LandmarkCalibration`] are tuned for a face about
//! 100 px wide between the outer jaw points. Set
//! `reference_face_width` to rescale them by the observed jaw width, so a
//! resting face reads the same whatever its distance from the camera.

use crate::config::{LandmarkCalibration, PipelineConfig};
use crate::error::InferenceError;
use crate::types::{FacialGeometry, MetricSet, Point};

// Landmark indices (68-point layout)
const JAW_RIGHT: usize = 0;
const JAW_LEFT: usize = 16;
const RIGHT_BROW_MID_A: usize = 19;
const RIGHT_BROW_MID_B: usize = 20;
const RIGHT_BROW_INNER: usize = 21;
const LEFT_BROW_INNER: usize = 22;
const LEFT_BROW_MID_A: usize = 23;
const LEFT_BROW_MID_B: usize = 24;
const RIGHT_EYE_TOP_A: usize = 37;
const RIGHT_EYE_TOP_B: usize = 38;
const RIGHT_EYE_BOTTOM: usize = 41;
const LEFT_EYE_TOP_A: usize = 43;
const LEFT_EYE_TOP_B: usize = 44;
const LEFT_EYE_BOTTOM: usize = 47;
const MOUTH_CORNER_LEFT: usize = 48;
const MOUTH_CORNER_RIGHT: usize = 54;
const UPPER_LIP_CENTER: usize = 62;
const LOWER_LIP_CENTER: usize = 66;

/// Stateless extractor for landmark-derived metrics
#[derive(Debug, Clone, Default)]
pub struct LandmarkExtractor {
    calibration: LandmarkCalibration,
}

impl LandmarkExtractor {
    pub fn new(calibration: LandmarkCalibration) -> Self {
        Self { calibration }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.calibration)
    }

    pub fn calibration(&self) -> &LandmarkCalibration {
        &self.calibration
    }

    /// Extract the raw metric set from one frame's geometry
    pub fn extract(&self, geometry: &FacialGeometry) -> Result<MetricSet, InferenceError> {
        geometry.validate()?;
        let p = geometry.points();
        let c = &self.calibration;
        let px = pixel_scale(p, c.reference_face_width);

        Ok(MetricSet {
            eyebrow_raise: compute_eyebrow_raise(p, c.eyebrow_raise_px * px),
            smile_width: compute_smile_width(p, c.smile_jaw_fraction),
            eye_openness: compute_eye_openness(p, c.eye_openness_px * px),
            mouth_open: compute_mouth_open(p, c.mouth_open_px * px),
            brow_furrow: compute_brow_furrow(p, c.brow_furrow_px * px),
            mouth_corners_down: compute_mouth_corners_down(p, c.mouth_corners_down_px * px),
        })
    }
}

fn jaw_width(p: &[Point]) -> f64 {
    (p[JAW_LEFT].x - p[JAW_RIGHT].x).abs()
}

/// Multiplier for the pixel constants: `jaw_width / reference` when a
/// reference width is set and the jaw is not degenerate, otherwise 1
fn pixel_scale(p: &[Point], reference_face_width: Option<f64>) -> f64 {
    match reference_face_width {
        Some(reference) if reference > 0.0 && jaw_width(p) > f64::EPSILON => {
            jaw_width(p) / reference
        }
        _ => 1.0,
    }
}

/// Eyebrow raise
///
/// Formula: `mean(eye_top.y - brow_mid.y) / scale` over both sides.
/// Image y grows downward, so a raised brow gives a larger positive gap.
fn compute_eyebrow_raise(p: &[Point], scale: f64) -> f64 {
    let right_brow = Point::midpoint(p[RIGHT_BROW_MID_A], p[RIGHT_BROW_MID_B]);
    let right_eye = Point::midpoint(p[RIGHT_EYE_TOP_A], p[RIGHT_EYE_TOP_B]);
    let left_brow = Point::midpoint(p[LEFT_BROW_MID_A], p[LEFT_BROW_MID_B]);
    let left_eye = Point::midpoint(p[LEFT_EYE_TOP_A], p[LEFT_EYE_TOP_B]);

    let gap = ((right_eye.y - right_brow.y) + (left_eye.y - left_brow.y)) / 2.0;
    (gap / scale).clamp(0.0, 1.0)
}

/// Smile width
///
/// Formula: `mouth_width / (jaw_fraction * jaw_width)`
fn compute_smile_width(p: &[Point], jaw_fraction: f64) -> f64 {
    let mouth_width = (p[MOUTH_CORNER_RIGHT].x - p[MOUTH_CORNER_LEFT].x).abs();
    let reference = jaw_width(p) * jaw_fraction;
    if reference <= f64::EPSILON {
        return 0.0;
    }
    (mouth_width / reference).clamp(0.0, 1.0)
}

/// Eye openness
///
/// Formula: `mean(|eye_top.y - eye_bottom.y|) / scale` over both eyes
fn compute_eye_openness(p: &[Point], scale: f64) -> f64 {
    let right = (p[RIGHT_EYE_TOP_A].y - p[RIGHT_EYE_BOTTOM].y).abs();
    let left = (p[LEFT_EYE_TOP_A].y - p[LEFT_EYE_BOTTOM].y).abs();
    ((right + left) / 2.0 / scale).clamp(0.0, 1.0)
}

fn compute_mouth_open(p: &[Point], scale: f64) -> f64 {
    let gap = (p[LOWER_LIP_CENTER].y - p[UPPER_LIP_CENTER].y).abs();
    (gap / scale).clamp(0.0, 1.0)
}

/// Brow furrow: closer inner brow corners mean a stronger furrow
///
/// Formula: `1 - |inner_right.x - inner_left.x| / scale`
fn compute_brow_furrow(p: &[Point], scale: f64) -> f64 {
    let distance = (p[RIGHT_BROW_INNER].x - p[LEFT_BROW_INNER].x).abs();
    (1.0 - distance / scale).clamp(0.0, 1.0)
}

/// Mouth corners down: corners below the upper-lip center indicate a frown,
/// corners above it (a smile) clamp to zero
///
/// Formula: `(mean(corner.y) - upper_lip.y) / scale`
fn compute_mouth_corners_down(p: &[Point], scale: f64) -> f64 {
    let corner_y = (p[MOUTH_CORNER_LEFT].y + p[MOUTH_CORNER_RIGHT].y) / 2.0;
    ((corner_y - p[UPPER_LIP_CENTER].y) / scale).clamp(0.0, 1.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::NUM_FACIAL_LANDMARKS;

    /// Knobs for a synthetic face; everything else sits at a neutral layout
    #[derive(Clone, Copy)]
    pub(crate) struct FaceShape {
        pub brow_gap: f64,
        pub eye_height: f64,
        pub mouth_gap: f64,
        pub mouth_width: f64,
        pub inner_brow_distance: f64,
        pub corner_drop: f64,
    }

    impl Default for FaceShape {
        fn default() -> Self {
            Self {
                brow_gap: 3.0,
                eye_height: 8.0,
                mouth_gap: 2.0,
                mouth_width: 60.0,
                inner_brow_distance: 20.0,
                corner_drop: -2.0,
            }
        }
    }

    /// Build a 68-point face with jaw width 100 centered on x = 50
    pub(crate) fn face(shape: FaceShape) -> FacialGeometry {
        let mut points = vec![Point::new(50.0, 50.0); NUM_FACIAL_LANDMARKS];
        points[JAW_RIGHT] = Point::new(0.0, 60.0);
        points[JAW_LEFT] = Point::new(100.0, 60.0);

        let eye_top = 40.0;
        let brow_y = eye_top - shape.brow_gap;
        for idx in [RIGHT_BROW_MID_A, RIGHT_BROW_MID_B, LEFT_BROW_MID_A, LEFT_BROW_MID_B] {
            points[idx].y = brow_y;
        }
        points[RIGHT_BROW_INNER] = Point::new(50.0 - shape.inner_brow_distance / 2.0, brow_y);
        points[LEFT_BROW_INNER] = Point::new(50.0 + shape.inner_brow_distance / 2.0, brow_y);

        for idx in [RIGHT_EYE_TOP_A, RIGHT_EYE_TOP_B, LEFT_EYE_TOP_A, LEFT_EYE_TOP_B] {
            points[idx].y = eye_top;
        }
        points[RIGHT_EYE_BOTTOM].y = eye_top + shape.eye_height;
        points[LEFT_EYE_BOTTOM].y = eye_top + shape.eye_height;

        let lip_y = 80.0;
        points[UPPER_LIP_CENTER] = Point::new(50.0, lip_y);
        points[LOWER_LIP_CENTER] = Point::new(50.0, lip_y + shape.mouth_gap);
        points[MOUTH_CORNER_LEFT] =
            Point::new(50.0 - shape.mouth_width / 2.0, lip_y + shape.corner_drop);
        points[MOUTH_CORNER_RIGHT] =
            Point::new(50.0 + shape.mouth_width / 2.0, lip_y + shape.corner_drop);

        FacialGeometry::new(points).expect("synthetic face is well formed")
    }

    #[test]
    fn test_neutral_face_metrics() {
        let metrics = LandmarkExtractor::default().extract(&face(FaceShape::default())).unwrap();

        assert!((metrics.eyebrow_raise - 0.2).abs() < 1e-9);
        assert!((metrics.smile_width - 1.0).abs() < 1e-9);
        assert!((metrics.eye_openness - 1.0).abs() < 1e-9);
        assert!((metrics.mouth_open - 0.1).abs() < 1e-9);
        assert!(metrics.brow_furrow.abs() < 1e-9);
        // corners above the lip center (smile) clamp to zero
        assert_eq!(metrics.mouth_corners_down, 0.0);
    }

    #[test]
    fn test_raised_brows_and_open_mouth() {
        let metrics = LandmarkExtractor::default().extract(&face(FaceShape {
            brow_gap: 30.0,
            mouth_gap: 10.0,
            ..Default::default()
        }))
        .unwrap();

        assert_eq!(metrics.eyebrow_raise, 1.0);
        assert!((metrics.mouth_open - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_drooping_eyes_and_frown() {
        let metrics = LandmarkExtractor::default().extract(&face(FaceShape {
            eye_height: 2.0,
            corner_drop: 4.0,
            mouth_width: 30.0,
            inner_brow_distance: 10.0,
            ..Default::default()
        }))
        .unwrap();

        assert!((metrics.eye_openness - 0.25).abs() < 1e-9);
        assert!((metrics.mouth_corners_down - 0.4).abs() < 1e-9);
        assert!((metrics.smile_width - 0.5).abs() < 1e-9);
        assert!((metrics.brow_furrow - 0.5).abs() < 1e-9);
    }

    fn scaled(geometry: &FacialGeometry, factor: f64) -> FacialGeometry {
        let points = geometry
            .points()
            .iter()
            .map(|p| Point::new(p.x * factor, p.y * factor))
            .collect();
        FacialGeometry::new(points).unwrap()
    }

    #[test]
    fn test_reference_face_width_rescales_pixel_metrics() {
        let far = face(FaceShape {
            brow_gap: 6.0,
            ..Default::default()
        });
        let near = scaled(&far, 2.0);

        // Fixed pixel constants: the closer face reads as a bigger raise
        let fixed = LandmarkExtractor::default();
        assert!((fixed.extract(&far).unwrap().eyebrow_raise - 0.4).abs() < 1e-9);
        assert!((fixed.extract(&near).unwrap().eyebrow_raise - 0.8).abs() < 1e-9);

        let relative = LandmarkExtractor::new(LandmarkCalibration {
            reference_face_width: Some(100.0),
            ..Default::default()
        });
        let far = relative.extract(&far).unwrap();
        let near = relative.extract(&near).unwrap();
        assert!((far.eyebrow_raise - 0.4).abs() < 1e-9);
        assert!((near.eyebrow_raise - 0.4).abs() < 1e-9);
        assert!((near.mouth_open - far.mouth_open).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_jaw_gives_zero_smile() {
        let mut points = face(FaceShape::default()).points().to_vec();
        points[JAW_LEFT].x = points[JAW_RIGHT].x;
        let geometry = FacialGeometry::new(points).unwrap();

        let metrics = LandmarkExtractor::default().extract(&geometry).unwrap();
        assert_eq!(metrics.smile_width, 0.0);
    }

    #[test]
    fn test_malformed_geometry_is_schema_error() {
        let geometry: FacialGeometry =
            serde_json::from_str(r#"[{"x": 1.0, "y": 2.0}, {"x": 3.0, "y": 4.0}]"#).unwrap();

        let result = LandmarkExtractor::default().extract(&geometry);
        assert!(matches!(result, Err(InferenceError::Schema(_))));
    }

    #[test]
    fn test_all_metrics_in_unit_range() {
        let shapes = [
            FaceShape {
                brow_gap: -10.0,
                eye_height: 50.0,
                mouth_gap: 100.0,
                mouth_width: 500.0,
                inner_brow_distance: 200.0,
                corner_drop: 100.0,
            },
            FaceShape {
                brow_gap: 0.0,
                eye_height: 0.0,
                mouth_gap: 0.0,
                mouth_width: 0.0,
                inner_brow_distance: 0.0,
                corner_drop: -100.0,
            },
        ];
        for shape in shapes {
            let metrics = LandmarkExtractor::default().extract(&face(shape)).unwrap();
            for metric in crate::types::Metric::ALL {
                let value = metrics.get(metric);
                assert!((0.0..=1.0).contains(&value), "{:?} = {}", metric, value);
            }
        }
    }
}
