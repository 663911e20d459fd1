//! Orientation classification and per-frame transform resolution
//!
//! Transforms use the row-vector convention of container display matrices:
//! a point `(x, y)` maps to `(a*x + c*y + tx, b*x + d*y + ty)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::model::Size;
use crate::error::TranscodeError;

/// Tolerance used when matching a normalised matrix against the canonical orientations
const ORIENTATION_EPSILON: f64 = 1e-3;

/// 2D affine transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Build from a 3x3 display matrix in 16.16 fixed point (`[a b u c d v x y w]`)
    pub fn from_display_matrix(matrix: &[i32; 9]) -> Self {
        let fixed = |v: i32| v as f64 / 65536.0;
        Self::new(
            fixed(matrix[0]),
            fixed(matrix[1]),
            fixed(matrix[3]),
            fixed(matrix[4]),
            fixed(matrix[6]),
            fixed(matrix[7]),
        )
    }

    /// Apply `self` first, then `next`
    pub fn then(&self, next: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn inverse(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(AffineTransform {
            a,
            b,
            c,
            d,
            tx: -(self.tx * a + self.ty * c),
            ty: -(self.tx * b + self.ty * d),
        })
    }

    /// Linear part only
    pub fn without_translation(&self) -> AffineTransform {
        AffineTransform {
            tx: 0.0,
            ty: 0.0,
            ..*self
        }
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Self::IDENTITY, 1e-9)
    }

    pub fn approx_eq(&self, other: &AffineTransform, epsilon: f64) -> bool {
        (self.a - other.a).abs() <= epsilon
            && (self.b - other.b).abs() <= epsilon
            && (self.c - other.c).abs() <= epsilon
            && (self.d - other.d).abs() <= epsilon
            && (self.tx - other.tx).abs() <= epsilon
            && (self.ty - other.ty).abs() <= epsilon
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of the `size` rectangle after transformation
    pub fn bounds(&self, size: Size) -> (f64, f64, f64, f64) {
        let (w, h) = (size.width as f64, size.height as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ];
        corners.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }

    /// Size of the transformed rectangle, rounded to whole pixels
    pub fn transformed_size(&self, size: Size) -> Size {
        let (x0, y0, x1, y1) = self.bounds(size);
        Size::new((x1 - x0).round() as u32, (y1 - y0).round() as u32)
    }
}

impl fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {} {} {} {} {}]",
            self.a, self.b, self.c, self.d, self.tx, self.ty
        )
    }
}

impl FromStr for AffineTransform {
    type Err = TranscodeError;

    /// Parse six comma-separated coefficients: `a,b,c,d,tx,ty`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TranscodeError::ConfigError {
            message: format!("invalid transform '{}', expected a,b,c,d,tx,ty", s),
        };
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match values.as_slice() {
            &[a, b, c, d, tx, ty] if values.iter().all(|v| v.is_finite()) => {
                Ok(Self::new(a, b, c, d, tx, ty))
            }
            _ => Err(invalid()),
        }
    }
}

/// The eight canonical frame orientations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Up,
    Down,
    Left,
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::Up,
        Orientation::Down,
        Orientation::Left,
        Orientation::Right,
        Orientation::UpMirrored,
        Orientation::DownMirrored,
        Orientation::LeftMirrored,
        Orientation::RightMirrored,
    ];

    /// Linear part of the orientation. Mirrored variants flip horizontally before rotating.
    pub fn matrix(&self) -> AffineTransform {
        let (a, b, c, d) = match self {
            Orientation::Up => (1.0, 0.0, 0.0, 1.0),
            Orientation::Down => (-1.0, 0.0, 0.0, -1.0),
            Orientation::Left => (0.0, -1.0, 1.0, 0.0),
            Orientation::Right => (0.0, 1.0, -1.0, 0.0),
            Orientation::UpMirrored => (-1.0, 0.0, 0.0, 1.0),
            Orientation::DownMirrored => (1.0, 0.0, 0.0, -1.0),
            Orientation::LeftMirrored => (0.0, 1.0, 1.0, 0.0),
            Orientation::RightMirrored => (0.0, -1.0, -1.0, 0.0),
        };
        AffineTransform::new(a, b, c, d, 0.0, 0.0)
    }

    /// Classify a transform by decomposing its linear part into rotation and mirror.
    ///
    /// Uniform scale is divided out and translation is ignored. Matrices that are not
    /// within tolerance of a canonical orientation classify as `Up`.
    pub fn classify(transform: &AffineTransform) -> Orientation {
        let scale = transform.determinant().abs().sqrt();
        if scale < f64::EPSILON {
            warn!("Degenerate orientation matrix {}, treating as up", transform);
            return Orientation::Up;
        }

        let unit = AffineTransform::new(
            transform.a / scale,
            transform.b / scale,
            transform.c / scale,
            transform.d / scale,
            0.0,
            0.0,
        );

        let (best, distance) = Self::ALL
            .iter()
            .map(|o| {
                let m = o.matrix();
                let distance = (unit.a - m.a)
                    .abs()
                    .max((unit.b - m.b).abs())
                    .max((unit.c - m.c).abs())
                    .max((unit.d - m.d).abs());
                (*o, distance)
            })
            .fold((Orientation::Up, f64::MAX), |acc, item| {
                if item.1 < acc.1 {
                    item
                } else {
                    acc
                }
            });

        if distance > ORIENTATION_EPSILON {
            warn!(
                "Transform {} is not a right-angle orientation (off by {:.4}), treating as up",
                transform, distance
            );
            return Orientation::Up;
        }
        best
    }

    /// Camera-fix lookup table
    pub fn corrected(&self) -> Orientation {
        match self {
            Orientation::Up => Orientation::Down,
            Orientation::Down => Orientation::Down,
            Orientation::Left => Orientation::Up,
            Orientation::Right => Orientation::Up,
            Orientation::UpMirrored => Orientation::Down,
            Orientation::DownMirrored => Orientation::Down,
            Orientation::LeftMirrored => Orientation::Up,
            Orientation::RightMirrored => Orientation::Up,
        }
    }

    /// Orientation transform for a frame of `size`, translated so the result starts at the origin
    pub fn transform_for(&self, size: Size) -> AffineTransform {
        normalize_to_origin(&self.matrix(), size)
    }

    /// Whether this orientation swaps width and height
    pub fn is_transposed(&self) -> bool {
        matches!(
            self,
            Orientation::Left
                | Orientation::Right
                | Orientation::LeftMirrored
                | Orientation::RightMirrored
        )
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Up => "up",
            Orientation::Down => "down",
            Orientation::Left => "left",
            Orientation::Right => "right",
            Orientation::UpMirrored => "up-mirrored",
            Orientation::DownMirrored => "down-mirrored",
            Orientation::LeftMirrored => "left-mirrored",
            Orientation::RightMirrored => "right-mirrored",
        };
        f.write_str(name)
    }
}

/// Caller-selected geometric correction strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "transform", rename_all = "snake_case")]
pub enum TransformPolicy {
    #[default]
    Identity,
    CameraOrientationFix,
    /// Caller transform. Only its linear part matters: the result is always
    /// translated so the transformed frame starts at the canvas origin, which
    /// drops any translation it carries.
    Custom(AffineTransform),
    /// Camera fix followed by a caller transform, normalized the same way as `Custom`
    CameraFixThenCustom(AffineTransform),
}

/// Per-frame transform and the canvas it renders into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTransform {
    /// Transform from source pixel space to canvas pixel space
    pub transform: AffineTransform,
    /// Canvas size after transformation
    pub canvas: Size,
    /// Orientation classified from the source's intrinsic transform
    pub source_orientation: Orientation,
}

impl ResolvedTransform {
    pub fn is_identity(&self) -> bool {
        self.transform.is_identity()
    }
}

/// Combine the policy with the source's intrinsic transform into the per-frame transform
pub fn resolve(
    policy: &TransformPolicy,
    intrinsic: &AffineTransform,
    frame: Size,
) -> ResolvedTransform {
    let source_orientation = Orientation::classify(intrinsic);
    let camera_fix = || source_orientation.corrected().transform_for(frame);

    let raw = match policy {
        TransformPolicy::Identity => AffineTransform::IDENTITY,
        TransformPolicy::CameraOrientationFix => camera_fix(),
        TransformPolicy::Custom(custom) => *custom,
        TransformPolicy::CameraFixThenCustom(custom) => camera_fix().then(custom),
    };

    let transform = normalize_to_origin(&raw, frame);
    ResolvedTransform {
        transform,
        canvas: transform.transformed_size(frame),
        source_orientation,
    }
}

/// Translate `transform` so the bounding box of the transformed frame starts at (0, 0)
fn normalize_to_origin(transform: &AffineTransform, frame: Size) -> AffineTransform {
    let (min_x, min_y, _, _) = transform.bounds(frame);
    let normalized = transform.then(&AffineTransform::translation(-min_x, -min_y));
    if normalized.is_identity() {
        AffineTransform::IDENTITY
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transform_coefficients() {
        let parsed: AffineTransform = "0, 1, -1, 0, 1080, 0".parse().unwrap();
        assert_eq!(parsed, AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0));
        assert!("1,0,0,1".parse::<AffineTransform>().is_err());
        assert!("1,0,0,1,0,x".parse::<AffineTransform>().is_err());
    }

    const FRAME: Size = Size {
        width: 1920,
        height: 1080,
    };

    #[test]
    fn test_camera_fix_lookup_for_each_orientation() {
        let expected = [
            (Orientation::Up, Orientation::Down),
            (Orientation::Down, Orientation::Down),
            (Orientation::Left, Orientation::Up),
            (Orientation::Right, Orientation::Up),
            (Orientation::UpMirrored, Orientation::Down),
            (Orientation::DownMirrored, Orientation::Down),
            (Orientation::LeftMirrored, Orientation::Up),
            (Orientation::RightMirrored, Orientation::Up),
        ];
        for (source, corrected) in expected {
            let intrinsic = source.transform_for(FRAME);
            let classified = Orientation::classify(&intrinsic);
            assert_eq!(classified, source, "classification of {}", source);
            assert_eq!(classified.corrected(), corrected, "lookup for {}", source);
        }
    }

    #[test]
    fn test_orientation_matrices_are_distinct() {
        for (i, a) in Orientation::ALL.iter().enumerate() {
            for b in &Orientation::ALL[i + 1..] {
                assert!(!a.matrix().approx_eq(&b.matrix(), 1e-9), "{} == {}", a, b);
            }
        }
    }

    #[test]
    fn test_classify_tolerates_scale_and_rounding() {
        // 90 degrees from a 16.16 display matrix, with a half-size scale and float noise
        let noisy = AffineTransform::new(0.000_01, 0.5, -0.499_99, 0.0, 1080.0, 0.0);
        assert_eq!(Orientation::classify(&noisy), Orientation::Right);

        let fixed = AffineTransform::from_display_matrix(&[0, 65536, 0, -65536, 0, 0, 0, 0, 1 << 30]);
        assert_eq!(Orientation::classify(&fixed), Orientation::Right);
    }

    #[test]
    fn test_classify_falls_back_to_up_for_arbitrary_rotation() {
        let angle = 30f64.to_radians();
        let rotated = AffineTransform::new(angle.cos(), angle.sin(), -angle.sin(), angle.cos(), 0.0, 0.0);
        assert_eq!(Orientation::classify(&rotated), Orientation::Up);
        assert_eq!(Orientation::classify(&AffineTransform::scale(0.0, 0.0)), Orientation::Up);
    }

    #[test]
    fn test_transform_for_keeps_frame_at_origin() {
        for orientation in Orientation::ALL {
            let t = orientation.transform_for(FRAME);
            let (x0, y0, x1, y1) = t.bounds(FRAME);
            assert!(x0.abs() < 1e-9 && y0.abs() < 1e-9, "{} starts at ({}, {})", orientation, x0, y0);
            let expected = if orientation.is_transposed() {
                (1080.0, 1920.0)
            } else {
                (1920.0, 1080.0)
            };
            assert_eq!((x1, y1), expected, "{}", orientation);
        }
    }

    #[test]
    fn test_resolve_identity_policy() {
        let rotated = Orientation::Right.transform_for(FRAME);
        let resolved = resolve(&TransformPolicy::Identity, &rotated, FRAME);
        assert!(resolved.is_identity());
        assert_eq!(resolved.canvas, FRAME);
        assert_eq!(resolved.source_orientation, Orientation::Right);
    }

    #[test]
    fn test_resolve_camera_fix_rotates_upright_source_half_turn() {
        let resolved = resolve(
            &TransformPolicy::CameraOrientationFix,
            &AffineTransform::IDENTITY,
            FRAME,
        );
        assert_eq!(resolved.canvas, FRAME);
        let (x, y) = resolved.transform.apply(0.0, 0.0);
        assert_eq!((x, y), (1920.0, 1080.0));
    }

    #[test]
    fn test_resolve_custom_scale_shrinks_canvas() {
        let resolved = resolve(
            &TransformPolicy::Custom(AffineTransform::scale(0.5, 0.5)),
            &AffineTransform::IDENTITY,
            FRAME,
        );
        assert_eq!(resolved.canvas, Size::new(960, 540));
    }

    #[test]
    fn test_resolve_custom_translation_is_normalized_away() {
        let resolved = resolve(
            &TransformPolicy::Custom(AffineTransform::translation(5.0, 0.0)),
            &AffineTransform::IDENTITY,
            FRAME,
        );
        assert!(resolved.is_identity());
        assert_eq!(resolved.canvas, FRAME);
    }

    #[test]
    fn test_resolve_camera_fix_then_custom_applies_both_in_order() {
        let custom = AffineTransform::scale(1.0, 0.5);
        let resolved = resolve(
            &TransformPolicy::CameraFixThenCustom(custom),
            &Orientation::Right.transform_for(FRAME),
            FRAME,
        );
        // Right corrects to Up (no rotation), then the vertical squash applies
        assert_eq!(resolved.canvas, Size::new(1920, 540));
    }

    #[test]
    fn test_inverse_round_trips_points() {
        let t = Orientation::LeftMirrored
            .transform_for(FRAME)
            .then(&AffineTransform::scale(0.5, 2.0));
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(100.0, 40.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 100.0).abs() < 1e-9 && (by - 40.0).abs() < 1e-9);
        assert!(AffineTransform::scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn test_policy_serde_shape() {
        let json = serde_json::to_string(&TransformPolicy::CameraOrientationFix).unwrap();
        assert_eq!(json, r#"{"kind":"camera_orientation_fix"}"#);
        let parsed: TransformPolicy = serde_json::from_str(
            r#"{"kind":"custom","transform":{"a":1.0,"b":0.0,"c":0.0,"d":1.0,"tx":5.0,"ty":0.0}}"#,
        )
        .unwrap();
        assert_eq!(parsed, TransformPolicy::Custom(AffineTransform::translation(5.0, 0.0)));
    }
}
