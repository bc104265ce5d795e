//! Landmark geometry helpers for the pose detectors

use crate::types::{landmarks, Landmark, PoseFrame};

/// Angle at `vertex` formed by `a` and `c`, in degrees (0..=180).
///
/// Returns `None` when either arm is degenerate.
pub fn angle_deg(a: &Landmark, vertex: &Landmark, c: &Landmark) -> Option<f64> {
    let (ux, uy) = (a.x - vertex.x, a.y - vertex.y);
    let (vx, vy) = (c.x - vertex.x, c.y - vertex.y);
    let nu = (ux * ux + uy * uy).sqrt();
    let nv = (vx * vx + vy * vy).sqrt();
    if nu < 1e-9 || nv < 1e-9 {
        return None;
    }
    let cos = ((ux * vx + uy * vy) / (nu * nv)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

/// Angle between the segment `bottom -> top` and straight up, in degrees
pub fn lean_from_vertical_deg(top: &Landmark, bottom: &Landmark) -> f64 {
    let dx = top.x - bottom.x;
    // image y grows downward
    let dy = bottom.y - top.y;
    dx.abs().atan2(dy).to_degrees()
}

pub fn distance(a: &Landmark, b: &Landmark) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

pub fn midpoint(a: &Landmark, b: &Landmark) -> Landmark {
    Landmark {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
        z: (a.z + b.z) / 2.0,
        visibility: a.visibility.min(b.visibility),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// One body side's limb landmarks
#[derive(Debug, Clone, Copy)]
pub struct SideLandmarks {
    pub side: Side,
    pub shoulder: Landmark,
    pub elbow: Landmark,
    pub wrist: Landmark,
    pub hip: Landmark,
    pub knee: Landmark,
    pub ankle: Landmark,
}

impl SideLandmarks {
    pub fn elbow_angle(&self) -> Option<f64> {
        angle_deg(&self.shoulder, &self.elbow, &self.wrist)
    }

    pub fn knee_angle(&self) -> Option<f64> {
        angle_deg(&self.hip, &self.knee, &self.ankle)
    }

    /// How far shoulder-hip-ankle bends away from a straight line, in degrees
    pub fn body_deviation(&self) -> Option<f64> {
        angle_deg(&self.shoulder, &self.hip, &self.ankle).map(|a| 180.0 - a)
    }
}

fn side_indices(side: Side) -> [usize; 6] {
    match side {
        Side::Left => [
            landmarks::LEFT_SHOULDER,
            landmarks::LEFT_ELBOW,
            landmarks::LEFT_WRIST,
            landmarks::LEFT_HIP,
            landmarks::LEFT_KNEE,
            landmarks::LEFT_ANKLE,
        ],
        Side::Right => [
            landmarks::RIGHT_SHOULDER,
            landmarks::RIGHT_ELBOW,
            landmarks::RIGHT_WRIST,
            landmarks::RIGHT_HIP,
            landmarks::RIGHT_KNEE,
            landmarks::RIGHT_ANKLE,
        ],
    }
}

fn side_landmarks(frame: &PoseFrame, side: Side, min_visibility: f64) -> Option<SideLandmarks> {
    let idx = side_indices(side);
    Some(SideLandmarks {
        side,
        shoulder: frame.visible(idx[0], min_visibility)?,
        elbow: frame.visible(idx[1], min_visibility)?,
        wrist: frame.visible(idx[2], min_visibility)?,
        hip: frame.visible(idx[3], min_visibility)?,
        knee: frame.visible(idx[4], min_visibility)?,
        ankle: frame.visible(idx[5], min_visibility)?,
    })
}

fn mean_visibility(frame: &PoseFrame, side: Side) -> f64 {
    let idx = side_indices(side);
    let total: f64 = idx
        .iter()
        .filter_map(|i| frame.landmarks.get(*i))
        .map(|lm| lm.visibility)
        .sum();
    total / idx.len() as f64
}

/// The better-visible body side with all limb landmarks present.
///
/// A side-view camera sees one side clearly; the other is occluded.
pub fn best_side(frame: &PoseFrame, min_visibility: f64) -> Option<SideLandmarks> {
    let left_first = mean_visibility(frame, Side::Left) >= mean_visibility(frame, Side::Right);
    let (first, second) = if left_first {
        (Side::Left, Side::Right)
    } else {
        (Side::Right, Side::Left)
    };
    side_landmarks(frame, first, min_visibility)
        .or_else(|| side_landmarks(frame, second, min_visibility))
}

/// Shoulder, hip and ankle centers for front-facing detectors
#[derive(Debug, Clone, Copy)]
pub struct BodyCenters {
    pub nose: Landmark,
    pub shoulder: Landmark,
    pub hip: Landmark,
    pub ankle: Option<Landmark>,
    pub shoulder_width: f64,
}

pub fn body_centers(frame: &PoseFrame, min_visibility: f64) -> Option<BodyCenters> {
    let nose = frame.visible(landmarks::NOSE, min_visibility)?;
    let ls = frame.visible(landmarks::LEFT_SHOULDER, min_visibility)?;
    let rs = frame.visible(landmarks::RIGHT_SHOULDER, min_visibility)?;
    let lh = frame.visible(landmarks::LEFT_HIP, min_visibility)?;
    let rh = frame.visible(landmarks::RIGHT_HIP, min_visibility)?;
    let ankle = match (
        frame.visible(landmarks::LEFT_ANKLE, min_visibility),
        frame.visible(landmarks::RIGHT_ANKLE, min_visibility),
    ) {
        (Some(l), Some(r)) => Some(midpoint(&l, &r)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    };
    let shoulder_width = distance(&ls, &rs);
    if shoulder_width < 1e-6 {
        return None;
    }
    Some(BodyCenters {
        nose,
        shoulder: midpoint(&ls, &rs),
        hip: midpoint(&lh, &rh),
        ankle,
        shoulder_width,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic pose frames shared by the detector tests

    use super::*;

    pub fn blank() -> Vec<Landmark> {
        vec![Landmark::new(0.5, 0.5, 0.0); landmarks::COUNT]
    }

    /// Side-view plank with the given elbow angle; `sag` pushes the hip down.
    ///
    /// The wrist sits on the floor under the shoulder, both arm segments are
    /// 0.15 long, and the ankle is fixed so a zero sag gives a straight body.
    pub fn pushup_frame(timestamp_ms: u64, elbow_deg: f64, sag: f64) -> PoseFrame {
        let arm = 0.15;
        let half = (elbow_deg / 2.0).to_radians();
        let wrist = Landmark::new(0.3, 0.8, 0.95);
        let shoulder_y = wrist.y - 2.0 * arm * half.sin();
        let shoulder = Landmark::new(0.3, shoulder_y, 0.95);
        let elbow = Landmark::new(0.3 + arm * half.cos(), (shoulder_y + wrist.y) / 2.0, 0.95);
        let ankle = Landmark::new(0.9, 0.78, 0.95);
        let hip = Landmark::new(
            (shoulder.x + ankle.x) / 2.0,
            (shoulder.y + ankle.y) / 2.0 + sag,
            0.95,
        );
        let knee = Landmark::new((hip.x + ankle.x) / 2.0, (hip.y + ankle.y) / 2.0, 0.95);

        let mut points = blank();
        points[landmarks::NOSE] = Landmark::new(0.25, shoulder_y - 0.02, 0.9);
        points[landmarks::LEFT_SHOULDER] = shoulder;
        points[landmarks::LEFT_ELBOW] = elbow;
        points[landmarks::LEFT_WRIST] = wrist;
        points[landmarks::LEFT_HIP] = hip;
        points[landmarks::LEFT_KNEE] = knee;
        points[landmarks::LEFT_ANKLE] = ankle;
        PoseFrame::new(timestamp_ms, points)
    }

    /// Front-view standing figure; `drop` lowers shoulders and hips by that
    /// fraction of the 0.4 leg length, `lean` shifts the shoulders sideways.
    pub fn standing_frame(timestamp_ms: u64, drop: f64, lean: f64) -> PoseFrame {
        let leg = 0.4;
        let hip_y = 0.5 + drop * leg;
        let shoulder_y = hip_y - 0.3;
        let mut points = blank();
        let vis = 0.95;
        points[landmarks::NOSE] = Landmark::new(0.5 + lean, shoulder_y - 0.1, vis);
        points[landmarks::LEFT_SHOULDER] = Landmark::new(0.6 + lean, shoulder_y, vis);
        points[landmarks::RIGHT_SHOULDER] = Landmark::new(0.4 + lean, shoulder_y, vis);
        points[landmarks::LEFT_ELBOW] = Landmark::new(0.65 + lean, shoulder_y + 0.15, vis);
        points[landmarks::RIGHT_ELBOW] = Landmark::new(0.35 + lean, shoulder_y + 0.15, vis);
        points[landmarks::LEFT_WRIST] = Landmark::new(0.65 + lean, shoulder_y + 0.3, vis);
        points[landmarks::RIGHT_WRIST] = Landmark::new(0.35 + lean, shoulder_y + 0.3, vis);
        points[landmarks::LEFT_HIP] = Landmark::new(0.57, hip_y, vis);
        points[landmarks::RIGHT_HIP] = Landmark::new(0.43, hip_y, vis);
        points[landmarks::LEFT_KNEE] = Landmark::new(0.58, (hip_y + 0.9) / 2.0, vis);
        points[landmarks::RIGHT_KNEE] = Landmark::new(0.42, (hip_y + 0.9) / 2.0, vis);
        points[landmarks::LEFT_ANKLE] = Landmark::new(0.57, 0.9, vis);
        points[landmarks::RIGHT_ANKLE] = Landmark::new(0.43, 0.9, vis);
        PoseFrame::new(timestamp_ms, points)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_right_angle() {
        let a = Landmark::new(0.0, 1.0, 1.0);
        let b = Landmark::new(0.0, 0.0, 1.0);
        let c = Landmark::new(1.0, 0.0, 1.0);
        let angle = angle_deg(&a, &b, &c).unwrap();
        assert!((angle - 90.0).abs() < 1e-9);
        assert!(angle_deg(&a, &a, &c).is_none());
    }

    #[test]
    fn test_pushup_fixture_produces_requested_elbow_angle() {
        for target in [170.0, 120.0, 80.0] {
            let frame = pushup_frame(0, target, 0.0);
            let side = best_side(&frame, 0.5).unwrap();
            assert_eq!(side.side, Side::Left);
            assert!((side.elbow_angle().unwrap() - target).abs() < 1e-3);
            assert!(side.body_deviation().unwrap().abs() < 1e-3);
        }
    }

    #[test]
    fn test_sagging_hips_show_deviation() {
        let frame = pushup_frame(0, 170.0, 0.1);
        let side = best_side(&frame, 0.5).unwrap();
        assert!(side.body_deviation().unwrap() > 20.0);
    }

    #[test]
    fn test_lean_from_vertical() {
        let top = Landmark::new(0.5, 0.2, 1.0);
        let bottom = Landmark::new(0.5, 0.5, 1.0);
        assert!(lean_from_vertical_deg(&top, &bottom).abs() < 1e-9);
        let tilted = Landmark::new(0.8, 0.2, 1.0);
        assert!((lean_from_vertical_deg(&tilted, &bottom) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_body_centers_require_shoulders() {
        let frame = standing_frame(0, 0.0, 0.0);
        let centers = body_centers(&frame, 0.5).unwrap();
        assert!((centers.shoulder.x - 0.5).abs() < 1e-9);
        assert!((centers.shoulder_width - 0.2).abs() < 1e-9);
        assert!(body_centers(&PoseFrame::empty(0), 0.5).is_none());
    }
}
