// IMU-enhanced wheel odometry
//
// Integrates two absolute encoder counters and an absolute orientation
// quaternion into a cumulative 3D pose. Turning never contributes to linear
// displacement here: the encoder model assumes both wheels move together and
// all rotation comes from the orientation input.

use std::f32::consts::PI;
use std::sync::OnceLock;
use std::time::Instant;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::pose::Pose;

const MM_IN_M: f32 = 1000.0;

// Local forward axis the orientation sample is applied to
fn forward_axis() -> Vector3<f32> {
    Vector3::new(0.0, 1.0, 0.0)
}

/// Monotonic microseconds, anchored at first use.
pub fn timestamp_us() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

struct EncoderBaseline {
    left: i32,
    right: i32,
}

/// Dead-reckoning estimator over encoder deltas and orientation samples.
///
/// Encoder counts are signed 32-bit absolute values and are assumed not to
/// wrap within a session.
pub struct OdometryEstimator {
    wheel_diameter_mm: f32,
    counts_per_rotation: f32,
    baseline: Option<EncoderBaseline>,
    position: Vector3<f32>,
    heading: UnitQuaternion<f32>,
    timestamp_us: u64,
}

impl OdometryEstimator {
    pub fn new(wheel_diameter_mm: f32, counts_per_rotation: f32) -> Self {
        Self {
            wheel_diameter_mm,
            counts_per_rotation,
            baseline: None,
            position: Vector3::zeros(),
            heading: UnitQuaternion::identity(),
            timestamp_us: 0,
        }
    }

    /// Fold one encoder/orientation sample into the pose.
    ///
    /// The first call only establishes the encoder baseline; it applies no
    /// displacement, guarding against a spurious jump from whatever the
    /// counters happen to read at startup.
    pub fn update(
        &mut self,
        left: i32,
        right: i32,
        orientation: UnitQuaternion<f32>,
        timestamp_us: u64,
    ) {
        let Some(baseline) = &self.baseline else {
            self.baseline = Some(EncoderBaseline { left, right });
            self.heading = orientation;
            self.timestamp_us = timestamp_us;
            return;
        };

        let distance_per_count_mm = PI * self.wheel_diameter_mm / self.counts_per_rotation;
        let ldiff = (left - baseline.left) as f32;
        let rdiff = (right - baseline.right) as f32;
        let displacement_m = (ldiff + rdiff) * distance_per_count_mm / 2.0 / MM_IN_M;

        let ahead = orientation * forward_axis();
        self.position += displacement_m * ahead;
        self.heading = orientation;

        self.baseline = Some(EncoderBaseline { left, right });
        self.timestamp_us = timestamp_us;
    }

    /// Current pose by value; no locking, concurrency is the caller's concern.
    pub fn pose(&self) -> Pose {
        let q = self.heading.coords;
        Pose {
            timestamp_us: self.timestamp_us,
            position: [self.position.x, self.position.y, self.position.z],
            heading: [q.x, q.y, q.z, q.w],
        }
    }
}

/// Build a unit quaternion from (w, x, y, z) components as the IMU and the
/// wire report carry them.
pub fn quaternion_from_wxyz(w: f32, x: f32, y: f32, z: f32) -> UnitQuaternion<f32> {
    UnitQuaternion::new_normalize(Quaternion::new(w, x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn estimator() -> OdometryEstimator {
        OdometryEstimator::new(120.0, 1196.8)
    }

    #[test]
    fn test_first_update_only_sets_baseline() {
        let mut odo = estimator();
        let q = quaternion_from_wxyz(0.0, 0.0, 0.0, 1.0);
        odo.update(5000, -3000, q, 17);

        let pose = odo.pose();
        assert_eq!(pose.position, [0.0; 3]);
        assert_eq!(pose.timestamp_us, 17);
        // Heading is taken verbatim from the sample
        assert!((pose.heading[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_straight_line_distance() {
        let mut odo = estimator();
        let identity = UnitQuaternion::identity();
        odo.update(0, 0, identity, 0);
        odo.update(1196, 1196, identity, 1000);

        let pose = odo.pose();
        // One 1196-count step of a 120 mm wheel at 1196.8 counts/rev
        assert!((pose.position[1] - 0.3767).abs() < 5e-4);
        assert!(pose.position[0].abs() < 1e-6);
        assert!(pose.position[2].abs() < 1e-6);
    }

    #[test]
    fn test_displacement_accumulates_across_updates() {
        let mut odo = estimator();
        let identity = UnitQuaternion::identity();
        odo.update(0, 0, identity, 0);
        odo.update(1196, 1196, identity, 1000);
        odo.update(2392, 2392, identity, 2000);

        let pose = odo.pose();
        assert!((pose.position[1] - 2.0 * 0.3767).abs() < 1e-3);
        assert_eq!(pose.timestamp_us, 2000);
    }

    #[test]
    fn test_reverse_motion_subtracts() {
        let mut odo = estimator();
        let identity = UnitQuaternion::identity();
        odo.update(1000, 1000, identity, 0);
        odo.update(0, 0, identity, 1000);

        assert!(odo.pose().position[1] < 0.0);
    }

    #[test]
    fn test_heading_rotates_displacement() {
        let mut odo = estimator();
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        odo.update(0, 0, yaw, 0);
        odo.update(1196, 1196, yaw, 1000);

        // Forward (0,1,0) rotated 90 degrees about z points along -x
        let pose = odo.pose();
        assert!((pose.position[0] + 0.3767).abs() < 5e-4);
        assert!(pose.position[1].abs() < 1e-4);
    }

    #[test]
    fn test_heading_is_overwritten_not_blended() {
        let mut odo = estimator();
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        odo.update(0, 0, UnitQuaternion::identity(), 0);
        odo.update(10, 10, yaw, 1000);

        let expected = yaw.coords;
        let heading = odo.pose().heading;
        for (got, want) in heading.iter().zip([expected.x, expected.y, expected.z, expected.w]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_timestamp_us_is_monotonic() {
        let a = timestamp_us();
        let b = timestamp_us();
        assert!(b >= a);
    }
}
