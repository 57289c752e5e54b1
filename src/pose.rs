// Latest-pose snapshot shared between the control loop and external readers

use std::sync::{Arc, Mutex};

/// Dead-reckoned pose snapshot.
///
/// `heading` is in (x, y, z, w) order; the wire report uses (w, x, y, z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Monotonic microseconds of the update that produced this snapshot.
    pub timestamp_us: u64,
    /// Cumulative position in meters.
    pub position: [f32; 3],
    /// Most recent orientation sample, verbatim.
    pub heading: [f32; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            timestamp_us: 0,
            position: [0.0; 3],
            heading: [0.0, 0.0, 0.0, 1.0], // identity quaternion
        }
    }
}

/// Cloneable handle to the latest pose.
///
/// Written by the control loop, read by any thread. The lock is held only
/// for the duration of a plain copy.
#[derive(Debug, Clone, Default)]
pub struct PoseStore {
    inner: Arc<Mutex<Pose>>,
}

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, pose: Pose) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = pose;
    }

    pub fn get(&self) -> Pose {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_pose_is_origin_with_identity_heading() {
        let pose = PoseStore::new().get();
        assert_eq!(pose.timestamp_us, 0);
        assert_eq!(pose.position, [0.0; 3]);
        assert_eq!(pose.heading, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_store_then_get_returns_copy() {
        let store = PoseStore::new();
        let pose = Pose {
            timestamp_us: 42,
            position: [1.0, 2.0, 3.0],
            heading: [0.0, 0.0, 1.0, 0.0],
        };
        store.store(pose);
        assert_eq!(store.get(), pose);
    }

    #[test]
    fn test_readers_never_observe_mixed_snapshots() {
        // Writer publishes poses whose fields are all derived from the same
        // counter; a torn read would mix two counters.
        let store = PoseStore::new();
        let writer_store = store.clone();

        let writer = thread::spawn(move || {
            for n in 0..1000u64 {
                let v = n as f32;
                writer_store.store(Pose {
                    timestamp_us: n,
                    position: [v, v, v],
                    heading: [v, v, v, v],
                });
            }
        });

        let reader = thread::spawn(move || {
            for _ in 0..1000 {
                let pose = store.get();
                if pose.timestamp_us == 0 {
                    // Construction-time default, not a counter pose
                    continue;
                }
                let v = pose.timestamp_us as f32;
                assert_eq!(pose.position, [v, v, v]);
                assert_eq!(pose.heading, [v, v, v, v]);
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
