// Differential-drive rover runtime
//
// Fuses wheel encoder counts with IMU quaternions into a dead-reckoned pose
// while serving a UDP drive-command channel with a motor-stop watchdog.

pub mod config;
pub mod imu;
pub mod motor;
pub mod net;
pub mod odometry;
pub mod pose;
pub mod protocol;
pub mod runtime;
