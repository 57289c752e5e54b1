// Motor control for the rover drive train
//
// Three RoboClaw dual-channel controllers share one commanded left/right
// speed pair. Encoders are read from the middle controller only.

pub mod roboclaw;

pub use roboclaw::{RoboclawBus, RoboclawError};

pub const FRONT_MOTOR_ADDRESS: u8 = 0x80;
pub const MIDDLE_MOTOR_ADDRESS: u8 = 0x81;
pub const REAR_MOTOR_ADDRESS: u8 = 0x82;

/// All drive controllers, front to rear.
pub const DRIVE_ADDRESSES: [u8; 3] = [
    FRONT_MOTOR_ADDRESS,
    MIDDLE_MOTOR_ADDRESS,
    REAR_MOTOR_ADDRESS,
];

/// Controller whose encoders feed the odometry estimator.
pub const ENCODER_ADDRESS: u8 = MIDDLE_MOTOR_ADDRESS;

/// Acceleration passed with every speed command, counts/s^2.
pub const MOTOR_ACCELERATION: u32 = 6000;

/// Per-controller drive interface consumed by the control loop.
pub trait MotorBus {
    /// Command a left/right speed pair with bounded acceleration.
    fn set_speed(
        &mut self,
        address: u8,
        left: i16,
        right: i16,
        acceleration: u32,
    ) -> Result<(), RoboclawError>;

    /// Force both channels to zero duty immediately.
    fn stop(&mut self, address: u8) -> Result<(), RoboclawError>;

    /// Read the absolute (left, right) encoder counters.
    fn read_encoders(&mut self, address: u8) -> Result<(i32, i32), RoboclawError>;
}
