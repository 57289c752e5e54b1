// Wire formats for the drive-command channel and dead-reckoning reports
//
// Both packets are fixed-size, little-endian, and match the remote
// controller byte for byte. Any size mismatch is rejected outright.

use thiserror::Error;

/// Drive packet: command code + left/right speed, each i16.
pub const DRIVE_PACKET_BYTES: usize = 6;

/// Dead-reckoning report: u64 timestamp, two i32 encoder counts,
/// quaternion as four f32 in (w, x, y, z) order.
pub const POSE_REPORT_BYTES: usize = 32;

const CMD_KEEPALIVE: i16 = 0;
const CMD_SET_SPEED: i16 = 1;
const CMD_POSITION_WITH_SPEED: i16 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected packet size: {got} bytes, expected {expected}")]
    InvalidSize { got: usize, expected: usize },

    #[error("unknown drive command code: {0}")]
    UnknownCommand(i16),
}

/// A single decoded drive-channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    /// Feeds the watchdog without touching the motors.
    KeepAlive,
    SetSpeed { left: i16, right: i16 },
    /// Reserved by the protocol; the control loop does not process it.
    PositionWithSpeed { left: i16, right: i16 },
}

impl DriveCommand {
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != DRIVE_PACKET_BYTES {
            return Err(ProtocolError::InvalidSize {
                got: buf.len(),
                expected: DRIVE_PACKET_BYTES,
            });
        }

        let code = i16::from_le_bytes([buf[0], buf[1]]);
        let left = i16::from_le_bytes([buf[2], buf[3]]);
        let right = i16::from_le_bytes([buf[4], buf[5]]);

        match code {
            CMD_KEEPALIVE => Ok(DriveCommand::KeepAlive),
            CMD_SET_SPEED => Ok(DriveCommand::SetSpeed { left, right }),
            CMD_POSITION_WITH_SPEED => Ok(DriveCommand::PositionWithSpeed { left, right }),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    pub fn encode(&self) -> [u8; DRIVE_PACKET_BYTES] {
        let (code, left, right) = match *self {
            DriveCommand::KeepAlive => (CMD_KEEPALIVE, 0, 0),
            DriveCommand::SetSpeed { left, right } => (CMD_SET_SPEED, left, right),
            DriveCommand::PositionWithSpeed { left, right } => {
                (CMD_POSITION_WITH_SPEED, left, right)
            }
        };

        let mut buf = [0u8; DRIVE_PACKET_BYTES];
        buf[0..2].copy_from_slice(&code.to_le_bytes());
        buf[2..4].copy_from_slice(&left.to_le_bytes());
        buf[4..6].copy_from_slice(&right.to_le_bytes());
        buf
    }
}

/// Raw odometry sample published after each orientation update.
///
/// Carries the raw encoder counts rather than the fused position; the
/// quaternion order here is (w, x, y, z), unlike the pose accessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseReport {
    pub timestamp_us: u64,
    pub left: i32,
    pub right: i32,
    pub rotation_wxyz: [f32; 4],
}

impl PoseReport {
    pub fn encode(&self) -> [u8; POSE_REPORT_BYTES] {
        let mut buf = [0u8; POSE_REPORT_BYTES];
        buf[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[8..12].copy_from_slice(&self.left.to_le_bytes());
        buf[12..16].copy_from_slice(&self.right.to_le_bytes());
        for (i, component) in self.rotation_wxyz.iter().enumerate() {
            let at = 16 + 4 * i;
            buf[at..at + 4].copy_from_slice(&component.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != POSE_REPORT_BYTES {
            return Err(ProtocolError::InvalidSize {
                got: buf.len(),
                expected: POSE_REPORT_BYTES,
            });
        }

        let f32_at = |at: usize| f32::from_le_bytes(buf[at..at + 4].try_into().unwrap());

        Ok(Self {
            timestamp_us: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            left: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            right: i32::from_le_bytes(buf[12..16].try_into().unwrap()),
            rotation_wxyz: [f32_at(16), f32_at(20), f32_at(24), f32_at(28)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_speed_round_trip() {
        let cmd = DriveCommand::SetSpeed {
            left: -250,
            right: 300,
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), DRIVE_PACKET_BYTES);
        assert_eq!(DriveCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_keepalive_layout() {
        let bytes = DriveCommand::KeepAlive.encode();
        assert_eq!(bytes, [0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_set_speed_layout_little_endian() {
        let bytes = DriveCommand::SetSpeed { left: 1, right: -1 }.encode();
        assert_eq!(bytes, [1, 0, 1, 0, 0xFF, 0xFF]);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let err = DriveCommand::decode(&[0u8; 5]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidSize {
                got: 5,
                expected: 6
            }
        );
        assert!(DriveCommand::decode(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut bytes = DriveCommand::KeepAlive.encode();
        bytes[0] = 7;
        assert_eq!(
            DriveCommand::decode(&bytes).unwrap_err(),
            ProtocolError::UnknownCommand(7)
        );
    }

    #[test]
    fn test_reserved_command_decodes() {
        let cmd = DriveCommand::PositionWithSpeed {
            left: 10,
            right: 20,
        };
        assert_eq!(DriveCommand::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_pose_report_round_trip() {
        let report = PoseReport {
            timestamp_us: 1_234_567_890,
            left: -42,
            right: 42,
            rotation_wxyz: [1.0, 0.0, -0.5, 0.25],
        };
        let bytes = report.encode();
        assert_eq!(bytes.len(), POSE_REPORT_BYTES);
        assert_eq!(PoseReport::decode(&bytes).unwrap(), report);
    }

    #[test]
    fn test_pose_report_layout() {
        let report = PoseReport {
            timestamp_us: 1,
            left: 2,
            right: 3,
            rotation_wxyz: [1.0, 0.0, 0.0, 0.0],
        };
        let bytes = report.encode();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 2);
        assert_eq!(bytes[12], 3);
        // 1.0f32 little-endian at the w slot
        assert_eq!(&bytes[16..20], &[0x00, 0x00, 0x80, 0x3F]);
    }
}
