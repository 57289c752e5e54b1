// VMU931 IMU driver: quaternion streaming over serial
//
// Data messages are framed as [0x01, size, type, payload..., 0x04] with
// big-endian payloads. Quaternion messages (type 'q') carry a u32 device
// timestamp followed by w, x, y, z floats.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use nalgebra::UnitQuaternion;

use crate::odometry::quaternion_from_wxyz;

pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

const MESSAGE_START: u8 = 0x01;
const MESSAGE_END: u8 = 0x04;
const QUATERNION_TYPE: u8 = b'q';

/// Stream toggle command for quaternion data
const TOGGLE_QUATERNIONS: &[u8] = b"varq";

/// Messages skipped while looking for a quaternion before giving up
const RESYNC_LIMIT: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ImuError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no quaternion data after {RESYNC_LIMIT} messages")]
    NoQuaternionData,

    #[error("quaternion stream could not be enabled")]
    StreamSetup,
}

pub type Result<T> = std::result::Result<T, ImuError>;

pub struct Vmu931 {
    port: Box<dyn SerialPort>,
}

impl Vmu931 {
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, DEFAULT_BAUDRATE)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Make sure the device is streaming quaternions.
    ///
    /// The command is a toggle, so first check whether quaternions already
    /// arrive before flipping the stream state.
    pub fn stream_quaternion(&mut self) -> Result<()> {
        if self.read_quaternion().is_ok() {
            return Ok(());
        }

        self.port.write_all(TOGGLE_QUATERNIONS)?;
        self.port.flush()?;

        match self.read_quaternion() {
            Ok(_) => {
                info!("quaternion stream enabled");
                Ok(())
            }
            Err(e) => {
                debug!("no quaternions after stream toggle: {e}");
                Err(ImuError::StreamSetup)
            }
        }
    }

    /// Block for the next quaternion sample, skipping other message types
    /// and resynchronizing on framing noise.
    pub fn read_quaternion(&mut self) -> Result<UnitQuaternion<f32>> {
        for _ in 0..RESYNC_LIMIT {
            if let Some(q) = self.read_message()? {
                return Ok(q);
            }
        }
        Err(ImuError::NoQuaternionData)
    }

    /// Read one framed message; Some(q) when it was a quaternion.
    fn read_message(&mut self) -> Result<Option<UnitQuaternion<f32>>> {
        let mut byte = [0u8; 1];

        // Scan for the start-of-message byte
        loop {
            self.port.read_exact(&mut byte)?;
            if byte[0] == MESSAGE_START {
                break;
            }
        }

        self.port.read_exact(&mut byte)?;
        let size = byte[0] as usize;
        // size counts the whole message including start, size and end bytes
        if !(4..=64).contains(&size) {
            return Ok(None);
        }

        let mut rest = vec![0u8; size - 2];
        self.port.read_exact(&mut rest)?;

        if rest[rest.len() - 1] != MESSAGE_END {
            return Ok(None);
        }

        let kind = rest[0];
        let payload = &rest[1..rest.len() - 1];
        if kind != QUATERNION_TYPE || payload.len() != 20 {
            return Ok(None);
        }

        // u32 device timestamp, then w, x, y, z
        let f32_at = |at: usize| f32::from_be_bytes(payload[at..at + 4].try_into().unwrap());
        let (w, x, y, z) = (f32_at(4), f32_at(8), f32_at(12), f32_at(16));

        Ok(Some(quaternion_from_wxyz(w, x, y, z)))
    }
}

/// Run the blocking reader on a dedicated thread, publishing each sample to
/// a watch channel.
///
/// The channel is the readiness handle for the control loop: waiting on
/// `changed()` and reading the borrowed value always observes the most
/// recent sample, discarding older buffered ones. A read failure drops the
/// sender, which the loop treats as fatal.
pub fn spawn_reader(mut imu: Vmu931) -> watch::Receiver<UnitQuaternion<f32>> {
    let (tx, rx) = watch::channel(UnitQuaternion::identity());

    tokio::task::spawn_blocking(move || {
        loop {
            if tx.is_closed() {
                break;
            }
            match imu.read_quaternion() {
                Ok(q) => {
                    if tx.send(q).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("imu read failed: {e}");
                    break;
                }
            }
        }
        debug!("imu reader finished");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    // Frame a quaternion payload the way the device does
    fn quaternion_message(w: f32, x: f32, y: f32, z: f32) -> Vec<u8> {
        let mut msg = vec![MESSAGE_START, 0, QUATERNION_TYPE];
        msg.extend_from_slice(&0u32.to_be_bytes());
        for component in [w, x, y, z] {
            msg.extend_from_slice(&component.to_be_bytes());
        }
        msg.push(MESSAGE_END);
        msg[1] = msg.len() as u8;
        msg
    }

    #[test]
    fn test_quaternion_message_framing() {
        let msg = quaternion_message(1.0, 0.0, 0.0, 0.0);
        // start + size + type + 20 payload bytes + end
        assert_eq!(msg.len(), 24);
        assert_eq!(msg[1], 24);
        assert_eq!(msg[2], b'q');
        assert_eq!(*msg.last().unwrap(), MESSAGE_END);
    }

    #[test]
    fn test_payload_is_big_endian_wxyz() {
        let msg = quaternion_message(1.0, 0.0, 0.0, 0.0);
        // w = 1.0f32 big-endian right after the device timestamp
        assert_eq!(&msg[7..11], &[0x3F, 0x80, 0x00, 0x00]);
    }
}
