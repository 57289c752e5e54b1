// RoboClaw packet serial protocol implementation
//
// Packet format: [Address, Command, Data..., CRC16]
// Write commands are acknowledged with a single 0xFF byte; read commands
// reply with big-endian data followed by a CRC16 over address, command and
// data. CRC16 is CCITT polynomial 0x1021 with zero initial value.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::MotorBus;

pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Acknowledge byte returned for accepted write commands
const ACK: u8 = 0xFF;

/// Command codes used by this drive train
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Command {
    MainBatteryVoltage = 24,
    DutyM1M2 = 34,
    SpeedAccelM1M2 = 40,
    ReadEncoders = 78,
}

#[derive(Debug, thiserror::Error)]
pub enum RoboclawError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout waiting for controller {address:#04x}")]
    Timeout { address: u8 },

    #[error("controller {address:#04x} rejected command (got {got:#04x})")]
    Nack { address: u8, got: u8 },

    #[error("CRC mismatch in response from controller {address:#04x}")]
    CrcMismatch { address: u8 },

    #[error("invalid response from controller {address:#04x}: {reason}")]
    InvalidResponse { address: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, RoboclawError>;

/// Serial bus shared by all RoboClaw controllers.
pub struct RoboclawBus {
    port: Box<dyn SerialPort>,
}

impl RoboclawBus {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// CRC16 CCITT (XMODEM) over the full packet so far
    fn crc16(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x1021
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    /// Build a write packet: address, command, payload, CRC16 big-endian
    fn build_write_packet(address: u8, command: Command, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(4 + payload.len());
        packet.push(address);
        packet.push(command as u8);
        packet.extend_from_slice(payload);
        let crc = Self::crc16(&packet);
        packet.extend_from_slice(&crc.to_be_bytes());
        packet
    }

    fn map_timeout(e: std::io::Error, address: u8) -> RoboclawError {
        if e.kind() == std::io::ErrorKind::TimedOut {
            RoboclawError::Timeout { address }
        } else {
            RoboclawError::Io(e)
        }
    }

    /// Send a write command and consume the single-byte acknowledge.
    fn write_command(&mut self, address: u8, command: Command, payload: &[u8]) -> Result<()> {
        let packet = Self::build_write_packet(address, command, payload);
        debug!(
            "write to controller {:#04x}: cmd={:?}, {} payload bytes",
            address,
            command,
            payload.len()
        );
        self.port.write_all(&packet)?;
        self.port.flush()?;

        let mut ack = [0u8; 1];
        self.port
            .read_exact(&mut ack)
            .map_err(|e| Self::map_timeout(e, address))?;

        if ack[0] != ACK {
            return Err(RoboclawError::Nack {
                address,
                got: ack[0],
            });
        }
        Ok(())
    }

    /// Send a read command and return `len` data bytes after CRC verification.
    ///
    /// Read requests carry no CRC; the reply CRC covers address, command and
    /// data.
    fn read_command(&mut self, address: u8, command: Command, len: usize) -> Result<Vec<u8>> {
        self.port.write_all(&[address, command as u8])?;
        self.port.flush()?;

        let mut response = vec![0u8; len + 2];
        self.port
            .read_exact(&mut response)
            .map_err(|e| Self::map_timeout(e, address))?;

        let mut crc_data = Vec::with_capacity(2 + len);
        crc_data.push(address);
        crc_data.push(command as u8);
        crc_data.extend_from_slice(&response[..len]);

        let expected = Self::crc16(&crc_data);
        let received = u16::from_be_bytes([response[len], response[len + 1]]);
        if expected != received {
            return Err(RoboclawError::CrcMismatch { address });
        }

        response.truncate(len);
        Ok(response)
    }

    /// Immediate duty cycle on both channels; zero stops the motors dead.
    pub fn duty_m1_m2(&mut self, address: u8, duty_m1: i16, duty_m2: i16) -> Result<()> {
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&duty_m1.to_be_bytes());
        payload[2..4].copy_from_slice(&duty_m2.to_be_bytes());
        self.write_command(address, Command::DutyM1M2, &payload)
    }

    /// Speed command with bounded acceleration on both channels.
    pub fn speed_accel_m1_m2(
        &mut self,
        address: u8,
        acceleration: u32,
        speed_m1: i32,
        speed_m2: i32,
    ) -> Result<()> {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&acceleration.to_be_bytes());
        payload[4..8].copy_from_slice(&speed_m1.to_be_bytes());
        payload[8..12].copy_from_slice(&speed_m2.to_be_bytes());
        self.write_command(address, Command::SpeedAccelM1M2, &payload)
    }

    /// Read both encoder counters in one transaction.
    pub fn read_encoders_m1_m2(&mut self, address: u8) -> Result<(i32, i32)> {
        let data = self.read_command(address, Command::ReadEncoders, 8)?;
        let m1 = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let m2 = i32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        Ok((m1, m2))
    }

    /// Main battery voltage in tenths of a volt; used as a liveness check.
    pub fn main_battery_voltage(&mut self, address: u8) -> Result<u16> {
        let data = self.read_command(address, Command::MainBatteryVoltage, 2)?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }
}

// M1 is the right channel and M2 the left one on this wiring.
impl MotorBus for RoboclawBus {
    fn set_speed(&mut self, address: u8, left: i16, right: i16, acceleration: u32) -> Result<()> {
        self.speed_accel_m1_m2(address, acceleration, right as i32, left as i32)
    }

    fn stop(&mut self, address: u8) -> Result<()> {
        self.duty_m1_m2(address, 0, 0)
    }

    fn read_encoders(&mut self, address: u8) -> Result<(i32, i32)> {
        let (m1, m2) = self.read_encoders_m1_m2(address)?;
        Ok((m2, m1))
    }
}
