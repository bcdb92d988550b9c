// Feetech STS-series serial bus protocol, position mode
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Joints only ever command positions, so the bus is configured for position
// mode and writes GoalPosition in raw steps (4096 per revolution).

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use crate::config::MECHANICAL_ZERO;

/// Default serial configuration for Feetech servos
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Broadcast ID, used by sync writes (no status packet is returned)
pub const BROADCAST_ID: u8 = 0xFE;

const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Raw position steps per revolution and the step at the servo mid point
const STEPS_PER_REVOLUTION: f32 = 4096.0;
const STEPS_PER_DEG: f32 = STEPS_PER_REVOLUTION / 360.0;
const CENTER_POSITION: f32 = 2048.0;
const MAX_POSITION: f32 = 4095.0;

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Register addresses used by the runtime
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    // EEPROM area
    ModelNumber = 3, // 2 bytes, read-only
    Id = 5,          // 1 byte

    // RAM area
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte
    GoalPosition = 42,    // 2 bytes
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, read-only
    Moving = 66,          // 1 byte, read-only
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
    Step = 3,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Convert a servo angle (0..=180, mid point at 90) to a raw goal position
pub fn degrees_to_position(servo_degrees: f32) -> u16 {
    let steps = CENTER_POSITION + (servo_degrees - MECHANICAL_ZERO) * STEPS_PER_DEG;
    steps.round().clamp(0.0, MAX_POSITION) as u16
}

/// Convert a raw present position back to a servo angle
pub fn position_to_degrees(position: u16) -> f32 {
    (position as f32 - CENTER_POSITION) / STEPS_PER_DEG + MECHANICAL_ZERO
}

/// Half-duplex servo bus on a serial port
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Inverted low byte of the sum of everything after the header
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // instruction + params + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet and return its parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id: expected_id }
            } else {
                FeetechError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let [id, length] = id_length;

        if id != expected_id {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // status byte + params + checksum
        let mut body = vec![0u8; length as usize];
        self.port.read_exact(&mut body)?;

        let (payload, checksum) = body.split_at(body.len() - 1);
        let mut checked = vec![id, length];
        checked.extend_from_slice(payload);
        if Self::checksum(&checked) != checksum[0] {
            return Err(FeetechError::ChecksumMismatch { id });
        }

        let status = payload[0];
        if status != 0 {
            return Err(FeetechError::ServoError { id, status });
        }

        Ok(payload[1..].to_vec())
    }

    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        let packet = Self::build_packet(id, Instruction::Write, &[register as u8, value]);
        debug!("Write u8 to servo {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        self.read_response(id).map(|_| ())
    }

    /// Write two bytes (little-endian) to a register
    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        let packet = Self::build_packet(id, Instruction::Write, &[register as u8, lo, hi]);
        debug!("Write u16 to servo {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        self.read_response(id).map(|_| ())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        let packet = Self::build_packet(id, Instruction::Read, &[register as u8, 1]);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        response
            .first()
            .copied()
            .ok_or_else(|| FeetechError::InvalidResponse {
                id,
                reason: "Empty response".to_string(),
            })
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let packet = Self::build_packet(id, Instruction::Read, &[register as u8, 2]);
        self.send_packet(&packet)?;

        match self.read_response(id)?.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            other => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", other.len()),
            }),
        }
    }

    /// Write the same 2-byte register on several servos in one broadcast packet
    pub fn sync_write_u16(&mut self, register: Register, data: &[(u8, u16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // [start_addr, data_length, id1, lo1, hi1, id2, lo2, hi2, ...]
        let mut params = Vec::with_capacity(2 + data.len() * 3);
        params.push(register as u8);
        params.push(2);
        for &(id, value) in data {
            params.push(id);
            params.extend_from_slice(&value.to_le_bytes());
        }

        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("Sync write to {} servos: reg={:?}", data.len(), register);
        self.send_packet(&packet)
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Set operating mode (torque must be disabled first)
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    pub fn set_goal_position(&mut self, id: u8, position: u16) -> Result<()> {
        self.write_u16(id, Register::GoalPosition, position)
    }

    pub fn get_position(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }

    pub fn is_moving(&mut self, id: u8) -> Result<bool> {
        Ok(self.read_u8(id, Register::Moving)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, WRITE, Addr=30, Data=0, 2 -> ~40
        let data = [1u8, 4, 0x03, 30, 0, 2];
        assert_eq!(FeetechBus::checksum(&data), 215);
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = FeetechBus::build_packet(3, Instruction::Ping, &[]);
        assert_eq!(packet, vec![0xFF, 0xFF, 3, 2, 0x01, !(3u8 + 2 + 1)]);
    }

    #[test]
    fn test_build_goal_position_packet() {
        let [lo, hi] = 2048u16.to_le_bytes();
        let packet = FeetechBus::build_packet(
            1,
            Instruction::Write,
            &[Register::GoalPosition as u8, lo, hi],
        );
        assert_eq!(packet.len(), 9);
        assert_eq!(packet[3], 5); // instruction + 3 params + checksum
        assert_eq!(&packet[5..8], &[42, 0x00, 0x08]);
    }

    #[test]
    fn test_mid_point_maps_to_center_step() {
        assert_eq!(degrees_to_position(90.0), 2048);
        assert_eq!(degrees_to_position(0.0), 1024);
        assert_eq!(degrees_to_position(180.0), 3072);
    }

    #[test]
    fn test_position_is_clamped_to_register_range() {
        assert_eq!(degrees_to_position(-400.0), 0);
        assert_eq!(degrees_to_position(600.0), 4095);
    }

    #[test]
    fn test_position_back_to_degrees() {
        let degrees = position_to_degrees(degrees_to_position(135.0));
        assert!((degrees - 135.0).abs() < 0.1, "got {}", degrees);
    }
}
