// Actuator boundary for the joint control loops
//
// Provides:
// - The ActuatorDriver capability every joint writes through
// - A simulated servo for hosts without hardware (and for tests)
// - Feetech serial bus protocol plus a non-blocking bus worker

mod bus;
pub mod feetech;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

pub use bus::{BusServo, ServoBus};
pub use feetech::{FeetechBus, FeetechError};

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Write queue for servo {id} is full")]
    Busy { id: u8 },

    #[error("Servo bus for servo {id} has shut down")]
    Disconnected { id: u8 },

    #[error("Actuator {name} is unreachable")]
    Unreachable { name: String },
}

/// Converts a commanded servo angle into a physical output.
///
/// Called from a joint control loop every tick, so implementations must
/// return promptly. A slow or stuck device should report an error rather
/// than wait.
pub trait ActuatorDriver: Send + 'static {
    fn write_angle(&mut self, degrees: f32) -> Result<(), ActuatorError>;
}

impl<A: ActuatorDriver + ?Sized> ActuatorDriver for Box<A> {
    fn write_angle(&mut self, degrees: f32) -> Result<(), ActuatorError> {
        (**self).write_angle(degrees)
    }
}

/// In-memory servo that remembers every angle written to it.
///
/// Clones share the same log, so a test can keep one clone while the
/// control loop owns the other.
#[derive(Debug, Clone, Default)]
pub struct SimulatedServo {
    name: String,
    writes: Arc<Mutex<Vec<f32>>>,
    unreachable: Arc<AtomicBool>,
}

impl SimulatedServo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Make every following write fail (or succeed again)
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Release);
    }

    pub fn last_written(&self) -> Option<f32> {
        self.writes.lock().last().copied()
    }

    pub fn writes(&self) -> Vec<f32> {
        self.writes.lock().clone()
    }
}

impl ActuatorDriver for SimulatedServo {
    fn write_angle(&mut self, degrees: f32) -> Result<(), ActuatorError> {
        if self.unreachable.load(Ordering::Acquire) {
            return Err(ActuatorError::Unreachable {
                name: self.name.clone(),
            });
        }
        self.writes.lock().push(degrees);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_servo_shares_log_between_clones() {
        let probe = SimulatedServo::new("probe");
        let mut driver: Box<dyn ActuatorDriver> = Box::new(probe.clone());

        driver.write_angle(90.0).unwrap();
        driver.write_angle(93.0).unwrap();

        assert_eq!(probe.writes(), vec![90.0, 93.0]);
        assert_eq!(probe.last_written(), Some(93.0));
    }

    #[test]
    fn test_unreachable_servo_rejects_writes() {
        let mut servo = SimulatedServo::new("dead");
        servo.set_unreachable(true);

        let err = servo.write_angle(90.0).unwrap_err();
        assert!(matches!(err, ActuatorError::Unreachable { ref name } if name == "dead"));
        assert_eq!(servo.last_written(), None);
    }
}
