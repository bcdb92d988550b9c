// Non-blocking front end for the Feetech servo bus
//
// Serial transactions block for up to the port timeout, which is far longer
// than a joint tick. The bus is therefore owned by a dedicated thread; joints
// hand it goal positions through a bounded queue and never wait on the port.

use std::collections::BTreeMap;
use std::io;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode, Register, degrees_to_position};
use super::{ActuatorDriver, ActuatorError};
use crate::config::SERVO_QUEUE_DEPTH;

#[derive(Debug, Clone, Copy)]
struct PositionWrite {
    id: u8,
    position: u16,
}

/// Owner of the servo bus worker thread
pub struct ServoBus {
    tx: Option<Sender<PositionWrite>>,
    worker: Option<JoinHandle<()>>,
}

impl ServoBus {
    /// Open the serial port, put every servo in position mode and start the worker
    pub fn open(port: &str, servo_ids: &[u8]) -> Result<Self, FeetechError> {
        info!("Opening servo bus on {}", port);
        let mut bus = FeetechBus::open(port)?;
        initialize(&mut bus, servo_ids)?;
        Self::start(bus, servo_ids.to_vec())
    }

    /// Start the worker on an already configured bus
    pub fn start(bus: FeetechBus, servo_ids: Vec<u8>) -> Result<Self, FeetechError> {
        Ok(Self::spawn(bus, servo_ids)?)
    }

    fn spawn<W: GoalWriter>(writer: W, servo_ids: Vec<u8>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(SERVO_QUEUE_DEPTH);
        let worker = thread::Builder::new()
            .name("servo-bus".into())
            .spawn(move || run_worker(writer, rx, servo_ids))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Get a write handle for one servo on the bus
    pub fn attach(&self, id: u8) -> BusServo {
        BusServo {
            id,
            tx: self.tx.clone(),
        }
    }
}

impl ServoBus {
    /// Stop the worker and wait until it has released torque on every servo.
    ///
    /// Blocks until every attached [`BusServo`] is dropped as well.
    pub fn close(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Servo bus worker panicked");
            }
        }
        info!("Servo bus released");
    }
}

impl Drop for ServoBus {
    fn drop(&mut self) {
        // The worker exits once every attached handle is gone too
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                debug!("Servo bus worker still has attached servos, detaching");
                return;
            }
            if worker.join().is_err() {
                warn!("Servo bus worker panicked");
            }
        }
    }
}

/// One servo on the bus, used as a joint's actuator
#[derive(Debug, Clone)]
pub struct BusServo {
    id: u8,
    tx: Option<Sender<PositionWrite>>,
}

impl BusServo {
    pub fn id(&self) -> u8 {
        self.id
    }
}

impl ActuatorDriver for BusServo {
    fn write_angle(&mut self, degrees: f32) -> Result<(), ActuatorError> {
        let id = self.id;
        let tx = self.tx.as_ref().ok_or(ActuatorError::Disconnected { id })?;
        let write = PositionWrite {
            id,
            position: degrees_to_position(degrees),
        };
        tx.try_send(write).map_err(|e| match e {
            TrySendError::Full(_) => ActuatorError::Busy { id },
            TrySendError::Closed(_) => ActuatorError::Disconnected { id },
        })
    }
}

/// Check every servo answers, then switch them to position mode with torque on
fn initialize(bus: &mut FeetechBus, servo_ids: &[u8]) -> Result<(), FeetechError> {
    info!("Initializing servos {:?} for position control", servo_ids);

    for &id in servo_ids {
        if !bus.ping(id)? {
            warn!("Servo {} not responding to ping", id);
            return Err(FeetechError::Timeout { id });
        }
        debug!("Servo {} responding", id);
    }

    // Operating mode can only change with torque off
    for &id in servo_ids {
        bus.disable_torque(id)?;
        bus.set_operating_mode(id, OperatingMode::Position)?;
        bus.enable_torque(id)?;
    }

    info!("Servos initialized");
    Ok(())
}

/// What the worker does with the bus
trait GoalWriter: Send + 'static {
    fn write_goals(&mut self, goals: &[(u8, u16)]) -> Result<(), FeetechError>;

    fn release(&mut self, id: u8) -> Result<(), FeetechError>;
}

impl GoalWriter for FeetechBus {
    fn write_goals(&mut self, goals: &[(u8, u16)]) -> Result<(), FeetechError> {
        self.sync_write_u16(Register::GoalPosition, goals)
    }

    fn release(&mut self, id: u8) -> Result<(), FeetechError> {
        self.disable_torque(id)
    }
}

fn run_worker<W: GoalWriter>(mut bus: W, mut rx: Receiver<PositionWrite>, servo_ids: Vec<u8>) {
    while let Some(first) = rx.blocking_recv() {
        // Keep only the newest goal per servo, then send them in one packet
        let mut latest = BTreeMap::new();
        latest.insert(first.id, first.position);
        while let Ok(write) = rx.try_recv() {
            latest.insert(write.id, write.position);
        }

        let data: Vec<(u8, u16)> = latest.into_iter().collect();
        if let Err(e) = bus.write_goals(&data) {
            warn!("Servo bus write failed: {}", e);
        }
    }

    info!("Servo bus closed, releasing torque");
    for id in servo_ids {
        if let Err(e) = bus.release(id) {
            warn!("Failed to release servo {}: {}", id, e);
        }
    }
}
