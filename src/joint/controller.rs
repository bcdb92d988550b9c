// Per-joint control loop (50 Hz)
//
// Each tick ramps the joint's current angle toward its target at the
// commanded angular speed and writes the result to the actuator. It is a
// bounded-rate tracker: no overshoot, settling time = |delta| / speed.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::Joint;
use crate::actuator::ActuatorDriver;
use crate::config::{ACTUATOR_FAULT_THRESHOLD, JOINT_UPDATE_RATE};

/// Exclusive owner of one joint's current angle and actuator
pub struct JointController<A> {
    joint: Joint,
    actuator: A,
    period: Duration,
}

impl<A: ActuatorDriver> JointController<A> {
    pub fn new(name: impl Into<String>, actuator: A) -> Self {
        Self {
            joint: Joint::new(name),
            actuator,
            period: JOINT_UPDATE_RATE,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Handle for commanding this joint from other tasks
    pub fn joint(&self) -> Joint {
        self.joint.clone()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one control step and return the angle sent to the actuator.
    ///
    /// Write failures are counted on the joint and logged; they never stop
    /// the loop.
    pub fn tick(&mut self) -> f32 {
        let output = self.joint.advance(self.period.as_secs_f32() * 1000.0);

        match self.actuator.write_angle(output) {
            Ok(()) => {
                let previous = self.joint.record_write(true);
                if previous >= ACTUATOR_FAULT_THRESHOLD {
                    info!("Joint {} actuator recovered", self.joint.name());
                }
            }
            Err(e) => match self.joint.record_write(false) {
                1 => warn!("Joint {} actuator write failed: {}", self.joint.name(), e),
                ACTUATOR_FAULT_THRESHOLD => warn!(
                    "Joint {} actuator failed {} writes in a row, reporting fault",
                    self.joint.name(),
                    ACTUATOR_FAULT_THRESHOLD
                ),
                n => debug!("Joint {} actuator write failed ({}): {}", self.joint.name(), n, e),
            },
        }

        output
    }

    /// Tick forever at the configured period
    pub async fn run(mut self) {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Joint {} control loop started: {}ms period",
            self.joint.name(),
            self.period.as_millis()
        );

        loop {
            tick.tick().await;
            self.tick();
        }
    }

    /// Spawn the control loop on the current Tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
