// Joint control for the robot's limbs
//
// Provides:
// - Joint handles that any task may command (target angle, speed)
// - The per-joint control loop that ramps the angle and drives the actuator
// - The idle barrier and named joint groups used between gait phases
// - Calibration offset persistence

mod barrier;
pub mod calibration;
mod controller;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::config::{
    ACTUATOR_FAULT_THRESHOLD, DEFAULT_BASE_SPEED, INPUT_DEAD_BAND, JOINT_MAX_ANGLE,
    JOINT_MIN_ANGLE, MECHANICAL_ZERO, STEP_ANGLE,
};
use crate::messages::JointTelemetry;

pub use barrier::{BarrierError, IdleBarrier, JointGroup};
pub use calibration::{CalibrationError, CalibrationStore, JsonCalibrationStore, MemoryCalibrationStore};
pub use controller::JointController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

#[derive(Debug)]
struct JointState {
    current: f32,
    target: f32,
    speed: f32,
    base_speed: f32,
    offset: f32,
    busy: bool,
}

impl JointState {
    fn new() -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            speed: DEFAULT_BASE_SPEED,
            base_speed: DEFAULT_BASE_SPEED,
            offset: 0.0,
            busy: false,
        }
    }

    /// One control tick: update busy, ramp toward the target without
    /// overshooting, and return the angle to write to the servo.
    fn advance(&mut self, period_ms: f32) -> f32 {
        self.busy = self.current != self.target;

        let max_step = self.speed * period_ms / 1000.0;
        self.current = if self.target > self.current {
            (self.current + max_step).min(self.target)
        } else {
            (self.current - max_step).max(self.target)
        };

        self.current + MECHANICAL_ZERO + self.offset
    }
}

#[derive(Debug)]
struct JointInner {
    name: String,
    state: Mutex<JointState>,
    write_failures: AtomicU32,
}

/// Shared handle to one joint.
///
/// Cloning is cheap; every clone commands the same joint. Only the joint's
/// [`JointController`] moves the current angle.
#[derive(Debug, Clone)]
pub struct Joint {
    inner: Arc<JointInner>,
}

impl Joint {
    fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JointInner {
                name: name.into(),
                state: Mutex::new(JointState::new()),
                write_failures: AtomicU32::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Move the joint to `angle` at `speed_percent` of its base speed.
    ///
    /// Does nothing when `enable` is false or `angle` is not finite. The
    /// target is clamped to the mechanical range and the joint reports busy
    /// immediately, even when it already sits at the target; the next control
    /// tick clears it.
    pub fn set_angle(&self, angle: f32, speed_percent: u8, enable: bool) {
        if !enable {
            return;
        }
        if !angle.is_finite() {
            warn!("Joint {} ignoring non-finite target {}", self.name(), angle);
            return;
        }
        let mut state = self.inner.state.lock();
        state.target = angle.clamp(JOINT_MIN_ANGLE, JOINT_MAX_ANGLE);
        state.speed = f32::from(speed_percent.min(100)) * state.base_speed / 100.0;
        state.busy = true;
    }

    /// Command the zero pose at full speed
    pub fn home(&self) {
        self.set_angle(0.0, 100, true);
    }

    /// Nudge the target by a fixed step, staying inside the mechanical range
    pub fn step_angle(&self, direction: Direction) {
        let target = self.target();
        let next = match direction {
            Direction::Positive => target + STEP_ANGLE,
            Direction::Negative => target - STEP_ANGLE,
        };
        self.set_angle(next, 100, true);
    }

    /// Track a normalised input in [-1, 1] across the full range at the
    /// current speed. Inputs inside the dead band count as centred.
    pub fn follow_input(&self, value: f32) {
        if !value.is_finite() {
            warn!("Joint {} ignoring non-finite input {}", self.name(), value);
            return;
        }
        let value = if value.abs() < INPUT_DEAD_BAND {
            0.0
        } else {
            value.clamp(-1.0, 1.0)
        };
        let mut state = self.inner.state.lock();
        state.target = value * JOINT_MAX_ANGLE;
        state.busy = true;
    }

    pub fn angle(&self) -> f32 {
        self.inner.state.lock().current
    }

    pub fn target(&self) -> f32 {
        self.inner.state.lock().target
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().busy
    }

    /// Current angular speed in deg/s
    pub fn speed(&self) -> f32 {
        self.inner.state.lock().speed
    }

    pub fn set_speed(&self, speed: f32) {
        self.inner.state.lock().speed = speed.max(0.0);
    }

    pub fn base_speed(&self) -> f32 {
        self.inner.state.lock().base_speed
    }

    pub fn set_base_speed(&self, base_speed: f32) {
        self.inner.state.lock().base_speed = base_speed.max(0.0);
    }

    pub fn offset(&self) -> f32 {
        self.inner.state.lock().offset
    }

    pub fn set_offset(&self, offset: f32) {
        self.inner.state.lock().offset = offset;
    }

    pub fn adjust_offset(&self, delta: f32) -> f32 {
        let mut state = self.inner.state.lock();
        state.offset += delta;
        state.offset
    }

    /// Consecutive actuator writes that failed
    pub fn write_failures(&self) -> u32 {
        self.inner.write_failures.load(Ordering::Relaxed)
    }

    pub fn is_faulted(&self) -> bool {
        self.write_failures() >= ACTUATOR_FAULT_THRESHOLD
    }

    pub fn telemetry(&self) -> JointTelemetry {
        let state = self.inner.state.lock();
        JointTelemetry {
            name: self.inner.name.clone(),
            angle: state.current,
            target: state.target,
            speed: state.speed,
            busy: state.busy,
            write_failures: self.write_failures(),
        }
    }

    fn advance(&self, period_ms: f32) -> f32 {
        self.inner.state.lock().advance(period_ms)
    }

    /// Record a write outcome, returning the consecutive failure count
    fn record_write(&self, ok: bool) -> u32 {
        if ok {
            self.inner.write_failures.swap(0, Ordering::Relaxed)
        } else {
            self.inner.write_failures.fetch_add(1, Ordering::Relaxed) + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_angle_derives_speed_from_base_speed() {
        let joint = Joint::new("left_leg");
        joint.set_angle(90.0, 50, true);

        assert_eq!(joint.target(), 90.0);
        assert_eq!(joint.speed(), 150.0);
        assert!(joint.is_busy());
    }

    #[test]
    fn test_disabled_set_angle_is_inert() {
        let joint = Joint::new("left_leg");
        joint.set_angle(45.0, 80, false);

        assert_eq!(joint.target(), 0.0);
        assert_eq!(joint.speed(), DEFAULT_BASE_SPEED);
        assert!(!joint.is_busy());
    }

    #[test]
    fn test_target_is_clamped_to_mechanical_range() {
        let joint = Joint::new("right_foot");
        joint.set_angle(135.0, 100, true);
        assert_eq!(joint.target(), JOINT_MAX_ANGLE);

        joint.set_angle(-200.0, 100, true);
        assert_eq!(joint.target(), JOINT_MIN_ANGLE);
    }

    #[test]
    fn test_non_finite_commands_leave_joint_in_range() {
        let joint = Joint::new("right_foot");
        joint.set_angle(30.0, 50, true);

        joint.set_angle(f32::NAN, 100, true);
        joint.set_angle(f32::INFINITY, 100, true);
        joint.follow_input(f32::NAN);
        joint.follow_input(f32::NEG_INFINITY);
        assert_eq!(joint.target(), 30.0);
        assert_eq!(joint.speed(), 150.0);

        for _ in 0..100 {
            joint.advance(20.0);
            let angle = joint.angle();
            assert!(
                (JOINT_MIN_ANGLE..=JOINT_MAX_ANGLE).contains(&angle),
                "angle left the mechanical range: {}",
                angle
            );
        }
        assert_eq!(joint.angle(), 30.0);
        assert!(!joint.is_busy());
    }

    #[test]
    fn test_speed_percent_above_hundred_saturates() {
        let joint = Joint::new("right_leg");
        joint.set_angle(10.0, 250, true);
        assert_eq!(joint.speed(), DEFAULT_BASE_SPEED);
    }

    #[test]
    fn test_negative_speeds_clamp_to_zero() {
        let joint = Joint::new("right_leg");
        joint.set_speed(-10.0);
        joint.set_base_speed(-300.0);
        assert_eq!(joint.speed(), 0.0);
        assert_eq!(joint.base_speed(), 0.0);
    }

    #[test]
    fn test_advance_never_overshoots() {
        let mut state = JointState::new();
        state.target = -10.0;
        state.speed = 300.0;

        // 6 degrees per 20ms tick
        state.advance(20.0);
        assert_eq!(state.current, -6.0);
        state.advance(20.0);
        assert_eq!(state.current, -10.0);
        assert!(state.busy);

        state.advance(20.0);
        assert_eq!(state.current, -10.0);
        assert!(!state.busy);
    }

    #[test]
    fn test_advance_output_includes_zero_and_offset() {
        let mut state = JointState::new();
        state.offset = -3.5;
        assert_eq!(state.advance(20.0), MECHANICAL_ZERO - 3.5);
    }

    #[test]
    fn test_step_angle_moves_target_within_range() {
        let joint = Joint::new("left_foot");
        joint.step_angle(Direction::Positive);
        assert_eq!(joint.target(), STEP_ANGLE);

        joint.set_angle(JOINT_MIN_ANGLE + 1.0, 100, true);
        joint.step_angle(Direction::Negative);
        assert_eq!(joint.target(), JOINT_MIN_ANGLE);
    }

    #[test]
    fn test_follow_input_dead_band() {
        let joint = Joint::new("left_foot");
        joint.set_angle(0.0, 50, true);
        joint.follow_input(0.5);
        assert_eq!(joint.target(), 45.0);
        assert_eq!(joint.speed(), 150.0);

        joint.follow_input(0.01);
        assert_eq!(joint.target(), 0.0);

        joint.follow_input(-3.0);
        assert_eq!(joint.target(), JOINT_MIN_ANGLE);
    }

    #[test]
    fn test_adjust_offset_accumulates() {
        let joint = Joint::new("left_leg");
        joint.adjust_offset(1.0);
        assert_eq!(joint.adjust_offset(1.0), 2.0);
        assert_eq!(joint.adjust_offset(-3.0), -1.0);
    }
}
