// Idle barrier: wait for a set of joints to finish moving
//
// Busy flags are polled at the control loop period. There is no per-joint
// notification; a poll costs one mutex lock per joint.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use super::Joint;
use crate::config::JOINT_UPDATE_RATE;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BarrierError {
    #[error("Wait cancelled")]
    Cancelled,

    #[error("Timed out waiting for joints {busy:?}")]
    Timeout { busy: Vec<String> },
}

/// Polling barrier over joint busy flags
#[derive(Debug, Clone, Copy)]
pub struct IdleBarrier {
    poll: Duration,
    timeout: Option<Duration>,
}

impl Default for IdleBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleBarrier {
    pub fn new() -> Self {
        Self {
            poll: JOINT_UPDATE_RATE,
            timeout: None,
        }
    }

    /// Give up with [`BarrierError::Timeout`] after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return once every joint reports idle
    pub async fn wait(&self, joints: &[Joint]) -> Result<(), BarrierError> {
        self.wait_cancellable(joints, || false).await
    }

    /// Like [`wait`](Self::wait), but checks `is_cancelled` at every poll
    /// while some joint is still busy.
    pub async fn wait_cancellable<F>(&self, joints: &[Joint], is_cancelled: F) -> Result<(), BarrierError>
    where
        F: Fn() -> bool,
    {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if joints.iter().all(|joint| !joint.is_busy()) {
                return Ok(());
            }
            if is_cancelled() {
                debug!("Idle wait cancelled");
                return Err(BarrierError::Cancelled);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(BarrierError::Timeout {
                    busy: busy_names(joints),
                });
            }
            sleep(self.poll).await;
        }
    }
}

fn busy_names(joints: &[Joint]) -> Vec<String> {
    joints
        .iter()
        .filter(|joint| joint.is_busy())
        .map(|joint| joint.name().to_string())
        .collect()
}

/// Named set of joints commanded and awaited together
#[derive(Debug, Clone)]
pub struct JointGroup {
    name: String,
    joints: Vec<Joint>,
}

impl JointGroup {
    pub fn new(name: impl Into<String>, joints: impl IntoIterator<Item = Joint>) -> Self {
        Self {
            name: name.into(),
            joints: joints.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// True while any joint in the group is moving
    pub fn is_busy(&self) -> bool {
        self.joints.iter().any(Joint::is_busy)
    }

    pub fn busy_joints(&self) -> Vec<String> {
        busy_names(&self.joints)
    }

    pub fn set_speed(&self, speed: f32) {
        self.joints.iter().for_each(|joint| joint.set_speed(speed));
    }

    pub fn set_base_speed(&self, base_speed: f32) {
        self.joints.iter().for_each(|joint| joint.set_base_speed(base_speed));
    }

    pub fn home(&self) {
        self.joints.iter().for_each(Joint::home);
    }

    /// Block until the whole group is idle, polling at the control period
    pub async fn wait_until_idle(&self) {
        // Without timeout or cancellation the wait can only end in Ok
        let _ = IdleBarrier::new().wait(&self.joints).await;
    }
}

impl AsRef<[Joint]> for JointGroup {
    fn as_ref(&self) -> &[Joint] {
        &self.joints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedServo;
    use crate::joint::JointController;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn spawn_joints(names: &[&str]) -> (Vec<Joint>, Vec<tokio::task::JoinHandle<()>>) {
        names
            .iter()
            .map(|name| {
                let ctl = JointController::new(*name, SimulatedServo::new(*name));
                (ctl.joint(), ctl.spawn())
            })
            .unzip()
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_immediately_when_idle() {
        let joints = vec![Joint::new("a"), Joint::new("b")];
        let start = Instant::now();
        IdleBarrier::new().wait(&joints).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_slowest_joint() {
        let (joints, handles) = spawn_joints(&["fast", "slow"]);
        joints[0].set_angle(30.0, 100, true);
        joints[1].set_angle(60.0, 50, true);

        IdleBarrier::new().wait(&joints).await.unwrap();

        for joint in &joints {
            assert!(!joint.is_busy());
        }
        assert_eq!(joints[0].angle(), 30.0);
        assert_eq!(joints[1].angle(), 60.0);
        handles.iter().for_each(|h| h.abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_fooled_by_recommand() {
        let (joints, handles) = spawn_joints(&["leg"]);
        let leg = joints[0].clone();
        leg.set_angle(12.0, 100, true);

        // Re-extend the motion right before the first move would settle
        let extender = {
            let leg = leg.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                leg.set_angle(-60.0, 100, true);
            })
        };

        IdleBarrier::new().wait(&joints).await.unwrap();
        assert_eq!(leg.angle(), -60.0);
        assert!(!leg.is_busy());

        extender.await.unwrap();
        handles.iter().for_each(|h| h.abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_busy() {
        let (joints, handles) = spawn_joints(&["leg"]);
        joints[0].set_angle(90.0, 10, true);

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::Release);
        });

        let result = IdleBarrier::new()
            .wait_cancellable(&joints, || stop.load(Ordering::Acquire))
            .await;
        assert_eq!(result, Err(BarrierError::Cancelled));
        assert!(joints[0].is_busy());
        handles.iter().for_each(|h| h.abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_stuck_joints() {
        // No controller: the joint never settles
        let stuck = Joint::new("stuck");
        let idle = Joint::new("idle");
        stuck.set_angle(45.0, 100, true);

        let result = IdleBarrier::new()
            .with_timeout(Duration::from_millis(200))
            .wait(&[stuck, idle])
            .await;
        assert_eq!(
            result,
            Err(BarrierError::Timeout {
                busy: vec!["stuck".to_string()]
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_helpers() {
        let (joints, handles) = spawn_joints(&["left_foot", "left_leg"]);
        let group = JointGroup::new("left", joints);
        group.set_base_speed(600.0);
        group.joints()[0].set_angle(20.0, 100, true);

        assert!(group.is_busy());
        assert_eq!(group.busy_joints(), vec!["left_foot".to_string()]);

        group.wait_until_idle().await;
        assert!(!group.is_busy());
        assert_eq!(group.joints()[0].angle(), 20.0);
        handles.iter().for_each(|h| h.abort());
    }
}
