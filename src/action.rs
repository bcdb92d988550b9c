// Scripted behaviors with enter / loop / exit phases
//
// An action runs its behavior on its own Tokio task:
// Idle -> Entering -> Looping -> Exiting -> Idle
//
// Stopping is cooperative. `stop()` only clears the running flag; the loop
// notices it between iterations, and barrier waits inside the loop body notice
// it at their next poll. Entering and exiting always run to completion so the
// joints end in the behavior's rest pose.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::joint::{BarrierError, IdleBarrier, Joint};

/// Loop budget for one run of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Finite(u64),
    Infinite,
}

impl Iterations {
    fn is_exhausted(&self) -> bool {
        matches!(self, Iterations::Finite(0))
    }

    fn decrement(&mut self) {
        if let Iterations::Finite(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

impl From<u64> for Iterations {
    fn from(n: u64) -> Self {
        Iterations::Finite(n)
    }
}

impl fmt::Display for Iterations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Iterations::Finite(n) => write!(f, "{}", n),
            Iterations::Infinite => f.write_str("∞"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Entering,
    Looping,
    Exiting,
}

impl ActionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPhase::Idle => "idle",
            ActionPhase::Entering => "entering",
            ActionPhase::Looping => "looping",
            ActionPhase::Exiting => "exiting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("Action stopped")]
    Stopped,

    #[error("Joints {busy:?} did not settle in time")]
    JointTimeout { busy: Vec<String> },

    #[error("{0}")]
    Failed(String),
}

impl From<BarrierError> for ActionError {
    fn from(e: BarrierError) -> Self {
        match e {
            BarrierError::Cancelled => ActionError::Stopped,
            BarrierError::Timeout { busy } => ActionError::JointTimeout { busy },
        }
    }
}

/// The three routines of an action.
///
/// `step` is the loop body. Returning [`ActionError::Stopped`] from it ends
/// the loop quietly; any other error ends it with a warning. `exit` runs once
/// per run no matter how the loop ended.
pub trait Behavior: Send + Sync + 'static {
    fn enter(&self, ctx: &ActionContext) -> impl Future<Output = Result<(), ActionError>> + Send;

    fn step(&self, ctx: &ActionContext) -> impl Future<Output = Result<(), ActionError>> + Send;

    fn exit(&self, ctx: &ActionContext) -> impl Future<Output = Result<(), ActionError>> + Send;
}

#[derive(Debug)]
struct ActionShared {
    name: String,
    running: AtomicBool,
    // Held while changing phase so begin() and the end of a run cannot interleave
    active: Mutex<bool>,
    remaining: Mutex<Iterations>,
    phase: watch::Sender<ActionPhase>,
    barrier: IdleBarrier,
}

impl ActionShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn remaining(&self) -> Iterations {
        *self.remaining.lock()
    }

    fn exhausted(&self) -> bool {
        self.remaining.lock().is_exhausted()
    }

    fn complete_iteration(&self) {
        self.remaining.lock().decrement();
    }

    fn phase(&self) -> ActionPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: ActionPhase) {
        debug!("Action {} -> {}", self.name, phase.as_str());
        self.phase.send_replace(phase);
    }

    fn finish(&self) {
        let mut active = self.active.lock();
        self.running.store(false, Ordering::Release);
        *active = false;
        self.set_phase(ActionPhase::Idle);
    }
}

/// Returns the action to Idle even if a routine panics or the task is aborted
struct IdleOnDrop(Arc<ActionShared>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// What a running behavior can see of its action
#[derive(Debug, Clone)]
pub struct ActionContext {
    shared: Arc<ActionShared>,
}

impl ActionContext {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn phase(&self) -> ActionPhase {
        self.shared.phase()
    }

    pub fn remaining(&self) -> Iterations {
        self.shared.remaining()
    }

    /// True once `stop()` was requested, and throughout the exit routine.
    /// Still false during the last budgeted loop pass.
    pub fn is_stopping(&self) -> bool {
        !self.shared.is_running()
    }

    /// Wait until every joint is idle.
    ///
    /// While looping, a stop request ends the wait with
    /// [`ActionError::Stopped`]. While entering or exiting the wait always runs
    /// to completion.
    pub async fn wait_until_idle(&self, joints: impl AsRef<[Joint]>) -> Result<(), ActionError> {
        let joints = joints.as_ref();
        let barrier = &self.shared.barrier;
        if self.phase() == ActionPhase::Looping {
            barrier.wait_cancellable(joints, || !self.shared.is_running()).await?;
        } else {
            barrier.wait(joints).await?;
        }
        Ok(())
    }
}

/// Cancellable runner for one behavior.
///
/// Clones control the same action. `begin` spawns onto the current Tokio
/// runtime, so it must be called from inside one.
pub struct Action<B> {
    shared: Arc<ActionShared>,
    behavior: Arc<B>,
}

impl<B> Clone for Action<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            behavior: self.behavior.clone(),
        }
    }
}

impl<B: Behavior> Action<B> {
    pub fn new(name: impl Into<String>, behavior: B) -> Self {
        Self::with_barrier(name, behavior, IdleBarrier::new())
    }

    /// Use `barrier` for the behavior's idle waits (e.g. one with a timeout)
    pub fn with_barrier(name: impl Into<String>, behavior: B, barrier: IdleBarrier) -> Self {
        let (phase, _) = watch::channel(ActionPhase::Idle);
        Self {
            shared: Arc::new(ActionShared {
                name: name.into(),
                running: AtomicBool::new(false),
                active: Mutex::new(false),
                remaining: Mutex::new(Iterations::Infinite),
                phase,
                barrier,
            }),
            behavior: Arc::new(behavior),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Start a run with at most `max` loop iterations.
    ///
    /// Returns false and changes nothing if a run is still in progress,
    /// including one that is already exiting.
    pub fn begin(&self, max: impl Into<Iterations>) -> bool {
        let max = max.into();
        {
            let mut active = self.shared.active.lock();
            if *active {
                debug!("Action {} already running, ignoring begin", self.shared.name);
                return false;
            }
            *active = true;
            *self.shared.remaining.lock() = max;
            self.shared.running.store(true, Ordering::Release);
            self.shared.set_phase(ActionPhase::Entering);
        }

        info!("Starting action {} ({} iterations)", self.shared.name, max);
        tokio::spawn(execute(self.shared.clone(), self.behavior.clone()));
        true
    }

    /// Ask the run to wind down; the exit routine still runs
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            info!("Stopping action {}", self.shared.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// True from `begin` until the exit routine has finished
    pub fn is_active(&self) -> bool {
        *self.shared.active.lock()
    }

    pub fn phase(&self) -> ActionPhase {
        self.shared.phase()
    }

    pub fn remaining(&self) -> Iterations {
        self.shared.remaining()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActionPhase> {
        self.shared.phase.subscribe()
    }

    /// Resolve once the action is back to Idle
    pub async fn wait_idle(&self) {
        let mut phase = self.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here
        let _ = phase.wait_for(|phase| *phase == ActionPhase::Idle).await;
    }
}

async fn execute<B: Behavior>(shared: Arc<ActionShared>, behavior: Arc<B>) {
    let _idle = IdleOnDrop(shared.clone());
    let ctx = ActionContext {
        shared: shared.clone(),
    };
    let name = &shared.name;

    match behavior.enter(&ctx).await {
        Ok(()) => {
            shared.set_phase(ActionPhase::Looping);
            while shared.is_running() && !shared.exhausted() {
                match behavior.step(&ctx).await {
                    Ok(()) => shared.complete_iteration(),
                    Err(ActionError::Stopped) => {
                        debug!("Action {} loop interrupted", name);
                        break;
                    }
                    Err(e) => {
                        warn!("Action {} loop failed: {}", name, e);
                        break;
                    }
                }
            }
        }
        Err(e) => warn!("Action {} enter failed, skipping loop: {}", name, e),
    }

    shared.running.store(false, Ordering::Release);
    shared.set_phase(ActionPhase::Exiting);
    if let Err(e) = behavior.exit(&ctx).await {
        warn!("Action {} exit failed: {}", name, e);
    }

    info!("Action {} finished", name);
}
