// Double-tap gesture classification
//
// The accelerometer raises an interrupt with no payload when it latches a
// double tap. The interrupt side only sets a pending flag; a polling task
// picks it up, reads the tap status code, maps it to a face and runs the
// handler bound to that face.
//
// Only one tap is tracked at a time: a second interrupt that arrives before
// the first is polled is folded into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::GESTURE_POLL_RATE;

/// Side of the robot that was double tapped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapFace {
    Top,
    Bottom,
    Left,
    Right,
    Front,
    Back,
    #[default]
    None,
}

impl TapFace {
    /// Every face a handler can be bound to
    pub const ALL: [TapFace; 6] = [
        TapFace::Top,
        TapFace::Bottom,
        TapFace::Left,
        TapFace::Right,
        TapFace::Front,
        TapFace::Back,
    ];

    /// Classify a tap status code. Only exact matches count.
    pub fn from_status(code: u8) -> TapFace {
        match code {
            0b1100_0000 => TapFace::Top,
            0b0100_0000 => TapFace::Bottom,
            0b0001_0000 => TapFace::Left,
            0b1001_0000 => TapFace::Right,
            0b1010_0000 => TapFace::Front,
            0b0010_0000 => TapFace::Back,
            _ => TapFace::None,
        }
    }

    /// The status code the sensor reports for this face
    pub fn status_code(self) -> Option<u8> {
        match self {
            TapFace::Top => Some(0b1100_0000),
            TapFace::Bottom => Some(0b0100_0000),
            TapFace::Left => Some(0b0001_0000),
            TapFace::Right => Some(0b1001_0000),
            TapFace::Front => Some(0b1010_0000),
            TapFace::Back => Some(0b0010_0000),
            TapFace::None => None,
        }
    }

    fn slot(self) -> Option<usize> {
        TapFace::ALL.iter().position(|face| *face == self)
    }
}

/// A classified double tap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapEvent {
    pub face: TapFace,
    pub status: u8,
    pub timestamp: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor bus error: {0}")]
    Bus(String),

    #[error("Sensor not responding")]
    NotResponding,
}

/// Where the tap status code comes from (the accelerometer's interrupt
/// status register on real hardware)
pub trait StatusSource: Send + 'static {
    fn read_status_code(&mut self) -> Result<u8, SensorError>;
}

/// Interrupt-side handle: marks a tap as pending.
///
/// `notify` is a single atomic swap, safe to call from any thread or
/// callback that must not block.
#[derive(Debug, Clone, Default)]
pub struct TapNotifier {
    pending: Arc<AtomicBool>,
    coalesced: Arc<AtomicU64>,
}

impl TapNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Notifications folded into one that was still pending
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

pub type TapHandler = Arc<dyn Fn(&TapEvent) + Send + Sync>;

/// Face -> handler table, shareable with whoever wires up behaviors
#[derive(Clone, Default)]
pub struct GestureBindings {
    handlers: Arc<RwLock<[Option<TapHandler>; 6]>>,
    last_tap: Arc<Mutex<TapFace>>,
}

impl GestureBindings {
    /// Bind `handler` to `face`, replacing any previous one.
    /// Binding to [`TapFace::None`] is ignored.
    pub fn attach<F>(&self, face: TapFace, handler: F)
    where
        F: Fn(&TapEvent) + Send + Sync + 'static,
    {
        match face.slot() {
            Some(slot) => self.handlers.write()[slot] = Some(Arc::new(handler)),
            None => warn!("Cannot bind a handler to an unrecognised tap"),
        }
    }

    pub fn detach(&self, face: TapFace) {
        if let Some(slot) = face.slot() {
            self.handlers.write()[slot] = None;
        }
    }

    pub fn is_bound(&self, face: TapFace) -> bool {
        face.slot().is_some_and(|slot| self.handlers.read()[slot].is_some())
    }

    /// Face of the most recent classified tap
    pub fn last_tap(&self) -> TapFace {
        *self.last_tap.lock()
    }

    fn handler(&self, face: TapFace) -> Option<TapHandler> {
        face.slot().and_then(|slot| self.handlers.read()[slot].clone())
    }
}

/// Polls for pending taps and dispatches them
pub struct GestureClassifier<S> {
    source: S,
    notifier: TapNotifier,
    bindings: GestureBindings,
    period: Duration,
}

impl<S: StatusSource> GestureClassifier<S> {
    pub fn new(source: S, notifier: TapNotifier) -> Self {
        Self {
            source,
            notifier,
            bindings: GestureBindings::default(),
            period: GESTURE_POLL_RATE,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn notifier(&self) -> TapNotifier {
        self.notifier.clone()
    }

    pub fn bindings(&self) -> GestureBindings {
        self.bindings.clone()
    }

    pub fn attach<F>(&self, face: TapFace, handler: F)
    where
        F: Fn(&TapEvent) + Send + Sync + 'static,
    {
        self.bindings.attach(face, handler);
    }

    /// Handle at most one pending tap.
    ///
    /// The handler runs on the caller's task. The handler table lock is not
    /// held while it runs, so handlers may rebind faces.
    pub fn poll_once(&mut self) -> Option<TapEvent> {
        if !self.notifier.take() {
            return None;
        }

        let status = match self.source.read_status_code() {
            Ok(status) => status,
            Err(e) => {
                warn!("Discarding tap, status read failed: {}", e);
                return None;
            }
        };

        let face = TapFace::from_status(status);
        let event = TapEvent {
            face,
            status,
            timestamp: Instant::now(),
        };
        *self.bindings.last_tap.lock() = face;

        if face == TapFace::None {
            warn!("Double tap with unrecognised status 0b{:08b}", status);
            return Some(event);
        }

        info!("Double tap: {:?}", face);
        match self.bindings.handler(face) {
            Some(handler) => handler(&event),
            None => debug!("No handler bound to {:?}", face),
        }
        Some(event)
    }

    /// Poll forever at the configured period
    pub async fn run(mut self) {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Gesture polling started: {}ms period", self.period.as_millis());

        loop {
            tick.tick().await;
            self.poll_once();
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Stand-in accelerometer: holds the status code of the last injected tap
/// and raises the interrupt itself.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    status: Arc<AtomicU8>,
    notifier: TapNotifier,
}

impl SimulatedSensor {
    pub fn new(notifier: TapNotifier) -> Self {
        Self {
            status: Arc::new(AtomicU8::new(0)),
            notifier,
        }
    }

    /// Latch `status` and raise the interrupt
    pub fn raise(&self, status: u8) {
        self.status.store(status, Ordering::Release);
        self.notifier.notify();
    }

    pub fn tap(&self, face: TapFace) {
        self.raise(face.status_code().unwrap_or(0));
    }
}

impl StatusSource for SimulatedSensor {
    fn read_status_code(&mut self) -> Result<u8, SensorError> {
        Ok(self.status.load(Ordering::Acquire))
    }
}
