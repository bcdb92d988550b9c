// Robot wiring and the zenoh telemetry loop
//
// Startup: actuators -> joint controllers -> calibration -> walk action ->
// gesture classifier with Left = start walking, Right = stop walking.
// The main loop feeds zenoh tap messages into the simulated tap sensor and
// publishes joint telemetry, health and face text.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::action::Action;
use crate::actuator::{ActuatorDriver, FeetechError, ServoBus, SimulatedServo};
use crate::config::{
    CALIBRATION_PATH, DEFAULT_BASE_SPEED, SERVO_PORT, TELEMETRY_HZ, TOPIC_FACE_TEXT,
    TOPIC_GESTURE_TAP, TOPIC_HEALTH, TOPIC_JOINTS, WALK_STEPS,
};
use crate::face::{ChannelFace, FaceDisplay};
use crate::gait::{Legs, Limb, Walk};
use crate::gesture::{GestureBindings, GestureClassifier, SimulatedSensor, TapFace, TapNotifier};
use crate::joint::calibration::load_offsets;
use crate::joint::{JointController, JsonCalibrationStore, MemoryCalibrationStore};
use crate::messages::{RobotTelemetry, RuntimeHealth, TapCommand};

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub simulate: bool,
    pub calibration: PathBuf,
    pub base_speed: f32,
    pub walk_steps: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            port: SERVO_PORT.to_string(),
            simulate: false,
            calibration: PathBuf::from(CALIBRATION_PATH),
            base_speed: DEFAULT_BASE_SPEED,
            walk_steps: WALK_STEPS,
        }
    }
}

/// Everything running on the robot
pub struct Robot {
    legs: Legs,
    walk: Action<Walk>,
    sensor: SimulatedSensor,
    gestures: GestureBindings,
    tasks: Vec<JoinHandle<()>>,
    bus: Option<ServoBus>,
}

impl Robot {
    /// Bring the robot up. Must be called inside a Tokio runtime.
    pub fn start(options: &RuntimeOptions, face: Arc<dyn FaceDisplay>) -> Result<Self, FeetechError> {
        let (bus, actuators) = open_actuators(options)?;
        Ok(Self::assemble(options, bus, actuators, face))
    }

    fn assemble(
        options: &RuntimeOptions,
        bus: Option<ServoBus>,
        actuators: Actuators,
        face: Arc<dyn FaceDisplay>,
    ) -> Self {
        let controllers = actuators.map(|(limb, actuator)| JointController::new(limb.name(), actuator));
        let [left_foot, left_leg, right_foot, right_leg] = controllers.each_ref().map(|ctl| ctl.joint());
        let legs = Legs::new(left_foot, left_leg, right_foot, right_leg);
        let mut tasks: Vec<JoinHandle<()>> = controllers.into_iter().map(JointController::spawn).collect();

        match JsonCalibrationStore::open(&options.calibration) {
            Ok(store) => load_offsets(&store, legs.all().joints()),
            Err(e) => {
                warn!("Calibration unavailable, using zero offsets: {}", e);
                load_offsets(&MemoryCalibrationStore::new(), legs.all().joints());
            }
        }
        legs.all().set_base_speed(options.base_speed);
        legs.all().home();

        let walk = Action::new("walk", Walk::new(legs.clone(), face));

        let notifier = TapNotifier::new();
        let sensor = SimulatedSensor::new(notifier.clone());
        let classifier = GestureClassifier::new(sensor.clone(), notifier);
        let gestures = classifier.bindings();

        let steps = options.walk_steps;
        let starter = walk.clone();
        gestures.attach(TapFace::Left, move |_| {
            starter.begin(steps);
        });
        let stopper = walk.clone();
        gestures.attach(TapFace::Right, move |_| stopper.stop());
        tasks.push(classifier.spawn());

        info!(
            "Robot ready: {} joints, base speed {:.0} deg/s, {} steps per walk",
            Limb::ALL.len(),
            options.base_speed,
            steps
        );

        Self {
            legs,
            walk,
            sensor,
            gestures,
            tasks,
            bus,
        }
    }

    pub fn legs(&self) -> &Legs {
        &self.legs
    }

    pub fn walk(&self) -> &Action<Walk> {
        &self.walk
    }

    pub fn gestures(&self) -> &GestureBindings {
        &self.gestures
    }

    /// Latch a tap status code as if the accelerometer had reported it
    pub fn inject_tap(&self, status: u8) {
        self.sensor.raise(status);
    }

    pub fn telemetry(&self) -> RobotTelemetry {
        RobotTelemetry {
            joints: self.legs.all().joints().iter().map(|joint| joint.telemetry()).collect(),
            walk_phase: self.walk.phase().as_str().to_string(),
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        if self.legs.all().joints().iter().any(|joint| joint.is_faulted()) {
            RuntimeHealth::ActuatorFault
        } else {
            RuntimeHealth::Ok
        }
    }

    /// Finish the current walk, then stop every task and release the bus
    pub async fn shutdown(self) {
        self.walk.stop();
        self.walk.wait_idle().await;

        for task in &self.tasks {
            task.abort();
        }
        // Awaiting the aborted controllers drops every attached servo handle
        for task in self.tasks {
            let _ = task.await;
        }
        if let Some(bus) = self.bus {
            info!("Releasing servo bus");
            if tokio::task::spawn_blocking(move || bus.close()).await.is_err() {
                warn!("Servo bus close did not complete");
            }
        }
    }
}

type Actuators = [(Limb, Box<dyn ActuatorDriver>); 4];

fn open_actuators(options: &RuntimeOptions) -> Result<(Option<ServoBus>, Actuators), FeetechError> {
    if options.simulate {
        info!("Simulating servos");
        let actuators = Limb::ALL.map(|limb| {
            let servo: Box<dyn ActuatorDriver> = Box::new(SimulatedServo::new(limb.name()));
            (limb, servo)
        });
        return Ok((None, actuators));
    }

    let ids = Limb::ALL.map(Limb::servo_id);
    let bus = ServoBus::open(&options.port, &ids)?;
    let actuators = Limb::ALL.map(|limb| {
        let servo: Box<dyn ActuatorDriver> = Box::new(bus.attach(limb.servo_id()));
        (limb, servo)
    });
    Ok((Some(bus), actuators))
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Topics the runtime publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outlet {
    Joints,
    Health,
    Face,
}

trait TelemetryOut {
    async fn put(&self, outlet: Outlet, payload: String) -> Result<(), BoxError>;
}

struct ZenohOut<'a> {
    joints: zenoh::pubsub::Publisher<'a>,
    health: zenoh::pubsub::Publisher<'a>,
    face: zenoh::pubsub::Publisher<'a>,
}

impl TelemetryOut for ZenohOut<'_> {
    async fn put(&self, outlet: Outlet, payload: String) -> Result<(), BoxError> {
        let publisher = match outlet {
            Outlet::Joints => &self.joints,
            Outlet::Health => &self.health,
            Outlet::Face => &self.face,
        };
        publisher.put(payload).await?;
        Ok(())
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_GESTURE_TAP).await?;
    let out = ZenohOut {
        joints: session.declare_publisher(TOPIC_JOINTS).await?,
        health: session.declare_publisher(TOPIC_HEALTH).await?,
        face: session.declare_publisher(TOPIC_FACE_TEXT).await?,
    };

    let (face, face_text) = ChannelFace::new();
    let robot = Robot::start(&options, Arc::new(face))?;

    info!("Runtime started: {}Hz telemetry", TELEMETRY_HZ);
    info!("Subscribed to: {}", TOPIC_GESTURE_TAP);
    info!("Publishing to: {}, {}, {}", TOPIC_JOINTS, TOPIC_HEALTH, TOPIC_FACE_TEXT);

    // Drain pending taps (non-blocking)
    let drain_taps = || {
        let mut taps = Vec::new();
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<TapCommand>(&payload) {
                Ok(cmd) => taps.push(cmd),
                Err(e) => warn!("Failed to parse tap: {}", e),
            }
        }
        taps
    };
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    };

    let result = serve(robot, &out, drain_taps, face_text, ctrl_c).await;
    info!("Runtime stopped");
    result
}

/// Publish until `shutdown` resolves or publishing fails, then shut the robot
/// down either way.
async fn serve<O, T, S>(
    robot: Robot,
    out: &O,
    drain_taps: T,
    face_text: UnboundedReceiver<String>,
    shutdown: S,
) -> Result<(), BoxError>
where
    O: TelemetryOut,
    T: FnMut() -> Vec<TapCommand>,
    S: Future<Output = ()>,
{
    let result = publish_loop(&robot, out, drain_taps, face_text, shutdown).await;
    if let Err(e) = &result {
        warn!("Telemetry loop failed, shutting down: {}", e);
    }
    robot.shutdown().await;
    result
}

async fn publish_loop<O, T, S>(
    robot: &Robot,
    out: &O,
    mut drain_taps: T,
    mut face_text: UnboundedReceiver<String>,
    shutdown: S,
) -> Result<(), BoxError>
where
    O: TelemetryOut,
    T: FnMut() -> Vec<TapCommand>,
    S: Future<Output = ()>,
{
    let mut tick = interval(Duration::from_millis(1000 / TELEMETRY_HZ));
    let mut health = RuntimeHealth::Ok;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = tick.tick() => {}
        }

        // 1. Feed taps to the sensor
        for cmd in drain_taps() {
            robot.inject_tap(cmd.status);
        }

        // 2. Forward face text
        while let Ok(text) = face_text.try_recv() {
            out.put(Outlet::Face, text).await?;
        }

        // 3. Publish joint telemetry
        let telemetry_json = serde_json::to_string(&robot.telemetry())?;
        out.put(Outlet::Joints, telemetry_json).await?;

        // 4. Publish health
        let current = robot.health();
        if current != health {
            match current {
                RuntimeHealth::ActuatorFault => warn!("Actuator fault reported"),
                RuntimeHealth::Ok => info!("Actuators healthy again"),
            }
            health = current;
        }
        let health_json = serde_json::to_string(&health)?;
        out.put(Outlet::Health, health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionPhase, Iterations};
    use crate::config::{ACTUATOR_FAULT_THRESHOLD, JOINT_UPDATE_RATE};
    use crate::face::LogFace;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingOut {
        fail: bool,
        sent: Mutex<Vec<(Outlet, String)>>,
    }

    impl TelemetryOut for RecordingOut {
        async fn put(&self, outlet: Outlet, payload: String) -> Result<(), BoxError> {
            if self.fail {
                return Err("link down".into());
            }
            self.sent.lock().push((outlet, payload));
            Ok(())
        }
    }

    fn at_rest(legs: &Legs) -> bool {
        legs.all().joints().iter().all(|j| j.angle() == 0.0 && !j.is_busy())
    }

    fn options(name: &str) -> RuntimeOptions {
        RuntimeOptions {
            simulate: true,
            calibration: std::env::temp_dir().join(format!("{}-{}.json", name, std::process::id())),
            walk_steps: 2,
            ..RuntimeOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_left_tap_walks_right_tap_stops() {
        let robot = Robot::start(&options("no-offsets"), Arc::new(LogFace)).unwrap();
        assert_eq!(robot.health(), RuntimeHealth::Ok);
        assert!(robot.gestures().is_bound(TapFace::Left));

        robot.inject_tap(TapFace::Left.status_code().unwrap());
        sleep(Duration::from_millis(120)).await;
        assert!(robot.walk().is_active());
        assert_eq!(robot.gestures().last_tap(), TapFace::Left);

        robot.inject_tap(TapFace::Right.status_code().unwrap());
        sleep(Duration::from_millis(120)).await;
        assert!(!robot.walk().is_running());

        robot.walk().wait_idle().await;
        let telemetry = robot.telemetry();
        assert_eq!(telemetry.walk_phase, "idle");
        assert_eq!(telemetry.joints.len(), 4);
        assert!(telemetry.joints.iter().all(|j| j.angle == 0.0 && !j.busy));

        robot.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_runs_configured_steps() {
        let robot = Robot::start(&options("steps"), Arc::new(LogFace)).unwrap();
        robot.inject_tap(TapFace::Left.status_code().unwrap());
        sleep(Duration::from_millis(120)).await;

        let mut phase = robot.walk().subscribe();
        phase.wait_for(|p| *p == ActionPhase::Exiting).await.unwrap();
        robot.walk().wait_idle().await;
        assert_eq!(robot.walk().remaining(), crate::action::Iterations::Finite(0));

        robot.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_offsets_are_applied() {
        let options = options("applied-offsets");
        std::fs::write(&options.calibration, r#"{"left_leg": -3.0, "right_foot": 2.5}"#).unwrap();

        let robot = Robot::start(&options, Arc::new(LogFace)).unwrap();
        assert_eq!(robot.legs().joint(Limb::LeftLeg).offset(), -3.0);
        assert_eq!(robot.legs().joint(Limb::RightFoot).offset(), 2.5);
        assert_eq!(robot.legs().joint(Limb::LeftFoot).offset(), 0.0);

        robot.shutdown().await;
        std::fs::remove_file(&options.calibration).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_calibration_falls_back_to_zero() {
        let options = options("broken-offsets");
        std::fs::write(&options.calibration, "{").unwrap();

        let robot = Robot::start(&options, Arc::new(LogFace)).unwrap();
        assert!(robot.legs().all().joints().iter().all(|j| j.offset() == 0.0));

        robot.shutdown().await;
        std::fs::remove_file(&options.calibration).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tap_does_nothing() {
        let robot = Robot::start(&options("unknown-tap"), Arc::new(LogFace)).unwrap();
        robot.inject_tap(0b1111_1111);
        sleep(Duration::from_millis(120)).await;
        assert!(!robot.walk().is_active());
        assert_eq!(robot.gestures().last_tap(), TapFace::None);
        robot.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_still_finishes_walk() {
        let robot = Robot::start(&options("publish-failure"), Arc::new(LogFace)).unwrap();
        let legs = robot.legs().clone();
        let walk = robot.walk().clone();
        walk.begin(Iterations::Infinite);

        let (_face, face_text) = ChannelFace::new();
        let out = RecordingOut {
            fail: true,
            ..RecordingOut::default()
        };
        let result = serve(robot, &out, Vec::new, face_text, std::future::pending()).await;

        assert!(result.is_err());
        assert!(!walk.is_active());
        assert!(at_rest(&legs));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_publishes_until_shutdown() {
        let (face, face_text) = ChannelFace::new();
        let robot = Robot::start(&options("serve"), Arc::new(face)).unwrap();
        let walk = robot.walk().clone();

        let mut taps = vec![TapCommand {
            status: TapFace::Left.status_code().unwrap(),
        }];
        let out = RecordingOut::default();
        let result = serve(
            robot,
            &out,
            move || std::mem::take(&mut taps),
            face_text,
            sleep(Duration::from_millis(350)),
        )
        .await;

        assert!(result.is_ok());
        assert!(!walk.is_active());
        let sent = out.sent.lock();
        assert!(sent.contains(&(Outlet::Face, "walk".to_string())));
        assert!(sent.contains(&(Outlet::Health, "\"ok\"".to_string())));
        let joints: RobotTelemetry = sent
            .iter()
            .find(|(outlet, _)| *outlet == Outlet::Joints)
            .map(|(_, json)| serde_json::from_str(json).unwrap())
            .unwrap();
        assert_eq!(joints.joints.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_servo_flips_health_until_it_recovers() {
        let servos = Limb::ALL.map(|limb| SimulatedServo::new(limb.name()));
        let flaky = servos[Limb::LeftLeg as usize].clone();
        let actuators = Limb::ALL.map(|limb| {
            let servo: Box<dyn ActuatorDriver> = Box::new(servos[limb as usize].clone());
            (limb, servo)
        });
        let robot = Robot::assemble(&options("health"), None, actuators, Arc::new(LogFace));
        sleep(JOINT_UPDATE_RATE * 2).await;
        assert_eq!(robot.health(), RuntimeHealth::Ok);

        flaky.set_unreachable(true);
        sleep(JOINT_UPDATE_RATE * (ACTUATOR_FAULT_THRESHOLD + 1)).await;
        assert_eq!(robot.health(), RuntimeHealth::ActuatorFault);
        let left_leg = robot
            .telemetry()
            .joints
            .into_iter()
            .find(|j| j.name == "left_leg")
            .unwrap();
        assert!(left_leg.write_failures >= ACTUATOR_FAULT_THRESHOLD);

        flaky.set_unreachable(false);
        sleep(JOINT_UPDATE_RATE * 2).await;
        assert_eq!(robot.health(), RuntimeHealth::Ok);

        robot.shutdown().await;
    }
}
