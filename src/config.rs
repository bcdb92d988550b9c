// Periods, speeds, servo wiring, topics
use std::time::Duration;

// Joint control loop period (50 Hz, same as the servo PWM frame)
pub const JOINT_UPDATE_RATE: Duration = Duration::from_millis(20);

// Gesture status polling period
pub const GESTURE_POLL_RATE: Duration = Duration::from_millis(50);

// Telemetry publishing frequency
pub const TELEMETRY_HZ: u64 = 10;

// Default joint base speed in deg/s. This is only an upper bound: a slow servo
// simply lags behind the commanded ramp.
pub const DEFAULT_BASE_SPEED: f32 = 300.0;

// Mechanical range of every joint (degrees around the servo mid point)
pub const JOINT_MIN_ANGLE: f32 = -90.0;
pub const JOINT_MAX_ANGLE: f32 = 90.0;

// Servo mid point: a joint angle of 0 is written as 90 to the servo
pub const MECHANICAL_ZERO: f32 = 90.0;

// Nudge size for step_angle
pub const STEP_ANGLE: f32 = 2.0;

// Normalised inputs below this magnitude are ignored by follow_input
pub const INPUT_DEAD_BAND: f32 = 0.02;

// Consecutive actuator write failures before a joint is reported as faulted
pub const ACTUATOR_FAULT_THRESHOLD: u32 = 25;

// Number of walk cycles started by a left double tap
pub const WALK_STEPS: u64 = 5;

// Zenoh topics
pub const TOPIC_GESTURE_TAP: &str = "robot/gesture/tap"; // simulated sensor input
pub const TOPIC_JOINTS: &str = "robot/state/joints"; // joint telemetry
pub const TOPIC_HEALTH: &str = "robot/state/health"; // health status
pub const TOPIC_FACE_TEXT: &str = "robot/face/text"; // face display text

// Serial port for the Feetech servo bus
pub const SERVO_PORT: &str = "/dev/ttyUSB0";

// Servo IDs on the bus
pub const SERVO_ID_LEFT_FOOT: u8 = 1;
pub const SERVO_ID_LEFT_LEG: u8 = 2;
pub const SERVO_ID_RIGHT_FOOT: u8 = 3;
pub const SERVO_ID_RIGHT_LEG: u8 = 4;

// Pending writes the bus worker may queue before writes are rejected
pub const SERVO_QUEUE_DEPTH: usize = 32;

// Persisted joint offsets
pub const CALIBRATION_PATH: &str = "joint_offsets.json";
