// Define message types crossing the zenoh boundary

use serde::{Deserialize, Serialize};

// Simulated sensor input -> runtime
// Carries the raw tap status code the accelerometer would have latched
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TapCommand {
    pub status: u8,
}

// Per-joint state published by the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JointTelemetry {
    pub name: String,
    pub angle: f32,
    pub target: f32,
    pub speed: f32,
    pub busy: bool,
    pub write_failures: u32,
}

// Snapshot of every joint plus the walk action phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotTelemetry {
    pub joints: Vec<JointTelemetry>,
    pub walk_phase: String,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    ActuatorFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_command_parses() {
        let cmd: TapCommand = serde_json::from_str(r#"{"status":16}"#).unwrap();
        assert_eq!(cmd.status, 0b0001_0000);
    }

    #[test]
    fn test_health_is_snake_case() {
        let json = serde_json::to_string(&RuntimeHealth::ActuatorFault).unwrap();
        assert_eq!(json, "\"actuator_fault\"");
    }
}
