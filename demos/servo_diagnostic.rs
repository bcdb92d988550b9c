// Servo diagnostic: READ-ONLY check of the leg servos
//
// Nothing is written to the servos, so the robot will not move.
//
// Usage: cargo run --example servo_diagnostic -- [port]
// Example: cargo run --example servo_diagnostic -- /dev/ttyUSB0

use biped_motion_runtime::actuator::feetech::{FeetechBus, Register, position_to_degrees};
use biped_motion_runtime::config::{MECHANICAL_ZERO, SERVO_PORT};
use biped_motion_runtime::gait::Limb;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let port = std::env::args().nth(1).unwrap_or_else(|| SERVO_PORT.to_string());

    println!("Leg servo diagnostic (read-only)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&port) {
        Ok(bus) => bus,
        Err(e) => {
            println!("  Failed to open serial port: {}", e);
            println!("  Check the port path, the USB cable and the servo power supply");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging servos...");
    let mut responding = Vec::new();
    for limb in Limb::ALL {
        let id = limb.servo_id();
        match bus.ping(id) {
            Ok(true) => {
                println!("  {:<10} (ID {}): responding", limb.name(), id);
                responding.push(limb);
            }
            Ok(false) => println!("  {:<10} (ID {}): NO RESPONSE", limb.name(), id),
            Err(e) => println!("  {:<10} (ID {}): ERROR {}", limb.name(), id, e),
        }
    }
    println!();

    println!("Step 3: Reading registers...");
    for limb in responding {
        let id = limb.servo_id();
        println!("  === {} (ID {}) ===", limb.name(), id);

        match bus.read_u8(id, Register::OperatingMode) {
            Ok(0) => println!("    Operating mode: 0 (position)"),
            Ok(mode) => println!("    Operating mode: {} (runtime will switch it to position)", mode),
            Err(e) => println!("    Operating mode: ERROR {}", e),
        }

        match bus.read_u8(id, Register::TorqueEnable) {
            Ok(val) => println!("    Torque enable:  {}", val),
            Err(e) => println!("    Torque enable:  ERROR {}", e),
        }

        match bus.get_position(id) {
            Ok(pos) => {
                let joint_angle = position_to_degrees(pos) - MECHANICAL_ZERO;
                println!("    Position:       {} (joint angle {:.1}°)", pos, joint_angle);
            }
            Err(e) => println!("    Position:       ERROR {}", e),
        }

        match bus.is_moving(id) {
            Ok(moving) => println!("    Moving:         {}", moving),
            Err(e) => println!("    Moving:         ERROR {}", e),
        }
        println!();
    }

    println!("Next step: cargo run --example servo_sweep -- {}", port);
    Ok(())
}
