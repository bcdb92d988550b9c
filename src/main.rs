use std::path::PathBuf;

use biped_motion_runtime::config::{CALIBRATION_PATH, DEFAULT_BASE_SPEED, SERVO_PORT, WALK_STEPS};
use biped_motion_runtime::runtime::{self, RuntimeOptions};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Two-legged robot motion runtime
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the servo bus
    #[arg(long, default_value = SERVO_PORT)]
    port: String,

    /// Run without hardware, servos are simulated
    #[arg(long)]
    simulate: bool,

    /// Joint offset file
    #[arg(long, default_value = CALIBRATION_PATH)]
    calibration: PathBuf,

    /// Joint base speed in deg/s
    #[arg(long, default_value_t = DEFAULT_BASE_SPEED)]
    base_speed: f32,

    /// Walk cycles started by a left double tap
    #[arg(long, default_value_t = WALK_STEPS)]
    walk_steps: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let options = RuntimeOptions {
        port: args.port,
        simulate: args.simulate,
        calibration: args.calibration,
        base_speed: args.base_speed,
        walk_steps: args.walk_steps,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
