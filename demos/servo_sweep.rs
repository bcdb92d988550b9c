// Servo sweep: swing the left or right leg end to end
//
// Usage: cargo run --example servo_sweep -- [--simulate] [--side left|right] [--cycles N] [--port PORT]
//
// Keep the robot lifted: the joints travel the full -90..90 range.

use std::sync::Arc;

use biped_motion_runtime::action::Action;
use biped_motion_runtime::config::SERVO_PORT;
use biped_motion_runtime::face::LogFace;
use biped_motion_runtime::gait::Sweep;
use biped_motion_runtime::runtime::{Robot, RuntimeOptions};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Side {
    Left,
    Right,
    Both,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value = SERVO_PORT)]
    port: String,

    #[arg(long)]
    simulate: bool,

    #[arg(long, value_enum, default_value_t = Side::Left)]
    side: Side,

    #[arg(long, default_value_t = 2)]
    cycles: u64,

    /// Percent of base speed
    #[arg(long, default_value_t = 30)]
    speed: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let options = RuntimeOptions {
        port: args.port,
        simulate: args.simulate,
        ..RuntimeOptions::default()
    };
    let robot = Robot::start(&options, Arc::new(LogFace))?;

    let group = match args.side {
        Side::Left => robot.legs().left().clone(),
        Side::Right => robot.legs().right().clone(),
        Side::Both => robot.legs().all().clone(),
    };
    info!("Sweeping {} leg, {} cycles at {}%", group.name(), args.cycles, args.speed);

    let sweep = Action::new("sweep", Sweep::new(group, args.speed));
    sweep.begin(args.cycles);

    tokio::select! {
        _ = sweep.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, returning to zero");
            sweep.stop();
            sweep.wait_idle().await;
        }
    }

    for joint in robot.legs().all().joints() {
        info!("{}: {:.1}°", joint.name(), joint.angle());
    }
    robot.shutdown().await;
    Ok(())
}
