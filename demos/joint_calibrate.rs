// Joint calibration: jog each leg joint and save its zero offset
//
// 1-4 select joint (left foot, left leg, right foot, right leg)
// Up/Down  shift the calibration offset by 0.5°
// Left/Right  step the joint by 2°
// Z/X/C  jump to -90° / 0° / +90° at the jog speed
// R/F  jog speed up/down
// H home, S save offsets, Q quit
//
// Usage: cargo run --example joint_calibrate -- [--simulate] [--port PORT] [--calibration FILE]

use std::path::PathBuf;
use std::sync::Arc;

use biped_motion_runtime::config::{CALIBRATION_PATH, SERVO_PORT};
use biped_motion_runtime::face::LogFace;
use biped_motion_runtime::gait::Limb;
use biped_motion_runtime::joint::calibration::save_offsets;
use biped_motion_runtime::joint::{Direction, JsonCalibrationStore};
use biped_motion_runtime::runtime::{Robot, RuntimeOptions};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const OFFSET_STEP: f32 = 0.5; // degrees
const JOG_SPEEDS: [f32; 3] = [30.0, 90.0, 180.0]; // deg/s

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value = SERVO_PORT)]
    port: String,

    #[arg(long)]
    simulate: bool,

    #[arg(long, default_value = CALIBRATION_PATH)]
    calibration: PathBuf,
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
        calibration: args.calibration,
        ..RuntimeOptions::default()
    };
    let robot = Robot::start(&options, Arc::new(LogFace))?;

    info!("Keys: 1-4 joint, Up/Down offset, Left/Right step, Z/X/C range, R/F speed, H home, S save, Q quit");

    enable_raw_mode()?;
    let result = run_keys(&robot, &options).await;
    disable_raw_mode()?;

    robot.shutdown().await;
    result
}

async fn run_keys(robot: &Robot, options: &RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let legs = robot.legs();
    let mut limb = Limb::LeftFoot;
    let mut speed_idx = 0;

    loop {
        // Keep the key poll off the runtime threads the joints tick on
        let key = tokio::task::spawn_blocking(|| -> std::io::Result<Option<KeyEvent>> {
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    return Ok(Some(key));
                }
            }
            Ok(None)
        })
        .await??;

        let Some(KeyEvent { code, kind, .. }) = key else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        let joint = legs.joint(limb);
        match code {
            KeyCode::Char(c @ '1'..='4') => {
                limb = Limb::ALL[c as usize - '1' as usize];
                info!("Selected {}", limb.name());
            }
            KeyCode::Up => info!("{} offset {:.1}°", limb.name(), joint.adjust_offset(OFFSET_STEP)),
            KeyCode::Down => info!("{} offset {:.1}°", limb.name(), joint.adjust_offset(-OFFSET_STEP)),
            KeyCode::Right => joint.step_angle(Direction::Positive),
            KeyCode::Left => joint.step_angle(Direction::Negative),
            KeyCode::Char(c @ ('z' | 'x' | 'c')) => {
                let input = match c {
                    'z' => -1.0,
                    'x' => 0.0,
                    _ => 1.0,
                };
                legs.all().set_speed(JOG_SPEEDS[speed_idx]);
                joint.follow_input(input);
            }
            KeyCode::Char('r') => {
                speed_idx = (speed_idx + 1).min(JOG_SPEEDS.len() - 1);
                info!("Jog speed {:.0} deg/s", JOG_SPEEDS[speed_idx]);
            }
            KeyCode::Char('f') => {
                speed_idx = speed_idx.saturating_sub(1);
                info!("Jog speed {:.0} deg/s", JOG_SPEEDS[speed_idx]);
            }
            KeyCode::Char('h') => legs.all().home(),
            KeyCode::Char('s') => {
                let mut store = JsonCalibrationStore::open(&options.calibration)?;
                save_offsets(&mut store, legs.all().joints())?;
                info!("Offsets saved to {}", store.path().display());
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => {}
        }
    }

    Ok(())
}
