// Keyboard tap publisher: stands in for the accelerometer's double taps
//
// L = left (start walking), R = right (stop walking),
// T/B/F/K = top/bottom/front/back, Q quit

use biped_motion_runtime::config::TOPIC_GESTURE_TAP;
use biped_motion_runtime::gesture::TapFace;
use biped_motion_runtime::messages::TapCommand;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_GESTURE_TAP).await?;

    info!("Controls: L=left, R=right, T=top, B=bottom, F=front, K=back, Q=quit");

    enable_raw_mode()?;
    let result = run_keys(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_keys(publisher: &zenoh::pubsub::Publisher<'_>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let face = match code {
            KeyCode::Char('l') => TapFace::Left,
            KeyCode::Char('r') => TapFace::Right,
            KeyCode::Char('t') => TapFace::Top,
            KeyCode::Char('b') => TapFace::Bottom,
            KeyCode::Char('f') => TapFace::Front,
            KeyCode::Char('k') => TapFace::Back,
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        if let Some(status) = face.status_code() {
            let cmd = TapCommand { status };
            publisher.put(serde_json::to_string(&cmd)?).await?;
            info!("Tap {:?} (0b{:08b})", face, status);
        }
    }

    Ok(())
}
