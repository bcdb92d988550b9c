// Face display output
//
// Text output is fire-and-forget: a behavior must never wait on the display.

use tokio::sync::mpsc;
use tracing::{debug, info};

pub trait FaceDisplay: Send + Sync {
    fn display_text(&self, text: &str);
}

/// Logs face text; used when nothing renders it
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFace;

impl FaceDisplay for LogFace {
    fn display_text(&self, text: &str) {
        info!("Face: {}", text);
    }
}

/// Forwards face text to a channel (drained by the runtime's publisher)
#[derive(Debug, Clone)]
pub struct ChannelFace {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelFace {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FaceDisplay for ChannelFace {
    fn display_text(&self, text: &str) {
        if self.tx.send(text.to_string()).is_err() {
            debug!("Face output closed, dropping {:?}", text);
        }
    }
}
