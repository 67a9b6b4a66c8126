//! Device driver seam

use tracing::trace;

use crate::dmx::channels::{DmxFrame, UNIVERSE_SIZE};
use crate::Result;

/// Anything that can put a universe on the wire.
///
/// The transport (USB, Art-Net, sACN) lives outside this crate; the
/// compositor only produces [`DmxFrame`]s.
pub trait DmxOutput: Send {
    /// Send one universe
    fn send(&mut self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Result<()>;

    /// Send every universe of a frame in ascending order
    fn send_frame(&mut self, frame: &DmxFrame) -> Result<()> {
        for (universe, data) in frame.iter() {
            self.send(universe, data)?;
        }
        Ok(())
    }
}

/// Output that keeps what it was sent, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    latest: DmxFrame,
    sends: u64,
    history: Vec<(u16, Box<[u8; UNIVERSE_SIZE]>)>,
    history_limit: usize,
}

impl RecordingOutput {
    /// Keep only the latest value per universe
    pub fn new() -> Self {
        Self::default()
    }

    /// Also keep the last `limit` sends in order
    pub fn with_history(limit: usize) -> Self {
        Self {
            history_limit: limit,
            ..Self::default()
        }
    }

    /// Latest data per universe
    pub fn latest(&self) -> &DmxFrame {
        &self.latest
    }

    /// Number of universe sends
    pub fn send_count(&self) -> u64 {
        self.sends
    }

    /// Recorded sends, oldest first
    pub fn history(&self) -> &[(u16, Box<[u8; UNIVERSE_SIZE]>)] {
        &self.history
    }
}

impl DmxOutput for RecordingOutput {
    fn send(&mut self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Result<()> {
        *self.latest.universe_mut(universe) = *data;
        self.sends += 1;
        if self.history_limit > 0 {
            if self.history.len() == self.history_limit {
                self.history.remove(0);
            }
            self.history.push((universe, Box::new(*data)));
        }
        trace!(universe, "Recorded DMX universe");
        Ok(())
    }
}
