//! Sliding-window replay protection for data records.

use crate::constants::REPLAY_WINDOW_SIZE;
use crate::error::{Error, Result};

/// Tracks the highest accepted sequence number and a 64-bit bitmap over the
/// window `[high_seq - 63, high_seq]`. Anything older than the window or
/// already marked is a replay.
#[derive(Debug)]
pub struct ReplayWindow {
    high_seq: u64,
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        ReplayWindow {
            high_seq: 0,
            bitmap: 0,
        }
    }

    /// Reinstall the empty window. Called when traffic keys activate.
    pub fn reset(&mut self) {
        self.high_seq = 0;
        self.bitmap = 0;
    }

    pub fn high_seq(&self) -> u64 {
        self.high_seq
    }

    /// Would `seq` be accepted right now? Does not mark it as seen.
    pub fn check(&self, seq: u64) -> Result<()> {
        if seq > self.high_seq {
            return Ok(());
        }
        let offset = self.high_seq - seq;
        if offset >= REPLAY_WINDOW_SIZE || self.bitmap & (1u64 << offset) != 0 {
            return Err(Error::ReplayDetected);
        }
        Ok(())
    }

    /// Accept `seq`, marking it seen and advancing the window as needed.
    pub fn check_and_update(&mut self, seq: u64) -> Result<()> {
        if seq > self.high_seq {
            let shift = seq - self.high_seq;
            self.bitmap = if shift >= REPLAY_WINDOW_SIZE {
                0
            } else {
                self.bitmap << shift
            };
            self.bitmap |= 1;
            self.high_seq = seq;
            return Ok(());
        }

        let offset = self.high_seq - seq;
        if offset >= REPLAY_WINDOW_SIZE || self.bitmap & (1u64 << offset) != 0 {
            return Err(Error::ReplayDetected);
        }
        self.bitmap |= 1u64 << offset;
        Ok(())
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}
