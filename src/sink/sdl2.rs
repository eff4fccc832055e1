//! SDL2-backed audio sink, using the push-style `AudioQueue` API rather
//! than SDL2's pull-style `AudioCallback` (the teacher's own
//! `src/audio/sdl2.rs` uses the latter for its effects mixer, but the
//! engine's submit/DONE contract is a push/poll model).

use anyhow::anyhow;
use log::{debug, warn};
use sdl2::audio::{AudioQueue, AudioSpecDesired};

use crate::error::{EngineError, Result};
use crate::sink::{AudioFormat, AudioSink};

/// Bytes of queued-but-unplayed audio below which the sink is considered
/// drained and ready for the next buffer.
const DRAIN_THRESHOLD_BYTES: u32 = 0;

pub struct Sdl2Sink {
    sdl_audio: sdl2::AudioSubsystem,
    queue: Option<AudioQueue<u8>>,
}

impl Sdl2Sink {
    pub fn new(sdl_context: &sdl2::Sdl) -> anyhow::Result<Self> {
        let sdl_audio = sdl_context.audio().map_err(|s| anyhow!(s))?;
        Ok(Sdl2Sink {
            sdl_audio,
            queue: None,
        })
    }
}

impl AudioSink for Sdl2Sink {
    fn query_formats(&self) -> Vec<AudioFormat> {
        // SDL2 will resample/convert on our behalf, but we still prefer to
        // open at a rate/channel-count the device reports support for
        // whenever it tells us; absent a capability query API, assume the
        // full preference list is worth attempting in order.
        crate::sink::FORMAT_PREFERENCE.to_vec()
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        let desired = AudioSpecDesired {
            freq: Some(format.rate as i32),
            channels: Some(if format.stereo { 2 } else { 1 }),
            samples: None,
        };

        let queue = self
            .sdl_audio
            .open_queue::<u8, _>(None, &desired)
            .map_err(|e| {
                warn!("failed to open SDL2 audio queue: {}", e);
                EngineError::OpenDevice
            })?;
        queue.resume();
        debug!(
            "opened SDL2 audio queue at {} Hz, stereo={}",
            format.rate, format.stereo
        );
        self.queue = Some(queue);
        Ok(())
    }

    fn submit(&mut self, buffer: &[u8]) {
        if let Some(queue) = &self.queue {
            if let Err(e) = queue.queue_audio(buffer) {
                warn!("failed to queue audio buffer: {}", e);
            }
        }
    }

    fn is_drained(&self) -> bool {
        match &self.queue {
            Some(queue) => queue.size() <= DRAIN_THRESHOLD_BYTES,
            None => true,
        }
    }

    fn reset(&mut self) {
        if let Some(queue) = &self.queue {
            queue.clear();
        }
    }

    fn close(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.pause();
        }
    }
}
