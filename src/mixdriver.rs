//! Mix driver: fills double-buffered output, polling the sequencer and
//! advancing the song clock.

use tracing::debug;

use crate::channel::ChannelEngine;
use crate::lut::VolumeLut;
use crate::sample::SampleStore;
use crate::sequencer::{Sequencer, TransportState};
use crate::sink::AudioSink;

/// How many double-buffers fit in one second of output. 2 is clean but
/// laggy; 3-5 trade latency for CPU headroom.
pub const BUFFERS_PER_SECOND: u32 = 2;

/// Free-running diagnostic counters, surfaced via `tracing` rather than the
/// original's `OutputDebugString`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixDriverStats {
    pub polls: u64,
    pub idle_polls: u64,
    pub writes: u64,
}

#[derive(Debug)]
pub struct MixDriver {
    mix_rate: u32,
    stereo: bool,
    buffer_size: usize,
    buffers: [Vec<u8>; 2],
    toggle: usize,
    song_counter: u64,
    stats: MixDriverStats,
}

impl MixDriver {
    pub fn new(mix_rate: u32, stereo: bool) -> Self {
        let bytes_per_frame = if stereo { 2 } else { 1 };
        let bytes_per_second = mix_rate as usize * bytes_per_frame;
        let raw_size = bytes_per_second / BUFFERS_PER_SECOND as usize;
        let buffer_size = raw_size - (raw_size % 4);

        MixDriver {
            mix_rate,
            stereo,
            buffer_size,
            buffers: [vec![127u8; buffer_size], vec![127u8; buffer_size]],
            toggle: 0,
            song_counter: 0,
            stats: MixDriverStats::default(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn song_counter(&self) -> u64 {
        self.song_counter
    }

    pub fn stats(&self) -> MixDriverStats {
        self.stats
    }

    /// Called by the periodic timer (or directly, under the engine's lock).
    ///
    /// Replaces the reference design's process-wide busy flag: callers are
    /// expected to already hold the engine-wide lock, which serializes
    /// concurrent timer/foreground invocations instead of rejecting the
    /// second one outright.
    pub fn poll(
        &mut self,
        sequencer: &mut Sequencer,
        channels: &mut ChannelEngine,
        store: &SampleStore,
        luts: &VolumeLut,
        sink: &mut dyn AudioSink,
    ) {
        if !sink.is_drained() {
            self.stats.idle_polls += 1;
            return;
        }
        self.stats.polls += 1;

        self.fill_buffer(sequencer, channels, store, luts);
        sink.submit(&self.buffers[self.toggle]);
        self.stats.writes += 1;
        self.toggle = (self.toggle + 1) % 2;

        self.advance_clock(sequencer, channels);
    }

    fn frame_count(&self) -> usize {
        let bytes_per_frame = if self.stereo { 2 } else { 1 };
        self.buffer_size / bytes_per_frame
    }

    fn fill_buffer(
        &mut self,
        sequencer: &mut Sequencer,
        channels: &mut ChannelEngine,
        store: &SampleStore,
        luts: &VolumeLut,
    ) {
        let bytes_per_frame = if self.stereo { 2 } else { 1 };
        let frames = self.frame_count();
        let poll_interval = (self.mix_rate as usize / 64).max(1);

        let buf = &mut self.buffers[self.toggle];
        let mut frame = 0;
        while frame < frames {
            sequencer.poll(self.song_counter + frame as u64, channels, store);

            let chunk_frames = poll_interval.min(frames - frame);
            let start = frame * bytes_per_frame;
            let end = (frame + chunk_frames) * bytes_per_frame;
            channels.fill_buffer(&mut buf[start..end], self.stereo, luts, store);

            frame += chunk_frames;
        }
    }

    fn advance_clock(&mut self, sequencer: &mut Sequencer, channels: &mut ChannelEngine) {
        let frames = self.frame_count() as u64;
        match sequencer.state() {
            TransportState::Playing => {
                self.song_counter += frames;
            }
            TransportState::FastForwarding => {
                self.song_counter += frames * 4;
            }
            TransportState::Rewinding => {
                let step = frames * 4;
                if self.song_counter > step {
                    self.song_counter -= step;
                    let new_pos = sequencer.song_pos().saturating_sub(step);
                    sequencer.set_song_pos(new_pos);
                } else {
                    debug!("rewind underflowed past song start, stopping");
                    self.song_counter = 0;
                    sequencer.rewind_underflow(channels);
                }
            }
            TransportState::Stopped | TransportState::Paused | TransportState::NoSongLoaded => {}
        }
    }
}
