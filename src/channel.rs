//! Channel engine: a fixed pool of polyphonic voices, resampled and mixed
//! into a stereo or mono output buffer.

use tracing::{debug, warn};

use crate::lut::VolumeLut;
use crate::sample::{SampleStore, IDLE};

/// Total voice pool size.
pub const MAX_CHANNELS: usize = 12;
/// Number of channels reserved for music (the upper 8 of the pool).
pub const MUSIC_CHANNELS: usize = 8;
/// Number of channels reserved for sound effects (the lower 4 of the pool).
pub const FX_CHANNELS: usize = MAX_CHANNELS - MUSIC_CHANNELS;
/// Index of the first music channel; channel `MUSIC_FIRST + c` is music
/// channel `c` for `c` in 0..8.
pub const MUSIC_FIRST: usize = FX_CHANNELS;

/// Volume values `>= MAX_VOLUME` are out of range; `0xFFFE`/`0xFFFF` are an
/// explicit unsigned-wrap guard that maps to silence.
pub const MAX_VOLUME: u16 = 16;

/// Per-voice playback state.
#[derive(Debug, Clone, Copy)]
struct Voice {
    /// Currently playing sample handle, or `IDLE` if silent.
    sample: usize,
    /// Current position, in virtual (output-rate) sample units.
    virtual_offset: u64,
    /// Output-sample count needed to play the full sample at current pitch.
    virtual_size: u64,
    /// Pan position, 0 (full left) to 15 (full right).
    pan: u8,
    /// Volume-LUT row, 0..15.
    volume: u8,
}

impl Default for Voice {
    fn default() -> Self {
        Voice {
            sample: IDLE,
            virtual_offset: 0,
            virtual_size: 0,
            pan: 8,
            volume: 15,
        }
    }
}

impl Voice {
    fn is_busy(&self) -> bool {
        self.sample != IDLE && self.virtual_size >= 1
    }
}

/// Fixed-size voice pool and mixer.
#[derive(Debug)]
pub struct ChannelEngine {
    voices: [Voice; MAX_CHANNELS],
    mix_rate: u32,
}

impl ChannelEngine {
    pub fn new(mix_rate: u32) -> Self {
        ChannelEngine {
            voices: [Voice::default(); MAX_CHANNELS],
            mix_rate,
        }
    }

    pub fn mix_rate(&self) -> u32 {
        self.mix_rate
    }

    fn voice(&mut self, ch: usize) -> Option<&mut Voice> {
        self.voices.get_mut(ch)
    }

    pub fn pan_set(&mut self, ch: usize, pan: u8) {
        if pan > 15 {
            warn!(ch, pan, "pan out of range, ignoring");
            return;
        }
        if let Some(v) = self.voice(ch) {
            v.pan = pan;
        }
    }

    pub fn pan_get(&self, ch: usize) -> Option<u8> {
        self.voices.get(ch).map(|v| v.pan)
    }

    /// Set playback volume. Clamps to `MAX_VOLUME - 1`; values `>= 0xFFFE`
    /// are treated as an unsigned wraparound and mapped to 0.
    pub fn volume(&mut self, ch: usize, v: u16) {
        let v = if v >= 0xFFFE {
            0
        } else {
            v.min(MAX_VOLUME - 1)
        };
        if let Some(voice) = self.voice(ch) {
            voice.volume = v as u8;
        }
    }

    pub fn stop(&mut self, ch: usize) {
        if let Some(v) = self.voice(ch) {
            v.sample = IDLE;
        }
    }

    pub fn is_busy(&self, ch: usize) -> bool {
        self.voices.get(ch).map(Voice::is_busy).unwrap_or(false)
    }

    /// Start playback of `sample_handle` on `ch` at the given `pitch` (Hz).
    ///
    /// Virtual size is computed by two successive rescalings: first to the
    /// output rate, then by the requested pitch relative to the sample's
    /// recorded rate. If the result is below 1, the voice is left/set IDLE
    /// (the note is too short to be audible).
    pub fn play(&mut self, ch: usize, sample_handle: usize, pitch: u32, store: &SampleStore) {
        let sample = match store.get(sample_handle) {
            Some(s) => s,
            None => {
                warn!(ch, sample_handle, "play on unknown sample, silencing voice");
                self.stop(ch);
                return;
            }
        };
        if pitch == 0 {
            self.stop(ch);
            return;
        }

        let size = sample.size() as u64;
        let rate_scaled = (size * self.mix_rate as u64) / sample.rate().max(1) as u64;
        let virtual_size = (rate_scaled * pitch as u64) / sample.rate().max(1) as u64;

        let voice = match self.voice(ch) {
            Some(v) => v,
            None => {
                warn!(ch, "play on out-of-range channel");
                return;
            }
        };

        if virtual_size < 1 {
            debug!(ch, "note too short to be audible, silencing voice");
            voice.sample = IDLE;
            return;
        }

        voice.sample = sample_handle;
        voice.virtual_size = virtual_size;
        voice.virtual_offset = 0;
    }

    /// Mix `frames` output frames (each 1 byte mono, 2 bytes stereo) into
    /// `out`, starting at byte offset 0. `out.len()` must be `frames *
    /// bytes_per_frame`.
    pub fn fill_buffer(&mut self, out: &mut [u8], stereo: bool, luts: &VolumeLut, store: &SampleStore) {
        let bytes_per_frame = if stereo { 2 } else { 1 };
        let frames = out.len() / bytes_per_frame;

        for frame in 0..frames {
            let (mut l, mut r) = (0i32, 0i32);

            for (ch_idx, voice) in self.voices.iter_mut().enumerate() {
                if voice.sample == IDLE || voice.virtual_size < 1 {
                    continue;
                }
                let sample = match store.get(voice.sample) {
                    Some(s) => s,
                    None => {
                        warn!(ch_idx, "voice references a freed sample, silencing");
                        voice.sample = IDLE;
                        continue;
                    }
                };

                let size = sample.size() as u64;
                let loop_start = sample.loop_start() as u64;
                let loop_len = sample.loop_len() as u64;

                let off = (voice.virtual_offset * size) / voice.virtual_size;

                let past_end = off >= size;
                let past_loop = loop_len > 0 && off >= loop_start + loop_len;
                if past_end || past_loop {
                    if loop_len > 2 {
                        voice.virtual_offset = loop_start;
                        continue;
                    } else {
                        voice.sample = IDLE;
                        continue;
                    }
                }

                let x = (sample.data()[off as usize] as i32 + 128) as usize;
                let s = luts.get(voice.volume as usize, x);

                if stereo {
                    let biased = (s as i32 + 128) as usize;
                    l += luts.row(15 - voice.pan as usize)[biased] as i32;
                    r += luts.row(voice.pan as usize)[biased] as i32;
                } else {
                    l += s as i32;
                }

                voice.virtual_offset += 1;
            }

            if stereo {
                let l = ((l >> 2) + 127) as u8;
                let r = ((r >> 2) + 127) as u8;
                out[frame * 2] = l;
                out[frame * 2 + 1] = r;
            } else {
                let l = ((l >> 2) + 127) as u8;
                out[frame] = l;
            }
        }
    }
}
