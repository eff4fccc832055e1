//! Sample-clock-driven sequencer: walks a song's pattern order list and
//! dispatches note-on events and effects to the channel engine.

use tracing::debug;

use crate::channel::{ChannelEngine, MUSIC_CHANNELS, MUSIC_FIRST};
use crate::sample::SampleStore;
use crate::song::{Effect, Song};

/// A step index one past the current pattern's length, used as the
/// PATTERN_BREAK sentinel. It is deliberately `pattern.len()` rather than
/// some large fixed constant: the generic end-of-step advance below does
/// `istep += 1` unconditionally before testing `istep >= pattern.len()`, so
/// a fixed `usize::MAX` sentinel would overflow on that increment.
fn pattern_break_sentinel(pattern_len: usize) -> usize {
    pattern_len
}

/// Transport state machine, per the engine's play/stop/pause/rewind/
/// fast-forward commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    NoSongLoaded,
    Stopped,
    Playing,
    Paused,
    Rewinding,
    FastForwarding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Stop,
    Pause,
    Rewind,
    FastForward,
}

/// Snapshot of song position, as reported by `get_position`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SongPosition {
    pub ipattern: usize,
    pub istep: usize,
    pub iorder: usize,
    pub norder: usize,
    pub raw_samples: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunPos {
    iorder: usize,
    ipattern: usize,
    istep: usize,
    /// Sample-clock deadline of the next step to fire.
    song_pos: u64,
    /// Output samples between successive pattern steps.
    step_delay: u64,
}

/// Sample-clock-driven sequencer and transport state machine.
#[derive(Debug)]
pub struct Sequencer {
    song: Option<Song>,
    state: TransportState,
    pos: RunPos,
    mix_rate: u32,
    music_volume: u8,
}

impl Sequencer {
    pub fn new(mix_rate: u32) -> Self {
        Sequencer {
            song: None,
            state: TransportState::NoSongLoaded,
            pos: RunPos::default(),
            mix_rate,
            // (MAX_VOLUME * 3) / 4, per the original's `music_volume` default.
            music_volume: (crate::channel::MAX_VOLUME as u32 * 3 / 4) as u8,
        }
    }

    pub fn music_volume(&self) -> u8 {
        self.music_volume
    }

    pub fn set_music_volume(&mut self, v: u8) {
        self.music_volume = v.min(crate::channel::MAX_VOLUME as u8 - 1);
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    pub fn song_mut(&mut self) -> Option<&mut Song> {
        self.song.as_mut()
    }

    /// Install a freshly-built song and enter the STOPPED state.
    pub fn load_song(&mut self, song: Song) {
        self.song = Some(song);
        self.state = TransportState::Stopped;
        self.pos = RunPos::default();
    }

    /// Drop the current song, returning to NO_SONG_LOADED.
    pub fn flush(&mut self) {
        self.song = None;
        self.state = TransportState::NoSongLoaded;
        self.pos = RunPos::default();
    }

    pub fn get_position(&self, song_counter: u64) -> SongPosition {
        SongPosition {
            ipattern: self.pos.ipattern,
            istep: self.pos.istep,
            iorder: self.pos.iorder,
            norder: self.song.as_ref().map(Song::norder).unwrap_or(0),
            raw_samples: song_counter,
        }
    }

    /// Issue a transport command, per the state table of the sequencer's
    /// design: commands not listed for the current state are ignored.
    pub fn command(&mut self, cmd: TransportCommand, channels: &mut ChannelEngine) {
        if self.state == TransportState::NoSongLoaded {
            return;
        }
        match (self.state, cmd) {
            (TransportState::Stopped, TransportCommand::Play) => self.start_fresh(channels),
            (
                TransportState::Paused | TransportState::Rewinding | TransportState::FastForwarding,
                TransportCommand::Play,
            ) => {
                self.state = TransportState::Playing;
            }
            (TransportState::Playing, TransportCommand::Stop)
            | (TransportState::Paused, TransportCommand::Stop)
            | (TransportState::Rewinding, TransportCommand::Stop)
            | (TransportState::FastForwarding, TransportCommand::Stop) => {
                self.stop(channels);
            }
            (TransportState::Playing, TransportCommand::Pause) => {
                self.state = TransportState::Paused;
                for c in 0..MUSIC_CHANNELS {
                    channels.stop(MUSIC_FIRST + c);
                }
            }
            (TransportState::Playing, TransportCommand::Rewind)
            | (TransportState::Paused, TransportCommand::Rewind) => {
                self.state = TransportState::Rewinding;
            }
            (TransportState::Playing, TransportCommand::FastForward)
            | (TransportState::Paused, TransportCommand::FastForward) => {
                self.state = TransportState::FastForwarding;
            }
            _ => {
                // Not a valid transition from the current state; ignored.
            }
        }
    }

    fn stop(&mut self, channels: &mut ChannelEngine) {
        for c in 0..MUSIC_CHANNELS {
            channels.stop(MUSIC_FIRST + c);
        }
        self.state = TransportState::Stopped;
        self.pos = RunPos::default();
    }

    fn start_fresh(&mut self, channels: &mut ChannelEngine) {
        let Some(song) = &self.song else { return };
        for (c, &pan) in song.initial_pan.iter().enumerate() {
            channels.pan_set(MUSIC_FIRST + c, pan);
        }
        self.pos = RunPos {
            iorder: 0,
            ipattern: 0,
            istep: 0,
            song_pos: 0,
            step_delay: (self.mix_rate as u64 * 8) / 67,
        };
        self.state = TransportState::Playing;
    }

    /// Emit every step whose deadline is `< clock`. Idempotent: calling
    /// twice with the same clock value is a no-op the second time, since
    /// `song_pos` only ever advances past already-fired deadlines.
    pub fn poll(&mut self, clock: u64, channels: &mut ChannelEngine, store: &SampleStore) {
        if self.state != TransportState::Playing && self.state != TransportState::FastForwarding {
            return;
        }
        let Some(song) = &self.song else { return };
        let norder = song.norder();
        if norder == 0 {
            return;
        }

        while self.pos.song_pos < clock
            && self.state != TransportState::Stopped
            && self.state != TransportState::NoSongLoaded
        {
            let song = self.song.as_ref().expect("checked above");
            self.pos.ipattern = song.order(self.pos.iorder).unwrap_or(0);
            let pattern = match song.pattern(self.pos.ipattern) {
                Some(p) if !p.is_empty() => p,
                _ => break,
            };
            let step = match pattern.steps.get(self.pos.istep) {
                Some(s) => s.clone(),
                None => break,
            };

            let mut skip_generic_advance = false;
            let mut dobreak = false;

            for c in 0..MUSIC_CHANNELS {
                if dobreak {
                    break;
                }
                if step.pitch[c] != 0 {
                    let handle = song.sample_slot(step.sample_slot[c]);
                    channels.play(MUSIC_FIRST + c, handle, step.pitch[c], store);
                    channels.volume(MUSIC_FIRST + c, self.music_volume as u16);
                }

                match step.effect[c] {
                    Effect::PatternBreak => {
                        self.pos.istep = pattern_break_sentinel(pattern.len());
                        dobreak = true;
                    }
                    Effect::Jump(p) => {
                        self.pos.iorder = p as usize;
                        self.pos.istep = 0;
                        dobreak = true;
                        skip_generic_advance = true;
                    }
                    Effect::SetTempo(p) => {
                        if p != 0 {
                            self.pos.step_delay = (self.mix_rate as u64 * (1 + p as u64)) / 65;
                        }
                    }
                    Effect::SetVolume(p) => {
                        let v = (p as u32 * self.music_volume as u32) / 63;
                        channels.volume(MUSIC_FIRST + c, v as u16);
                    }
                    Effect::None => {}
                }
            }

            self.pos.song_pos += self.pos.step_delay;
            if !skip_generic_advance {
                self.pos.istep += 1;
                if self.pos.istep >= pattern.len() {
                    self.pos.iorder += 1;
                    self.pos.istep = 0;
                }
            }

            if self.pos.iorder >= norder {
                debug!("song reached end of order list, stopping");
                self.pos = RunPos::default();
                self.state = TransportState::Stopped;
                for c in 0..MUSIC_CHANNELS {
                    channels.stop(MUSIC_FIRST + c);
                }
            }
        }
    }

    /// Step positions, in REWINDING/FAST_FORWARDING, decrement/increment
    /// `song_pos` directly by the mix driver; on underflow past zero the
    /// sequencer transitions to STOPPED.
    pub fn rewind_underflow(&mut self, channels: &mut ChannelEngine) {
        self.stop(channels);
    }

    pub fn set_song_pos(&mut self, pos: u64) {
        self.pos.song_pos = pos;
    }

    pub fn song_pos(&self) -> u64 {
        self.pos.song_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelEngine;
    use crate::sample::SampleStore;
    use crate::song::{Effect, Song, Step};

    fn one_pattern_song(steps: Vec<Step>, norder: usize) -> Song {
        let mut song = Song::new(1, norder, 1);
        song.define_pattern(0, steps);
        for i in 0..norder {
            assert!(song.define_order(i, 0));
        }
        song
    }

    #[test]
    fn scenario_s1_single_shot_note_ends_song() {
        let mut store = SampleStore::new();
        let handle = store.add(&[0u8; 100], 0, 0, 8000, false).unwrap();
        let mut song = Song::new(1, 1, 1);
        song.define_sample(0, handle);
        let mut step = Step::default();
        step.pitch[0] = 428 * 18;
        step.sample_slot[0] = 0;
        song.define_pattern(0, vec![step]);
        song.define_order(0, 0);

        let mut seq = Sequencer::new(8000);
        seq.set_music_volume(12);
        seq.load_song(song);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);

        let buffer_frames = 8000 / 2; // one ~500ms buffer at BUFFERS_PER_SECOND=2
        seq.poll(buffer_frames as u64, &mut channels, &store);

        // Running the voice pool over a full buffer's worth of frames
        // exhausts the (non-looping) 100-byte sample long before the
        // buffer ends.
        let luts = crate::lut::VolumeLut::new();
        let mut out = vec![0u8; buffer_frames];
        channels.fill_buffer(&mut out, false, &luts, &store);

        assert!(!channels.is_busy(MUSIC_FIRST));
        assert_eq!(seq.state(), TransportState::Stopped);
    }

    #[test]
    fn scenario_s2_jump_effect() {
        let mut steps = vec![Step::default(); 4];
        steps[3].effect[0] = Effect::Jump(1);
        let mut song = Song::new(2, 2, 0);
        song.define_pattern(0, steps);
        song.define_pattern(1, vec![Step::default(); 4]);
        song.define_order(0, 0);
        song.define_order(1, 1);

        let mut seq = Sequencer::new(8000);
        seq.load_song(song);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);
        let store = SampleStore::new();

        // Poll just far enough to walk through steps 0..3 (the jump fires on
        // step 3) but not into the pattern it jumps to.
        let step_delay = (8000u64 * 8) / 67;
        seq.poll(step_delay * 4 - 1, &mut channels, &store);

        assert_eq!(seq.pos.iorder, 1);
        assert_eq!(seq.pos.istep, 0);
    }

    #[test]
    fn pattern_break_advances_to_next_order_entry() {
        // Pattern 0 is 4 steps long but breaks on step 1; pattern 1 is the
        // distinguishable target so we can tell the break actually landed
        // on the next order entry rather than just rolling over istep.
        let mut steps = vec![Step::default(); 4];
        steps[1].effect[0] = Effect::PatternBreak;
        let mut song = Song::new(2, 2, 0);
        song.define_pattern(0, steps);
        song.define_pattern(1, vec![Step::default(); 4]);
        song.define_order(0, 0);
        song.define_order(1, 1);

        let mut seq = Sequencer::new(8000);
        seq.load_song(song);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);
        let store = SampleStore::new();

        // Two step deadlines in: step 0 fires normally, step 1 fires the
        // break. Stop exactly at that deadline so the jumped-to pattern's
        // own step 0 hasn't fired yet.
        let step_delay = (8000u64 * 8) / 67;
        seq.poll(step_delay * 2, &mut channels, &store);

        // `pos.ipattern` itself only gets refreshed to `order[iorder]` at
        // the top of the *next* processed step (same as scenario S2 above),
        // so it isn't asserted here; `iorder`/`istep` are what the break
        // actually mutates.
        assert_eq!(seq.pos.iorder, 1);
        assert_eq!(seq.pos.istep, 0);
    }

    #[test]
    fn scenario_s3_set_tempo_effect() {
        let mut step = Step::default();
        step.effect[0] = Effect::SetTempo(7);
        let song = one_pattern_song(vec![step, Step::default()], 1);

        let mut seq = Sequencer::new(8000);
        seq.load_song(song);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);
        let store = SampleStore::new();

        seq.poll(1, &mut channels, &store);
        assert_eq!(seq.pos.step_delay, (8000u64 * 8) / 65);
    }

    #[test]
    fn poll_is_idempotent() {
        let song = one_pattern_song(vec![Step::default(); 4], 1);
        let mut seq = Sequencer::new(8000);
        seq.load_song(song);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);
        let store = SampleStore::new();

        seq.poll(100, &mut channels, &store);
        let after_first = (seq.pos.iorder, seq.pos.istep, seq.pos.song_pos);
        seq.poll(100, &mut channels, &store);
        let after_second = (seq.pos.iorder, seq.pos.istep, seq.pos.song_pos);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn transport_round_trip_pause_play() {
        let song = one_pattern_song(vec![Step::default(); 64], 1);
        let mut seq = Sequencer::new(8000);
        seq.load_song(song);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);
        let store = SampleStore::new();
        seq.poll(10_000, &mut channels, &store);
        let before = (seq.pos.iorder, seq.pos.istep);

        seq.command(TransportCommand::Pause, &mut channels);
        assert_eq!(seq.state(), TransportState::Paused);
        seq.command(TransportCommand::Play, &mut channels);
        assert_eq!(seq.state(), TransportState::Playing);
        let after = (seq.pos.iorder, seq.pos.istep);
        assert_eq!(before, after);
    }

    #[test]
    fn no_song_loaded_ignores_commands() {
        let mut seq = Sequencer::new(8000);
        let mut channels = ChannelEngine::new(8000);
        seq.command(TransportCommand::Play, &mut channels);
        assert_eq!(seq.state(), TransportState::NoSongLoaded);
    }
}
