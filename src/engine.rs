//! Public engine handle: a single engine-wide lock guarding every piece of
//! mutable state, replacing the busy-flag re-entry hack with a real mutex.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{ChannelEngine, FX_CHANNELS, MUSIC_CHANNELS};
use crate::error::{EngineError, Result};
use crate::lut::VolumeLut;
use crate::mixdriver::{MixDriver, MixDriverStats};
use crate::modfile;
use crate::sample::SampleStore;
use crate::sequencer::{Sequencer, SongPosition, TransportCommand, TransportState};
use crate::sink::{negotiate_and_open, AudioFormat, AudioSink};
use crate::song::{Song, Step};
use crate::timer::Timer;

/// Period of the mix driver's periodic poll. ~100ms per spec.md §4.4.
const POLL_PERIOD: Duration = Duration::from_millis(100);

struct EngineState {
    initialized: bool,
    luts: VolumeLut,
    store: SampleStore,
    channels: ChannelEngine,
    sequencer: Sequencer,
    mixdriver: Option<MixDriver>,
    sink: Option<Box<dyn AudioSink + Send>>,
    format: Option<AudioFormat>,
}

impl EngineState {
    fn new() -> Self {
        EngineState {
            initialized: false,
            luts: VolumeLut::new(),
            store: SampleStore::new(),
            channels: ChannelEngine::new(8000),
            sequencer: Sequencer::new(8000),
            mixdriver: None,
            sink: None,
            format: None,
        }
    }

    fn poll_mix(&mut self) {
        if !self.initialized {
            return;
        }
        let (Some(mixdriver), Some(sink)) = (self.mixdriver.as_mut(), self.sink.as_mut()) else {
            return;
        };
        mixdriver.poll(
            &mut self.sequencer,
            &mut self.channels,
            &self.store,
            &self.luts,
            sink.as_mut(),
        );
    }
}

/// The playback engine. Cheap to clone (`Arc` internally); every public
/// method locks the single engine-wide mutex for its duration.
#[derive(Clone)]
pub struct Engine {
    state: Arc<Mutex<EngineState>>,
    timer: Arc<Mutex<Option<Timer>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            state: Arc::new(Mutex::new(EngineState::new())),
            timer: Arc::new(Mutex::new(None)),
        }
    }

    // ---- Lifecycle ----------------------------------------------------

    /// Negotiate a format with `sink`, open it, and start the periodic mix
    /// timer. Frees nothing (there is nothing yet to free) if negotiation
    /// fails — the sink is simply dropped with the error.
    pub fn init(&self, mut sink: Box<dyn AudioSink + Send>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.initialized {
            return Err(EngineError::AlreadyInited);
        }

        let format = negotiate_and_open(sink.as_mut())?;
        info!(rate = format.rate, stereo = format.stereo, "engine initialized");

        state.channels = ChannelEngine::new(format.rate);
        state.sequencer = Sequencer::new(format.rate);
        state.mixdriver = Some(MixDriver::new(format.rate, format.stereo));
        state.sink = Some(sink);
        state.format = Some(format);
        state.initialized = true;
        drop(state);

        let state_for_timer = Arc::clone(&self.state);
        let timer = Timer::start(POLL_PERIOD, move || {
            state_for_timer.lock().unwrap().poll_mix();
        });
        *self.timer.lock().unwrap() = Some(timer);
        Ok(())
    }

    /// Stop music, flush the song, kill the timer, close the sink, free all
    /// sample payloads, and clear `initialized`.
    pub fn deinit(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.initialized {
                return Err(EngineError::NotInited);
            }
            state.sequencer.flush();
            state.store.clear();
            if let Some(sink) = state.sink.as_mut() {
                sink.close();
            }
            state.sink = None;
            state.mixdriver = None;
            state.initialized = false;
        }
        // Dropping the timer joins its thread; done outside the state lock
        // since the timer callback itself takes that lock.
        *self.timer.lock().unwrap() = None;
        debug!("engine deinitialized");
        Ok(())
    }

    // ---- Device query ---------------------------------------------------

    pub fn mix_rate(&self) -> Result<u32> {
        let state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(EngineError::NotInited);
        }
        Ok(state.channels.mix_rate())
    }

    /// Number of channels available for sound effects (the lower 4 of the pool).
    pub fn channel_count(&self) -> usize {
        FX_CHANNELS
    }

    // ---- Voice control --------------------------------------------------

    pub fn pan_set(&self, ch: usize, pan: u8) -> Result<()> {
        let mut state = self.locked()?;
        state.channels.pan_set(ch, pan);
        Ok(())
    }

    pub fn pan_get(&self, ch: usize) -> Result<Option<u8>> {
        let state = self.locked()?;
        Ok(state.channels.pan_get(ch))
    }

    pub fn volume(&self, ch: usize, v: u16) -> Result<()> {
        let mut state = self.locked()?;
        state.channels.volume(ch, v);
        Ok(())
    }

    pub fn stop(&self, ch: usize) -> Result<()> {
        let mut state = self.locked()?;
        state.channels.stop(ch);
        Ok(())
    }

    pub fn is_busy(&self, ch: usize) -> Result<bool> {
        let state = self.locked()?;
        Ok(state.channels.is_busy(ch))
    }

    pub fn play(&self, ch: usize, sample_handle: usize, pitch: u32) -> Result<()> {
        let mut state = self.locked()?;
        let EngineState {
            ref mut channels,
            ref store,
            ..
        } = *state;
        channels.play(ch, sample_handle, pitch, store);
        Ok(())
    }

    // ---- Sample store -----------------------------------------------------

    pub fn add_sample(
        &self,
        data: &[u8],
        loop_start: usize,
        loop_size: usize,
        rate: u32,
        center: bool,
    ) -> Result<usize> {
        let mut state = self.locked()?;
        state.store.add(data, loop_start, loop_size, rate, center)
    }

    pub fn delete_sample(&self, handle: usize) -> Result<()> {
        let mut state = self.locked()?;
        state.store.delete(handle);
        Ok(())
    }

    // ---- Song construction -------------------------------------------------

    pub fn create_song(&self, npatterns: usize, norder: usize, nsamples: usize) -> Result<()> {
        let mut state = self.locked()?;
        let song = Song::new(npatterns, norder, nsamples);
        state.sequencer.load_song(song);
        Ok(())
    }

    pub fn define_order(&self, iorder: usize, ipattern: usize) -> Result<bool> {
        let mut state = self.locked()?;
        let song = state.sequencer.song_mut().ok_or(EngineError::BadParam)?;
        Ok(song.define_order(iorder, ipattern))
    }

    pub fn define_pattern(&self, ipattern: usize, steps: Vec<Step>) -> Result<bool> {
        let mut state = self.locked()?;
        let song = state.sequencer.song_mut().ok_or(EngineError::BadParam)?;
        Ok(song.define_pattern(ipattern, steps))
    }

    pub fn define_step(&self, ipattern: usize, istep: usize, step: Step) -> Result<bool> {
        let mut state = self.locked()?;
        let song = state.sequencer.song_mut().ok_or(EngineError::BadParam)?;
        Ok(song.define_step(ipattern, istep, step))
    }

    pub fn define_sample(&self, slot: usize, handle: usize) -> Result<bool> {
        let mut state = self.locked()?;
        let song = state.sequencer.song_mut().ok_or(EngineError::BadParam)?;
        Ok(song.define_sample(slot, handle))
    }

    pub fn define_pan(&self, ch: usize, pan: u8) -> Result<bool> {
        let mut state = self.locked()?;
        let song = state.sequencer.song_mut().ok_or(EngineError::BadParam)?;
        Ok(song.define_pan(ch, pan))
    }

    pub fn flush(&self) -> Result<()> {
        let mut state = self.locked()?;
        state.sequencer.flush();
        for c in 0..MUSIC_CHANNELS {
            state.channels.stop(crate::channel::MUSIC_FIRST + c);
        }
        Ok(())
    }

    pub fn music_volume(&self) -> Result<u8> {
        let state = self.locked()?;
        Ok(state.sequencer.music_volume())
    }

    pub fn set_music_volume(&self, v: u8) -> Result<()> {
        let mut state = self.locked()?;
        state.sequencer.set_music_volume(v);
        Ok(())
    }

    // ---- Transport --------------------------------------------------------

    pub fn command(&self, cmd: TransportCommand) -> Result<()> {
        let mut state = self.locked()?;
        let EngineState {
            ref mut sequencer,
            ref mut channels,
            ..
        } = *state;
        sequencer.command(cmd, channels);
        Ok(())
    }

    pub fn state(&self) -> Result<TransportState> {
        let state = self.locked()?;
        Ok(state.sequencer.state())
    }

    pub fn get_position(&self) -> Result<SongPosition> {
        let state = self.locked()?;
        let song_counter = state.mixdriver.as_ref().map(MixDriver::song_counter).unwrap_or(0);
        Ok(state.sequencer.get_position(song_counter))
    }

    pub fn mix_driver_stats(&self) -> Result<MixDriverStats> {
        let state = self.locked()?;
        Ok(state
            .mixdriver
            .as_ref()
            .map(MixDriver::stats)
            .unwrap_or_default())
    }

    // ---- Loader -------------------------------------------------------------

    /// Load a MOD file from `path`, replacing any currently loaded song and
    /// sample store.
    pub fn load_mod(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::open(path.as_ref()).map_err(|_| {
            EngineError::OpenFile(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot open {}", path.as_ref().display()),
            ))
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(EngineError::ReadFile)?;

        let (song, store) = modfile::load(&data)?;

        let mut state = self.locked()?;
        state.sequencer.flush();
        state.store = store;
        state.sequencer.load_song(song);
        info!(path = %path.as_ref().display(), "MOD file loaded");
        Ok(())
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, EngineState>> {
        let state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(EngineError::NotInited);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;

    #[test]
    fn double_init_is_rejected() {
        let engine = Engine::new();
        engine.init(Box::new(NullSink::new())).unwrap();
        match engine.init(Box::new(NullSink::new())) {
            Err(EngineError::AlreadyInited) => {}
            other => panic!("expected AlreadyInited, got {:?}", other),
        }
        engine.deinit().unwrap();
    }

    #[test]
    fn calls_before_init_are_not_inited() {
        let engine = Engine::new();
        match engine.mix_rate() {
            Err(EngineError::NotInited) => {}
            other => panic!("expected NotInited, got {:?}", other),
        }
        match engine.deinit() {
            Err(EngineError::NotInited) => {}
            other => panic!("expected NotInited, got {:?}", other),
        }
    }

    #[test]
    fn song_construction_round_trip() {
        let engine = Engine::new();
        engine.init(Box::new(NullSink::new())).unwrap();

        engine.create_song(1, 1, 1).unwrap();
        assert!(engine.define_order(0, 0).unwrap());
        assert!(!engine.define_order(1, 0).unwrap());

        let handle = engine.add_sample(&[0u8; 100], 0, 0, 8000, false).unwrap();
        assert!(engine.define_sample(0, handle).unwrap());

        let mut step = Step::default();
        step.pitch[0] = 428 * 18;
        step.sample_slot[0] = 0;
        assert!(engine.define_pattern(0, vec![step]).unwrap());

        engine.command(TransportCommand::Play).unwrap();
        assert_eq!(engine.state().unwrap(), TransportState::Playing);

        engine.deinit().unwrap();
    }

    #[test]
    fn channel_count_is_fx_channel_count() {
        let engine = Engine::new();
        assert_eq!(engine.channel_count(), FX_CHANNELS);
    }
}
