//! Real-time playback engine for Amiga-style MOD tracker music.

mod channel;
mod engine;
mod error;
mod lut;
mod mixdriver;
mod modfile;
mod sample;
mod sequencer;
pub mod sink;
mod song;
mod timer;

pub use channel::{FX_CHANNELS, MAX_CHANNELS, MUSIC_CHANNELS, MUSIC_FIRST, MAX_VOLUME};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use mixdriver::MixDriverStats;
pub use sample::{IDLE, MAX_SAMPLES};
pub use sequencer::{SongPosition, TransportCommand, TransportState};
pub use song::{Effect, Pattern, Song, Step};
