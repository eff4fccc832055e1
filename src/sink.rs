//! Audio sink adapter: the external contract the core consumes to reach an
//! OS audio output device.

#[cfg(feature = "sdl2-sink")]
pub mod sdl2;

use crate::error::{EngineError, Result};

/// An 8-bit PCM output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    pub stereo: bool,
}

/// Fixed preference order: stereo beats mono at each rate, higher rates
/// preferred, per the engine's format-negotiation contract.
pub const FORMAT_PREFERENCE: [AudioFormat; 6] = [
    AudioFormat {
        rate: 44_100,
        stereo: true,
    },
    AudioFormat {
        rate: 22_050,
        stereo: true,
    },
    AudioFormat {
        rate: 11_025,
        stereo: true,
    },
    AudioFormat {
        rate: 44_100,
        stereo: false,
    },
    AudioFormat {
        rate: 22_050,
        stereo: false,
    },
    AudioFormat {
        rate: 11_025,
        stereo: false,
    },
];

/// External audio sink contract. The core never blocks on a sink call; it
/// polls [`AudioSink::is_drained`] instead.
pub trait AudioSink {
    /// Capability bits: which [`FORMAT_PREFERENCE`] entries this device can open.
    fn query_formats(&self) -> Vec<AudioFormat>;
    /// Open the device at a specific format.
    fn open(&mut self, format: AudioFormat) -> Result<()>;
    /// Submit a filled buffer for playback.
    fn submit(&mut self, buffer: &[u8]);
    /// True once previously submitted audio has fully drained, i.e. the
    /// sink is ready to accept the next buffer.
    fn is_drained(&self) -> bool;
    fn reset(&mut self);
    fn close(&mut self);
}

/// Walk [`FORMAT_PREFERENCE`] and open the first format `sink` supports.
pub fn negotiate_and_open(sink: &mut dyn AudioSink) -> Result<AudioFormat> {
    let supported = sink.query_formats();
    for &fmt in FORMAT_PREFERENCE.iter() {
        if supported.contains(&fmt) {
            sink.open(fmt)?;
            return Ok(fmt);
        }
    }
    Err(EngineError::OpenFormat)
}

/// An in-memory sink for tests: always drained, records submitted buffers.
#[derive(Debug, Default)]
pub struct NullSink {
    opened: Option<AudioFormat>,
    pub submitted: Vec<Vec<u8>>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for NullSink {
    fn query_formats(&self) -> Vec<AudioFormat> {
        FORMAT_PREFERENCE.to_vec()
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        self.opened = Some(format);
        Ok(())
    }

    fn submit(&mut self, buffer: &[u8]) {
        self.submitted.push(buffer.to_vec());
    }

    fn is_drained(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.submitted.clear();
    }

    fn close(&mut self) {
        self.opened = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_picks_highest_preference_supported() {
        struct Stereo22kOnly;
        impl AudioSink for Stereo22kOnly {
            fn query_formats(&self) -> Vec<AudioFormat> {
                vec![AudioFormat {
                    rate: 22_050,
                    stereo: true,
                }]
            }
            fn open(&mut self, _format: AudioFormat) -> Result<()> {
                Ok(())
            }
            fn submit(&mut self, _buffer: &[u8]) {}
            fn is_drained(&self) -> bool {
                true
            }
            fn reset(&mut self) {}
            fn close(&mut self) {}
        }

        let mut sink = Stereo22kOnly;
        let fmt = negotiate_and_open(&mut sink).unwrap();
        assert_eq!(
            fmt,
            AudioFormat {
                rate: 22_050,
                stereo: true
            }
        );
    }

    #[test]
    fn negotiate_fails_when_nothing_supported() {
        struct Nothing;
        impl AudioSink for Nothing {
            fn query_formats(&self) -> Vec<AudioFormat> {
                vec![]
            }
            fn open(&mut self, _format: AudioFormat) -> Result<()> {
                Ok(())
            }
            fn submit(&mut self, _buffer: &[u8]) {}
            fn is_drained(&self) -> bool {
                true
            }
            fn reset(&mut self) {}
            fn close(&mut self) {}
        }

        let mut sink = Nothing;
        match negotiate_and_open(&mut sink) {
            Err(EngineError::OpenFormat) => {}
            other => panic!("expected OpenFormat, got {:?}", other),
        }
    }
}
