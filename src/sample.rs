//! Sample store: a bounded registry of PCM instruments.

use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Maximum number of live samples. `IDLE` (== `MAX_SAMPLES`) means "no sample".
pub const MAX_SAMPLES: usize = 64;

/// Sentinel handle meaning "no sample"/"silent voice".
pub const IDLE: usize = MAX_SAMPLES;

/// A single 8-bit signed PCM instrument, with optional loop metadata.
#[derive(Debug, Clone)]
pub struct Sample {
    data: Vec<i8>,
    loop_start: usize,
    loop_len: usize,
    rate: u32,
}

impl Sample {
    pub fn data(&self) -> &[i8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn loop_start(&self) -> usize {
        self.loop_start
    }

    /// Zero iff the sample does not loop.
    pub fn loop_len(&self) -> usize {
        self.loop_len
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn is_looping(&self) -> bool {
        self.loop_len > 0
    }
}

/// Fixed-size registry of [`Sample`]s, indexed by small integer handles.
///
/// A handle is "live" iff its slot holds data. Allocation uses the first
/// free slot.
#[derive(Debug)]
pub struct SampleStore {
    slots: [Option<Sample>; MAX_SAMPLES],
}

impl SampleStore {
    pub fn new() -> Self {
        SampleStore {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Copy `data` into the store, returning a new handle.
    ///
    /// `loop_size < 3` is normalized to 0 (non-looping). When `center` is
    /// set, input bytes are treated as unsigned and re-biased by
    /// subtracting 128 to obtain a signed two's-complement payload.
    pub fn add(
        &mut self,
        data: &[u8],
        loop_start: usize,
        loop_size: usize,
        rate: u32,
        center: bool,
    ) -> Result<usize> {
        let handle = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(EngineError::NoHandles)?;

        let loop_len = if loop_size < 3 { 0 } else { loop_size };

        let samples: Vec<i8> = if center {
            data.iter().map(|&b| (b as i32 - 128) as i8).collect()
        } else {
            data.iter().map(|&b| b as i8).collect()
        };

        debug!(
            handle,
            size = samples.len(),
            loop_start,
            loop_len,
            rate,
            "sample added to store"
        );

        self.slots[handle] = Some(Sample {
            data: samples,
            loop_start,
            loop_len,
            rate,
        });
        Ok(handle)
    }

    /// Free a handle's payload. No-op if already free or out of range.
    pub fn delete(&mut self, handle: usize) {
        if let Some(slot) = self.slots.get_mut(handle) {
            if slot.take().is_some() {
                debug!(handle, "sample removed from store");
            }
        } else {
            warn!(handle, "delete on out-of-range sample handle");
        }
    }

    pub fn get(&self, handle: usize) -> Option<&Sample> {
        self.slots.get(handle).and_then(Option::as_ref)
    }

    /// Drop every sample, freeing all payloads.
    pub fn clear(&mut self) {
        self.slots = std::array::from_fn(|_| None);
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}
