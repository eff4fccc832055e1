//! MOD file parser (15- and 31-instrument variants).

use std::io::{self, Cursor, Read};

use byteorder::{ReadBytesExt, BE};
use log::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::sample::SampleStore;
use crate::song::{Effect, Song, Step};

const STEPS_PER_PATTERN: usize = 64;
const TRACKS_PER_PATTERN: usize = 4;
const PATTERN_BYTES: usize = STEPS_PER_PATTERN * TRACKS_PER_PATTERN * 4;
const INSTRUMENT_HEADER_BYTES: usize = 30;
const TITLE_BYTES: usize = 20;
const ORDER_LIST_BYTES: usize = 128;
const SAMPLE_RATE_HZ: u32 = 8_000;
/// MOD period-to-engine-pitch scale constant.
const PITCH_SCALE: u32 = 18;
/// Amiga convention initial pan for the 4 MOD tracks: LEFT, RIGHT, RIGHT, LEFT.
const MOD_TRACK_PAN: [u8; TRACKS_PER_PATTERN] = [0, 15, 15, 0];

struct InstrumentHeader {
    length_bytes: usize,
    loop_start_bytes: usize,
    loop_len_bytes: usize,
}

fn read_instrument_header(cursor: &mut Cursor<&[u8]>) -> io::Result<InstrumentHeader> {
    let mut name = [0u8; 22];
    cursor.read_exact(&mut name)?;
    let length_words = cursor.read_u16::<BE>()?;
    let _finetune = cursor.read_u8()?;
    let _volume = cursor.read_u8()?;
    let loop_start_words = cursor.read_u16::<BE>()?;
    let loop_len_words = cursor.read_u16::<BE>()?;
    Ok(InstrumentHeader {
        length_bytes: length_words as usize * 2,
        loop_start_bytes: loop_start_words as usize * 2,
        loop_len_bytes: loop_len_words as usize * 2,
    })
}

/// Parse a MOD byte stream into a [`Song`] and its [`SampleStore`].
pub fn load(data: &[u8]) -> Result<(Song, SampleStore)> {
    let is_31 = data.len() >= 1084 && matches!(&data[1080..1084], b"M.K." | b"FLT4");
    let ninstruments = if is_31 { 31 } else { 15 };
    let header_size = if is_31 { 1084 } else { 600 };

    let mut cursor = Cursor::new(data);
    cursor.set_position(TITLE_BYTES as u64);

    let mut instruments = Vec::with_capacity(ninstruments);
    for _ in 0..ninstruments {
        let inst = read_instrument_header(&mut cursor).map_err(EngineError::ReadFile)?;
        instruments.push(inst);
    }
    debug_assert_eq!(
        cursor.position() as usize,
        TITLE_BYTES + ninstruments * INSTRUMENT_HEADER_BYTES
    );

    let song_length = cursor.read_u8().map_err(EngineError::ReadFile)? as usize;
    let _restart_byte = cursor.read_u8().map_err(EngineError::ReadFile)?;
    let mut order_bytes = [0u8; ORDER_LIST_BYTES];
    cursor
        .read_exact(&mut order_bytes)
        .map_err(EngineError::ReadFile)?;

    if is_31 {
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature).map_err(EngineError::ReadFile)?;
    }

    let sample_bytes_total: usize = instruments.iter().map(|i| i.length_bytes).sum();
    if data.len() < header_size + sample_bytes_total {
        return Err(EngineError::ReadFile(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "MOD file shorter than header + sample data",
        )));
    }
    let npats = (data.len() - header_size - sample_bytes_total) / 1024;
    info!(
        "loading {}-instrument MOD: {} patterns, {} order entries, {} instruments",
        ninstruments, npats, song_length, ninstruments
    );

    let norder = song_length.min(ORDER_LIST_BYTES);
    let mut song = Song::new(npats, norder, ninstruments);
    for c in 0..TRACKS_PER_PATTERN {
        song.define_pan(c, MOD_TRACK_PAN[c]);
    }
    for (iorder, &pattern_byte) in order_bytes.iter().take(norder).enumerate() {
        if !song.define_order(iorder, pattern_byte as usize) {
            warn!(
                "order-list entry {} references out-of-range pattern {}, leaving default",
                iorder, pattern_byte
            );
        }
    }

    let pattern_data_start = header_size as u64;
    for ipattern in 0..npats {
        cursor.set_position(pattern_data_start + (ipattern * PATTERN_BYTES) as u64);
        let mut steps = Vec::with_capacity(STEPS_PER_PATTERN);
        for _ in 0..STEPS_PER_PATTERN {
            let mut step = Step::default();
            for track in 0..TRACKS_PER_PATTERN {
                let mut note = [0u8; 4];
                cursor.read_exact(&mut note).map_err(EngineError::ReadFile)?;
                let (b1, b2, b3, b4) = (note[0], note[1], note[2], note[3]);

                let (instrument, pitch) = if is_31 {
                    (
                        (b1 & 0xF0) | (b3 >> 4),
                        ((b1 as u16 & 0x0F) << 8) | b2 as u16,
                    )
                } else {
                    ((b3 >> 4) & 0x0F, (b1 as u16) << 8 | b2 as u16)
                };

                if pitch != 0 && instrument != 0 {
                    step.pitch[track] = pitch as u32 * PITCH_SCALE;
                    step.sample_slot[track] = instrument as usize - 1;
                }

                let effect_nibble = b3 & 0x0F;
                step.effect[track] = match effect_nibble {
                    0x0 | 0x1 | 0x2 | 0x3 | 0x4 | 0xA => Effect::None,
                    0xB => Effect::Jump(b4),
                    0xC => Effect::SetVolume(b4),
                    0xD => Effect::PatternBreak,
                    0xF => Effect::SetTempo(b4),
                    _ => Effect::None,
                };
            }
            steps.push(step);
        }
        song.define_pattern(ipattern, steps);
    }

    let mut store = SampleStore::new();
    let mut sample_cursor = header_size + npats * 1024;
    for (slot, inst) in instruments.iter().enumerate() {
        if inst.length_bytes == 0 {
            continue;
        }
        let raw = &data[sample_cursor..sample_cursor + inst.length_bytes];
        let handle = store.add(
            raw,
            inst.loop_start_bytes,
            inst.loop_len_bytes,
            SAMPLE_RATE_HZ,
            false,
        )?;
        song.define_sample(slot, handle);
        sample_cursor += inst.length_bytes;
    }

    Ok((song, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal synthetic 15-instrument MOD with `npats` empty
    /// patterns and no sample data, for structural round-trip testing.
    fn synth_15inst_mod(npats: usize, order: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(std::iter::repeat(0u8).take(TITLE_BYTES));
        for _ in 0..15 {
            data.extend(std::iter::repeat(0u8).take(INSTRUMENT_HEADER_BYTES));
        }
        data.push(order.len() as u8);
        data.push(0); // restart byte
        let mut order_list = [0u8; ORDER_LIST_BYTES];
        order_list[..order.len()].copy_from_slice(order);
        data.extend_from_slice(&order_list);
        for _ in 0..npats {
            data.extend(std::iter::repeat(0u8).take(PATTERN_BYTES));
        }
        data
    }

    #[test]
    fn scenario_s4_npats_from_file_size() {
        let data = synth_15inst_mod(3, &[0, 1, 2]);
        let (song, _store) = load(&data).unwrap();
        assert_eq!(song.npatterns(), 3);
        assert_eq!(song.norder(), 3);
        assert_eq!(song.nsamples(), 15);
    }

    #[test]
    fn scenario_s5_31inst_signature_and_default_pan() {
        let mut data = Vec::new();
        data.extend(std::iter::repeat(0u8).take(TITLE_BYTES));
        for _ in 0..31 {
            data.extend(std::iter::repeat(0u8).take(INSTRUMENT_HEADER_BYTES));
        }
        data.push(1);
        data.push(0);
        data.extend(std::iter::repeat(0u8).take(ORDER_LIST_BYTES));
        data.extend_from_slice(b"M.K.");
        data.extend(std::iter::repeat(0u8).take(PATTERN_BYTES));

        let (song, _store) = load(&data).unwrap();
        assert_eq!(song.nsamples(), 31);
        assert_eq!(song.initial_pan[0], 0);
        assert_eq!(song.initial_pan[1], 15);
        assert_eq!(song.initial_pan[2], 15);
        assert_eq!(song.initial_pan[3], 0);
    }

    #[test]
    fn note_and_effect_decoding_31inst() {
        let mut data = Vec::new();
        data.extend(std::iter::repeat(0u8).take(TITLE_BYTES));
        for _ in 0..31 {
            data.extend(std::iter::repeat(0u8).take(INSTRUMENT_HEADER_BYTES));
        }
        data.push(1);
        data.push(0);
        data.extend(std::iter::repeat(0u8).take(ORDER_LIST_BYTES));
        data.extend_from_slice(b"M.K.");

        // Pattern: step 0, track 0: instrument 1, period 428, effect JUMP(2).
        let mut pattern = vec![0u8; PATTERN_BYTES];
        let instrument = 1u8;
        let period: u16 = 428;
        pattern[0] = (instrument & 0xF0) | ((period >> 8) as u8 & 0x0F);
        pattern[1] = (period & 0xFF) as u8;
        pattern[2] = (instrument & 0x0F) << 4 | 0x0B; // effect nibble 0xB = JUMP
        pattern[3] = 2;
        data.extend_from_slice(&pattern);

        let (song, _store) = load(&data).unwrap();
        let step = &song.pattern(0).unwrap().steps[0];
        assert_eq!(step.pitch[0], period as u32 * PITCH_SCALE);
        assert_eq!(step.sample_slot[0], 0);
        assert_eq!(step.effect[0], Effect::Jump(2));
    }
}
