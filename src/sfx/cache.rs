//! Sound-effect sample cache: validates raw lump bytes, strips the 8-byte
//! DMX header, and pads each sample to a whole number of mix chunks so the
//! mixer never has to special-case a short tail while stepping through it.

use log::warn;

use crate::engine::MIX_CHUNK_SIZE;

/// Bytes that precede every PCM sample in the on-disk/in-WAD sfx format:
/// a format tag, a sample rate, and a sample count.
const SFX_HEADER_LEN: usize = 8;

/// Padding value for unsigned 8-bit PCM silence (the format's zero level).
const PCM_SILENCE: u8 = 128;

#[derive(Debug, Clone)]
pub struct CachedSfx {
    /// Raw unsigned 8-bit PCM samples, header stripped, padded to a
    /// multiple of `MIX_CHUNK_SIZE` with silence so the mixer can always
    /// read `MIX_CHUNK_SIZE` bytes past the logical end without branching.
    pub samples: Vec<u8>,
    /// Length of the real (unpadded) sample data, for `channelsend`.
    pub logical_len: usize,
}

/// Parses one sfx lump: an 8-byte header followed by `logical_len` PCM
/// bytes. `name` is used only for diagnostics.
pub fn load_sfx(name: &str, lump: &[u8]) -> Option<CachedSfx> {
    if lump.len() < SFX_HEADER_LEN {
        warn!("sfx '{name}': lump too short ({} bytes), skipping", lump.len());
        return None;
    }
    let body = &lump[SFX_HEADER_LEN..];
    let logical_len = body.len();
    let padded_len = padded_length(logical_len);

    let mut samples = Vec::with_capacity(padded_len);
    samples.extend_from_slice(body);
    samples.resize(padded_len, PCM_SILENCE);

    Some(CachedSfx { samples, logical_len })
}

/// Rounds `len` up to the next multiple of `MIX_CHUNK_SIZE`, matching the
/// original engine's padding so a voice stepping at any pitch never reads
/// past the allocated buffer between mix callbacks.
fn padded_length(len: usize) -> usize {
    if len == 0 {
        return MIX_CHUNK_SIZE;
    }
    ((len + MIX_CHUNK_SIZE - 1) / MIX_CHUNK_SIZE) * MIX_CHUNK_SIZE
}

/// A name-indexed bank of loaded sfx, with graceful fallback for lumps that
/// fail to load or are missing: substitutes a designated placeholder sound
/// rather than refusing to start a voice.
pub struct SfxBank {
    entries: Vec<(String, Option<CachedSfx>)>,
    fallback_index: Option<usize>,
}

impl SfxBank {
    pub fn new() -> Self {
        SfxBank { entries: Vec::new(), fallback_index: None }
    }

    /// Registers a loaded (or missing) sfx under `name`. If `lump` is
    /// `None` or fails to parse, the sound plays as silence until a
    /// fallback is designated via `set_fallback`.
    pub fn insert(&mut self, name: &str, lump: Option<&[u8]>) -> usize {
        let cached = lump.and_then(|bytes| load_sfx(name, bytes));
        if cached.is_none() {
            warn!("sfx '{name}' missing or malformed, will substitute fallback if set");
        }
        self.entries.push((name.to_string(), cached));
        self.entries.len() - 1
    }

    /// Designates the sfx at `index` as the substitute for any entry that
    /// failed to load (mirrors the original engine's hard-coded "pistol"
    /// substitution for missing lumps).
    pub fn set_fallback(&mut self, index: usize) {
        self.fallback_index = Some(index);
    }

    pub fn get(&self, index: usize) -> Option<&CachedSfx> {
        match self.entries.get(index) {
            Some((_, Some(sfx))) => Some(sfx),
            Some((_, None)) => self
                .fallback_index
                .and_then(|fb| self.entries.get(fb))
                .and_then(|(_, sfx)| sfx.as_ref()),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SfxBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lump(body: &[u8]) -> Vec<u8> {
        let mut v = vec![0u8; SFX_HEADER_LEN];
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn rejects_lumps_shorter_than_header() {
        assert!(load_sfx("short", &[1, 2, 3]).is_none());
    }

    #[test]
    fn pads_to_chunk_multiple_with_silence() {
        let body = vec![200u8; 10];
        let sfx = load_sfx("test", &lump(&body)).unwrap();
        assert_eq!(sfx.logical_len, 10);
        assert_eq!(sfx.samples.len() % MIX_CHUNK_SIZE, 0);
        assert!(sfx.samples.len() >= 10);
        assert_eq!(sfx.samples[10], PCM_SILENCE);
    }

    #[test]
    fn exact_multiple_is_not_padded_further() {
        let body = vec![1u8; MIX_CHUNK_SIZE];
        let sfx = load_sfx("exact", &lump(&body)).unwrap();
        assert_eq!(sfx.samples.len(), MIX_CHUNK_SIZE);
    }

    #[test]
    fn bank_substitutes_fallback_for_missing_entries() {
        let mut bank = SfxBank::new();
        let pistol = bank.insert("pistol", Some(&lump(&[5, 5, 5])));
        bank.set_fallback(pistol);
        let missing = bank.insert("missing", None);
        assert!(bank.get(missing).is_some());
        assert_eq!(bank.get(missing).unwrap().logical_len, bank.get(pistol).unwrap().logical_len);
    }
}
