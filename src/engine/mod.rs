//! The owned audio engine a host links against: bundles the sfx voice
//! table behind a mutex (briefly held, bounded inner loop) and hands music
//! playback off to the audio thread through a command channel plus a
//! handful of atomics for volume/pause/playing state, so the control
//! thread never blocks on the audio thread's lock. Mirrors the teacher's
//! split between a locked player and a crossbeam command channel in
//! `player/mod.rs`, generalized from one command enum to two independent
//! channels (sfx under a mutex, music lock-free) because the two have very
//! different latency and allocation requirements.

pub mod callback;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Sender};
use log::info;

use crate::config::Config;
use crate::mus::{InstrumentBank, MusHeader, MusPlayer};
use crate::opl::OplDriver;
use crate::sfx::{SfxBank, SfxHandle, SfxMixer};

/// Frames per mixer callback invocation; also the sfx cache's padding
/// granularity (see `sfx::cache::padded_length`).
pub const MIX_CHUNK_SIZE: usize = 512;

/// Index into the song registry, returned by `register_song`.
pub type SongHandle = usize;

/// Errors surfaced to the control thread. The audio thread never produces
/// one of these: everything it can fail at degrades to silence or a
/// logged-and-skipped event instead.
#[derive(Debug)]
pub enum AudioError {
    /// The output device could not be opened or configured.
    Device(String),
    /// A bank/song lookup or parse failed (bad handle, malformed header).
    Bank(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::Device(msg) => write!(f, "audio device error: {msg}"),
            AudioError::Bank(msg) => write!(f, "song/bank error: {msg}"),
        }
    }
}

impl std::error::Error for AudioError {}

struct SfxState {
    bank: SfxBank,
    mixer: SfxMixer,
    /// Sound ids that should only ever have one active voice (chainsaw,
    /// footsteps, and similar movement/impact sounds). Caller-defined,
    /// since sound identity is not hard-coded in this crate.
    single_instance_ids: Vec<usize>,
}

pub(crate) enum MusicCommand {
    Play { score: Vec<u8>, score_start: usize, loop_enabled: bool },
    Stop,
}

/// Music control state shared between the control and audio thread without
/// a lock. `volume` already holds the post-formula attenuation value (see
/// `scale_music_volume`); `paused`/`playing` are read on the audio thread's
/// hot path with `Acquire` so a control-thread `Release` store is always
/// observed by the next callback.
pub(crate) struct MusicShared {
    pub volume: AtomicU32,
    pub paused: AtomicBool,
    pub playing: AtomicBool,
}

/// Converts a 0..127 music volume into the attenuation value the original
/// engine's mixer applies directly to OPL output samples: `((v+2)^2) >>
/// 7`, expressed here as a float scale (divide by 128, the implicit
/// fixed-point denominator) so it composes with `LpfResampler::step`'s
/// `f32` volume parameter.
fn music_volume_attenuation(v: u8) -> u32 {
    let v = v.min(127) as u32;
    ((v + 2) * (v + 2)) >> 7
}

fn scale_music_volume(v: u8) -> f32 {
    music_volume_attenuation(v) as f32 / 128.0
}

pub struct AudioEngine {
    sfx: Arc<Mutex<SfxState>>,
    songs: Mutex<Vec<Arc<Vec<u8>>>>,
    music: Arc<MusicShared>,
    music_tx: Sender<MusicCommand>,
    shutdown: Arc<AtomicBool>,
}

impl AudioEngine {
    /// `I_InitSound` + `I_SetChannels`: builds the sfx mixer and OPL
    /// driver, opens the output device, and starts the audio thread. The
    /// GENMIDI/OP2 `bank` must already be parsed by the caller (WAD access
    /// is out of this crate's scope).
    pub fn init(config: &Config, bank: InstrumentBank) -> Result<Self, AudioError> {
        let sfx = Arc::new(Mutex::new(SfxState {
            bank: SfxBank::new(),
            mixer: SfxMixer::new(config.pcm_biquad_cutoff_hz, config.pcm_biquad_q, config.output_sample_rate_hz as f32),
            single_instance_ids: Vec::new(),
        }));

        let music = Arc::new(MusicShared {
            volume: AtomicU32::new(music_volume_attenuation(config.default_music_volume)),
            paused: AtomicBool::new(false),
            playing: AtomicBool::new(false),
        });

        let (music_tx, music_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let player = MusPlayer::new(bank);
        let opl = OplDriver::new(
            player,
            config.output_sample_rate_hz as f64,
            config.mix_chunk_frames,
            config.opl_resampler_cutoff_hz,
        );

        callback::spawn_audio_thread(
            opl,
            Arc::clone(&sfx),
            Arc::clone(&music),
            music_rx,
            Arc::clone(&shutdown),
            config.mix_chunk_frames,
        )?;

        info!(
            "audio engine initialized at {} Hz, {}-frame chunks",
            config.output_sample_rate_hz, config.mix_chunk_frames
        );

        Ok(AudioEngine { sfx, songs: Mutex::new(Vec::new()), music, music_tx, shutdown })
    }

    /// Registers a sound lump under `name`, returning its sound id for use
    /// with `start_sound`. A lump that fails to parse plays as silence
    /// until `set_fallback_sound` designates a substitute.
    pub fn register_sfx(&self, name: &str, lump: Option<&[u8]>) -> usize {
        self.sfx.lock().unwrap().bank.insert(name, lump)
    }

    /// Designates the sfx at `index` (as returned by `register_sfx`) as
    /// the substitute played in place of any entry that failed to load.
    pub fn set_fallback_sound(&self, index: usize) {
        self.sfx.lock().unwrap().bank.set_fallback(index);
    }

    /// Marks `sound_id` as single-instance: starting it stops any other
    /// currently-playing voice with the same id first.
    pub fn set_single_instance(&self, sound_id: usize) {
        let mut state = self.sfx.lock().unwrap();
        if !state.single_instance_ids.contains(&sound_id) {
            state.single_instance_ids.push(sound_id);
        }
    }

    /// `I_StartSound`: `volume` is 0..127, `separation` is 1..255 (128 =
    /// centre), `pitch` is a step-table index (128 = unshifted). Returns
    /// `None` if the sound id has no sample and no fallback is set.
    pub fn start_sound(&self, sound_id: usize, volume: i32, separation: i32, pitch: u8) -> Option<SfxHandle> {
        let mut state = self.sfx.lock().unwrap();
        state.mixer.start_sfx(&state.bank, sound_id, volume, separation, pitch, &state.single_instance_ids)
    }

    /// `I_StopSound`.
    pub fn stop_sound(&self, handle: SfxHandle) {
        self.sfx.lock().unwrap().mixer.stop_sfx(handle);
    }

    /// `I_SoundIsPlaying`.
    pub fn sound_is_playing(&self, handle: SfxHandle) -> bool {
        self.sfx.lock().unwrap().mixer.is_playing(handle)
    }

    /// `I_UpdateSoundParams`: re-pans/re-pitches an already-playing voice
    /// without restarting its sample position.
    pub fn update_sound_params(&self, handle: SfxHandle, volume: i32, separation: i32) {
        self.sfx.lock().unwrap().mixer.update_sfx(handle, volume, separation);
    }

    /// Stops every active sfx voice immediately.
    pub fn stop_all_sounds(&self) {
        self.sfx.lock().unwrap().mixer.stop_all();
    }

    /// `I_SetMusicVolume`: `v` is 0..127. Stored atomically; no lock is
    /// taken and the audio thread picks it up on its next callback.
    pub fn set_music_volume(&self, v: u8) {
        self.music.volume.store(music_volume_attenuation(v), Ordering::Release);
    }

    /// `I_RegisterSong`: hands ownership of a full MUS lump (header
    /// included) to the engine, returning a handle for `play_song`. The
    /// caller does not need to keep the bytes alive afterward.
    pub fn register_song(&self, data: Vec<u8>) -> SongHandle {
        let mut songs = self.songs.lock().unwrap();
        songs.push(Arc::new(data));
        songs.len() - 1
    }

    /// `I_PlaySong`: parses the registered lump's header for its score
    /// start offset and sends it to the audio thread. The mus player
    /// state itself is owned exclusively by the audio thread from this
    /// point on.
    pub fn play_song(&self, handle: SongHandle, loop_enabled: bool) -> Result<(), AudioError> {
        let data = {
            let songs = self.songs.lock().unwrap();
            songs.get(handle).cloned().ok_or_else(|| AudioError::Bank(format!("no song registered at handle {handle}")))?
        };
        let header = MusHeader::parse(&data).map_err(|e| AudioError::Bank(e.to_string()))?;
        let score_start = header.score_start as usize;
        self.music_tx
            .send(MusicCommand::Play { score: (*data).clone(), score_start, loop_enabled })
            .map_err(|_| AudioError::Device("audio thread is not running".into()))
    }

    /// `I_StopSong`.
    pub fn stop_song(&self) -> Result<(), AudioError> {
        self.music_tx.send(MusicCommand::Stop).map_err(|_| AudioError::Device("audio thread is not running".into()))
    }

    /// `I_PauseSong`: a plain atomic flip, observed by the audio thread
    /// with `Acquire` on its next callback.
    pub fn pause_song(&self) {
        self.music.paused.store(true, Ordering::Release);
    }

    /// `I_ResumeSong`.
    pub fn resume_song(&self) {
        self.music.paused.store(false, Ordering::Release);
    }

    /// `I_QrySongPlaying`: true iff the last-registered song has not yet
    /// been observed to finish (either by reaching its end without
    /// looping, or by an explicit `stop_song`).
    pub fn is_song_playing(&self) -> bool {
        self.music.playing.load(Ordering::Acquire)
    }

    /// `I_ShutdownSound`: stops the audio stream. Also run on `Drop`, so
    /// calling this explicitly is optional but lets a host log a clean
    /// shutdown at a known point.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        info!("audio engine shutdown requested");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
