//! The mixer orchestrator: owns the cpal output stream on a dedicated
//! thread (cpal's `Stream` is `!Send` on some platforms, so like the
//! teacher's `sid_emulated::spawn_audio_thread` it never leaves the
//! thread that built it), and on every device callback fills the output
//! buffer by (1) draining pending music commands, (2) generating a music
//! chunk from the OPL driver, (3) locking the sfx mixer to sum and
//! band-limit active voices on top of it, (4) clamping to i16.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;
use log::{info, warn};

use crate::engine::{AudioError, MusicCommand, MusicShared};
use crate::opl::OplDriver;

/// Diagnostic logging cadence on the audio thread: once every this many
/// callbacks, never per-sample or per-event. Mirrors the teacher's
/// `frame_counter % 250` diagnostic gating in `sid_emulated.rs`.
const DIAGNOSTIC_INTERVAL: u64 = 250;

struct MixState {
    opl: OplDriver,
    sfx: Arc<Mutex<super::SfxState>>,
    music: Arc<MusicShared>,
    music_rx: Receiver<MusicCommand>,
    music_scratch: Vec<i16>,
    max_frames: usize,
    callback_count: u64,
}

impl MixState {
    /// Fills `out` (interleaved stereo i16) for one device callback. Never
    /// allocates: `music_scratch` is sized once at construction to
    /// `max_frames`, and a request for more frames than that is the
    /// buffer-overflow case the spec calls out — it degrades to silence
    /// rather than growing the buffer mid-callback.
    fn mix(&mut self, out: &mut [i16]) {
        self.callback_count += 1;
        let frames = out.len() / 2;

        if frames > self.max_frames {
            warn!(
                "mixer callback requested {frames} frames, more than the {} preallocated; returning silence",
                self.max_frames
            );
            out.fill(0);
            return;
        }

        while let Ok(cmd) = self.music_rx.try_recv() {
            match cmd {
                MusicCommand::Play { score, score_start, loop_enabled } => {
                    self.opl.start(score, score_start, loop_enabled);
                    self.music.playing.store(true, Ordering::Release);
                }
                MusicCommand::Stop => {
                    self.opl.stop();
                    self.music.playing.store(false, Ordering::Release);
                }
            }
        }

        let music_buf = &mut self.music_scratch[..out.len()];
        let paused = self.music.paused.load(Ordering::Acquire);
        if self.opl.is_playing() && !paused {
            let scale = self.music.volume.load(Ordering::Acquire) as f32 / 128.0;
            self.opl.generate_resampled(music_buf, scale);
            if !self.opl.is_playing() {
                // the score reached its end without looping
                self.music.playing.store(false, Ordering::Release);
            }
        } else {
            music_buf.fill(0);
        }

        out.copy_from_slice(music_buf);

        {
            let mut sfx = self.sfx.lock().unwrap();
            sfx.mixer.mix_into(out);
        }

        if self.callback_count % DIAGNOSTIC_INTERVAL == 0 {
            log::trace!(
                "callback #{}: {} frames, {} sfx voices active",
                self.callback_count,
                frames,
                self.sfx.lock().unwrap().mixer.active_voice_count()
            );
        }
    }
}

/// Opens the default output device and spawns the dedicated thread that
/// owns it, running the mix loop on every callback until `shutdown` is
/// set. Blocks until the device is open and the stream is playing (or
/// failed), so `AudioEngine::init` can surface a device error instead of
/// discovering it later.
pub(super) fn spawn_audio_thread(
    opl: OplDriver,
    sfx: Arc<Mutex<super::SfxState>>,
    music: Arc<MusicShared>,
    music_rx: Receiver<MusicCommand>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    max_frames: usize,
) -> Result<(), AudioError> {
    let (result_tx, result_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);

    thread::Builder::new()
        .name("brimstone-audio".into())
        .spawn(move || {
            let result = (|| -> Result<cpal::Stream, String> {
                let host = cpal::default_host();
                let device = host.default_output_device().ok_or_else(|| "no audio output device found".to_string())?;
                let config = device.default_output_config().map_err(|e| format!("no default output config: {e}"))?;
                let sample_format = config.sample_format();
                let stream_config: cpal::StreamConfig = config.into();

                info!(
                    "opening audio device '{}' at {} Hz, format {:?}",
                    device.name().unwrap_or_else(|_| "unknown".into()),
                    stream_config.sample_rate.0,
                    sample_format
                );

                let state = MixState {
                    opl,
                    sfx,
                    music,
                    music_rx,
                    music_scratch: vec![0i16; max_frames * 2],
                    max_frames,
                    callback_count: 0,
                };

                let err_fn = |err| warn!("audio stream error: {err}");

                let stream = match sample_format {
                    cpal::SampleFormat::I16 => device
                        .build_output_stream(
                            &stream_config,
                            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| state.mix(data),
                            err_fn,
                            None,
                        )
                        .map_err(|e| format!("build_output_stream (i16) failed: {e}"))?,
                    _ => {
                        // Most devices negotiate f32 by default; convert our
                        // i16 mix into it through a buffer sized once here,
                        // never reallocated on the callback's hot path.
                        let mut scratch = vec![0i16; max_frames * 2];
                        device
                            .build_output_stream(
                                &stream_config,
                                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                    let needed = data.len();
                                    if needed > scratch.len() {
                                        warn!(
                                            "device requested {needed} samples, more than the {} preallocated; returning silence",
                                            scratch.len()
                                        );
                                        data.fill(0.0);
                                        return;
                                    }
                                    state.mix(&mut scratch[..needed]);
                                    for (dst, src) in data.iter_mut().zip(scratch[..needed].iter()) {
                                        *dst = *src as f32 / 32768.0;
                                    }
                                },
                                err_fn,
                                None,
                            )
                            .map_err(|e| format!("build_output_stream (f32) failed: {e}"))?
                    }
                };

                stream.play().map_err(|e| format!("stream.play() failed: {e}"))?;
                Ok(stream)
            })();

            match result {
                Ok(stream) => {
                    let _ = result_tx.send(Ok(()));
                    while !shutdown.load(Ordering::Relaxed) {
                        thread::park_timeout(std::time::Duration::from_millis(100));
                    }
                    drop(stream);
                    info!("audio thread exiting");
                }
                Err(e) => {
                    let _ = result_tx.send(Err(e));
                }
            }
        })
        .map_err(|e| AudioError::Device(format!("spawn audio thread: {e}")))?;

    result_rx
        .recv()
        .map_err(|_| AudioError::Device("audio thread died before reporting status".into()))?
        .map_err(AudioError::Device)
}
