//! Persistent, host-overridable tuning knobs for the audio engine: output
//! sample rate, mix chunk size, the PCM biquad's cutoff/Q, the OPL
//! resampler's cutoff, and default sfx/music volume.
//!
//! Stored as JSON in `<config_dir>/brimstone-audio/config.json`, the same
//! directory-resolution convention the teacher's config module uses, but
//! parsed with `serde_json` instead of by hand: a handful of scalar
//! fields is exactly the case that crate is for, and it is already a
//! dependency of the aligned stack.

use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output device sample rate in Hz. The spec targets 44.1 kHz; the
    /// engine's DSP stages (biquad, resampler) are all parameterized by
    /// this value rather than hard-coded, but higher rates are outside
    /// the spec's supported range.
    pub output_sample_rate_hz: u32,
    /// Number of stereo frames the mixer callback is asked to fill per
    /// invocation. Also the padding granularity for cached sfx samples.
    pub mix_chunk_frames: usize,
    /// Cutoff frequency of the per-channel PCM low-pass biquad.
    pub pcm_biquad_cutoff_hz: f32,
    /// Q factor of the PCM low-pass biquad.
    pub pcm_biquad_q: f32,
    /// Cutoff frequency of the OPL downsampler's 1-pole anti-alias filter.
    pub opl_resampler_cutoff_hz: f32,
    /// Default sfx volume (0..127) applied before any per-call override.
    pub default_sfx_volume: u8,
    /// Default music volume (0..127), fed through the same squared curve
    /// as a per-call `set_music_volume`.
    pub default_music_volume: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output_sample_rate_hz: 44_100,
            mix_chunk_frames: 512,
            pcm_biquad_cutoff_hz: 4_400.0,
            pcm_biquad_q: 0.6,
            opl_resampler_cutoff_hz: 22_050.0,
            default_sfx_volume: 127,
            default_music_volume: 127,
        }
    }
}

impl Config {
    /// Path to the config file, or `None` if the platform config
    /// directory can't be determined (e.g. `$HOME`/`%APPDATA%` unset).
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    /// Load config from disk, falling back to defaults on any error
    /// (missing file, unreadable, malformed JSON) — a host engine should
    /// never fail to start sound because of a bad config file.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("config at {} is malformed ({e}), using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("cannot read config at {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Save config to disk, creating the config directory if needed.
    pub fn save(&self) {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return,
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!("cannot save config to {}: {e}", path.display());
                } else {
                    info!("config saved to {}", path.display());
                }
            }
            Err(e) => warn!("cannot serialize config: {e}"),
        }
    }
}

/// Application config directory, following the same per-platform layout
/// convention as the teacher (`~/Library/Application Support/<name>` on
/// macOS, `%APPDATA%/<name>` on Windows, `~/.config/<name>` elsewhere).
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("brimstone-audio"),
        )
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").ok()?;
        Some(PathBuf::from(appdata).join("brimstone-audio"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".config").join("brimstone-audio"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_target_rate() {
        assert_eq!(Config::default().output_sample_rate_hz, 44_100);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn malformed_json_falls_back_to_defaults_without_panicking() {
        let parsed: Result<Config, _> = serde_json::from_str("{ not json");
        assert!(parsed.is_err());
    }
}
