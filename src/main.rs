//! Thin terminal driver for `brimstone_audio`: loads a standalone GENMIDI
//! bank, a MUS score, and optionally a raw sfx lump from the command
//! line, starts them playing through the real output device, and exits
//! after a fixed duration. Exercises the public engine API the way a host
//! game loop would, without any graphics or input layer of its own.

use std::env;
use std::fs;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use log::{error, info};

use brimstone_audio::config::Config;
use brimstone_audio::mus::InstrumentBank;
use brimstone_audio::engine::AudioEngine;

const GENMIDI_HEADER_LEN: usize = 8;

fn usage(program: &str) -> String {
    format!("usage: {program} <genmidi.op2> <song.mus> [sfx.lmp]")
}

fn run() -> Result<(), String> {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "brimstone-demo".to_string());
    let genmidi_path = args.next().ok_or_else(|| usage(&program))?;
    let mus_path = args.next().ok_or_else(|| usage(&program))?;
    let sfx_path = args.next();

    let genmidi = fs::read(&genmidi_path).map_err(|e| format!("reading {genmidi_path}: {e}"))?;
    if genmidi.len() < GENMIDI_HEADER_LEN {
        return Err(format!("{genmidi_path} is too short to be a GENMIDI lump"));
    }
    let bank = InstrumentBank::parse(&genmidi[GENMIDI_HEADER_LEN..]).map_err(|e| e.to_string())?;

    let song = fs::read(&mus_path).map_err(|e| format!("reading {mus_path}: {e}"))?;

    let config = Config::load();
    let engine = AudioEngine::init(&config, bank).map_err(|e| e.to_string())?;

    if let Some(path) = &sfx_path {
        let lump = fs::read(path).map_err(|e| format!("reading {path}: {e}"))?;
        let sound_id = engine.register_sfx(path, Some(&lump));
        let handle = engine.start_sound(sound_id, 127, 128, 128);
        info!("started demo sfx '{path}' as sound {sound_id}, handle={handle:?}");
    }

    let song_handle = engine.register_song(song);
    engine.set_music_volume(config.default_music_volume);
    engine.play_song(song_handle, true).map_err(|e| e.to_string())?;
    info!("playing song, loop enabled; sleeping 10s before shutdown");

    thread::sleep(Duration::from_secs(10));

    engine.stop_song().map_err(|e| e.to_string())?;
    engine.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
