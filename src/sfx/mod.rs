//! PCM sound-effect playback: sample cache, voice table, and mixing.

pub mod cache;
pub mod mixer;
pub mod tables;

pub use cache::{CachedSfx, SfxBank};
pub use mixer::{SfxHandle, SfxMixer, NUM_CHANNELS};
