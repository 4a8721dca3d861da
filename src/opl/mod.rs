//! OPL3 chip driving: sample-accurate interleaving of MUS tick progression
//! with native-rate chip generation, resampled to the output device rate.

pub mod driver;

pub use driver::{opl_buf_size, OplDriver, OPL_CLOCK_HZ, SAMPLES_PER_TICK};
