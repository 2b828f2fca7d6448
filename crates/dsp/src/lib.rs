//! Sample-format DSP for the transmit path.

pub mod convert;

pub use convert::{Converter, ConverterKind, GROUP_SAMPLES};
