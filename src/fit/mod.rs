//! Parameter estimation against measured plates.

pub mod fitter;

pub use fitter::*;
