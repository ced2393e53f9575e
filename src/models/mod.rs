//! Growth-law model variants and their rate functions.

pub mod model;

pub use model::*;
