//! `plate-fit` library crate.
//!
//! Growth-and-diffusion modelling of microbial cultures arranged on a
//! rectangular plate: simulate coupled culture growth under nutrient
//! diffusion, and estimate model parameters from measured cell amounts.
//!
//! The typical round trip is [`guess::guess`] for a starting point, then
//! [`fit::fit`] for the estimate, attached back onto the [`domain::Plate`].

pub mod domain;
pub mod error;
pub mod fit;
pub mod guess;
pub mod math;
pub mod models;
pub mod sim;
pub mod topology;
