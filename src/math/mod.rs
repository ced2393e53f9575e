//! Numerical building blocks: least squares, adaptive ODE integration and
//! box-constrained minimization.

pub mod ols;
pub mod optimize;
pub mod rk45;

pub use ols::*;
pub use optimize::*;
pub use rk45::*;
