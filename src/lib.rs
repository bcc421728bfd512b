mod common;
mod diagnostics;
mod filter;
mod hessian;
mod ipm;
mod iterate;
mod linesearch;
mod linsol;
mod math;
mod matrix;
mod qp;
mod qpbuild;
mod restoration;
mod sqp;
#[cfg(test)]
mod tests;
mod traits;

pub use common::*;
pub use diagnostics::*;
pub use filter::Filter;
pub use hessian::{BlockHessian, HessianSelector, UpdateStats};
pub use ipm::IpmOptions;
pub use iterate::{Iterate, StepHistory};
pub use math::*;
pub use matrix::*;
pub use qp::InteriorPointQp;
pub use qpbuild::*;
pub use restoration::RestorationProblem;
pub use sqp::{sqp, SqpMethod};
pub use traits::*;
