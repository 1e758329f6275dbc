pub mod error;
pub mod grid;
pub mod linesearch;
pub mod newton;
pub mod traits;
pub mod units;

pub use error::*;
pub use grid::GridShape;
pub use linesearch::{BoundEnforcement, BoundsEnforceLineSearch, LineSearch};
pub use newton::{NewtonConfig, NewtonReport, NewtonSolver, SolveStatus};
pub use traits::*;
pub use units::QuantityKind;
