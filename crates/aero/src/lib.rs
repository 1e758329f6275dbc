//! Aerodynamic side of the propulsion chain
//!
//! Coefficient surrogates, the batched coefficient lookup with its
//! propeller broadcasting, dimensional propeller thrust/power and the
//! tip-speed RPM constraint.

pub mod coefficients;
pub mod constraints;
pub mod propeller;
pub mod surrogate;

pub use coefficients::{CoefficientInputs, CoefficientJacobian, CoefficientOutputs, CoefficientPartials, PropCoefficients};
pub use constraints::{RpmConstraint, RpmConstraintInputs, RpmConstraintOutputs};
pub use propeller::{Propeller, PropellerInputs, PropellerOutputs};
pub use surrogate::{CoefficientSurrogate, ResponseSurface, SurrogatePair, SurrogatePoint, TrainingBounds};
