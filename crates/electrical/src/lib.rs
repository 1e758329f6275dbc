//! Electrical side of the propulsion chain
//!
//! Battery, electronic speed controller and motor models, each an
//! [`simcore::ExplicitComponent`] evaluated per (condition, mission) cell.

pub mod analysis;
pub mod battery;
pub mod esc;
pub mod motor;

pub use analysis::{BatterySagCurve, EscEfficiencyCurve, MotorSpeedLine};
pub use battery::{Battery, BatteryConstant, BatteryInputs, BatteryOutputs};
pub use esc::{ElectronicSpeedController, EscCoefficients, EscInputs, EscOutputs};
pub use motor::{Motor, MotorFamily, MotorInputs, MotorOutputs};
