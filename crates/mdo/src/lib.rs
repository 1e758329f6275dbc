//! Coupled propulsion analysis and design optimization
//!
//! Wires the electrical and aerodynamic components into a
//! [`PropulsionGroup`] that solves the per-cell power balance for the drawn
//! current, propagates exact total derivatives to the design variables, and
//! exposes the result to optimizers through [`OptimizationOracle`].

pub mod config;
pub mod design;
pub mod group;
pub mod observer;
pub mod optimize;
pub mod residual;

pub use config::{DesignConfig, InputConfig, PropulsionConfig, PropulsionInputs, Quantity, QuantityValue, SolverConfig};
pub use design::{DesignEntry, DesignParameter, DesignSpace, DesignVariable};
pub use group::{CellTangent, InputSeed, PropulsionGroup, PropulsionSolution, Sensitivities};
pub use observer::{History, IterationObserver, IterationRecord, LogObserver, NoObserver};
pub use optimize::{
    BarrierOptimizer, Evaluation, Gradient, OptimizationOracle, OptimizationResult, OptimizerConfig, PropulsionOracle,
    Termination,
};
pub use residual::{PowerBalance, PowerResiduals};
