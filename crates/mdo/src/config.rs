//! Problem configuration.
//!
//! Every physical input is given with a unit tag and either one value
//! (broadcast) or one value per entry of its axis. Resolving a
//! [`PropulsionConfig`] converts everything to canonical units once.

use std::path::Path;

use aero::SurrogatePair;
use aero::surrogate::DEFAULT_DIR;
use electrical::EscCoefficients;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use simcore::units::to_canonical;
use simcore::{
    BoundsEnforceLineSearch, GridShape, NewtonConfig, PropulsionError, PropulsionResult, QuantityKind,
};

use crate::design::DesignVariable;
use crate::optimize::OptimizerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantityValue {
    Scalar(f64),
    Array(Vec<f64>),
}

impl QuantityValue {
    fn as_slice(&self) -> &[f64] {
        match self {
            QuantityValue::Scalar(v) => std::slice::from_ref(v),
            QuantityValue::Array(v) => v,
        }
    }
}

/// A configured value with its unit tag; an absent tag means canonical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: QuantityValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Quantity {
    pub fn scalar(value: f64, units: &str) -> Self {
        Quantity {
            value: QuantityValue::Scalar(value),
            units: Some(units.to_string()),
        }
    }

    pub fn array(values: Vec<f64>, units: &str) -> Self {
        Quantity {
            value: QuantityValue::Array(values),
            units: Some(units.to_string()),
        }
    }

    pub fn dimensionless(value: f64) -> Self {
        Quantity {
            value: QuantityValue::Scalar(value),
            units: None,
        }
    }

    fn unit_or(&self, kind: QuantityKind) -> &str {
        self.units.as_deref().unwrap_or(kind.canonical_unit())
    }

    /// Canonical values broadcast to `len` entries.
    pub fn resolve(&self, name: &'static str, kind: QuantityKind, len: usize) -> PropulsionResult<DVector<f64>> {
        let unit = self.unit_or(kind);
        let values = GridShape::broadcast(name, self.value.as_slice(), len)?;
        let mut out = DVector::zeros(len);
        for (i, v) in values.iter().enumerate() {
            out[i] = to_canonical(kind, *v, unit)?;
        }
        Ok(out)
    }

    pub fn resolve_scalar(&self, name: &'static str, kind: QuantityKind) -> PropulsionResult<f64> {
        Ok(self.resolve(name, kind, 1)?[0])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub battery_voltage_supply: Quantity,
    pub battery_resistance: Quantity,
    pub battery_mass: Quantity,
    pub throttle: Quantity,
    pub velocity: Quantity,
    pub motor_idle_current: Quantity,
    pub motor_mass: Quantity,
    #[serde(rename = "D_prop")]
    pub d_prop: Quantity,
    pub pitch: Quantity,
    pub rho: Quantity,
    pub num_motors: Quantity,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            battery_voltage_supply: Quantity::scalar(22.2, "V"),
            battery_resistance: Quantity::scalar(0.012, "ohm"),
            battery_mass: Quantity::scalar(0.71, "lb"),
            throttle: Quantity::dimensionless(0.8),
            velocity: Quantity::scalar(45.0, "ft/s"),
            motor_idle_current: Quantity::scalar(2.15, "A"),
            motor_mass: Quantity::scalar(0.5234, "kg"),
            d_prop: Quantity::scalar(14.0, "in"),
            pitch: Quantity::scalar(5.0, "deg"),
            rho: Quantity::scalar(1.225, "kg/m**3"),
            num_motors: Quantity::dimensionless(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub newton: NewtonConfig,
    pub line_search: BoundsEnforceLineSearch,
    /// A, cold-start value of the solved current
    pub initial_current: f64,
    /// A
    pub current_lower: f64,
    /// A
    pub current_upper: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            newton: NewtonConfig::default(),
            line_search: BoundsEnforceLineSearch::default(),
            initial_current: 30.0,
            current_lower: 1e-3,
            current_upper: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    pub variables: Vec<DesignVariable>,
    pub optimizer: OptimizerConfig,
}

impl Default for DesignConfig {
    fn default() -> Self {
        DesignConfig {
            variables: DesignVariable::defaults(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropulsionConfig {
    pub shape: GridShape,
    pub inputs: InputConfig,
    pub esc: EscCoefficients,
    pub solver: SolverConfig,
    pub design: DesignConfig,
    /// Directory holding `thrust_sm.json` / `power_sm.json`. When unset the
    /// files are looked up in `surrogate_models/`, falling back to the
    /// built-in fits if they are not there.
    pub surrogate_dir: Option<String>,
}

impl Default for PropulsionConfig {
    fn default() -> Self {
        PropulsionConfig {
            shape: GridShape::default(),
            inputs: InputConfig::default(),
            esc: EscCoefficients::default(),
            solver: SolverConfig::default(),
            design: DesignConfig::default(),
            surrogate_dir: None,
        }
    }
}

impl PropulsionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> PropulsionResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> PropulsionResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> PropulsionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> PropulsionResult<()> {
        self.shape.validate()?;
        let solver = &self.solver;
        if !(solver.current_lower < solver.current_upper) {
            return Err(PropulsionError::Config(format!(
                "current bounds [{}, {}] are empty",
                solver.current_lower, solver.current_upper
            )));
        }
        if solver.newton.max_iterations == 0 {
            return Err(PropulsionError::Config("newton.max_iterations must be >= 1".to_string()));
        }
        for variable in &self.design.variables {
            variable.validate()?;
        }
        self.design.optimizer.validate()
    }

    /// Converts the configured inputs to canonical units on this shape.
    pub fn resolve_inputs(&self) -> PropulsionResult<PropulsionInputs> {
        let shape = self.shape;
        let cfg = &self.inputs;
        let inputs = PropulsionInputs {
            battery_voltage_supply: cfg.battery_voltage_supply.resolve(
                "battery_voltage_supply",
                QuantityKind::Voltage,
                shape.flight_missions,
            )?,
            battery_mass: cfg.battery_mass.resolve("battery_mass", QuantityKind::Mass, shape.flight_missions)?,
            battery_resistance: cfg.battery_resistance.resolve(
                "battery_resistance",
                QuantityKind::Resistance,
                shape.flight_missions,
            )?,
            throttle: cfg.throttle.resolve("throttle", QuantityKind::Dimensionless, shape.cells())?,
            velocity: cfg.velocity.resolve("velocity", QuantityKind::Velocity, shape.cells())?,
            motor_idle_current: cfg.motor_idle_current.resolve_scalar("motor_idle_current", QuantityKind::Current)?,
            motor_mass: cfg.motor_mass.resolve_scalar("motor_mass", QuantityKind::Mass)?,
            d_prop: cfg.d_prop.resolve("D_prop", QuantityKind::Length, shape.props)?,
            pitch: cfg.pitch.resolve("pitch", QuantityKind::Angle, shape.props)?,
            rho: cfg.rho.resolve_scalar("rho", QuantityKind::Density)?,
            num_motors: cfg.num_motors.resolve_scalar("num_motors", QuantityKind::Dimensionless)?,
        };
        inputs.check_shape(&shape)?;
        Ok(inputs)
    }

    pub fn surrogates(&self) -> PropulsionResult<SurrogatePair> {
        match &self.surrogate_dir {
            Some(dir) => SurrogatePair::load(dir),
            None => SurrogatePair::load_or_builtin(DEFAULT_DIR),
        }
    }
}

/// Fixed and design inputs of one evaluation, in canonical units.
#[derive(Debug, Clone, PartialEq)]
pub struct PropulsionInputs {
    /// V, per mission
    pub battery_voltage_supply: DVector<f64>,
    /// kg, per mission
    pub battery_mass: DVector<f64>,
    /// Ω, per mission
    pub battery_resistance: DVector<f64>,
    /// per cell
    pub throttle: DVector<f64>,
    /// m/s, per cell
    pub velocity: DVector<f64>,
    /// A
    pub motor_idle_current: f64,
    /// kg
    pub motor_mass: f64,
    /// m, per propeller
    pub d_prop: DVector<f64>,
    /// deg, per propeller
    pub pitch: DVector<f64>,
    /// kg/m³
    pub rho: f64,
    pub num_motors: f64,
}

impl PropulsionInputs {
    pub fn check_shape(&self, shape: &GridShape) -> PropulsionResult<()> {
        shape.check_missions("battery_voltage_supply", &self.battery_voltage_supply)?;
        shape.check_missions("battery_mass", &self.battery_mass)?;
        shape.check_missions("battery_resistance", &self.battery_resistance)?;
        shape.check_cells("throttle", &self.throttle)?;
        shape.check_cells("velocity", &self.velocity)?;
        shape.check_props("D_prop", &self.d_prop)?;
        shape.check_props("pitch", &self.pitch)
    }
}
