//! Design variables and the flattened design vector.
//!
//! The optimizer sees one vector in configuration units (inch, deg, kg, A,
//! ...). Each variable contributes as many entries as its axis has: one for
//! the motor scalars, one per propeller for geometry, one per mission for
//! battery mass and one per cell for throttle and velocity.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use simcore::units::{from_canonical, to_canonical};
use simcore::{GridShape, PropulsionError, PropulsionResult, QuantityKind};

use crate::config::PropulsionInputs;
use crate::group::InputSeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DesignParameter {
    #[serde(rename = "D_prop")]
    DProp,
    #[serde(rename = "pitch")]
    Pitch,
    #[serde(rename = "motor_mass")]
    MotorMass,
    #[serde(rename = "motor_idle_current")]
    MotorIdleCurrent,
    #[serde(rename = "battery_mass")]
    BatteryMass,
    #[serde(rename = "throttle")]
    Throttle,
    #[serde(rename = "velocity")]
    Velocity,
}

impl DesignParameter {
    pub fn name(&self) -> &'static str {
        match self {
            DesignParameter::DProp => "D_prop",
            DesignParameter::Pitch => "pitch",
            DesignParameter::MotorMass => "motor_mass",
            DesignParameter::MotorIdleCurrent => "motor_idle_current",
            DesignParameter::BatteryMass => "battery_mass",
            DesignParameter::Throttle => "throttle",
            DesignParameter::Velocity => "velocity",
        }
    }

    pub fn kind(&self) -> QuantityKind {
        match self {
            DesignParameter::DProp => QuantityKind::Length,
            DesignParameter::Pitch => QuantityKind::Angle,
            DesignParameter::MotorMass | DesignParameter::BatteryMass => QuantityKind::Mass,
            DesignParameter::MotorIdleCurrent => QuantityKind::Current,
            DesignParameter::Throttle => QuantityKind::Dimensionless,
            DesignParameter::Velocity => QuantityKind::Velocity,
        }
    }

    /// Number of design-vector entries this parameter occupies.
    pub fn len(&self, shape: &GridShape) -> usize {
        match self {
            DesignParameter::DProp | DesignParameter::Pitch => shape.props,
            DesignParameter::MotorMass | DesignParameter::MotorIdleCurrent => 1,
            DesignParameter::BatteryMass => shape.flight_missions,
            DesignParameter::Throttle | DesignParameter::Velocity => shape.cells(),
        }
    }

    /// Whether entry `index` of this parameter feeds `cell`.
    pub fn touches(&self, shape: &GridShape, index: usize, cell: usize) -> bool {
        match self {
            DesignParameter::DProp | DesignParameter::Pitch => shape.prop_of(cell) == index,
            DesignParameter::MotorMass | DesignParameter::MotorIdleCurrent => true,
            DesignParameter::BatteryMass => shape.mission_of(cell) == index,
            DesignParameter::Throttle | DesignParameter::Velocity => cell == index,
        }
    }

    fn read(&self, inputs: &PropulsionInputs, index: usize) -> f64 {
        match self {
            DesignParameter::DProp => inputs.d_prop[index],
            DesignParameter::Pitch => inputs.pitch[index],
            DesignParameter::MotorMass => inputs.motor_mass,
            DesignParameter::MotorIdleCurrent => inputs.motor_idle_current,
            DesignParameter::BatteryMass => inputs.battery_mass[index],
            DesignParameter::Throttle => inputs.throttle[index],
            DesignParameter::Velocity => inputs.velocity[index],
        }
    }

    fn write(&self, inputs: &mut PropulsionInputs, index: usize, value: f64) {
        match self {
            DesignParameter::DProp => inputs.d_prop[index] = value,
            DesignParameter::Pitch => inputs.pitch[index] = value,
            DesignParameter::MotorMass => inputs.motor_mass = value,
            DesignParameter::MotorIdleCurrent => inputs.motor_idle_current = value,
            DesignParameter::BatteryMass => inputs.battery_mass[index] = value,
            DesignParameter::Throttle => inputs.throttle[index] = value,
            DesignParameter::Velocity => inputs.velocity[index] = value,
        }
    }

    /// Unit seed for this parameter in canonical units.
    fn seed(&self, scale: f64) -> InputSeed {
        let mut seed = InputSeed::default();
        match self {
            DesignParameter::DProp => seed.diameter = scale,
            DesignParameter::Pitch => seed.pitch = scale,
            DesignParameter::MotorMass => seed.motor_mass = scale,
            DesignParameter::MotorIdleCurrent => seed.motor_idle_current = scale,
            DesignParameter::BatteryMass => seed.battery_mass = scale,
            DesignParameter::Throttle => seed.throttle = scale,
            DesignParameter::Velocity => seed.velocity = scale,
        }
        seed
    }
}

/// A design variable with bounds in its configured units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignVariable {
    pub name: DesignParameter,
    pub lower: f64,
    pub upper: f64,
    pub units: String,
}

impl DesignVariable {
    pub fn new(name: DesignParameter, lower: f64, upper: f64, units: &str) -> Self {
        DesignVariable {
            name,
            lower,
            upper,
            units: units.to_string(),
        }
    }

    /// Diameter, pitch, motor mass and idle current with the bounds of the
    /// reference thrust study.
    pub fn defaults() -> Vec<DesignVariable> {
        vec![
            DesignVariable::new(DesignParameter::MotorIdleCurrent, 1.0, 3.6, "A"),
            DesignVariable::new(DesignParameter::MotorMass, 0.288, 1.701, "kg"),
            DesignVariable::new(DesignParameter::DProp, 12.0, 23.0, "in"),
            DesignVariable::new(DesignParameter::Pitch, 3.0, 15.0, "deg"),
        ]
    }

    /// Optional extras: battery mass, throttle and airspeed.
    pub fn battery_mass() -> Self {
        DesignVariable::new(DesignParameter::BatteryMass, 0.1, 1.0, "kg")
    }

    pub fn throttle() -> Self {
        DesignVariable::new(DesignParameter::Throttle, 0.1, 1.0, "")
    }

    pub fn velocity() -> Self {
        DesignVariable::new(DesignParameter::Velocity, 1.0, 35.0, "m/s")
    }

    pub fn validate(&self) -> PropulsionResult<()> {
        if !(self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper) {
            return Err(PropulsionError::Config(format!(
                "design variable {} has invalid bounds [{}, {}]",
                self.name.name(),
                self.lower,
                self.upper
            )));
        }
        // Surfaces an unknown unit tag at load time.
        self.canonical_per_unit()?;
        Ok(())
    }

    /// Canonical value of one configured unit (all supported units are linear).
    pub fn canonical_per_unit(&self) -> PropulsionResult<f64> {
        to_canonical(self.name.kind(), 1.0, &self.units)
    }
}

/// One entry of the flattened design vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesignEntry {
    pub variable: usize,
    pub name: DesignParameter,
    pub index: usize,
}

impl DesignEntry {
    /// Human-readable label, e.g. `D_prop[1]`.
    pub fn label(&self) -> String {
        format!("{}[{}]", self.name.name(), self.index)
    }
}

/// The design variables laid out over a grid shape.
#[derive(Debug, Clone)]
pub struct DesignSpace {
    pub shape: GridShape,
    pub variables: Vec<DesignVariable>,
    entries: Vec<DesignEntry>,
    scales: Vec<f64>,
}

impl DesignSpace {
    pub fn new(shape: GridShape, variables: Vec<DesignVariable>) -> PropulsionResult<Self> {
        let mut entries = Vec::new();
        let mut scales = Vec::new();
        for (v, variable) in variables.iter().enumerate() {
            variable.validate()?;
            if variables[..v].iter().any(|other| other.name == variable.name) {
                return Err(PropulsionError::Config(format!(
                    "design variable {} declared twice",
                    variable.name.name()
                )));
            }
            let scale = variable.canonical_per_unit()?;
            for index in 0..variable.name.len(&shape) {
                entries.push(DesignEntry {
                    variable: v,
                    name: variable.name,
                    index,
                });
                scales.push(scale);
            }
        }
        Ok(DesignSpace {
            shape,
            variables,
            entries,
            scales,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DesignEntry] {
        &self.entries
    }

    /// Label of entry `k`, or `None` past the end of the design vector.
    pub fn label(&self, k: usize) -> Option<String> {
        self.entries.get(k).map(DesignEntry::label)
    }

    pub fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let lower = DVector::from_fn(self.len(), |k, _| self.variables[self.entries[k].variable].lower);
        let upper = DVector::from_fn(self.len(), |k, _| self.variables[self.entries[k].variable].upper);
        (lower, upper)
    }

    /// Current design vector in configured units.
    pub fn read(&self, inputs: &PropulsionInputs) -> PropulsionResult<DVector<f64>> {
        let mut x = DVector::zeros(self.len());
        for (k, entry) in self.entries.iter().enumerate() {
            let variable = &self.variables[entry.variable];
            let canonical = entry.name.read(inputs, entry.index);
            x[k] = from_canonical(entry.name.kind(), canonical, &variable.units)?;
        }
        Ok(x)
    }

    /// Copy of `base` with the design vector `x` written in.
    pub fn apply(&self, base: &PropulsionInputs, x: &DVector<f64>) -> PropulsionResult<PropulsionInputs> {
        if x.len() != self.len() {
            return Err(PropulsionError::ShapeMismatch {
                quantity: "design vector",
                expected: self.len(),
                actual: x.len(),
            });
        }
        let mut inputs = base.clone();
        for (k, entry) in self.entries.iter().enumerate() {
            entry.name.write(&mut inputs, entry.index, x[k] * self.scales[k]);
        }
        Ok(inputs)
    }

    /// Seed of entry `k` at `cell`, per configured unit, or `None` when the
    /// entry does not feed that cell or does not exist.
    pub fn seed(&self, k: usize, cell: usize) -> Option<InputSeed> {
        let entry = self.entries.get(k)?;
        entry
            .name
            .touches(&self.shape, entry.index, cell)
            .then(|| entry.name.seed(self.scales[k]))
    }
}
