//! Unit tags and boundary conversions.
//!
//! Values travel between components in canonical units (V, A, Ω, W, kg, m,
//! deg, rev/min, m/s, kg/m³). Configuration values arrive with a unit tag and
//! are converted once through `uom`; the only conversions inside the model are
//! the explicit ones below (motor rev/min into rev/s, diameter m into inch).

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use uom::si::f64::{
    Angle, AngularVelocity, ElectricCurrent, ElectricPotential, ElectricalResistance, Length, Mass,
    MassDensity, Velocity,
};
use uom::si::{
    angle, angular_velocity, electric_current, electric_potential, electrical_resistance, length,
    mass, mass_density, velocity,
};

use crate::error::{PropulsionError, PropulsionResult};

/// Physical kind of a configured quantity; selects the canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    Length,
    Velocity,
    Mass,
    Angle,
    AngularVelocity,
    Current,
    Voltage,
    Resistance,
    Density,
    Dimensionless,
}

impl QuantityKind {
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            QuantityKind::Length => "m",
            QuantityKind::Velocity => "m/s",
            QuantityKind::Mass => "kg",
            QuantityKind::Angle => "deg",
            QuantityKind::AngularVelocity => "rpm",
            QuantityKind::Current => "A",
            QuantityKind::Voltage => "V",
            QuantityKind::Resistance => "ohm",
            QuantityKind::Density => "kg/m**3",
            QuantityKind::Dimensionless => "",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            QuantityKind::Length => "length",
            QuantityKind::Velocity => "velocity",
            QuantityKind::Mass => "mass",
            QuantityKind::Angle => "angle",
            QuantityKind::AngularVelocity => "angular velocity",
            QuantityKind::Current => "current",
            QuantityKind::Voltage => "voltage",
            QuantityKind::Resistance => "resistance",
            QuantityKind::Density => "density",
            QuantityKind::Dimensionless => "dimensionless",
        }
    }
}

/// Converts `value` expressed in `unit` into the canonical unit of `kind`.
pub fn to_canonical(kind: QuantityKind, value: f64, unit: &str) -> PropulsionResult<f64> {
    let unit = unit.trim();
    let converted = match kind {
        QuantityKind::Length => match unit {
            "m" => Some(Length::new::<length::meter>(value)),
            "cm" => Some(Length::new::<length::centimeter>(value)),
            "mm" => Some(Length::new::<length::millimeter>(value)),
            "in" | "inch" => Some(Length::new::<length::inch>(value)),
            "ft" => Some(Length::new::<length::foot>(value)),
            _ => None,
        }
        .map(|q| q.get::<length::meter>()),
        QuantityKind::Velocity => match unit {
            "m/s" => Some(Velocity::new::<velocity::meter_per_second>(value)),
            "ft/s" => Some(Velocity::new::<velocity::foot_per_second>(value)),
            "km/h" => Some(Velocity::new::<velocity::kilometer_per_hour>(value)),
            "mi/h" | "mph" => Some(Velocity::new::<velocity::mile_per_hour>(value)),
            _ => None,
        }
        .map(|q| q.get::<velocity::meter_per_second>()),
        QuantityKind::Mass => match unit {
            "kg" => Some(Mass::new::<mass::kilogram>(value)),
            "g" => Some(Mass::new::<mass::gram>(value)),
            "lb" | "lbm" => Some(Mass::new::<mass::pound>(value)),
            "oz" => Some(Mass::new::<mass::ounce>(value)),
            _ => None,
        }
        .map(|q| q.get::<mass::kilogram>()),
        QuantityKind::Angle => match unit {
            "deg" => Some(Angle::new::<angle::degree>(value)),
            "rad" => Some(Angle::new::<angle::radian>(value)),
            _ => None,
        }
        .map(|q| q.get::<angle::degree>()),
        QuantityKind::AngularVelocity => match unit {
            "rpm" | "rev/min" => Some(AngularVelocity::new::<angular_velocity::revolution_per_minute>(value)),
            "rev/s" => Some(AngularVelocity::new::<angular_velocity::radian_per_second>(value * TAU)),
            "rad/s" => Some(AngularVelocity::new::<angular_velocity::radian_per_second>(value)),
            _ => None,
        }
        .map(|q| q.get::<angular_velocity::revolution_per_minute>()),
        QuantityKind::Current => match unit {
            "A" => Some(ElectricCurrent::new::<electric_current::ampere>(value)),
            "mA" => Some(ElectricCurrent::new::<electric_current::milliampere>(value)),
            _ => None,
        }
        .map(|q| q.get::<electric_current::ampere>()),
        QuantityKind::Voltage => match unit {
            "V" => Some(ElectricPotential::new::<electric_potential::volt>(value)),
            "mV" => Some(ElectricPotential::new::<electric_potential::millivolt>(value)),
            _ => None,
        }
        .map(|q| q.get::<electric_potential::volt>()),
        QuantityKind::Resistance => match unit {
            "ohm" | "Ω" => Some(ElectricalResistance::new::<electrical_resistance::ohm>(value)),
            "mohm" => Some(ElectricalResistance::new::<electrical_resistance::milliohm>(value)),
            _ => None,
        }
        .map(|q| q.get::<electrical_resistance::ohm>()),
        QuantityKind::Density => match unit {
            "kg/m**3" | "kg/m^3" | "kg/m3" => {
                Some(MassDensity::new::<mass_density::kilogram_per_cubic_meter>(value))
            }
            "g/cm**3" | "g/cm^3" => Some(MassDensity::new::<mass_density::gram_per_cubic_centimeter>(value)),
            _ => None,
        }
        .map(|q| q.get::<mass_density::kilogram_per_cubic_meter>()),
        QuantityKind::Dimensionless => match unit {
            "" | "-" | "none" => Some(value),
            _ => None,
        },
    };

    converted.ok_or_else(|| PropulsionError::UnknownUnit {
        unit: unit.to_string(),
        kind: kind.name(),
    })
}

/// Inverse of [`to_canonical`], used to report bounds and results in the
/// units they were configured with.
pub fn from_canonical(kind: QuantityKind, value: f64, unit: &str) -> PropulsionResult<f64> {
    let per_unit = to_canonical(kind, 1.0, unit)?;
    Ok(value / per_unit)
}

/// Motor speed crossing into the aerodynamic chain: rev/min to rev/s.
pub fn rpm_to_rev_per_second(rpm: f64) -> f64 {
    AngularVelocity::new::<angular_velocity::revolution_per_minute>(rpm)
        .get::<angular_velocity::radian_per_second>()
        / TAU
}

/// d(rev/s) / d(rev/min).
pub fn rev_per_second_per_rpm() -> f64 {
    rpm_to_rev_per_second(1.0)
}

/// Diameter crossing into the RPM constraint: m to inch.
pub fn meters_to_inches(meters: f64) -> f64 {
    Length::new::<length::meter>(meters).get::<length::inch>()
}

/// d(inch) / d(m).
pub fn inches_per_meter() -> f64 {
    meters_to_inches(1.0)
}
