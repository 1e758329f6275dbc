use serde::{Deserialize, Serialize};
use simcore::{ExplicitComponent, PropulsionError, PropulsionResult, require_finite, require_positive};

/// Linear capacity-from-mass fit for LiPo packs: `capacity = slope * mass + offset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryConstant {
    /// A·h per kg
    pub capacity_slope: f64,
    /// A·h
    pub capacity_offset: f64,
}

impl Default for BatteryConstant {
    fn default() -> Self {
        BatteryConstant {
            capacity_slope: 7.3,
            capacity_offset: -0.246,
        }
    }
}

impl BatteryConstant {
    /// Pack mass below which the fit predicts no capacity at all.
    pub fn zero_capacity_mass(&self) -> f64 {
        -self.capacity_offset / self.capacity_slope
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryInputs {
    /// V
    pub voltage_supply: f64,
    /// kg
    pub mass: f64,
    /// Ω
    pub resistance: f64,
    /// A, drawn by the rest of the chain
    pub current: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryOutputs {
    /// A·h
    pub nominal_capacity: f64,
    /// W·h
    pub energy: f64,
    /// V at the terminals after the internal drop
    pub voltage_out: f64,
    /// W delivered to the chain
    pub power: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Battery {
    pub constants: BatteryConstant,
}

impl Battery {
    pub fn new(constants: BatteryConstant) -> Self {
        Battery { constants }
    }

    pub fn nominal_capacity(&self, mass: f64) -> f64 {
        self.constants.capacity_slope * mass + self.constants.capacity_offset
    }
}

impl ExplicitComponent for Battery {
    type Inputs = BatteryInputs;
    type Outputs = BatteryOutputs;

    fn check_domain(&self, inputs: &BatteryInputs) -> PropulsionResult<()> {
        require_positive("battery_mass", inputs.mass)?;
        require_finite("battery_voltage_supply", inputs.voltage_supply)?;
        require_finite("battery_current", inputs.current)?;
        if !(inputs.resistance.is_finite() && inputs.resistance >= 0.0) {
            return Err(PropulsionError::DomainViolation {
                quantity: "battery_resistance",
                value: inputs.resistance,
                requirement: "must be finite and >= 0",
            });
        }
        if self.nominal_capacity(inputs.mass) <= 0.0 {
            log::warn!(
                "battery mass {:.4} kg is below {:.4} kg; capacity fit is non-physical",
                inputs.mass,
                self.constants.zero_capacity_mass()
            );
        }
        Ok(())
    }

    fn compute(&self, inputs: &BatteryInputs) -> BatteryOutputs {
        let nominal_capacity = self.nominal_capacity(inputs.mass);
        let current = inputs.current;
        BatteryOutputs {
            nominal_capacity,
            energy: inputs.voltage_supply * nominal_capacity,
            voltage_out: inputs.voltage_supply - current * inputs.resistance,
            power: current * inputs.voltage_supply - current * current * inputs.resistance,
        }
    }

    fn linearize(&self, inputs: &BatteryInputs, seed: &BatteryInputs) -> BatteryOutputs {
        let BatteryInputs {
            voltage_supply: vs,
            resistance: r,
            current: i,
            ..
        } = *inputs;
        let capacity = self.nominal_capacity(inputs.mass);
        let d_capacity = self.constants.capacity_slope * seed.mass;

        BatteryOutputs {
            nominal_capacity: d_capacity,
            energy: seed.voltage_supply * capacity + vs * d_capacity,
            voltage_out: seed.voltage_supply - seed.current * r - i * seed.resistance,
            power: seed.current * vs + i * seed.voltage_supply
                - 2.0 * i * seed.current * r
                - i * i * seed.resistance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> BatteryInputs {
        BatteryInputs {
            voltage_supply: 22.2,
            mass: 0.322,
            resistance: 0.012,
            current: 8.6,
        }
    }

    #[test]
    fn test_terminal_voltage_and_power() {
        let out = Battery::default().compute(&inputs());
        assert!((out.voltage_out - (22.2 - 8.6 * 0.012)).abs() < 1e-12);
        assert!((out.power - (8.6 * 22.2 - 8.6 * 8.6 * 0.012)).abs() < 1e-12);
        // Power is what the terminals deliver.
        assert!((out.power - out.voltage_out * 8.6).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_and_energy() {
        let out = Battery::default().compute(&inputs());
        assert!((out.nominal_capacity - (0.322 * 7.3 - 0.246)).abs() < 1e-12);
        assert!((out.energy - 22.2 * out.nominal_capacity).abs() < 1e-12);
    }

    #[test]
    fn test_light_pack_warns_but_evaluates() {
        let battery = Battery::default();
        let light = BatteryInputs { mass: 0.02, ..inputs() };
        assert!(battery.check_domain(&light).is_ok());
        assert!(battery.compute(&light).nominal_capacity < 0.0);
        assert!((battery.constants.zero_capacity_mass() - 0.246 / 7.3).abs() < 1e-12);
    }

    #[test]
    fn test_domain_rejects_bad_mass_and_resistance() {
        let battery = Battery::default();
        assert!(battery.check_domain(&BatteryInputs { mass: 0.0, ..inputs() }).is_err());
        assert!(battery.check_domain(&BatteryInputs { resistance: -0.1, ..inputs() }).is_err());
        assert!(battery.check_domain(&BatteryInputs { resistance: 0.0, ..inputs() }).is_ok());
    }

    #[test]
    fn test_tangent_matches_finite_difference() {
        let battery = Battery::default();
        let x = inputs();
        let seed = BatteryInputs {
            voltage_supply: 0.3,
            mass: -0.2,
            resistance: 0.5,
            current: 1.1,
        };
        let h = 1e-6;
        let shift = |s: f64| BatteryInputs {
            voltage_supply: x.voltage_supply + s * seed.voltage_supply,
            mass: x.mass + s * seed.mass,
            resistance: x.resistance + s * seed.resistance,
            current: x.current + s * seed.current,
        };
        let plus = battery.compute(&shift(h));
        let minus = battery.compute(&shift(-h));
        let tangent = battery.linearize(&x, &seed);

        assert!((tangent.power - (plus.power - minus.power) / (2.0 * h)).abs() < 1e-6);
        assert!((tangent.voltage_out - (plus.voltage_out - minus.voltage_out) / (2.0 * h)).abs() < 1e-6);
        assert!((tangent.energy - (plus.energy - minus.energy) / (2.0 * h)).abs() < 1e-6);
    }
}
