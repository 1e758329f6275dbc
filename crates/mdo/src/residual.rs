use simcore::ImplicitComponent;

/// Power terms meeting at the balance node, W. Battery, ESC and motor terms
/// follow the components' sign conventions; the propeller term is absorbed
/// power.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerBalance {
    pub battery_power: f64,
    pub esc_power: f64,
    pub motor_power: f64,
    pub prop_power: f64,
}

/// The implicit node: solves for the current at which
/// `battery + esc + motor - prop = 0`.
#[derive(Debug, Clone, Copy)]
pub struct PowerResiduals {
    /// A, starting current for a cold solve
    pub initial_current: f64,
}

impl Default for PowerResiduals {
    fn default() -> Self {
        PowerResiduals { initial_current: 30.0 }
    }
}

impl ImplicitComponent for PowerResiduals {
    type Inputs = PowerBalance;

    fn initial_guess(&self) -> f64 {
        self.initial_current
    }

    fn residual(&self, inputs: &PowerBalance) -> f64 {
        inputs.battery_power + inputs.esc_power + inputs.motor_power - inputs.prop_power
    }

    fn linearize_residual(&self, _inputs: &PowerBalance, seed: &PowerBalance) -> f64 {
        seed.battery_power + seed.esc_power + seed.motor_power - seed.prop_power
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance() {
        let node = PowerResiduals::default();
        assert_eq!(node.initial_guess(), 30.0);
        let balance = PowerBalance {
            battery_power: 190.0,
            esc_power: -20.0,
            motor_power: -30.0,
            prop_power: 140.0,
        };
        assert!(node.residual(&balance).abs() < 1e-12);
        assert!((node.linearize_residual(&balance, &PowerBalance { prop_power: 1.0, ..Default::default() }) + 1.0).abs() < 1e-15);
    }
}
