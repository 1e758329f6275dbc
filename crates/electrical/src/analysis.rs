//! Characteristic curves for sizing studies
//!
//! Sweeps of the component models outside the coupled solve: ESC efficiency
//! against throttle, the motor speed line against current and battery
//! terminal sag against load.

use simcore::ExplicitComponent;

use crate::battery::{Battery, BatteryInputs};
use crate::esc::ElectronicSpeedController;
use crate::motor::{Motor, MotorInputs};

/// ESC efficiency sampled over throttle in (0, 1]
#[derive(Debug, Clone)]
pub struct EscEfficiencyCurve {
    pub throttles: Vec<f64>,
    pub efficiencies: Vec<f64>,
}

impl ElectronicSpeedController {
    /// Samples `n_points` evenly spaced throttles, ending at full throttle.
    pub fn efficiency_curve(&self, n_points: usize) -> EscEfficiencyCurve {
        let throttles: Vec<f64> = (1..=n_points).map(|i| i as f64 / n_points as f64).collect();
        let efficiencies = throttles.iter().map(|&t| self.efficiency(t)).collect();
        EscEfficiencyCurve { throttles, efficiencies }
    }

    /// Throttle at which the fitted curve reaches `target` efficiency, if it does.
    pub fn throttle_for_efficiency(&self, target: f64) -> Option<f64> {
        let a = self.coefficients.a;
        let b = self.coefficients.b;
        let c = self.coefficients.c;
        if target <= 0.0 || target >= a {
            return None;
        }
        // Invert a * (1 - 1/(1 + b t^c)) = target.
        let t = (target / (b * (a - target))).powf(1.0 / c);
        (t > 0.0 && t <= 1.0).then_some(t)
    }
}

/// Motor operating points from no load up to stall at a fixed supply voltage
#[derive(Debug, Clone)]
pub struct MotorSpeedLine {
    pub currents: Vec<f64>,
    pub rpms: Vec<f64>,
    pub shaft_powers: Vec<f64>,
    pub efficiencies: Vec<f64>,
}

impl Motor {
    /// Current drawn when the shaft is stalled at `voltage_in`.
    pub fn stall_current(&self, idle_current: f64, voltage_in: f64) -> f64 {
        voltage_in / self.family.resistance(idle_current)
    }

    /// Mechanical output: the shaft voltage times the torque-producing current.
    pub fn shaft_power(&self, inputs: &MotorInputs) -> f64 {
        self.shaft_voltage(inputs) * (inputs.current - inputs.idle_current)
    }

    pub fn efficiency_at(&self, inputs: &MotorInputs) -> f64 {
        let electrical = inputs.voltage_in * inputs.current;
        if electrical <= 0.0 {
            return 0.0;
        }
        (self.shaft_power(inputs) / electrical).clamp(0.0, 1.0)
    }

    /// Current of peak efficiency for the resistive/idle-loss model,
    /// `sqrt(idle_current * voltage_in / resistance)`.
    pub fn peak_efficiency_current(&self, idle_current: f64, voltage_in: f64) -> f64 {
        (idle_current * voltage_in / self.family.resistance(idle_current)).sqrt()
    }

    pub fn speed_line(&self, mass: f64, idle_current: f64, voltage_in: f64, n_points: usize) -> MotorSpeedLine {
        let stall = self.stall_current(idle_current, voltage_in);
        let mut line = MotorSpeedLine {
            currents: Vec::with_capacity(n_points),
            rpms: Vec::with_capacity(n_points),
            shaft_powers: Vec::with_capacity(n_points),
            efficiencies: Vec::with_capacity(n_points),
        };

        for i in 0..n_points {
            let current = idle_current + (i as f64 / (n_points.max(2) - 1) as f64) * (stall - idle_current);
            let inputs = MotorInputs {
                mass,
                idle_current,
                voltage_in,
                current,
            };
            line.currents.push(current);
            line.rpms.push(self.compute(&inputs).rpm);
            line.shaft_powers.push(self.shaft_power(&inputs));
            line.efficiencies.push(self.efficiency_at(&inputs));
        }

        line
    }
}

/// Battery terminal voltage and delivered power against load current
#[derive(Debug, Clone)]
pub struct BatterySagCurve {
    pub currents: Vec<f64>,
    pub voltages: Vec<f64>,
    pub powers: Vec<f64>,
}

impl Battery {
    pub fn sag_curve(&self, voltage_supply: f64, resistance: f64, mass: f64, max_current: f64, n_points: usize) -> BatterySagCurve {
        let mut curve = BatterySagCurve {
            currents: Vec::with_capacity(n_points),
            voltages: Vec::with_capacity(n_points),
            powers: Vec::with_capacity(n_points),
        };
        for i in 0..n_points {
            let current = (i as f64 / (n_points.max(2) - 1) as f64) * max_current;
            let out = self.compute(&BatteryInputs {
                voltage_supply,
                mass,
                resistance,
                current,
            });
            curve.currents.push(current);
            curve.voltages.push(out.voltage_out);
            curve.powers.push(out.power);
        }
        curve
    }

    /// Load current at which the pack delivers the most power, `Vs / (2 R)`.
    pub fn max_power_current(&self, voltage_supply: f64, resistance: f64) -> f64 {
        voltage_supply / (2.0 * resistance)
    }

    /// Hours of flight at a constant draw, from the nominal capacity.
    pub fn endurance_hours(&self, mass: f64, current: f64) -> f64 {
        if current <= 0.0 {
            return f64::INFINITY;
        }
        (self.nominal_capacity(mass) / current).max(0.0)
    }
}
