use simcore::{ExplicitComponent, PropulsionResult, require_finite, require_positive};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropellerInputs {
    /// kg/m³
    pub rho: f64,
    /// rev/s
    pub speed: f64,
    /// m
    pub diameter: f64,
    pub ct: f64,
    pub cp: f64,
    pub num_motors: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropellerOutputs {
    /// N, summed over all motors
    pub thrust: f64,
    /// W absorbed by one propeller
    pub power: f64,
}

/// Dimensional thrust and power from the coefficients:
/// `T = rho n² D⁴ ct N`, `P = rho n³ D⁵ cp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propeller;

impl ExplicitComponent for Propeller {
    type Inputs = PropellerInputs;
    type Outputs = PropellerOutputs;

    fn check_domain(&self, inputs: &PropellerInputs) -> PropulsionResult<()> {
        require_positive("D_prop", inputs.diameter)?;
        require_positive("rho", inputs.rho)?;
        require_positive("num_motors", inputs.num_motors)?;
        require_finite("rpm", inputs.speed)
    }

    fn compute(&self, inputs: &PropellerInputs) -> PropellerOutputs {
        let PropellerInputs {
            rho,
            speed: n,
            diameter: d,
            ct,
            cp,
            num_motors,
        } = *inputs;
        let d4 = d.powi(4);
        PropellerOutputs {
            thrust: rho * n * n * d4 * ct * num_motors,
            power: rho * n * n * n * d4 * d * cp,
        }
    }

    fn linearize(&self, inputs: &PropellerInputs, seed: &PropellerInputs) -> PropellerOutputs {
        let PropellerInputs {
            rho,
            speed: n,
            diameter: d,
            ct,
            cp,
            num_motors: m,
        } = *inputs;
        let (n2, n3) = (n * n, n * n * n);
        let (d3, d4, d5) = (d.powi(3), d.powi(4), d.powi(5));

        let thrust = seed.rho * n2 * d4 * ct * m
            + rho * 2.0 * n * seed.speed * d4 * ct * m
            + rho * n2 * 4.0 * d3 * seed.diameter * ct * m
            + rho * n2 * d4 * seed.ct * m
            + rho * n2 * d4 * ct * seed.num_motors;
        let power = seed.rho * n3 * d5 * cp
            + rho * 3.0 * n2 * seed.speed * d5 * cp
            + rho * n3 * 5.0 * d4 * seed.diameter * cp
            + rho * n3 * d5 * seed.cp;

        PropellerOutputs { thrust, power }
    }
}
