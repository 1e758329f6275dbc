//! The coupled propulsion subsystem.
//!
//! Per cell the signal flows battery -> ESC -> motor -> coefficients ->
//! propeller / RPM constraint -> power balance, with the balance current fed
//! back into the battery and the ESC. [`PropulsionGroup`] owns that unknown
//! current and drives it to the root of the balance with Newton before
//! anything downstream reads the outputs.

use aero::{
    CoefficientInputs, CoefficientOutputs, CoefficientPartials, PropCoefficients, Propeller, PropellerInputs,
    PropellerOutputs, RpmConstraint, RpmConstraintInputs, RpmConstraintOutputs, SurrogatePair,
};
use electrical::{
    Battery, BatteryInputs, BatteryOutputs, ElectronicSpeedController, EscInputs, EscOutputs, Motor, MotorInputs,
    MotorOutputs,
};
use nalgebra::{DMatrix, DVector};
use simcore::units::{inches_per_meter, meters_to_inches, rev_per_second_per_rpm, rpm_to_rev_per_second};
use simcore::{
    BoundsEnforceLineSearch, ExplicitComponent, GridShape, ImplicitComponent, NewtonSolver, PropulsionError,
    PropulsionResult, ResidualSystem, SolveStatus,
};

use crate::config::{PropulsionConfig, PropulsionInputs};
use crate::design::DesignSpace;
use crate::residual::{PowerBalance, PowerResiduals};

/// Fraction of the stall current kept clear by the upper current bound.
const STALL_MARGIN: f64 = 1e-3;

/// Tangent of every input seen by one cell, in canonical units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSeed {
    pub battery_voltage_supply: f64,
    pub battery_mass: f64,
    pub battery_resistance: f64,
    pub throttle: f64,
    pub velocity: f64,
    pub motor_idle_current: f64,
    pub motor_mass: f64,
    /// m
    pub diameter: f64,
    pub pitch: f64,
    pub rho: f64,
    pub num_motors: f64,
    /// Tangent of the solved current.
    pub current: f64,
}

impl InputSeed {
    pub fn current() -> Self {
        InputSeed {
            current: 1.0,
            ..Default::default()
        }
    }
}

/// Tangents of the quantities the solve and the optimizer care about.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellTangent {
    pub residual: f64,
    pub thrust: f64,
    pub rpm_con: f64,
    pub rpm: f64,
}

/// Component inputs and outputs of one cell at a given current.
#[derive(Debug, Clone, Copy)]
struct CellState {
    battery_in: BatteryInputs,
    battery: BatteryOutputs,
    esc_in: EscInputs,
    esc: EscOutputs,
    motor_in: MotorInputs,
    motor: MotorOutputs,
    prop_in: PropellerInputs,
    prop: PropellerOutputs,
    rpm_in: RpmConstraintInputs,
    rpm: RpmConstraintOutputs,
    balance: PowerBalance,
}

struct ChainState {
    cells: Vec<CellState>,
    speed: DVector<f64>,
    coefficients: CoefficientOutputs,
}

/// Every quantity of the converged (or last) iterate.
#[derive(Debug, Clone)]
pub struct PropulsionSolution {
    pub shape: GridShape,
    /// A, per cell
    pub res_current: DVector<f64>,
    /// A·h, per mission
    pub nominal_capacity: DVector<f64>,
    /// W·h, per mission
    pub battery_energy: DVector<f64>,
    pub battery_voltage_out: DVector<f64>,
    pub battery_power: DVector<f64>,
    pub esc_efficiency: DVector<f64>,
    pub esc_voltage_out: DVector<f64>,
    pub esc_current_out: DVector<f64>,
    pub esc_power: DVector<f64>,
    /// rpm/V
    pub motor_kv: f64,
    /// Ω
    pub motor_resistance: f64,
    pub rpm: DVector<f64>,
    pub motor_power: DVector<f64>,
    pub ct: DVector<f64>,
    pub cp: DVector<f64>,
    /// N
    pub prop_thrust: DVector<f64>,
    /// W
    pub prop_power: DVector<f64>,
    /// `rpm - 150000 / D[in]`, feasible when <= 0
    pub rpm_con: DVector<f64>,
    /// W, power-balance residual per cell
    pub residual: DVector<f64>,
    pub status: SolveStatus,
    /// Cells whose coefficient query left the surrogate training box.
    pub extrapolated: Vec<usize>,
}

impl PropulsionSolution {
    pub fn total_thrust(&self) -> f64 {
        self.prop_thrust.sum()
    }

    pub fn max_rpm_con(&self) -> f64 {
        self.rpm_con.max()
    }

    /// Converged with every motor turning forward.
    pub fn is_physical(&self) -> bool {
        self.status.converged && self.rpm.iter().all(|&rpm| rpm > 0.0)
    }

    /// `(cond, mission)` matrix view of a per-cell quantity.
    pub fn grid(&self, cells: &DVector<f64>) -> DMatrix<f64> {
        self.shape.to_matrix(cells)
    }
}

/// Total derivatives, one column per design-vector entry, per configured unit.
#[derive(Debug, Clone)]
pub struct Sensitivities {
    /// cells x entries
    pub current: DMatrix<f64>,
    /// cells x entries
    pub thrust: DMatrix<f64>,
    /// cells x entries
    pub rpm_con: DMatrix<f64>,
}

impl Sensitivities {
    /// Gradient of the summed thrust.
    pub fn total_thrust(&self) -> DVector<f64> {
        self.thrust.row_sum().transpose()
    }
}

pub struct PropulsionGroup {
    pub shape: GridShape,
    pub battery: Battery,
    pub esc: ElectronicSpeedController,
    pub motor: Motor,
    pub coefficients: PropCoefficients,
    pub propeller: Propeller,
    pub rpm_constraint: RpmConstraint,
    pub residuals: PowerResiduals,
    surrogates: SurrogatePair,
    solver: NewtonSolver<BoundsEnforceLineSearch>,
    current_bounds: (f64, f64),
    warm_start: Option<DVector<f64>>,
}

impl PropulsionGroup {
    pub fn new(shape: GridShape, surrogates: SurrogatePair) -> PropulsionResult<Self> {
        shape.validate()?;
        Ok(PropulsionGroup {
            shape,
            battery: Battery::default(),
            esc: ElectronicSpeedController::default(),
            motor: Motor::default(),
            coefficients: PropCoefficients::new(shape),
            propeller: Propeller,
            rpm_constraint: RpmConstraint::default(),
            residuals: PowerResiduals::default(),
            surrogates,
            solver: NewtonSolver::default(),
            current_bounds: (1e-3, 1000.0),
            warm_start: None,
        })
    }

    pub fn from_config(config: &PropulsionConfig) -> PropulsionResult<Self> {
        config.validate()?;
        let mut group = PropulsionGroup::new(config.shape, config.surrogates()?)?;
        group.esc = ElectronicSpeedController::new(config.esc);
        group.residuals = PowerResiduals {
            initial_current: config.solver.initial_current,
        };
        group.solver = NewtonSolver::with_line_search(config.solver.newton, config.solver.line_search);
        group.current_bounds = (config.solver.current_lower, config.solver.current_upper);
        Ok(group)
    }

    pub fn solver(&self) -> &NewtonSolver<BoundsEnforceLineSearch> {
        &self.solver
    }

    pub fn set_solver(&mut self, solver: NewtonSolver<BoundsEnforceLineSearch>) {
        self.solver = solver;
    }

    pub fn current_bounds(&self) -> (f64, f64) {
        self.current_bounds
    }

    pub fn set_current_bounds(&mut self, lower: f64, upper: f64) -> PropulsionResult<()> {
        if !(lower < upper) {
            return Err(PropulsionError::Config(format!("current bounds [{lower}, {upper}] are empty")));
        }
        self.current_bounds = (lower, upper);
        Ok(())
    }

    pub fn warm_start(&self) -> Option<&DVector<f64>> {
        self.warm_start.as_ref()
    }

    pub fn reset_warm_start(&mut self) {
        self.warm_start = None;
    }

    /// Solves the balance, starting from the last converged current when
    /// there is one.
    pub fn solve(&mut self, inputs: &PropulsionInputs) -> PropulsionResult<PropulsionSolution> {
        let guess = self
            .warm_start
            .clone()
            .unwrap_or_else(|| DVector::from_element(self.shape.cells(), self.residuals.initial_guess()));
        let solution = self.solve_with_guess(inputs, guess)?;
        if solution.is_physical() {
            self.warm_start = Some(solution.res_current.clone());
        }
        Ok(solution)
    }

    /// Solves the balance from an explicit starting current.
    ///
    /// The balance also closes at motor stall, where no power reaches the
    /// propeller. Each cell's current is kept below its stall current, and a
    /// guess that fails to converge is retried once from the cold start.
    pub fn solve_with_guess(&self, inputs: &PropulsionInputs, guess: DVector<f64>) -> PropulsionResult<PropulsionSolution> {
        self.check_inputs(inputs)?;
        self.shape.check_cells("res_current", &guess)?;
        let stall = self.stall_currents(inputs)?;
        let system = self.coupled_system(inputs, &stall)?;
        let solver = NewtonSolver::with_line_search(
            self.solver.config.with_err_on_non_converge(false),
            self.solver.line_search,
        );

        let guess = system.clip(guess);
        let mut report = solver.solve(&system, guess.clone())?;
        if !report.status.converged {
            let cold = system.clip(stall.map(|s| self.residuals.initial_guess().min(0.5 * s)));
            if cold != guess {
                log::debug!("retrying the power balance from the cold start");
                let spent = report.status.iterations;
                report = solver.solve(&system, cold)?;
                report.status.iterations += spent;
            }
        }
        if !report.status.converged && self.solver.config.err_on_non_converge {
            return Err(PropulsionError::SolverDiverged {
                iteration: report.status.iterations,
                residual_norm: report.status.residual_norm,
            });
        }

        let state = self.evaluate(inputs, &report.x)?;
        if !state.coefficients.extrapolated.is_empty() {
            log::warn!(
                "solution uses extrapolated coefficients in {} cell(s)",
                state.coefficients.extrapolated.len()
            );
        }
        Ok(self.assemble(report.x, state, report.status))
    }

    /// Current per cell at which the motor's shaft voltage drops to zero.
    ///
    /// The shaft voltage `t·eff·(Vs - I·Rb) - (I/t)·Rm` falls linearly with
    /// the drawn current, so every current below this one spins the motor
    /// forward.
    pub fn stall_currents(&self, inputs: &PropulsionInputs) -> PropulsionResult<DVector<f64>> {
        inputs.check_shape(&self.shape)?;
        let resistance = self.motor.family.resistance(inputs.motor_idle_current);
        Ok(DVector::from_fn(self.shape.cells(), |cell, _| {
            let m = self.shape.mission_of(cell);
            let t = inputs.throttle[cell];
            let gain = t * self.esc.efficiency(t);
            inputs.battery_voltage_supply[m] * gain / (inputs.battery_resistance[m] * gain + resistance / t)
        }))
    }

    fn coupled_system<'a>(&'a self, inputs: &'a PropulsionInputs, stall: &DVector<f64>) -> PropulsionResult<CoupledSystem<'a>> {
        let (floor, ceiling) = self.current_bounds;
        let lower = DVector::from_element(self.shape.cells(), floor);
        let upper = stall.map(|s| ceiling.min(s * (1.0 - STALL_MARGIN)));
        if let Some(cell) = (0..upper.len()).find(|&c| !(upper[c] > floor)) {
            return Err(PropulsionError::DomainViolation {
                quantity: "res_current",
                value: stall[cell],
                requirement: "stall current must exceed the lower current bound",
            });
        }
        Ok(CoupledSystem {
            group: self,
            inputs,
            lower,
            upper,
        })
    }

    /// Domain checks on everything that does not depend on the solved current.
    pub fn check_inputs(&self, inputs: &PropulsionInputs) -> PropulsionResult<()> {
        inputs.check_shape(&self.shape)?;
        let current = DVector::from_element(self.shape.cells(), self.residuals.initial_guess());
        for cell in 0..self.shape.cells() {
            let m = self.shape.mission_of(cell);
            let p = self.shape.prop_of(cell);
            self.battery.check_domain(&self.battery_inputs(inputs, &current, cell))?;
            self.esc.check_domain(&EscInputs {
                throttle: inputs.throttle[cell],
                voltage_in: inputs.battery_voltage_supply[m],
                current_in: current[cell],
            })?;
            self.motor.check_domain(&MotorInputs {
                mass: inputs.motor_mass,
                idle_current: inputs.motor_idle_current,
                voltage_in: 0.0,
                current: 0.0,
            })?;
            self.propeller.check_domain(&PropellerInputs {
                rho: inputs.rho,
                speed: 0.0,
                diameter: inputs.d_prop[p],
                ct: 0.0,
                cp: 0.0,
                num_motors: inputs.num_motors,
            })?;
            self.rpm_constraint.check_domain(&RpmConstraintInputs {
                rpm: 0.0,
                diameter: meters_to_inches(inputs.d_prop[p]),
            })?;
            require_finite_inputs(inputs, cell, p)?;
        }
        Ok(())
    }

    fn battery_inputs(&self, inputs: &PropulsionInputs, current: &DVector<f64>, cell: usize) -> BatteryInputs {
        let m = self.shape.mission_of(cell);
        BatteryInputs {
            voltage_supply: inputs.battery_voltage_supply[m],
            mass: inputs.battery_mass[m],
            resistance: inputs.battery_resistance[m],
            current: current[cell],
        }
    }

    fn evaluate(&self, inputs: &PropulsionInputs, current: &DVector<f64>) -> PropulsionResult<ChainState> {
        let cells = self.shape.cells();
        let mut electrical = Vec::with_capacity(cells);
        let mut speed = DVector::zeros(cells);

        for cell in 0..cells {
            let battery_in = self.battery_inputs(inputs, current, cell);
            let battery = self.battery.compute(&battery_in);
            let esc_in = EscInputs {
                throttle: inputs.throttle[cell],
                voltage_in: battery.voltage_out,
                current_in: current[cell],
            };
            let esc = self.esc.compute(&esc_in);
            let motor_in = MotorInputs {
                mass: inputs.motor_mass,
                idle_current: inputs.motor_idle_current,
                voltage_in: esc.voltage_out,
                current: esc.current_out,
            };
            let motor = self.motor.compute(&motor_in);
            speed[cell] = rpm_to_rev_per_second(motor.rpm);
            electrical.push((battery_in, battery, esc_in, esc, motor_in, motor));
        }

        let coefficients = self
            .coefficients
            .compute(&self.surrogates, &coefficient_inputs(inputs, &speed))?;

        let states = electrical
            .into_iter()
            .enumerate()
            .map(|(cell, (battery_in, battery, esc_in, esc, motor_in, motor))| {
                let p = self.shape.prop_of(cell);
                let prop_in = PropellerInputs {
                    rho: inputs.rho,
                    speed: speed[cell],
                    diameter: inputs.d_prop[p],
                    ct: coefficients.ct[cell],
                    cp: coefficients.cp[cell],
                    num_motors: inputs.num_motors,
                };
                let prop = self.propeller.compute(&prop_in);
                let rpm_in = RpmConstraintInputs {
                    rpm: motor.rpm,
                    diameter: meters_to_inches(inputs.d_prop[p]),
                };
                let rpm = self.rpm_constraint.compute(&rpm_in);
                let balance = PowerBalance {
                    battery_power: battery.power,
                    esc_power: esc.power,
                    motor_power: motor.power,
                    prop_power: prop.power,
                };
                CellState {
                    battery_in,
                    battery,
                    esc_in,
                    esc,
                    motor_in,
                    motor,
                    prop_in,
                    prop,
                    rpm_in,
                    rpm,
                    balance,
                }
            })
            .collect();

        Ok(ChainState {
            cells: states,
            speed,
            coefficients,
        })
    }

    fn partials(&self, inputs: &PropulsionInputs, state: &ChainState) -> PropulsionResult<CoefficientPartials> {
        self.coefficients
            .partials(&self.surrogates, &coefficient_inputs(inputs, &state.speed))
    }

    /// Forward-mode tangent through one cell of the chain.
    fn cell_tangent(&self, state: &CellState, partials: &CoefficientPartials, cell: usize, seed: &InputSeed) -> CellTangent {
        let p = self.shape.prop_of(cell);

        let d_battery = self.battery.linearize(
            &state.battery_in,
            &BatteryInputs {
                voltage_supply: seed.battery_voltage_supply,
                mass: seed.battery_mass,
                resistance: seed.battery_resistance,
                current: seed.current,
            },
        );
        let d_esc = self.esc.linearize(
            &state.esc_in,
            &EscInputs {
                throttle: seed.throttle,
                voltage_in: d_battery.voltage_out,
                current_in: seed.current,
            },
        );
        let d_motor = self.motor.linearize(
            &state.motor_in,
            &MotorInputs {
                mass: seed.motor_mass,
                idle_current: seed.motor_idle_current,
                voltage_in: d_esc.voltage_out,
                current: d_esc.current_out,
            },
        );
        let d_speed = d_motor.rpm * rev_per_second_per_rpm();

        let coefficient_tangent = |jac: &aero::CoefficientJacobian| {
            jac.diameter[(cell, p)] * seed.diameter
                + jac.pitch[(cell, p)] * seed.pitch
                + jac.speed[(cell, cell)] * d_speed
                + jac.velocity[(cell, cell)] * seed.velocity
        };
        let d_ct = coefficient_tangent(&partials.ct);
        let d_cp = coefficient_tangent(&partials.cp);

        let d_prop = self.propeller.linearize(
            &state.prop_in,
            &PropellerInputs {
                rho: seed.rho,
                speed: d_speed,
                diameter: seed.diameter,
                ct: d_ct,
                cp: d_cp,
                num_motors: seed.num_motors,
            },
        );
        let d_rpm = self.rpm_constraint.linearize(
            &state.rpm_in,
            &RpmConstraintInputs {
                rpm: d_motor.rpm,
                diameter: seed.diameter * inches_per_meter(),
            },
        );

        let residual = self.residuals.linearize_residual(
            &state.balance,
            &PowerBalance {
                battery_power: d_battery.power,
                esc_power: d_esc.power,
                motor_power: d_motor.power,
                prop_power: d_prop.power,
            },
        );

        CellTangent {
            residual,
            thrust: d_prop.thrust,
            rpm_con: d_rpm.rpm_con,
            rpm: d_motor.rpm,
        }
    }

    /// Tangent of one cell at `current` for an arbitrary input seed.
    pub fn tangent(
        &self,
        inputs: &PropulsionInputs,
        current: &DVector<f64>,
        cell: usize,
        seed: &InputSeed,
    ) -> PropulsionResult<CellTangent> {
        inputs.check_shape(&self.shape)?;
        self.shape.check_cells("res_current", current)?;
        if cell >= self.shape.cells() {
            return Err(PropulsionError::Config(format!(
                "cell {cell} is outside the {}-cell grid",
                self.shape.cells()
            )));
        }
        let state = self.evaluate(inputs, current)?;
        let partials = self.partials(inputs, &state)?;
        Ok(self.cell_tangent(&state.cells[cell], &partials, cell, seed))
    }

    fn balance_jacobian(&self, state: &ChainState, partials: &CoefficientPartials) -> DMatrix<f64> {
        let cells = self.shape.cells();
        let mut jac = DMatrix::zeros(cells, cells);
        let seed = InputSeed::current();
        for cell in 0..cells {
            jac[(cell, cell)] = self.cell_tangent(&state.cells[cell], partials, cell, &seed).residual;
        }
        jac
    }

    /// Total derivatives of current, thrust and `RPM_con` with respect to
    /// every entry of `space`, at the solved current of `solution`.
    ///
    /// Direct method: `dI/dx = -J⁻¹ ∂R/∂x`, then `dF/dx = ∂F/∂x + ∂F/∂I dI/dx`.
    pub fn sensitivities(
        &self,
        inputs: &PropulsionInputs,
        solution: &PropulsionSolution,
        space: &DesignSpace,
    ) -> PropulsionResult<Sensitivities> {
        let cells = self.shape.cells();
        let entries = space.len();
        if space.shape != self.shape {
            return Err(PropulsionError::Config(
                "design space and propulsion group disagree on the grid shape".to_string(),
            ));
        }
        inputs.check_shape(&self.shape)?;
        self.shape.check_cells("res_current", &solution.res_current)?;
        if !solution.status.converged {
            log::warn!("sensitivities requested at an unconverged solve");
        }

        let state = self.evaluate(inputs, &solution.res_current)?;
        let partials = self.partials(inputs, &state)?;
        let jac = self.balance_jacobian(&state, &partials);

        let mut d_residual = DMatrix::zeros(cells, entries);
        let mut d_thrust = DMatrix::zeros(cells, entries);
        let mut d_rpm_con = DMatrix::zeros(cells, entries);
        for cell in 0..cells {
            for k in 0..entries {
                if let Some(seed) = space.seed(k, cell) {
                    let t = self.cell_tangent(&state.cells[cell], &partials, cell, &seed);
                    d_residual[(cell, k)] = t.residual;
                    d_thrust[(cell, k)] = t.thrust;
                    d_rpm_con[(cell, k)] = t.rpm_con;
                }
            }
        }

        let current = -jac
            .lu()
            .solve(&d_residual)
            .ok_or(PropulsionError::SingularJacobian { iteration: 0 })?;

        let seed = InputSeed::current();
        for cell in 0..cells {
            let by_current = self.cell_tangent(&state.cells[cell], &partials, cell, &seed);
            for k in 0..entries {
                d_thrust[(cell, k)] += by_current.thrust * current[(cell, k)];
                d_rpm_con[(cell, k)] += by_current.rpm_con * current[(cell, k)];
            }
        }

        Ok(Sensitivities {
            current,
            thrust: d_thrust,
            rpm_con: d_rpm_con,
        })
    }

    fn assemble(&self, current: DVector<f64>, state: ChainState, status: SolveStatus) -> PropulsionSolution {
        let cells = &state.cells;
        let per_cell = |f: &dyn Fn(&CellState) -> f64| DVector::from_iterator(cells.len(), cells.iter().map(f));
        let per_mission = |f: &dyn Fn(&CellState) -> f64| {
            DVector::from_fn(self.shape.flight_missions, |m, _| f(&cells[self.shape.cell(0, m)]))
        };

        PropulsionSolution {
            shape: self.shape,
            nominal_capacity: per_mission(&|s| s.battery.nominal_capacity),
            battery_energy: per_mission(&|s| s.battery.energy),
            battery_voltage_out: per_cell(&|s| s.battery.voltage_out),
            battery_power: per_cell(&|s| s.battery.power),
            esc_efficiency: per_cell(&|s| s.esc.efficiency),
            esc_voltage_out: per_cell(&|s| s.esc.voltage_out),
            esc_current_out: per_cell(&|s| s.esc.current_out),
            esc_power: per_cell(&|s| s.esc.power),
            motor_kv: cells[0].motor.kv,
            motor_resistance: cells[0].motor.resistance,
            rpm: per_cell(&|s| s.motor.rpm),
            motor_power: per_cell(&|s| s.motor.power),
            ct: state.coefficients.ct.clone(),
            cp: state.coefficients.cp.clone(),
            prop_thrust: per_cell(&|s| s.prop.thrust),
            prop_power: per_cell(&|s| s.prop.power),
            rpm_con: per_cell(&|s| s.rpm.rpm_con),
            residual: per_cell(&|s| self.residuals.residual(&s.balance)),
            res_current: current,
            status,
            extrapolated: state.coefficients.extrapolated,
        }
    }
}

fn coefficient_inputs<'a>(inputs: &'a PropulsionInputs, speed: &'a DVector<f64>) -> CoefficientInputs<'a> {
    CoefficientInputs {
        diameter: &inputs.d_prop,
        pitch: &inputs.pitch,
        speed,
        velocity: &inputs.velocity,
    }
}

fn require_finite_inputs(inputs: &PropulsionInputs, cell: usize, prop: usize) -> PropulsionResult<()> {
    simcore::require_finite("velocity", inputs.velocity[cell])?;
    simcore::require_finite("pitch", inputs.pitch[prop])
}

/// Newton's view of the group: one unknown current per cell.
struct CoupledSystem<'a> {
    group: &'a PropulsionGroup,
    inputs: &'a PropulsionInputs,
    lower: DVector<f64>,
    /// Below each cell's stall current.
    upper: DVector<f64>,
}

impl CoupledSystem<'_> {
    fn clip(&self, x: DVector<f64>) -> DVector<f64> {
        x.zip_zip_map(&self.lower, &self.upper, |xi, lo, hi| xi.max(lo).min(hi))
    }
}

impl ResidualSystem for CoupledSystem<'_> {
    fn dim(&self) -> usize {
        self.group.shape.cells()
    }

    fn residual(&self, x: &DVector<f64>) -> PropulsionResult<DVector<f64>> {
        let state = self.group.evaluate(self.inputs, x)?;
        Ok(DVector::from_iterator(
            state.cells.len(),
            state.cells.iter().map(|s| self.group.residuals.residual(&s.balance)),
        ))
    }

    fn jacobian(&self, x: &DVector<f64>) -> PropulsionResult<DMatrix<f64>> {
        let state = self.group.evaluate(self.inputs, x)?;
        let partials = self.group.partials(self.inputs, &state)?;
        Ok(self.group.balance_jacobian(&state, &partials))
    }

    fn lower_bounds(&self) -> DVector<f64> {
        self.lower.clone()
    }

    fn upper_bounds(&self) -> DVector<f64> {
        self.upper.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignVariable;

    fn scenario() -> (PropulsionGroup, PropulsionInputs) {
        let config = PropulsionConfig::default();
        let group = PropulsionGroup::from_config(&config).unwrap();
        let inputs = config.resolve_inputs().unwrap();
        (group, inputs)
    }

    #[test]
    fn test_reference_scenario_converges() {
        let (mut group, inputs) = scenario();
        let sol = group.solve(&inputs).unwrap();
        assert!(sol.status.converged);
        assert!(sol.status.iterations <= 10);
        assert!((sol.res_current[0] - 8.632).abs() < 0.05, "I = {}", sol.res_current[0]);
        assert!((sol.prop_thrust[0] - 12.03).abs() < 0.1, "T = {}", sol.prop_thrust[0]);
        assert!((sol.rpm[0] - 4899.0).abs() < 10.0, "rpm = {}", sol.rpm[0]);
        assert!(sol.residual[0].abs() < 1e-6);
        assert!(sol.rpm_con[0] < 0.0);
        assert!(sol.extrapolated.is_empty());
        assert!(group.warm_start().is_some());
    }

    #[test]
    fn test_balance_closes_at_solution() {
        let (mut group, inputs) = scenario();
        let sol = group.solve(&inputs).unwrap();
        let total = sol.battery_power[0] + sol.esc_power[0] + sol.motor_power[0] - sol.prop_power[0];
        assert!(total.abs() < 1e-6);
        // Capacity and energy are reported per mission.
        assert_eq!(sol.nominal_capacity.len(), 1);
        assert!((sol.battery_energy[0] - 22.2 * sol.nominal_capacity[0]).abs() < 1e-9);
    }

    #[test]
    fn test_warm_start_needs_no_iterations() {
        let (mut group, inputs) = scenario();
        group.solve(&inputs).unwrap();
        let again = group.solve(&inputs).unwrap();
        assert!(again.status.converged);
        assert!(again.status.iterations <= 1);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let (group, inputs) = scenario();
        let stall = group.stall_currents(&inputs).unwrap();
        let system = group.coupled_system(&inputs, &stall).unwrap();
        let x = DVector::from_element(1, 12.0);
        let h = 1e-5;
        let fd = (system.residual(&DVector::from_element(1, 12.0 + h)).unwrap()[0]
            - system.residual(&DVector::from_element(1, 12.0 - h)).unwrap()[0])
            / (2.0 * h);
        let exact = system.jacobian(&x).unwrap()[(0, 0)];
        assert!((fd - exact).abs() < 1e-6 * exact.abs(), "{fd} vs {exact}");
    }

    #[test]
    fn test_sensitivities_match_finite_difference() {
        let (mut group, inputs) = scenario();
        let space = DesignSpace::new(group.shape, DesignVariable::defaults()).unwrap();
        let sol = group.solve(&inputs).unwrap();
        let sens = group.sensitivities(&inputs, &sol, &space).unwrap();

        let x0 = space.read(&inputs).unwrap();
        for k in 0..space.len() {
            let h = 1e-5 * x0[k].abs().max(1.0);
            let mut plus = x0.clone();
            let mut minus = x0.clone();
            plus[k] += h;
            minus[k] -= h;
            let sp = group.solve_with_guess(&space.apply(&inputs, &plus).unwrap(), sol.res_current.clone()).unwrap();
            let sm = group.solve_with_guess(&space.apply(&inputs, &minus).unwrap(), sol.res_current.clone()).unwrap();

            let fd_thrust = (sp.prop_thrust[0] - sm.prop_thrust[0]) / (2.0 * h);
            let fd_con = (sp.rpm_con[0] - sm.rpm_con[0]) / (2.0 * h);
            let fd_current = (sp.res_current[0] - sm.res_current[0]) / (2.0 * h);
            let label = space.entries()[k].label();
            assert!(
                (fd_thrust - sens.thrust[(0, k)]).abs() < 1e-4 * fd_thrust.abs().max(1.0),
                "{label}: thrust {fd_thrust} vs {}",
                sens.thrust[(0, k)]
            );
            assert!(
                (fd_con - sens.rpm_con[(0, k)]).abs() < 1e-4 * fd_con.abs().max(1.0),
                "{label}: RPM_con {fd_con} vs {}",
                sens.rpm_con[(0, k)]
            );
            assert!(
                (fd_current - sens.current[(0, k)]).abs() < 1e-4 * fd_current.abs().max(1.0),
                "{label}: current {fd_current} vs {}",
                sens.current[(0, k)]
            );
        }
    }

    #[test]
    fn test_zero_throttle_is_domain_error() {
        let (mut group, mut inputs) = scenario();
        inputs.throttle[0] = 0.0;
        let err = group.solve(&inputs).unwrap_err();
        assert!(matches!(err, PropulsionError::DomainViolation { quantity: "throttle", .. }));
    }

    #[test]
    fn test_nonpositive_idle_current_is_domain_error() {
        let (mut group, mut inputs) = scenario();
        inputs.motor_idle_current = 0.0;
        assert!(matches!(
            group.solve(&inputs),
            Err(PropulsionError::DomainViolation { quantity: "motor_idle_current", .. })
        ));
    }

    #[test]
    fn test_iteration_cap_is_soft_failure() {
        let (mut group, inputs) = scenario();
        let mut solver = group.solver().clone();
        solver.config = solver.config.with_max_iterations(1);
        group.set_solver(solver);
        let sol = group.solve(&inputs).unwrap();
        assert!(!sol.status.converged);
        assert_eq!(sol.status.iterations, 1);
        assert!(sol.res_current[0].is_finite());
        // An unconverged solve does not become the next warm start.
        assert!(group.warm_start().is_none());
    }

    #[test]
    fn test_current_stays_in_bounds() {
        let (mut group, inputs) = scenario();
        group.set_current_bounds(9.0, 50.0).unwrap();
        let sol = group.solve(&inputs).unwrap();
        // The root at ~8.6 A sits below the floor; Newton pins the iterate there.
        assert!(!sol.status.converged);
        assert!(sol.res_current[0] >= 9.0);
        assert!(group.set_current_bounds(5.0, 1.0).is_err());
    }

    #[test]
    fn test_stall_current_closes_balance_without_thrust() {
        let (group, inputs) = scenario();
        let stall = group.stall_currents(&inputs).unwrap();
        assert!((stall[0] - 736.4).abs() < 1.0, "stall = {}", stall[0]);

        let system = group.coupled_system(&inputs, &stall).unwrap();
        assert!(system.upper_bounds()[0] < stall[0]);
        let at_stall = group.evaluate(&inputs, &stall).unwrap();
        assert!(at_stall.cells[0].motor.rpm.abs() < 1e-6);
        assert!(system.residual(&stall).unwrap()[0].abs() < 1e-6);
    }

    #[test]
    fn test_guess_beyond_stall_reaches_spinning_root() {
        let (mut group, inputs) = scenario();
        let sol = group.solve_with_guess(&inputs, DVector::from_element(1, 400.0)).unwrap();
        assert!(sol.status.converged);
        assert!(sol.is_physical());
        assert!((sol.res_current[0] - 8.632).abs() < 0.05, "I = {}", sol.res_current[0]);
        assert!(sol.prop_thrust[0] > 10.0);

        let far = group.solve_with_guess(&inputs, DVector::from_element(1, 5000.0)).unwrap();
        assert!((far.res_current[0] - sol.res_current[0]).abs() < 1e-8);

        // A warm start next to stall falls back to the cold start too.
        group.warm_start = Some(DVector::from_element(1, 700.0));
        let again = group.solve(&inputs).unwrap();
        assert!(again.is_physical());
        let warm = group.warm_start().unwrap();
        assert!((warm[0] - sol.res_current[0]).abs() < 1e-8);
    }

    #[test]
    fn test_diverged_solve_errors_when_asked() {
        let (mut group, inputs) = scenario();
        let mut solver = group.solver().clone();
        solver.config = solver.config.with_max_iterations(1).with_err_on_non_converge(true);
        group.set_solver(solver);
        assert!(matches!(
            group.solve(&inputs),
            Err(PropulsionError::SolverDiverged { iteration: 1, .. })
        ));
    }

    #[test]
    fn test_tangent_rejects_bad_cell_and_shape() {
        let (group, inputs) = scenario();
        let current = DVector::from_element(1, 8.6);
        assert!(group.tangent(&inputs, &current, 0, &InputSeed::current()).is_ok());
        assert!(matches!(
            group.tangent(&inputs, &current, 3, &InputSeed::current()),
            Err(PropulsionError::Config(_))
        ));

        let config = PropulsionConfig {
            shape: GridShape::new(1, 2, 1).unwrap(),
            ..PropulsionConfig::default()
        };
        let mut wide = PropulsionGroup::from_config(&config).unwrap();
        let wide_inputs = config.resolve_inputs().unwrap();
        let sol = wide.solve(&wide_inputs).unwrap();
        let space = DesignSpace::new(wide.shape, DesignVariable::defaults()).unwrap();
        assert!(matches!(
            wide.sensitivities(&inputs, &sol, &space),
            Err(PropulsionError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            wide.tangent(&inputs, &sol.res_current, 1, &InputSeed::current()),
            Err(PropulsionError::ShapeMismatch { .. })
        ));
    }
}
