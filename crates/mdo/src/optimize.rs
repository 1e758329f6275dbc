//! Design optimization over the coupled solve.
//!
//! [`OptimizationOracle`] is the seam between the physics and any
//! bound-constrained NLP solver: bounds, objective, constraints and their
//! gradients at a design vector, with constraints feasible when `<= 0`.
//! [`BarrierOptimizer`] is a small driver for it: projected gradient descent
//! on a log-barrier merit in the unit box, with Armijo backtracking.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use simcore::{PropulsionError, PropulsionResult};

use crate::config::{PropulsionConfig, PropulsionInputs};
use crate::design::DesignSpace;
use crate::group::{PropulsionGroup, PropulsionSolution};
use crate::observer::{IterationObserver, IterationRecord};

/// Objective and constraint values at one design.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub objective: f64,
    pub constraints: DVector<f64>,
    /// Whether the model behind the oracle reached a consistent state.
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub objective: DVector<f64>,
    /// constraints x design entries
    pub constraints: DMatrix<f64>,
}

pub trait OptimizationOracle {
    fn bounds(&self) -> (DVector<f64>, DVector<f64>);
    fn evaluate(&mut self, x: &DVector<f64>) -> PropulsionResult<Evaluation>;
    fn gradient(&mut self, x: &DVector<f64>) -> PropulsionResult<Gradient>;
}

/// Inputs and solution at the most recently evaluated design.
struct Cached {
    x: DVector<f64>,
    inputs: PropulsionInputs,
    solution: PropulsionSolution,
}

/// Maximizes total thrust subject to `RPM_con <= 0` in every cell.
pub struct PropulsionOracle {
    group: PropulsionGroup,
    base: PropulsionInputs,
    space: DesignSpace,
    last: Option<Cached>,
}

impl PropulsionOracle {
    pub fn new(group: PropulsionGroup, base: PropulsionInputs, space: DesignSpace) -> PropulsionResult<Self> {
        if space.shape != group.shape {
            return Err(PropulsionError::Config(
                "design space and propulsion group disagree on the grid shape".to_string(),
            ));
        }
        base.check_shape(&group.shape)?;
        Ok(PropulsionOracle {
            group,
            base,
            space,
            last: None,
        })
    }

    pub fn from_config(config: &PropulsionConfig) -> PropulsionResult<Self> {
        let group = PropulsionGroup::from_config(config)?;
        let base = config.resolve_inputs()?;
        let space = DesignSpace::new(config.shape, config.design.variables.clone())?;
        PropulsionOracle::new(group, base, space)
    }

    /// The configured design, in design units.
    pub fn initial_point(&self) -> PropulsionResult<DVector<f64>> {
        self.space.read(&self.base)
    }

    pub fn space(&self) -> &DesignSpace {
        &self.space
    }

    pub fn group(&self) -> &PropulsionGroup {
        &self.group
    }

    /// Inputs and solution of the most recent evaluation.
    pub fn last_solution(&self) -> Option<(&PropulsionInputs, &PropulsionSolution)> {
        self.last.as_ref().map(|c| (&c.inputs, &c.solution))
    }
}

/// Solves at `x` unless the cache already holds that design.
fn refresh<'a>(
    group: &mut PropulsionGroup,
    space: &DesignSpace,
    base: &PropulsionInputs,
    last: &'a mut Option<Cached>,
    x: &DVector<f64>,
) -> PropulsionResult<&'a Cached> {
    match last.take() {
        Some(cached) if cached.x == *x => Ok(last.insert(cached)),
        _ => {
            let inputs = space.apply(base, x)?;
            let solution = group.solve(&inputs)?;
            Ok(last.insert(Cached {
                x: x.clone(),
                inputs,
                solution,
            }))
        }
    }
}

impl OptimizationOracle for PropulsionOracle {
    fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        self.space.bounds()
    }

    fn evaluate(&mut self, x: &DVector<f64>) -> PropulsionResult<Evaluation> {
        let cached = refresh(&mut self.group, &self.space, &self.base, &mut self.last, x)?;
        Ok(Evaluation {
            objective: -cached.solution.total_thrust(),
            constraints: cached.solution.rpm_con.clone(),
            converged: cached.solution.is_physical(),
        })
    }

    fn gradient(&mut self, x: &DVector<f64>) -> PropulsionResult<Gradient> {
        let cached = refresh(&mut self.group, &self.space, &self.base, &mut self.last, x)?;
        let sens = self.group.sensitivities(&cached.inputs, &cached.solution, &self.space)?;
        Ok(Gradient {
            objective: -sens.total_thrust(),
            constraints: sens.rpm_con,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Accepted iterations, restoration included.
    pub max_iterations: usize,
    pub mu_initial: f64,
    pub mu_factor: f64,
    pub mu_min: f64,
    /// Projected-gradient norm ending a barrier stage.
    pub gtol: f64,
    pub armijo: f64,
    pub min_step: f64,
    pub max_backtracks: usize,
    pub restoration_iterations: usize,
    /// Scaled slack restoration aims for below zero.
    pub restoration_margin: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_iterations: 100,
            mu_initial: 1e-2,
            mu_factor: 0.1,
            mu_min: 1e-8,
            gtol: 1e-6,
            armijo: 1e-4,
            min_step: 1e-10,
            max_backtracks: 30,
            restoration_iterations: 50,
            restoration_margin: 1e-3,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> PropulsionResult<()> {
        let ok = self.mu_initial > 0.0
            && self.mu_min > 0.0
            && self.mu_factor > 0.0
            && self.mu_factor < 1.0
            && self.gtol > 0.0
            && self.armijo > 0.0
            && self.armijo < 1.0
            && self.max_backtracks > 0;
        if ok {
            Ok(())
        } else {
            Err(PropulsionError::Config(format!("invalid optimizer settings: {self:?}")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every barrier stage down to `mu_min` finished.
    Converged,
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub x: DVector<f64>,
    pub objective: f64,
    pub constraints: DVector<f64>,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

impl OptimizationResult {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Maps the design box onto `[0, 1]^n` and back.
struct UnitBox {
    lower: DVector<f64>,
    span: DVector<f64>,
}

impl UnitBox {
    fn new(lower: DVector<f64>, upper: DVector<f64>) -> PropulsionResult<Self> {
        if lower.len() != upper.len() {
            return Err(PropulsionError::ShapeMismatch {
                quantity: "upper bounds",
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        let span = &upper - &lower;
        if span.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(PropulsionError::Config("design bounds must be finite with lower < upper".to_string()));
        }
        Ok(UnitBox { lower, span })
    }

    fn to_unit(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(x.len(), |j, _| ((x[j] - self.lower[j]) / self.span[j]).clamp(0.0, 1.0))
    }

    fn to_design(&self, u: &DVector<f64>) -> DVector<f64> {
        &self.lower + u.component_mul(&self.span)
    }
}

fn project(u: &DVector<f64>) -> DVector<f64> {
    u.map(|v| v.clamp(0.0, 1.0))
}

/// Objective and constraint scaling fixed at the starting point.
struct Scaling {
    objective: f64,
    constraints: DVector<f64>,
}

impl Scaling {
    fn new(start: &Evaluation) -> Self {
        Scaling {
            objective: 1.0 / start.objective.abs().max(1.0),
            constraints: start.constraints.map(|g| 1.0 / g.abs().max(1.0)),
        }
    }

    fn feasible(&self, eval: &Evaluation) -> bool {
        eval.constraints
            .iter()
            .zip(self.constraints.iter())
            .all(|(g, s)| g * s < 0.0)
    }

    fn barrier(&self, eval: &Evaluation, mu: f64) -> f64 {
        if !self.feasible(eval) {
            return f64::INFINITY;
        }
        let log_sum: f64 = eval
            .constraints
            .iter()
            .zip(self.constraints.iter())
            .map(|(g, s)| (-g * s).ln())
            .sum();
        self.objective * eval.objective - mu * log_sum
    }

    fn violation(&self, eval: &Evaluation, margin: f64) -> DVector<f64> {
        eval.constraints.zip_map(&self.constraints, |g, s| (g * s + margin).max(0.0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BarrierOptimizer {
    pub config: OptimizerConfig,
}

struct Trial {
    u: DVector<f64>,
    eval: Evaluation,
    alpha: f64,
}

impl BarrierOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        BarrierOptimizer { config }
    }

    /// Minimizes the oracle's objective from `x0`.
    ///
    /// Only designs inside the bounds, strictly feasible and with a converged
    /// model are accepted. An infeasible start goes through a restoration
    /// phase first; failing that is [`PropulsionError::Infeasible`].
    pub fn minimize<O, W>(&self, oracle: &mut O, x0: &DVector<f64>, observer: &mut W) -> PropulsionResult<OptimizationResult>
    where
        O: OptimizationOracle,
        W: IterationObserver,
    {
        let cfg = &self.config;
        cfg.validate()?;
        let (lower, upper) = oracle.bounds();
        if x0.len() != lower.len() {
            return Err(PropulsionError::ShapeMismatch {
                quantity: "initial design",
                expected: lower.len(),
                actual: x0.len(),
            });
        }
        let unit = UnitBox::new(lower, upper)?;

        let mut u = unit.to_unit(x0);
        let mut eval = oracle.evaluate(&unit.to_design(&u))?;
        let mut evaluations = 1;
        if !eval.converged {
            return Err(PropulsionError::Infeasible(
                "model did not converge at the starting design".to_string(),
            ));
        }
        let scaling = Scaling::new(&eval);
        let mut iteration = 0;

        let record = |observer: &mut W, iteration: usize, u: &DVector<f64>, eval: &Evaluation, mu: f64, step: f64| {
            observer.record(&IterationRecord {
                iteration,
                design: unit.to_design(u).iter().copied().collect(),
                objective: eval.objective,
                constraints: eval.constraints.iter().copied().collect(),
                barrier_weight: mu,
                step,
            });
        };

        if !scaling.feasible(&eval) {
            log::info!("starting design violates its constraints; restoring feasibility");
            for _ in 0..cfg.restoration_iterations {
                if scaling.feasible(&eval) || iteration >= cfg.max_iterations {
                    break;
                }
                let grad = oracle.gradient(&unit.to_design(&u))?;
                let violation = scaling.violation(&eval, cfg.restoration_margin);
                let merit = violation.norm_squared();
                let weights = violation.component_mul(&scaling.constraints) * 2.0;
                let direction = (grad.constraints.transpose() * weights).component_mul(&unit.span);

                let trial = self.backtrack(oracle, &unit, &u, &direction, merit, 1.0, &mut evaluations, |e| {
                    Some(scaling.violation(e, cfg.restoration_margin).norm_squared())
                });
                let Some(trial) = trial else {
                    break;
                };
                let step = (&trial.u - &u).norm();
                u = trial.u;
                eval = trial.eval;
                iteration += 1;
                record(&mut *observer, iteration, &u, &eval, 0.0, step);
            }
            if !scaling.feasible(&eval) {
                return Err(PropulsionError::Infeasible(format!(
                    "no feasible design found after {iteration} restoration iterations (max constraint {:.4e})",
                    eval.constraints.max()
                )));
            }
        }

        let mut mu = cfg.mu_initial;
        let mut alpha_last: f64 = 1.0;
        let mut termination = Termination::Converged;
        'stages: while mu >= cfg.mu_min {
            loop {
                if iteration >= cfg.max_iterations {
                    termination = Termination::MaxIterations;
                    break 'stages;
                }
                let grad = oracle.gradient(&unit.to_design(&u))?;
                let barrier_grad = grad
                    .constraints
                    .row_iter()
                    .zip(eval.constraints.iter())
                    .fold(grad.objective * scaling.objective, |acc, (row, g)| acc - row.transpose() * (mu / g));
                let direction = barrier_grad.component_mul(&unit.span);

                let projected = (&u - project(&(&u - &direction))).norm();
                if projected < cfg.gtol.max(mu) {
                    log::debug!("barrier stage mu = {mu:.1e} done, |pg| = {projected:.3e}");
                    break;
                }

                let merit = scaling.barrier(&eval, mu);
                let trial = self.backtrack(
                    oracle,
                    &unit,
                    &u,
                    &direction,
                    merit,
                    (2.0 * alpha_last).min(1.0),
                    &mut evaluations,
                    |e| scaling.feasible(e).then(|| scaling.barrier(e, mu)),
                );
                let Some(trial) = trial else {
                    log::debug!("line search stalled at mu = {mu:.1e}, |pg| = {projected:.3e}");
                    break;
                };
                let step = (&trial.u - &u).norm();
                alpha_last = trial.alpha;
                u = trial.u;
                eval = trial.eval;
                iteration += 1;
                record(&mut *observer, iteration, &u, &eval, mu, step);
            }
            mu *= cfg.mu_factor;
        }

        let x = unit.to_design(&u);
        log::info!(
            "optimizer finished ({termination:?}) after {iteration} iterations, {evaluations} evaluations: objective = {:.6e}",
            eval.objective
        );
        Ok(OptimizationResult {
            x,
            objective: eval.objective,
            constraints: eval.constraints,
            iterations: iteration,
            evaluations,
            termination,
        })
    }

    /// Halves the step along `-direction` until `merit_of` accepts a trial
    /// with sufficient decrease. `merit_of` returns `None` to reject outright.
    #[allow(clippy::too_many_arguments)]
    fn backtrack<O, F>(
        &self,
        oracle: &mut O,
        unit: &UnitBox,
        u: &DVector<f64>,
        direction: &DVector<f64>,
        merit: f64,
        alpha0: f64,
        evaluations: &mut usize,
        merit_of: F,
    ) -> Option<Trial>
    where
        O: OptimizationOracle,
        F: Fn(&Evaluation) -> Option<f64>,
    {
        let cfg = &self.config;
        let mut alpha = alpha0;
        for _ in 0..cfg.max_backtracks {
            let candidate = project(&(u - direction * alpha));
            let moved = &candidate - u;
            if moved.norm() < cfg.min_step {
                return None;
            }
            *evaluations += 1;
            match oracle.evaluate(&unit.to_design(&candidate)) {
                Ok(eval) if eval.converged && eval.objective.is_finite() => {
                    let decrease = cfg.armijo * direction.dot(&moved);
                    if let Some(value) = merit_of(&eval) {
                        if value <= merit + decrease {
                            return Some(Trial {
                                u: candidate,
                                eval,
                                alpha,
                            });
                        }
                    }
                }
                Ok(_) => log::debug!("trial at alpha = {alpha:.3e} rejected: model not converged"),
                Err(err) => log::debug!("trial at alpha = {alpha:.3e} rejected: {err}"),
            }
            alpha *= 0.5;
        }
        None
    }
}
