//! Dense Newton solver for small coupled systems.
//!
//! Each iteration assembles the full Jacobian, solves the linear system with
//! an LU factorization and hands the step to a [`LineSearch`], which keeps the
//! iterate inside the system's bounds.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{PropulsionError, PropulsionResult};
use crate::linesearch::{BoundsEnforceLineSearch, LineSearch};
use crate::traits::ResidualSystem;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub max_iterations: usize,
    /// Absolute tolerance on the residual 2-norm.
    pub atol: f64,
    /// Tolerance on the residual norm relative to the starting residual.
    pub rtol: f64,
    /// Turn non-convergence into [`PropulsionError::SolverDiverged`].
    pub err_on_non_converge: bool,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        NewtonConfig {
            max_iterations: 30,
            atol: 1e-10,
            rtol: 1e-10,
            err_on_non_converge: false,
        }
    }
}

impl NewtonConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, atol: f64, rtol: f64) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }

    pub fn with_err_on_non_converge(mut self, err: bool) -> Self {
        self.err_on_non_converge = err;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveStatus {
    pub converged: bool,
    pub iterations: usize,
    pub residual_norm: f64,
    pub initial_residual_norm: f64,
}

#[derive(Debug, Clone)]
pub struct NewtonReport {
    /// Last iterate; the solution when `status.converged`.
    pub x: DVector<f64>,
    pub status: SolveStatus,
}

#[derive(Debug, Clone, Default)]
pub struct NewtonSolver<L: LineSearch = BoundsEnforceLineSearch> {
    pub config: NewtonConfig,
    pub line_search: L,
}

impl NewtonSolver<BoundsEnforceLineSearch> {
    pub fn new(config: NewtonConfig) -> Self {
        NewtonSolver {
            config,
            line_search: BoundsEnforceLineSearch::default(),
        }
    }
}

impl<L: LineSearch> NewtonSolver<L> {
    pub fn with_line_search(config: NewtonConfig, line_search: L) -> Self {
        NewtonSolver { config, line_search }
    }

    fn is_converged(&self, norm: f64, norm0: f64) -> bool {
        norm < self.config.atol || (norm0 > 0.0 && norm / norm0 < self.config.rtol)
    }

    /// Solves `system` starting from `x0`.
    ///
    /// Running out of iterations is reported through
    /// [`SolveStatus::converged`] unless the config asks for an error. A
    /// singular Jacobian always fails.
    pub fn solve<S: ResidualSystem>(&self, system: &S, x0: DVector<f64>) -> PropulsionResult<NewtonReport> {
        let n = system.dim();
        if x0.len() != n {
            return Err(PropulsionError::ShapeMismatch {
                quantity: "newton initial iterate",
                expected: n,
                actual: x0.len(),
            });
        }
        let lower = system.lower_bounds();
        let upper = system.upper_bounds();

        let mut x = x0;
        let mut r = system.residual(&x)?;
        let norm0 = r.norm();
        let mut norm = norm0;
        let mut iterations = 0;
        log::debug!("newton: iter 0 |r| = {norm0:.6e}");

        while !self.is_converged(norm, norm0) && iterations < self.config.max_iterations {
            let jac = system.jacobian(&x)?;
            let step = jac
                .lu()
                .solve(&(-&r))
                .ok_or(PropulsionError::SingularJacobian { iteration: iterations })?;

            x = self.line_search.apply(&x, &step, &lower, &upper);
            r = system.residual(&x)?;
            norm = r.norm();
            iterations += 1;
            log::debug!("newton: iter {iterations} |r| = {norm:.6e}");

            if !norm.is_finite() {
                break;
            }
        }

        let status = SolveStatus {
            converged: self.is_converged(norm, norm0),
            iterations,
            residual_norm: norm,
            initial_residual_norm: norm0,
        };

        if status.converged {
            log::info!("newton converged in {iterations} iterations (|r| = {norm:.3e})");
        } else {
            log::warn!(
                "newton failed to converge after {iterations} iterations (|r| = {norm:.3e}, |r0| = {norm0:.3e})"
            );
            if self.config.err_on_non_converge {
                return Err(PropulsionError::SolverDiverged {
                    iteration: iterations,
                    residual_norm: norm,
                });
            }
        }

        Ok(NewtonReport { x, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linesearch::BoundEnforcement;
    use nalgebra::DMatrix;

    /// x0^2 + x1^2 = 4, x0 = x1, root at (sqrt 2, sqrt 2).
    struct Circle;

    impl ResidualSystem for Circle {
        fn dim(&self) -> usize {
            2
        }

        fn residual(&self, x: &DVector<f64>) -> PropulsionResult<DVector<f64>> {
            Ok(DVector::from_vec(vec![x[0] * x[0] + x[1] * x[1] - 4.0, x[0] - x[1]]))
        }

        fn jacobian(&self, x: &DVector<f64>) -> PropulsionResult<DMatrix<f64>> {
            Ok(DMatrix::from_row_slice(2, 2, &[2.0 * x[0], 2.0 * x[1], 1.0, -1.0]))
        }

        fn lower_bounds(&self) -> DVector<f64> {
            DVector::from_element(2, 0.0)
        }

        fn upper_bounds(&self) -> DVector<f64> {
            DVector::from_element(2, 1.5)
        }
    }

    /// exp(x) = 0 has no root; Newton walks off to -inf.
    struct NoRoot;

    impl ResidualSystem for NoRoot {
        fn dim(&self) -> usize {
            1
        }

        fn residual(&self, x: &DVector<f64>) -> PropulsionResult<DVector<f64>> {
            Ok(x.map(f64::exp))
        }

        fn jacobian(&self, x: &DVector<f64>) -> PropulsionResult<DMatrix<f64>> {
            Ok(DMatrix::from_element(1, 1, x[0].exp()))
        }
    }

    /// r(x) = x^2 - 1 at x = 0 has a zero Jacobian.
    struct Flat;

    impl ResidualSystem for Flat {
        fn dim(&self) -> usize {
            1
        }

        fn residual(&self, x: &DVector<f64>) -> PropulsionResult<DVector<f64>> {
            Ok(x.map(|v| v * v - 1.0))
        }

        fn jacobian(&self, x: &DVector<f64>) -> PropulsionResult<DMatrix<f64>> {
            Ok(DMatrix::from_element(1, 1, 2.0 * x[0]))
        }
    }

    #[test]
    fn test_converges_on_coupled_system() {
        let solver = NewtonSolver::new(NewtonConfig::default());
        let report = solver.solve(&Circle, DVector::from_vec(vec![1.0, 0.5])).unwrap();

        assert!(report.status.converged);
        assert!(report.status.iterations < 10);
        assert!((report.x[0] - 2f64.sqrt()).abs() < 1e-9);
        assert!((report.x[1] - 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_non_convergence_is_soft_by_default() {
        let solver = NewtonSolver::new(NewtonConfig::default().with_max_iterations(5));
        let report = solver.solve(&NoRoot, DVector::from_element(1, 0.0)).unwrap();

        assert!(!report.status.converged);
        assert_eq!(report.status.iterations, 5);
        assert!((report.x[0] + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_convergence_can_be_an_error() {
        let config = NewtonConfig::default()
            .with_max_iterations(3)
            .with_err_on_non_converge(true);
        let err = NewtonSolver::new(config)
            .solve(&NoRoot, DVector::from_element(1, 0.0))
            .unwrap_err();
        assert!(matches!(err, PropulsionError::SolverDiverged { iteration: 3, .. }));
    }

    #[test]
    fn test_singular_jacobian_is_hard_failure() {
        let err = NewtonSolver::new(NewtonConfig::default())
            .solve(&Flat, DVector::from_element(1, 0.0))
            .unwrap_err();
        assert!(matches!(err, PropulsionError::SingularJacobian { iteration: 0 }));
    }

    #[test]
    fn test_iterates_respect_bounds_with_either_enforcement() {
        for enforcement in [BoundEnforcement::Scalar, BoundEnforcement::Wall] {
            let solver = NewtonSolver::with_line_search(
                NewtonConfig::default(),
                BoundsEnforceLineSearch::new(enforcement),
            );
            // The raw first step from here overshoots to (5.1, 5.1).
            let report = solver.solve(&Circle, DVector::from_vec(vec![0.2, 0.2])).unwrap();
            assert!(report.x.iter().all(|&v| (0.0..=1.5).contains(&v)));
            assert!(report.status.converged, "{enforcement:?}");
        }
    }

    #[test]
    fn test_already_converged_start_takes_no_steps() {
        let root = 2f64.sqrt();
        let report = NewtonSolver::new(NewtonConfig::default())
            .solve(&Circle, DVector::from_vec(vec![root, root]))
            .unwrap();
        assert_eq!(report.status.iterations, 0);
        assert!(report.status.converged);
    }

    #[test]
    fn test_rejects_wrong_initial_length() {
        let err = NewtonSolver::new(NewtonConfig::default())
            .solve(&Circle, DVector::from_element(3, 1.0))
            .unwrap_err();
        assert!(matches!(err, PropulsionError::ShapeMismatch { expected: 2, actual: 3, .. }));
    }
}
