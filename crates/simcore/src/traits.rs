use crate::error::PropulsionResult;

// Component contracts
//
// Components are evaluated one (condition, mission) cell at a time on plain
// `Copy` structs; the coupled group handles the array layout.

/// A pure algebraic map from inputs to outputs.
pub trait ExplicitComponent {
    type Inputs: Copy;
    type Outputs: Copy;

    /// Rejects inputs outside the physical domain before evaluation.
    fn check_domain(&self, inputs: &Self::Inputs) -> PropulsionResult<()>;

    fn compute(&self, inputs: &Self::Inputs) -> Self::Outputs;

    /// Forward-mode tangent: the derivative of every output along `seed`.
    fn linearize(&self, inputs: &Self::Inputs, seed: &Self::Inputs) -> Self::Outputs;
}

/// A scalar residual whose root defines one unknown per cell.
pub trait ImplicitComponent {
    type Inputs: Copy;

    fn initial_guess(&self) -> f64;

    fn residual(&self, inputs: &Self::Inputs) -> f64;

    fn linearize_residual(&self, inputs: &Self::Inputs, seed: &Self::Inputs) -> f64;
}

/// A square nonlinear system `r(x) = 0` with box bounds on `x`.
pub trait ResidualSystem {
    fn dim(&self) -> usize;

    fn residual(&self, x: &nalgebra::DVector<f64>) -> PropulsionResult<nalgebra::DVector<f64>>;

    /// Dense `dim x dim` Jacobian `dr/dx`.
    fn jacobian(&self, x: &nalgebra::DVector<f64>) -> PropulsionResult<nalgebra::DMatrix<f64>>;

    fn lower_bounds(&self) -> nalgebra::DVector<f64> {
        nalgebra::DVector::from_element(self.dim(), f64::NEG_INFINITY)
    }

    fn upper_bounds(&self) -> nalgebra::DVector<f64> {
        nalgebra::DVector::from_element(self.dim(), f64::INFINITY)
    }
}
