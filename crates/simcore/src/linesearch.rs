use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Turns a raw Newton step into the next iterate.
pub trait LineSearch {
    fn apply(
        &self,
        x: &DVector<f64>,
        step: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> DVector<f64>;
}

/// How a step that would leave the bounds is shortened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundEnforcement {
    /// Scale the whole step so the first variable to hit a bound lands on it.
    #[default]
    Scalar,
    /// Clip each violating variable to its bound and keep the rest of the step.
    Wall,
}

/// Line search that only enforces bounds; no merit-function backtracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsEnforceLineSearch {
    pub enforcement: BoundEnforcement,
}

impl BoundsEnforceLineSearch {
    pub fn new(enforcement: BoundEnforcement) -> Self {
        BoundsEnforceLineSearch { enforcement }
    }

    /// Largest `alpha` in `[0, 1]` keeping `x + alpha * step` inside the bounds.
    pub fn max_step_fraction(
        x: &DVector<f64>,
        step: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> f64 {
        let mut alpha: f64 = 1.0;
        for i in 0..x.len() {
            let target = x[i] + step[i];
            if step[i] > 0.0 && target > upper[i] {
                alpha = alpha.min((upper[i] - x[i]) / step[i]);
            } else if step[i] < 0.0 && target < lower[i] {
                alpha = alpha.min((lower[i] - x[i]) / step[i]);
            }
        }
        alpha.max(0.0)
    }
}

impl LineSearch for BoundsEnforceLineSearch {
    fn apply(
        &self,
        x: &DVector<f64>,
        step: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> DVector<f64> {
        // Start from an iterate that is itself inside the box.
        let x = x.zip_zip_map(lower, upper, |xi, lo, hi| xi.max(lo).min(hi));

        match self.enforcement {
            BoundEnforcement::Scalar => {
                let alpha = Self::max_step_fraction(&x, step, lower, upper);
                if alpha < 1.0 {
                    log::debug!("bound enforcement: scaling Newton step by {alpha:.4e}");
                }
                let mut next = &x + step * alpha;
                // Rounding can leave the limiting variable a hair outside.
                next.zip_zip_apply(lower, upper, |xi, lo, hi| *xi = xi.max(lo).min(hi));
                next
            }
            BoundEnforcement::Wall => {
                let mut clipped = 0usize;
                let next = DVector::from_fn(x.len(), |i, _| {
                    let target = x[i] + step[i];
                    if target < lower[i] {
                        clipped += 1;
                        lower[i]
                    } else if target > upper[i] {
                        clipped += 1;
                        upper[i]
                    } else {
                        target
                    }
                });
                if clipped > 0 {
                    log::debug!("bound enforcement: clipped {clipped} variable(s) to their bounds");
                }
                next
            }
        }
    }
}
