//! Thrust and power coefficient surrogates.
//!
//! A surrogate is a black box `f(D, pitch, n, V)` with analytic input
//! derivatives. Points are `[D (m), pitch (deg), n (rev/s), V (m/s)]`.
//! [`ResponseSurface`] is the persisted quadratic fit used by default.

use std::fmt::Debug;
use std::path::Path;

use serde::{Deserialize, Serialize};
use simcore::{PropulsionError, PropulsionResult};

pub const N_INPUTS: usize = 4;
pub const DIAMETER: usize = 0;
pub const PITCH: usize = 1;
pub const SPEED: usize = 2;
pub const VELOCITY: usize = 3;

pub type SurrogatePoint = [f64; N_INPUTS];

pub const THRUST_FILE: &str = "thrust_sm.json";
pub const POWER_FILE: &str = "power_sm.json";
pub const DEFAULT_DIR: &str = "surrogate_models";

/// Box of inputs the surrogate was fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingBounds {
    pub lower: SurrogatePoint,
    pub upper: SurrogatePoint,
}

impl TrainingBounds {
    pub fn contains(&self, point: &SurrogatePoint) -> bool {
        (0..N_INPUTS).all(|k| point[k] >= self.lower[k] && point[k] <= self.upper[k])
    }
}

/// Batched prediction contract the coefficient component relies on.
pub trait CoefficientSurrogate: Debug + Send + Sync {
    fn predict_values(&self, points: &[SurrogatePoint]) -> Vec<f64>;

    /// d prediction / d input `input_index` at every point.
    fn predict_derivatives(&self, points: &[SurrogatePoint], input_index: usize) -> Vec<f64>;

    fn training_bounds(&self) -> Option<&TrainingBounds>;
}

/// Full quadratic in normalized inputs `z = (x - center) / scale`:
/// `intercept + linear·z + Σ_{i<=j} quadratic[i][j] z_i z_j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSurface {
    pub center: SurrogatePoint,
    pub scale: SurrogatePoint,
    pub intercept: f64,
    pub linear: [f64; N_INPUTS],
    /// Only the upper triangle (`i <= j`) is read.
    pub quadratic: [[f64; N_INPUTS]; N_INPUTS],
    #[serde(default)]
    pub bounds: Option<TrainingBounds>,
}

const BUILTIN_CENTER: SurrogatePoint = [0.45, 9.0, 120.0, 15.0];
const BUILTIN_SCALE: SurrogatePoint = [0.2, 7.0, 110.0, 15.0];
const BUILTIN_BOUNDS: TrainingBounds = TrainingBounds {
    lower: [0.25, 2.0, 10.0, 0.0],
    upper: [0.65, 16.0, 230.0, 30.0],
};

impl ResponseSurface {
    /// Thrust coefficient fit shipped with the crate.
    pub fn builtin_thrust() -> Self {
        let mut quadratic = [[0.0; N_INPUTS]; N_INPUTS];
        quadratic[PITCH][PITCH] = -0.004;
        quadratic[SPEED][SPEED] = -0.006;
        quadratic[SPEED][VELOCITY] = 0.004;
        ResponseSurface {
            center: BUILTIN_CENTER,
            scale: BUILTIN_SCALE,
            intercept: 0.11,
            linear: [0.01, 0.012, 0.02, -0.03],
            quadratic,
            bounds: Some(BUILTIN_BOUNDS),
        }
    }

    /// Power coefficient fit shipped with the crate.
    pub fn builtin_power() -> Self {
        let mut quadratic = [[0.0; N_INPUTS]; N_INPUTS];
        quadratic[PITCH][PITCH] = 0.002;
        quadratic[PITCH][SPEED] = 0.002;
        ResponseSurface {
            center: BUILTIN_CENTER,
            scale: BUILTIN_SCALE,
            intercept: 0.045,
            linear: [0.004, 0.009, 0.006, -0.010],
            quadratic,
            bounds: Some(BUILTIN_BOUNDS),
        }
    }

    pub fn validate(&self) -> PropulsionResult<()> {
        if let Some(k) = (0..N_INPUTS).find(|&k| !(self.scale[k].is_finite() && self.scale[k] > 0.0)) {
            return Err(PropulsionError::Surrogate(format!(
                "scale[{k}] = {} must be finite and > 0",
                self.scale[k]
            )));
        }
        let all_finite = self.center.iter().all(|v| v.is_finite())
            && self.intercept.is_finite()
            && self.linear.iter().all(|v| v.is_finite())
            && self.quadratic.iter().flatten().all(|v| v.is_finite());
        if !all_finite {
            return Err(PropulsionError::Surrogate("non-finite coefficient".to_string()));
        }
        if let Some(b) = &self.bounds {
            if (0..N_INPUTS).any(|k| b.lower[k] > b.upper[k]) {
                return Err(PropulsionError::Surrogate("training bounds are inverted".to_string()));
            }
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> PropulsionResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let surface: Self = serde_json::from_str(&contents)?;
        surface.validate()?;
        Ok(surface)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> PropulsionResult<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn normalize(&self, x: &SurrogatePoint) -> SurrogatePoint {
        let mut z = [0.0; N_INPUTS];
        for k in 0..N_INPUTS {
            z[k] = (x[k] - self.center[k]) / self.scale[k];
        }
        z
    }

    pub fn value(&self, x: &SurrogatePoint) -> f64 {
        let z = self.normalize(x);
        let mut v = self.intercept;
        for i in 0..N_INPUTS {
            v += self.linear[i] * z[i];
            for j in i..N_INPUTS {
                v += self.quadratic[i][j] * z[i] * z[j];
            }
        }
        v
    }

    pub fn derivative(&self, x: &SurrogatePoint, k: usize) -> f64 {
        let z = self.normalize(x);
        let mut dz = self.linear[k] + 2.0 * self.quadratic[k][k] * z[k];
        for j in 0..N_INPUTS {
            if j < k {
                dz += self.quadratic[j][k] * z[j];
            } else if j > k {
                dz += self.quadratic[k][j] * z[j];
            }
        }
        dz / self.scale[k]
    }
}

impl CoefficientSurrogate for ResponseSurface {
    fn predict_values(&self, points: &[SurrogatePoint]) -> Vec<f64> {
        points.iter().map(|x| self.value(x)).collect()
    }

    fn predict_derivatives(&self, points: &[SurrogatePoint], input_index: usize) -> Vec<f64> {
        points.iter().map(|x| self.derivative(x, input_index)).collect()
    }

    fn training_bounds(&self) -> Option<&TrainingBounds> {
        self.bounds.as_ref()
    }
}

/// The thrust (`ct`) and power (`cp`) predictors, loaded together once.
#[derive(Debug)]
pub struct SurrogatePair {
    pub thrust: Box<dyn CoefficientSurrogate>,
    pub power: Box<dyn CoefficientSurrogate>,
}

impl Default for SurrogatePair {
    fn default() -> Self {
        SurrogatePair::builtin()
    }
}

impl SurrogatePair {
    pub fn new(thrust: Box<dyn CoefficientSurrogate>, power: Box<dyn CoefficientSurrogate>) -> Self {
        SurrogatePair { thrust, power }
    }

    pub fn builtin() -> Self {
        SurrogatePair::new(
            Box::new(ResponseSurface::builtin_thrust()),
            Box::new(ResponseSurface::builtin_power()),
        )
    }

    /// Reads `thrust_sm.json` and `power_sm.json` from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> PropulsionResult<Self> {
        let dir = dir.as_ref();
        let thrust = ResponseSurface::from_file(dir.join(THRUST_FILE))?;
        let power = ResponseSurface::from_file(dir.join(POWER_FILE))?;
        log::info!("loaded coefficient surrogates from {}", dir.display());
        Ok(SurrogatePair::new(Box::new(thrust), Box::new(power)))
    }

    /// Loads from `dir` when both files exist, otherwise falls back to the
    /// built-in fits.
    pub fn load_or_builtin(dir: impl AsRef<Path>) -> PropulsionResult<Self> {
        let dir = dir.as_ref();
        if dir.join(THRUST_FILE).is_file() && dir.join(POWER_FILE).is_file() {
            SurrogatePair::load(dir)
        } else {
            log::info!("no surrogate files in {}, using built-in fits", dir.display());
            Ok(SurrogatePair::builtin())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT: SurrogatePoint = [0.3556, 5.0, 81.6, 13.716];

    #[test]
    fn test_center_returns_intercept() {
        let ct = ResponseSurface::builtin_thrust();
        assert!((ct.value(&BUILTIN_CENTER) - 0.11).abs() < 1e-15);
    }

    #[test]
    fn test_derivatives_match_finite_difference() {
        for surface in [ResponseSurface::builtin_thrust(), ResponseSurface::builtin_power()] {
            for k in 0..N_INPUTS {
                let h = 1e-6 * surface.scale[k];
                let mut plus = POINT;
                let mut minus = POINT;
                plus[k] += h;
                minus[k] -= h;
                let fd = (surface.value(&plus) - surface.value(&minus)) / (2.0 * h);
                let exact = surface.derivative(&POINT, k);
                assert!((fd - exact).abs() < 1e-8 * exact.abs().max(1.0), "input {k}: {fd} vs {exact}");
            }
        }
    }

    #[test]
    fn test_batched_prediction() {
        let cp = ResponseSurface::builtin_power();
        let points = [POINT, BUILTIN_CENTER];
        let values = cp.predict_values(&points);
        assert_eq!(values.len(), 2);
        assert!((values[1] - 0.045).abs() < 1e-15);
        let d = cp.predict_derivatives(&points, SPEED);
        assert!((d[1] - 0.006 / 110.0).abs() < 1e-15);
    }

    #[test]
    fn test_training_bounds() {
        let ct = ResponseSurface::builtin_thrust();
        let bounds = ct.training_bounds().unwrap();
        assert!(bounds.contains(&POINT));
        assert!(!bounds.contains(&[1.0, 5.0, 81.6, 13.7]));
    }

    #[test]
    fn test_validate_rejects_zero_scale() {
        let mut ct = ResponseSurface::builtin_thrust();
        ct.scale[PITCH] = 0.0;
        assert!(matches!(ct.validate(), Err(PropulsionError::Surrogate(_))));
    }

    #[test]
    fn test_pair_round_trips_through_directory() {
        let dir = std::env::temp_dir().join(format!("aero_surrogates_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        ResponseSurface::builtin_thrust().to_file(dir.join(THRUST_FILE)).unwrap();
        ResponseSurface::builtin_power().to_file(dir.join(POWER_FILE)).unwrap();

        let pair = SurrogatePair::load(&dir).unwrap();
        let builtin = SurrogatePair::builtin();
        let a = pair.thrust.predict_values(&[POINT]);
        let b = builtin.thrust.predict_values(&[POINT]);
        assert!((a[0] - b[0]).abs() < 1e-15);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let err = SurrogatePair::load("/definitely/not/here").unwrap_err();
        assert!(matches!(err, PropulsionError::Io(_)));
        assert!(SurrogatePair::load_or_builtin("/definitely/not/here").is_ok());
    }

    #[test]
    fn test_shipped_models_match_builtin() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(DEFAULT_DIR);
        let thrust = ResponseSurface::from_file(dir.join(THRUST_FILE)).unwrap();
        let power = ResponseSurface::from_file(dir.join(POWER_FILE)).unwrap();
        assert_eq!(thrust, ResponseSurface::builtin_thrust());
        assert_eq!(power, ResponseSurface::builtin_power());
    }
}
