//! Batched thrust/power coefficient lookup.
//!
//! Diameter and pitch are per propeller, speed and velocity per cell. With one
//! propeller its geometry is shared by every cell; with several, the cell at
//! `(cond, mission)` is driven by propeller `mission % props` (see
//! [`GridShape::prop_of`]). The same assignment shapes the Jacobian: diameter
//! and pitch blocks are `cells x props` with one nonzero per row, speed and
//! velocity blocks are diagonal.

use nalgebra::{DMatrix, DVector};
use simcore::{GridShape, PropulsionResult};

use crate::surrogate::{
    CoefficientSurrogate, DIAMETER, PITCH, SPEED, SurrogatePair, SurrogatePoint, VELOCITY,
};

#[derive(Debug, Clone, Copy)]
pub struct CoefficientInputs<'a> {
    /// m, one per propeller
    pub diameter: &'a DVector<f64>,
    /// deg, one per propeller
    pub pitch: &'a DVector<f64>,
    /// rev/s, one per cell
    pub speed: &'a DVector<f64>,
    /// m/s, one per cell
    pub velocity: &'a DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct CoefficientOutputs {
    pub ct: DVector<f64>,
    pub cp: DVector<f64>,
    /// Cells whose query fell outside the surrogate's training box.
    pub extrapolated: Vec<usize>,
}

/// Partials of one coefficient with respect to each input.
#[derive(Debug, Clone)]
pub struct CoefficientJacobian {
    /// cells x props
    pub diameter: DMatrix<f64>,
    /// cells x props
    pub pitch: DMatrix<f64>,
    /// cells x cells, diagonal
    pub speed: DMatrix<f64>,
    /// cells x cells, diagonal
    pub velocity: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct CoefficientPartials {
    pub ct: CoefficientJacobian,
    pub cp: CoefficientJacobian,
}

#[derive(Debug, Clone, Copy)]
pub struct PropCoefficients {
    pub shape: GridShape,
}

impl PropCoefficients {
    pub fn new(shape: GridShape) -> Self {
        PropCoefficients { shape }
    }

    /// One surrogate query per cell, geometry taken from the cell's propeller.
    pub fn points(&self, inputs: &CoefficientInputs) -> PropulsionResult<Vec<SurrogatePoint>> {
        let shape = &self.shape;
        shape.check_props("D_prop", inputs.diameter)?;
        shape.check_props("pitch", inputs.pitch)?;
        shape.check_cells("rpm", inputs.speed)?;
        shape.check_cells("velocity", inputs.velocity)?;

        Ok((0..shape.cells())
            .map(|cell| {
                let p = shape.prop_of(cell);
                [inputs.diameter[p], inputs.pitch[p], inputs.speed[cell], inputs.velocity[cell]]
            })
            .collect())
    }

    pub fn compute(&self, surrogates: &SurrogatePair, inputs: &CoefficientInputs) -> PropulsionResult<CoefficientOutputs> {
        let points = self.points(inputs)?;
        let ct = DVector::from_vec(surrogates.thrust.predict_values(&points));
        let cp = DVector::from_vec(surrogates.power.predict_values(&points));

        let extrapolated = extrapolated_cells(&points, surrogates);
        if let Some(&first) = extrapolated.first() {
            let [d, pitch, n, v] = points[first];
            log::warn!(
                "{} of {} coefficient queries outside the surrogate training range (first: cell {first}, D = {d:.4} m, pitch = {pitch:.2} deg, n = {n:.2} rev/s, V = {v:.2} m/s)",
                extrapolated.len(),
                points.len(),
            );
        }

        Ok(CoefficientOutputs { ct, cp, extrapolated })
    }

    pub fn partials(&self, surrogates: &SurrogatePair, inputs: &CoefficientInputs) -> PropulsionResult<CoefficientPartials> {
        let points = self.points(inputs)?;
        Ok(CoefficientPartials {
            ct: self.jacobian(surrogates.thrust.as_ref(), &points),
            cp: self.jacobian(surrogates.power.as_ref(), &points),
        })
    }

    fn jacobian(&self, surrogate: &dyn CoefficientSurrogate, points: &[SurrogatePoint]) -> CoefficientJacobian {
        let cells = self.shape.cells();
        let props = self.shape.props;

        let d_diameter = surrogate.predict_derivatives(points, DIAMETER);
        let d_pitch = surrogate.predict_derivatives(points, PITCH);
        let d_speed = surrogate.predict_derivatives(points, SPEED);
        let d_velocity = surrogate.predict_derivatives(points, VELOCITY);

        let mut diameter = DMatrix::zeros(cells, props);
        let mut pitch = DMatrix::zeros(cells, props);
        for cell in 0..cells {
            let p = self.shape.prop_of(cell);
            diameter[(cell, p)] = d_diameter[cell];
            pitch[(cell, p)] = d_pitch[cell];
        }

        CoefficientJacobian {
            diameter,
            pitch,
            speed: DMatrix::from_diagonal(&DVector::from_vec(d_speed)),
            velocity: DMatrix::from_diagonal(&DVector::from_vec(d_velocity)),
        }
    }
}

fn extrapolated_cells(points: &[SurrogatePoint], surrogates: &SurrogatePair) -> Vec<usize> {
    let inside = |x: &SurrogatePoint| {
        surrogates.thrust.training_bounds().is_none_or(|b| b.contains(x))
            && surrogates.power.training_bounds().is_none_or(|b| b.contains(x))
    };
    points
        .iter()
        .enumerate()
        .filter(|(_, x)| !inside(x))
        .map(|(cell, _)| cell)
        .collect()
}
