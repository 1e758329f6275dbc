//! Condition × mission grid layout and propeller broadcasting.
//!
//! Every per-condition, per-mission quantity is stored as a flat
//! `DVector<f64>` in row-major order: `cell = cond * flight_missions + mission`.
//! Per-mission quantities (battery) have length `flight_missions` and
//! per-propeller quantities (diameter, pitch) have length `props`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{PropulsionError, PropulsionResult};

/// Array dimensions shared by every coupled component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    /// Number of flight conditions analysed per mission.
    pub flight_conds: usize,
    /// Number of flight missions.
    pub flight_missions: usize,
    /// Number of distinct propellers being sized.
    pub props: usize,
}

impl Default for GridShape {
    fn default() -> Self {
        GridShape {
            flight_conds: 1,
            flight_missions: 1,
            props: 1,
        }
    }
}

impl GridShape {
    pub fn new(flight_conds: usize, flight_missions: usize, props: usize) -> PropulsionResult<Self> {
        let shape = GridShape {
            flight_conds,
            flight_missions,
            props,
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn validate(&self) -> PropulsionResult<()> {
        if self.flight_conds == 0 || self.flight_missions == 0 || self.props == 0 {
            return Err(PropulsionError::Config(format!(
                "grid dimensions must be >= 1, got {}x{} with {} props",
                self.flight_conds, self.flight_missions, self.props
            )));
        }
        if self.props > self.flight_missions {
            return Err(PropulsionError::Config(format!(
                "props ({}) must not exceed flight_missions ({})",
                self.props, self.flight_missions
            )));
        }
        Ok(())
    }

    /// Total number of (condition, mission) cells.
    pub fn cells(&self) -> usize {
        self.flight_conds * self.flight_missions
    }

    pub fn cell(&self, cond: usize, mission: usize) -> usize {
        cond * self.flight_missions + mission
    }

    pub fn mission_of(&self, cell: usize) -> usize {
        cell % self.flight_missions
    }

    pub fn cond_of(&self, cell: usize) -> usize {
        cell / self.flight_missions
    }

    /// Propeller driving the given cell.
    ///
    /// With a single propeller every cell shares it; otherwise propellers are
    /// assigned along the mission axis.
    pub fn prop_of(&self, cell: usize) -> usize {
        if self.props == 1 {
            0
        } else {
            self.mission_of(cell) % self.props
        }
    }

    pub fn check_cells(&self, quantity: &'static str, values: &DVector<f64>) -> PropulsionResult<()> {
        check_len(quantity, self.cells(), values.len())
    }

    pub fn check_missions(&self, quantity: &'static str, values: &DVector<f64>) -> PropulsionResult<()> {
        check_len(quantity, self.flight_missions, values.len())
    }

    pub fn check_props(&self, quantity: &'static str, values: &DVector<f64>) -> PropulsionResult<()> {
        check_len(quantity, self.props, values.len())
    }

    /// Expands a per-propeller vector to one entry per cell.
    pub fn props_to_cells(&self, per_prop: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.cells(), |cell, _| per_prop[self.prop_of(cell)])
    }

    /// Expands a per-mission vector to one entry per cell.
    pub fn missions_to_cells(&self, per_mission: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.cells(), |cell, _| per_mission[self.mission_of(cell)])
    }

    /// Broadcasts user-supplied values to `len` entries: a single value is
    /// repeated, anything else must already have the right length.
    pub fn broadcast(quantity: &'static str, values: &[f64], len: usize) -> PropulsionResult<DVector<f64>> {
        match values {
            [single] => Ok(DVector::from_element(len, *single)),
            _ if values.len() == len => Ok(DVector::from_column_slice(values)),
            _ => Err(PropulsionError::ShapeMismatch {
                quantity,
                expected: len,
                actual: values.len(),
            }),
        }
    }

    /// Reshapes a flat cell vector into a `flight_conds x flight_missions` matrix.
    pub fn to_matrix(&self, cells: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.flight_conds, self.flight_missions, cells.as_slice())
    }
}

fn check_len(quantity: &'static str, expected: usize, actual: usize) -> PropulsionResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(PropulsionError::ShapeMismatch {
            quantity,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_cell_layout() {
        let shape = GridShape::new(3, 2, 1).unwrap();
        assert_eq!(shape.cells(), 6);
        assert_eq!(shape.cell(0, 1), 1);
        assert_eq!(shape.cell(2, 0), 4);
        assert_eq!(shape.mission_of(5), 1);
        assert_eq!(shape.cond_of(5), 2);
    }

    #[test]
    fn test_single_prop_broadcasts_to_every_cell() {
        let shape = GridShape::new(3, 2, 1).unwrap();
        for cell in 0..shape.cells() {
            assert_eq!(shape.prop_of(cell), 0);
        }
    }

    #[test]
    fn test_multi_prop_follows_mission_axis() {
        let shape = GridShape::new(2, 4, 2).unwrap();
        let props: Vec<usize> = (0..shape.cells()).map(|c| shape.prop_of(c)).collect();
        assert_eq!(props, vec![0, 1, 0, 1, 0, 1, 0, 1]);

        let shape = GridShape::new(2, 3, 3).unwrap();
        let props: Vec<usize> = (0..shape.cells()).map(|c| shape.prop_of(c)).collect();
        assert_eq!(props, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_rejects_more_props_than_missions() {
        assert!(GridShape::new(1, 1, 2).is_err());
        assert!(GridShape::new(0, 1, 1).is_err());
    }

    #[test]
    fn test_broadcast_scalar_and_mismatch() {
        let v = GridShape::broadcast("throttle", &[0.8], 4).unwrap();
        assert_eq!(v.len(), 4);
        assert!(v.iter().all(|&x| (x - 0.8).abs() < 1e-15));

        let err = GridShape::broadcast("throttle", &[0.8, 0.7], 4).unwrap_err();
        assert!(matches!(err, PropulsionError::ShapeMismatch { expected: 4, actual: 2, .. }));
    }

    #[test]
    fn test_to_matrix_is_row_major() {
        let shape = GridShape::new(2, 3, 1).unwrap();
        let flat = DVector::from_vec(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let m = shape.to_matrix(&flat);
        assert_eq!(m[(0, 2)], 2.0);
        assert_eq!(m[(1, 0)], 3.0);
    }
}
