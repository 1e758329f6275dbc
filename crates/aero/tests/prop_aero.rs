//! Property-based tests for coefficient broadcasting and the RPM constraint.

use aero::{CoefficientInputs, PropCoefficients, RpmConstraint, RpmConstraintInputs, SurrogatePair};
use approx::assert_relative_eq;
use nalgebra::DVector;
use proptest::prelude::*;
use simcore::{ExplicitComponent, GridShape};

proptest! {
    /// With one propeller every cell sees the same diameter and pitch.
    #[test]
    fn single_prop_broadcasts(conds in 1usize..5, missions in 1usize..5, d in 0.25f64..0.65, pitch in 2.0f64..16.0) {
        let shape = GridShape::new(conds, missions, 1).unwrap();
        let dv = DVector::from_element(1, d);
        let pv = DVector::from_element(1, pitch);
        let n = DVector::from_fn(shape.cells(), |c, _| 40.0 + c as f64);
        let v = DVector::from_element(shape.cells(), 12.0);
        let points = PropCoefficients::new(shape)
            .points(&CoefficientInputs { diameter: &dv, pitch: &pv, speed: &n, velocity: &v })
            .unwrap();
        prop_assert_eq!(points.len(), conds * missions);
        for x in &points {
            prop_assert_eq!(x[0], d);
            prop_assert_eq!(x[1], pitch);
        }
    }

    /// Changing propeller j's geometry never moves propeller i's coefficients.
    #[test]
    fn props_do_not_interact(
        conds in 1usize..4,
        missions in 2usize..5,
        j_seed in 0usize..100,
        bump in 0.01f64..0.2,
    ) {
        let props = missions;
        let shape = GridShape::new(conds, missions, props).unwrap();
        let j = j_seed % props;
        let pair = SurrogatePair::builtin();
        let comp = PropCoefficients::new(shape);

        let d = DVector::from_fn(props, |p, _| 0.3 + 0.02 * p as f64);
        let pitch = DVector::from_fn(props, |p, _| 4.0 + p as f64);
        let n = DVector::from_fn(shape.cells(), |c, _| 50.0 + 3.0 * c as f64);
        let v = DVector::from_element(shape.cells(), 10.0);

        let mut d_bumped = d.clone();
        d_bumped[j] += bump;
        let mut pitch_bumped = pitch.clone();
        pitch_bumped[j] += 1.0;

        let base = comp.compute(&pair, &CoefficientInputs { diameter: &d, pitch: &pitch, speed: &n, velocity: &v }).unwrap();
        let moved = comp
            .compute(&pair, &CoefficientInputs { diameter: &d_bumped, pitch: &pitch_bumped, speed: &n, velocity: &v })
            .unwrap();

        for cell in 0..shape.cells() {
            if shape.prop_of(cell) != j {
                prop_assert_eq!(base.ct[cell], moved.ct[cell]);
                prop_assert_eq!(base.cp[cell], moved.cp[cell]);
            }
        }
    }

    /// `RPM_con` vanishes exactly on `rpm = 150000 / D` and grows with rpm.
    #[test]
    fn rpm_constraint_boundary(d in 6.0f64..30.0, excess in 1.0f64..5000.0) {
        let con = RpmConstraint::default();
        let limit = 150_000.0 / d;
        let on = con.compute(&RpmConstraintInputs { rpm: limit, diameter: d });
        prop_assert_eq!(on.rpm_con, 0.0);
        let over = con.compute(&RpmConstraintInputs { rpm: limit + excess, diameter: d });
        prop_assert!(over.rpm_con > 0.0);
        assert_relative_eq!(over.rpm_con, excess, max_relative = 1e-9);
    }
}
