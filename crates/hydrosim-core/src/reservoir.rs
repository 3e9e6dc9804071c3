//! Reservoirs: stage–volume–discharge relations and the step continuity solve.

use crate::errors::{HydroError, HydroResult};
use crate::options::Time;
use crate::timeseries::Timeseries;
use serde::{Deserialize, Serialize};
use tracing::warn;

const SEC_PER_DAY: f64 = 86400.0;
const MAX_NEWTON_ITERATIONS: usize = 50;

/// A monotone non-decreasing relation of stage to volume or discharge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageRelation {
    /// `value = coeff * stage`
    Linear { coeff: f64 },
    /// Piecewise-linear table; extrapolates with the end slopes.
    Table { stages: Vec<f64>, values: Vec<f64> },
}

impl StageRelation {
    pub fn validate(&self, what: &str) -> HydroResult<()> {
        match self {
            StageRelation::Linear { coeff } => {
                if *coeff < 0.0 {
                    return Err(HydroError::Data(format!(
                        "{what} relation has a negative coefficient"
                    )));
                }
            }
            StageRelation::Table { stages, values } => {
                if stages.len() < 2 || stages.len() != values.len() {
                    return Err(HydroError::Data(format!(
                        "{what} table needs at least two matching stage/value pairs"
                    )));
                }
                for w in stages.windows(2) {
                    if w[1] <= w[0] {
                        return Err(HydroError::Data(format!("{what} table stages must increase")));
                    }
                }
                for w in values.windows(2) {
                    if w[1] < w[0] {
                        return Err(HydroError::Data(format!(
                            "{what} table is not monotone non-decreasing"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn value(&self, h: f64) -> f64 {
        match self {
            StageRelation::Linear { coeff } => coeff * h.max(0.0),
            StageRelation::Table { stages, values } => {
                let n = stages.len();
                if h <= stages[0] {
                    // extrapolate below with the first slope, floored at zero
                    let slope = (values[1] - values[0]) / (stages[1] - stages[0]);
                    return (values[0] + slope * (h - stages[0])).max(0.0);
                }
                if h >= stages[n - 1] {
                    let slope = (values[n - 1] - values[n - 2]) / (stages[n - 1] - stages[n - 2]);
                    return values[n - 1] + slope * (h - stages[n - 1]);
                }
                let i = stages.partition_point(|&s| s <= h) - 1;
                let f = (h - stages[i]) / (stages[i + 1] - stages[i]);
                values[i] + f * (values[i + 1] - values[i])
            }
        }
    }

    /// Local slope d(value)/dh.
    pub fn slope(&self, h: f64) -> f64 {
        match self {
            StageRelation::Linear { coeff } => *coeff,
            StageRelation::Table { .. } => {
                let delta = 1e-6;
                (self.value(h + delta) - self.value((h - delta).max(0.0)))
                    / (delta + delta.min(h.max(0.0)))
            }
        }
    }
}

/// A reservoir at a subbasin outlet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservoir {
    /// Stage–volume relation, V(h) [m³].
    pub volume: StageRelation,
    /// Stage–discharge relation, Q(h) [m³/s]; zero stage gives zero outflow.
    pub discharge: StageRelation,
    /// Current stage [m].
    pub stage: f64,
    /// Optional extraction demand [m³/s].
    pub extraction: Option<Timeseries>,
}

impl Reservoir {
    pub fn validate(&self) -> HydroResult<()> {
        self.volume.validate("stage-volume")?;
        self.discharge.validate("stage-discharge")?;
        if self.discharge.value(0.0).abs() > 1e-9 {
            return Err(HydroError::Data(
                "stage-discharge relation must give zero outflow at zero stage".to_string(),
            ));
        }
        Ok(())
    }

    pub fn extraction_at(&self, t: Time) -> f64 {
        self.extraction.as_ref().map_or(0.0, |ts| ts.value_at(t))
    }

    /// Advance the reservoir over one step without committing state.
    ///
    /// Solves `dV/dt = Q_in - Q(h) - extraction - losses` with trapezoidal
    /// implicit continuity. The step is subdivided by the local relaxation
    /// rate so fast (small) reservoirs track the analytic drawdown; each
    /// substep's stage comes from a damped Newton iteration on the residual.
    ///
    /// Returns the end-of-step stage, the time-averaged outflow [m³/s] and
    /// the number of substeps that failed to converge.
    pub fn route(&self, q_in: f64, t: Time, dt_days: f64, losses: f64) -> (f64, f64, usize) {
        let dt = dt_days * SEC_PER_DAY;
        let extraction = self.extraction_at(t);
        let net_in = q_in - extraction - losses;

        // relaxation rate lambda = dQ/dh / dV/dh sizes the substeps
        let vprime = self.volume.slope(self.stage.max(0.01)).max(1e-6);
        let lambda = self.discharge.slope(self.stage.max(0.01)).max(0.0) / vprime;
        let n_sub = ((2.0 * lambda * dt).ceil() as usize).clamp(1, 200);
        let delta = dt / n_sub as f64;

        let mut h = self.stage.max(0.0);
        let mut outflow_sum = 0.0;
        let mut failures = 0;

        for _ in 0..n_sub {
            let v0 = self.volume.value(h);
            let q0 = self.discharge.value(h);
            // residual g(h1) is strictly increasing in h1
            let g = |h1: f64| {
                (self.volume.value(h1) - v0) / delta
                    - (net_in - 0.5 * (q0 + self.discharge.value(h1)))
            };

            let mut h1 = if g(0.0) >= 0.0 {
                // even an empty reservoir over-drains: it empties this substep
                0.0
            } else {
                let mut x = h;
                let mut converged = false;
                for _ in 0..MAX_NEWTON_ITERATIONS {
                    let gx = g(x);
                    let dg = self.volume.slope(x).max(1e-12) / delta
                        + 0.5 * self.discharge.slope(x).max(0.0);
                    let step = gx / dg;
                    let mut x_new = x - step;
                    if x_new < 0.0 {
                        x_new = 0.5 * x;
                    }
                    if (x_new - x).abs() < 1e-12 * x.max(1.0) {
                        x = x_new;
                        converged = true;
                        break;
                    }
                    x = x_new;
                }
                if !converged {
                    failures += 1;
                    warn!(stage = x, "reservoir continuity iteration did not converge");
                }
                x
            };
            if h1 < 0.0 {
                h1 = 0.0;
            }
            outflow_sum += 0.5 * (q0 + self.discharge.value(h1));
            h = h1;
        }

        (h, (outflow_sum / n_sub as f64).max(0.0), failures)
    }

    pub fn set_stage(&mut self, h: f64) {
        self.stage = h.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_reservoir() -> Reservoir {
        Reservoir {
            volume: StageRelation::Linear { coeff: 10000.0 },
            discharge: StageRelation::Linear { coeff: 1.0 },
            stage: 1.0,
            extraction: None,
        }
    }

    #[test]
    fn linear_drawdown_tracks_exponential() {
        // V = A h, Q = k h, no inflow: h(t) = exp(-k t / A)
        let mut res = linear_reservoir();
        let k_over_a = 1.0 / 10000.0;
        let dt_days = 1.0;
        for step in 1..=10 {
            let (h, _q, failures) = res.route(0.0, 0.0, dt_days, 0.0);
            assert_eq!(failures, 0);
            res.set_stage(h);
            let analytic = (-k_over_a * step as f64 * SEC_PER_DAY).exp();
            assert!(
                (h - analytic).abs() < 1e-4,
                "step {step}: h = {h}, analytic = {analytic}"
            );
        }
    }

    #[test]
    fn continuity_closes_over_the_step() {
        let res = linear_reservoir();
        let q_in = 0.5;
        let (h, q_out, _) = res.route(q_in, 0.0, 1.0, 0.0);
        let dv = res.volume.value(h) - res.volume.value(res.stage);
        assert_relative_eq!(dv, SEC_PER_DAY * (q_in - q_out), max_relative = 1e-6);
    }

    #[test]
    fn steady_state_passes_inflow_through() {
        // start at the equilibrium stage for the inflow
        let mut res = linear_reservoir();
        res.stage = 2.0;
        let (h, q_out, _) = res.route(2.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(h, 2.0, epsilon = 1e-6);
        assert_relative_eq!(q_out, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn empty_reservoir_stays_empty() {
        let mut res = linear_reservoir();
        res.stage = 0.0;
        let (h, q_out, _) = res.route(0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(h, 0.0);
        assert_relative_eq!(q_out, 0.0);
    }

    #[test]
    fn extraction_accelerates_drawdown() {
        let mut with_ext = linear_reservoir();
        with_ext.extraction = Some(Timeseries::constant(0.05, 10.0));
        let (h_ext, _, _) = with_ext.route(0.0, 0.5, 1.0, 0.0);
        let (h_no, _, _) = linear_reservoir().route(0.0, 0.5, 1.0, 0.0);
        assert!(h_ext < h_no);
    }

    #[test]
    fn table_relation_interpolates() {
        let rel = StageRelation::Table {
            stages: vec![0.0, 1.0, 2.0],
            values: vec![0.0, 10.0, 40.0],
        };
        rel.validate("test").unwrap();
        assert_relative_eq!(rel.value(0.5), 5.0);
        assert_relative_eq!(rel.value(1.5), 25.0);
        // end-slope extrapolation
        assert_relative_eq!(rel.value(3.0), 70.0);
    }

    #[test]
    fn non_monotone_table_is_rejected() {
        let rel = StageRelation::Table {
            stages: vec![0.0, 1.0, 2.0],
            values: vec![0.0, 10.0, 5.0],
        };
        assert!(rel.validate("test").is_err());
    }

    #[test]
    fn nonzero_discharge_at_zero_stage_is_rejected() {
        let res = Reservoir {
            volume: StageRelation::Linear { coeff: 100.0 },
            discharge: StageRelation::Table {
                stages: vec![0.0, 1.0],
                values: vec![1.0, 2.0],
            },
            stage: 0.0,
            extraction: None,
        };
        assert!(res.validate().is_err());
    }
}
