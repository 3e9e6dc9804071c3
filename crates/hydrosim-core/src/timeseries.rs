//! Regular time series and monthly climatology.
//!
//! Gauge forcings, specified inflow hydrographs, reservoir extractions and
//! constituent source series are all regular series: a start time, a fixed
//! interval and an ndarray of values. Reads are time-weighted averages so the
//! model timestep need not match the data interval.

use crate::errors::{HydroError, HydroResult};
use crate::options::{first_of_month_julian, mid_month_julian, MonthInterpMethod, Time};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A regularly sampled time series.
///
/// `values[i]` is the average over `[start + i*interval, start + (i+1)*interval)`.
/// Outside the covered range the series reads as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeseries {
    start: Time,
    interval: f64,
    values: Array1<f64>,
}

impl Timeseries {
    pub fn new(start: Time, interval: f64, values: Vec<f64>) -> HydroResult<Self> {
        if interval <= 0.0 {
            return Err(HydroError::Data(format!(
                "time series interval must be positive, got {interval}"
            )));
        }
        if values.is_empty() {
            return Err(HydroError::Data("time series has no values".to_string()));
        }
        if values.iter().any(|v| v.is_nan()) {
            return Err(HydroError::Data("time series contains NaN".to_string()));
        }
        Ok(Self {
            start,
            interval,
            values: Array1::from_vec(values),
        })
    }

    /// A series that reads `value` everywhere inside the model horizon.
    pub fn constant(value: f64, duration: f64) -> Self {
        Self {
            start: 0.0,
            interval: duration.max(1.0),
            values: Array1::from_elem(1, value),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn start(&self) -> Time {
        self.start
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Time-weighted average over the window `[t, t + duration)`.
    ///
    /// Portions of the window outside the data range contribute zero.
    pub fn aggregate(&self, t: Time, duration: f64) -> f64 {
        if duration <= 0.0 {
            return self.value_at(t);
        }
        let t0 = t;
        let t1 = t + duration;
        let mut sum = 0.0;
        // first and last data bins overlapping the window
        let i0 = ((t0 - self.start) / self.interval).floor().max(0.0) as usize;
        let i1_excl = (((t1 - self.start) / self.interval).ceil().max(0.0) as usize).min(self.len());
        for i in i0..i1_excl {
            let bin_start = self.start + i as f64 * self.interval;
            let bin_end = bin_start + self.interval;
            let overlap = (t1.min(bin_end) - t0.max(bin_start)).max(0.0);
            sum += self.values[i] * overlap;
        }
        sum / duration
    }

    /// Instantaneous value at time `t` (piecewise constant).
    pub fn value_at(&self, t: Time) -> f64 {
        // nudge so bin boundaries hit by round-off read the new bin
        let idx = (t - self.start) / self.interval + crate::options::TIME_CORRECTION;
        if idx < 0.0 {
            return 0.0;
        }
        let i = idx as usize;
        if i < self.len() {
            self.values[i]
        } else {
            0.0
        }
    }

    /// Average over model step `nn` with step length `dt`.
    pub fn value_at_step(&self, nn: usize, dt: f64) -> f64 {
        self.aggregate(nn as f64 * dt, dt)
    }
}

/// Twelve monthly values evaluated at an arbitrary day of year.
///
/// The interpolation mode decides where within the month each value is
/// anchored: piecewise constant (uniform), the first of the month, mid-month,
/// or the 21st.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyValues(pub [f64; 12]);

impl MonthlyValues {
    pub fn uniform(value: f64) -> Self {
        Self([value; 12])
    }

    /// Value at day-of-year `julian_day` under interpolation `method`.
    pub fn at(&self, julian_day: f64, method: MonthInterpMethod) -> f64 {
        let jd = julian_day.rem_euclid(365.0);
        let month = crate::options::month_of_julian(jd) as usize; // 1..=12
        match method {
            MonthInterpMethod::Uniform => self.0[month - 1],
            MonthInterpMethod::LinearFom => self.interp(jd, |m| first_of_month_julian(m)),
            MonthInterpMethod::LinearMid => self.interp(jd, mid_month_julian),
            MonthInterpMethod::Linear21 => {
                self.interp(jd, |m| first_of_month_julian(m) + 20.0)
            }
        }
    }

    /// Piecewise-linear interpolation between per-month anchor days.
    fn interp(&self, jd: f64, anchor: impl Fn(u32) -> f64) -> f64 {
        // find the anchor pair bracketing jd, wrapping across the year end
        for m in 1..=12u32 {
            let a0 = anchor(m);
            let (next, wrap) = if m == 12 { (1, 365.0) } else { (m + 1, 0.0) };
            let a1 = anchor(next) + wrap;
            let jd_adj = if m == 12 && jd < a0 { jd + 365.0 } else { jd };
            if jd_adj >= a0 && jd_adj < a1 {
                let f = (jd_adj - a0) / (a1 - a0);
                return (1.0 - f) * self.0[m as usize - 1] + f * self.0[next as usize - 1];
            }
        }
        // before the first anchor of the year: bracket is (December, January)
        let a0 = anchor(12) - 365.0;
        let a1 = anchor(1);
        let f = (jd - a0) / (a1 - a0);
        (1.0 - f) * self.0[11] + f * self.0[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_bad_construction() {
        assert!(Timeseries::new(0.0, 0.0, vec![1.0]).is_err());
        assert!(Timeseries::new(0.0, 1.0, vec![]).is_err());
        assert!(Timeseries::new(0.0, 1.0, vec![f64::NAN]).is_err());
    }

    #[test]
    fn step_average_matches_data_interval() {
        let ts = Timeseries::new(0.0, 1.0, vec![2.0, 4.0, 6.0]).unwrap();
        assert_relative_eq!(ts.value_at_step(1, 1.0), 4.0);
    }

    #[test]
    fn subdaily_read_of_daily_data() {
        let ts = Timeseries::new(0.0, 1.0, vec![2.0, 4.0]).unwrap();
        // every quarter of day 1 reads the daily value
        for nn in 4..8 {
            assert_relative_eq!(ts.value_at_step(nn, 0.25), 4.0);
        }
    }

    #[test]
    fn window_straddling_bins() {
        let ts = Timeseries::new(0.0, 1.0, vec![2.0, 4.0]).unwrap();
        // [0.5, 1.5): half of 2.0, half of 4.0
        assert_relative_eq!(ts.aggregate(0.5, 1.0), 3.0);
    }

    #[test]
    fn out_of_range_reads_zero() {
        let ts = Timeseries::new(0.0, 1.0, vec![2.0]).unwrap();
        assert_relative_eq!(ts.aggregate(5.0, 1.0), 0.0);
        assert_relative_eq!(ts.aggregate(-2.0, 1.0), 0.0);
        // window half inside
        assert_relative_eq!(ts.aggregate(-1.0, 2.0), 1.0);
    }

    #[test]
    fn five_day_window() {
        let ts = Timeseries::new(0.0, 1.0, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap();
        // average over [0,5) then scaled by 5 gives the accumulated depth
        assert_relative_eq!(ts.aggregate(0.0, 5.0) * 5.0, 15.0);
    }

    #[test]
    fn monthly_uniform_is_stepwise() {
        let mut v = [0.0; 12];
        v[0] = 10.0;
        v[1] = 20.0;
        let mv = MonthlyValues(v);
        assert_relative_eq!(mv.at(5.0, MonthInterpMethod::Uniform), 10.0);
        assert_relative_eq!(mv.at(40.0, MonthInterpMethod::Uniform), 20.0);
    }

    #[test]
    fn monthly_linear_mid_hits_anchor_values() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mv = MonthlyValues(v);
        for m in 1..=12u32 {
            let jd = mid_month_julian(m);
            assert_relative_eq!(
                mv.at(jd, MonthInterpMethod::LinearMid),
                v[m as usize - 1],
                epsilon = 1e-9
            );
        }
        // midway between mid-Jan and mid-Feb
        let jd = 0.5 * (mid_month_julian(1) + mid_month_julian(2));
        assert_relative_eq!(mv.at(jd, MonthInterpMethod::LinearMid), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn monthly_interp_wraps_year_end() {
        let mut v = [0.0; 12];
        v[11] = 10.0; // December
        v[0] = 20.0; // January
        let mv = MonthlyValues(v);
        let dec_mid = mid_month_julian(12);
        let jan_mid = mid_month_julian(1) + 365.0;
        let jd = 0.5 * (dec_mid + jan_mid); // around new year
        let got = mv.at(jd % 365.0, MonthInterpMethod::LinearMid);
        assert_relative_eq!(got, 15.0, epsilon = 1e-9);
    }
}
