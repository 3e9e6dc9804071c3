//! Rain/snow partitioning and orographic precipitation corrections.

use crate::forcing::Forcing;
use crate::options::{OroPrecipMethod, RainSnowMethod};
use crate::params::GlobalParams;

/// Elevation cap for exponential precipitation gradients [m].
const ELEV_CAP_PRECIP: f64 = 4000.0;
/// Band split for the two-gradient UBC correction [m].
const UBC_BAND_SPLIT: f64 = 2000.0;

/// Snow fraction of precipitation in [0, 1] from corrected temperatures.
pub fn estimate_snow_fraction(method: RainSnowMethod, f: &Forcing, g: &GlobalParams) -> f64 {
    match method {
        RainSnowMethod::Data => f.snow_frac,
        RainSnowMethod::Dingman => {
            if f.temp_daily_ave <= g.rainsnow_temp {
                1.0
            } else {
                0.0
            }
        }
        RainSnowMethod::Hbv => {
            // linear ramp of width rainsnow_delta centered on rainsnow_temp
            let upper = g.rainsnow_temp + 0.5 * g.rainsnow_delta;
            ((upper - f.temp_daily_ave) / g.rainsnow_delta).clamp(0.0, 1.0)
        }
        RainSnowMethod::Ubcwm => {
            // fraction of the daily min..max span below the threshold
            let range = f.temp_daily_max - f.temp_daily_min;
            if range <= 0.0 {
                if f.temp_daily_ave <= g.rainsnow_temp {
                    1.0
                } else {
                    0.0
                }
            } else {
                ((g.rainsnow_temp - f.temp_daily_min) / range).clamp(0.0, 1.0)
            }
        }
    }
}

/// Orographic correction applied to all three precipitation fields.
pub fn correct_precip(
    method: OroPrecipMethod,
    f: &mut Forcing,
    elev: f64,
    ref_elev: f64,
    g: &GlobalParams,
) {
    let factor = match method {
        OroPrecipMethod::None => return,
        OroPrecipMethod::SimpleLapse => {
            // additive lapse; clamp each field at zero below
            let delta = g.precip_lapse * (elev - ref_elev) / 1000.0;
            f.precip = (f.precip + delta).max(0.0);
            f.precip_daily_ave = (f.precip_daily_ave + delta).max(0.0);
            f.precip_5day = (f.precip_5day + 5.0 * delta).max(0.0);
            return;
        }
        OroPrecipMethod::Hbv => {
            let eff_elev = elev.min(ELEV_CAP_PRECIP);
            let eff_ref = ref_elev.min(ELEV_CAP_PRECIP);
            (g.hbv_precip_gradient * (eff_elev - eff_ref)).exp()
        }
        OroPrecipMethod::Ubcwm2 => {
            // two gradient bands split at 2000 m; each band compounds per 100 m
            let (lo, hi) = band_spans(ref_elev, elev);
            (1.0 + g.ubc_lapse.p0gradl / 100.0).powf(lo / 100.0)
                * (1.0 + g.ubc_lapse.p0gradu / 100.0).powf(hi / 100.0)
        }
    };
    f.precip *= factor;
    f.precip_daily_ave *= factor;
    f.precip_5day *= factor;
}

/// Signed elevation spans travelled below and above the band split.
fn band_spans(from: f64, to: f64) -> (f64, f64) {
    let lo = to.min(UBC_BAND_SPLIT) - from.min(UBC_BAND_SPLIT);
    let hi = to.max(UBC_BAND_SPLIT) - from.max(UBC_BAND_SPLIT);
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn globals() -> GlobalParams {
        GlobalParams {
            rainsnow_temp: 0.0,
            rainsnow_delta: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn hbv_ramp_endpoints() {
        let g = globals();
        let mut f = Forcing::zero();
        f.temp_daily_ave = -1.0;
        assert_relative_eq!(estimate_snow_fraction(RainSnowMethod::Hbv, &f, &g), 1.0);
        f.temp_daily_ave = 1.0;
        assert_relative_eq!(estimate_snow_fraction(RainSnowMethod::Hbv, &f, &g), 0.0);
        f.temp_daily_ave = 0.0;
        assert_relative_eq!(estimate_snow_fraction(RainSnowMethod::Hbv, &f, &g), 0.5);
    }

    #[test]
    fn dingman_is_a_threshold() {
        let g = globals();
        let mut f = Forcing::zero();
        f.temp_daily_ave = -0.01;
        assert_relative_eq!(estimate_snow_fraction(RainSnowMethod::Dingman, &f, &g), 1.0);
        f.temp_daily_ave = 0.01;
        assert_relative_eq!(estimate_snow_fraction(RainSnowMethod::Dingman, &f, &g), 0.0);
    }

    #[test]
    fn ubc_fraction_of_daily_span() {
        let g = globals();
        let mut f = Forcing::zero();
        f.temp_daily_min = -3.0;
        f.temp_daily_max = 1.0;
        // threshold 0.0 sits 3/4 up from the minimum
        assert_relative_eq!(estimate_snow_fraction(RainSnowMethod::Ubcwm, &f, &g), 0.75);
    }

    #[test]
    fn hbv_gradient_same_elevation_is_identity() {
        let g = GlobalParams::default();
        let mut f = Forcing::zero();
        f.precip = 10.0;
        f.precip_daily_ave = 10.0;
        f.precip_5day = 50.0;
        correct_precip(OroPrecipMethod::Hbv, &mut f, 800.0, 800.0, &g);
        assert_relative_eq!(f.precip, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn hbv_gradient_caps_above_4000m() {
        let g = GlobalParams::default();
        let mut f1 = Forcing::zero();
        f1.precip = 10.0;
        let mut f2 = f1;
        correct_precip(OroPrecipMethod::Hbv, &mut f1, 4000.0, 1000.0, &g);
        correct_precip(OroPrecipMethod::Hbv, &mut f2, 5000.0, 1000.0, &g);
        assert_relative_eq!(f1.precip, f2.precip, epsilon = 1e-12);
        assert!(f1.precip > 10.0);
    }

    #[test]
    fn simple_lapse_clamps_at_zero() {
        let mut g = GlobalParams::default();
        g.precip_lapse = -20.0;
        let mut f = Forcing::zero();
        f.precip = 1.0;
        correct_precip(OroPrecipMethod::SimpleLapse, &mut f, 2000.0, 1000.0, &g);
        assert_relative_eq!(f.precip, 0.0);
    }

    #[test]
    fn ubc_band_spans_split_correctly() {
        // 1500 -> 2500: 500 m below the split, 500 m above
        let (lo, hi) = band_spans(1500.0, 2500.0);
        assert_relative_eq!(lo, 500.0);
        assert_relative_eq!(hi, 500.0);
        // entirely below
        let (lo, hi) = band_spans(500.0, 1500.0);
        assert_relative_eq!(lo, 1000.0);
        assert_relative_eq!(hi, 0.0);
        // descending
        let (lo, hi) = band_spans(2500.0, 1500.0);
        assert_relative_eq!(lo, -500.0);
        assert_relative_eq!(hi, -500.0);
    }
}
