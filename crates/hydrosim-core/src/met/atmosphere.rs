//! Air pressure, density, humidity, wind and cloud cover estimation.

use super::{AMBIENT_AIR_PRESSURE, KPA_PER_ATM, ZERO_CELSIUS};
use crate::forcing::Forcing;
use crate::options::{AirPressureMethod, CloudCoverMethod, RelHumidityMethod, WindVelocityMethod};
use crate::params::UbcLapseParams;

/// Estimated air pressure at elevation `elev` [kPa].
pub fn estimate_air_pressure(method: AirPressureMethod, f: &Forcing, elev: f64) -> f64 {
    match method {
        AirPressureMethod::Data => f.air_pres,
        AirPressureMethod::Basic => {
            AMBIENT_AIR_PRESSURE * (1.0 - 0.0065 * elev / (ZERO_CELSIUS + f.temp_ave)).powf(5.26)
        }
        AirPressureMethod::Ubc => KPA_PER_ATM * (1.0 - 0.0001 * elev),
        AirPressureMethod::Const => AMBIENT_AIR_PRESSURE,
    }
}

/// Dry-air density from the ideal gas law [kg/m³].
pub fn air_density(temp_c: f64, air_pres_kpa: f64) -> f64 {
    air_pres_kpa * 1000.0 / (287.058 * (temp_c + ZERO_CELSIUS))
}

/// Saturated vapor pressure by the Magnus formula [kPa].
pub fn saturated_vapor_pressure(temp_c: f64) -> f64 {
    0.6108 * (17.27 * temp_c / (temp_c + 237.3)).exp()
}

/// Relative humidity estimate, e_a / e_sat in [0, 1].
pub fn estimate_rel_humidity(method: RelHumidityMethod, f: &Forcing) -> f64 {
    match method {
        RelHumidityMethod::Constant => 0.5,
        RelHumidityMethod::MinDewpoint => {
            // minimum daily temperature as a proxy for dew point
            let dew_point = f.temp_daily_min;
            (saturated_vapor_pressure(dew_point) / saturated_vapor_pressure(f.temp_ave)).min(1.0)
        }
        RelHumidityMethod::Data => f.rel_humidity,
    }
}

/// Estimated wind velocity [m/s].
///
/// The UBC watershed-model form weights a calm and a windy end-member by the
/// daily temperature range, lapsed in two elevation bands about 2000 m. The
/// upper clamp sits one unit below the nominal 8 km/h maximum; that offset is
/// preserved from the source formulation.
pub fn estimate_wind_velocity(
    method: WindVelocityMethod,
    f: &Forcing,
    elev: f64,
    forest_coverage: f64,
    ubc: &UbcLapseParams,
) -> f64 {
    match method {
        WindVelocityMethod::Constant => 2.0,
        WindVelocityMethod::Data => f.wind_vel,
        WindVelocityMethod::Ubcwm => {
            let mut ted = (f.temp_daily_max - f.temp_daily_min).max(0.0);

            const REF_ELEV: f64 = 2000.0;
            let a1 = if elev >= REF_ELEV {
                25.0 - ubc.p0tedl * 0.001 * REF_ELEV - ubc.p0tedu * 0.001 * (elev - REF_ELEV)
            } else {
                25.0 - ubc.p0tedl * 0.001 * elev
            };
            let a1 = a1.min(ubc.max_range_temp);
            ted = ted.min(a1);

            const MAX_WIND_SPEED: f64 = 8.0; // [km/h]
            let wt = (ted / 25.0).min(1.0);
            let mut wind = (1.0 - wt) * MAX_WIND_SPEED + wt * 1.0;

            wind = wind.max(1.0);
            wind = wind.min(MAX_WIND_SPEED - 1.0);

            // elevation correction
            wind *= (elev / 1000.0).sqrt().max(1.0);

            // forest correction
            const F0WIND: f64 = 0.7;
            wind *= forest_coverage * F0WIND + (1.0 - forest_coverage);

            wind * 1000.0 / 3600.0 // km/h -> m/s
        }
    }
}

/// Estimated cloud cover in [0, 1].
///
/// The UBC form reads the *uncorrected* station temperature range against the
/// gauge-interpolated clear/overcast range bounds.
pub fn estimate_cloud_cover(
    method: CloudCoverMethod,
    f: &Forcing,
    cloud_min_range: f64,
    cloud_max_range: f64,
) -> f64 {
    match method {
        CloudCoverMethod::None => 0.0,
        CloudCoverMethod::Data => f.cloud_cover,
        CloudCoverMethod::Ubcwm => {
            if cloud_max_range <= cloud_min_range {
                return 0.0;
            }
            let range = f.temp_max_unc - f.temp_min_unc;
            let cover = 1.0 - (range - cloud_min_range) / (cloud_max_range - cloud_min_range);
            cover.clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pressure_decreases_with_elevation() {
        let mut f = Forcing::zero();
        f.temp_ave = 10.0;
        let p0 = estimate_air_pressure(AirPressureMethod::Basic, &f, 0.0);
        let p2000 = estimate_air_pressure(AirPressureMethod::Basic, &f, 2000.0);
        assert_relative_eq!(p0, AMBIENT_AIR_PRESSURE, epsilon = 1e-9);
        assert!(p2000 < p0);
        // UBC linear form
        let p = estimate_air_pressure(AirPressureMethod::Ubc, &f, 1000.0);
        assert_relative_eq!(p, KPA_PER_ATM * 0.9, epsilon = 1e-9);
    }

    #[test]
    fn density_at_standard_conditions() {
        let rho = air_density(15.0, 101.325);
        assert_relative_eq!(rho, 1.225, epsilon = 1e-3);
    }

    #[test]
    fn humidity_from_dew_point_is_bounded() {
        let mut f = Forcing::zero();
        f.temp_daily_min = 5.0;
        f.temp_ave = 15.0;
        let rh = estimate_rel_humidity(RelHumidityMethod::MinDewpoint, &f);
        assert!(rh > 0.0 && rh < 1.0);
        // dew point above the average cannot exceed saturation
        f.temp_daily_min = 20.0;
        assert_relative_eq!(estimate_rel_humidity(RelHumidityMethod::MinDewpoint, &f), 1.0);
    }

    #[test]
    fn ubc_wind_open_lowland_calm_day() {
        // Zero temperature range -> windy end-member, clamped to 7 km/h
        let mut f = Forcing::zero();
        f.temp_daily_min = 10.0;
        f.temp_daily_max = 10.0;
        let v = estimate_wind_velocity(
            WindVelocityMethod::Ubcwm,
            &f,
            500.0,
            0.0,
            &UbcLapseParams::default(),
        );
        // 8 km/h clamped to 7, no elevation or forest scaling below 1000 m
        assert_relative_eq!(v, 7.0 * 1000.0 / 3600.0, epsilon = 1e-9);
    }

    #[test]
    fn ubc_wind_large_range_is_calm() {
        // at sea level the usable range is not lapse-capped
        let mut f = Forcing::zero();
        f.temp_daily_min = 0.0;
        f.temp_daily_max = 25.0;
        let v = estimate_wind_velocity(
            WindVelocityMethod::Ubcwm,
            &f,
            0.0,
            0.0,
            &UbcLapseParams::default(),
        );
        // fully weighted to the 1 km/h end-member
        assert_relative_eq!(v, 1.0 * 1000.0 / 3600.0, epsilon = 1e-6);
    }

    #[test]
    fn cloud_cover_from_temperature_range() {
        let mut f = Forcing::zero();
        f.temp_min_unc = 5.0;
        f.temp_max_unc = 10.0; // range 5
        let cover = estimate_cloud_cover(CloudCoverMethod::Ubcwm, &f, 2.0, 12.0);
        assert_relative_eq!(cover, 1.0 - 3.0 / 10.0, epsilon = 1e-9);
        // degenerate bounds fall back to clear sky
        assert_relative_eq!(estimate_cloud_cover(CloudCoverMethod::Ubcwm, &f, 5.0, 5.0), 0.0);
    }
}
