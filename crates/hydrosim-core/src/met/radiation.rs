//! Solar geometry, shortwave/longwave estimation and the diurnal weight.

use super::MM_PER_DAY_PER_WATT;
use crate::forcing::Forcing;
use crate::options::{
    LwRadiationMethod, SwCanopyCorrMethod, SwCloudCorrMethod, SwRadiationMethod,
};
use std::f64::consts::PI;

/// Solar constant [W/m²].
const SOLAR_CONSTANT: f64 = 1367.0;

/// Day angle [rad] for a day of year (mid-day convention).
pub fn day_angle(julian_day: f64) -> f64 {
    2.0 * PI * (julian_day.rem_euclid(365.0)) / 365.0
}

/// Solar declination [rad] from the day angle.
pub fn solar_declination(day_angle: f64) -> f64 {
    0.409 * (day_angle - 1.39).sin()
}

/// Sunset hour angle [rad]; handles polar day/night.
pub fn sunset_hour_angle(lat_rad: f64, declination: f64) -> f64 {
    (-lat_rad.tan() * declination.tan()).clamp(-1.0, 1.0).acos()
}

/// Day length as a fraction of the day.
pub fn day_length(lat_rad: f64, declination: f64) -> f64 {
    sunset_hour_angle(lat_rad, declination) / PI
}

/// Daily-average extraterrestrial radiation [W/m²].
pub fn extraterrestrial_radiation(lat_rad: f64, day_angle: f64) -> f64 {
    let dr = 1.0 + 0.033 * day_angle.cos();
    let decl = solar_declination(day_angle);
    let ws = sunset_hour_angle(lat_rad, decl);
    (SOLAR_CONSTANT / PI)
        * dr
        * (ws * lat_rad.sin() * decl.sin() + lat_rad.cos() * decl.cos() * ws.sin())
}

/// Incident shortwave before cloud and canopy corrections [W/m²].
pub fn estimate_shortwave(
    method: SwRadiationMethod,
    f: &Forcing,
    lat_rad: f64,
    elev: f64,
) -> f64 {
    match method {
        SwRadiationMethod::Data => f.sw_radia,
        SwRadiationMethod::Default => {
            // clear-sky transmissivity rises slightly with elevation
            let tau = 0.75 + 2e-5 * elev;
            let ra = if f.et_radia > 0.0 {
                f.et_radia
            } else {
                extraterrestrial_radiation(lat_rad, f.day_angle)
            };
            tau * ra
        }
    }
}

/// Multiplier on shortwave for cloud cover.
pub fn sw_cloud_cover_correction(method: SwCloudCorrMethod, f: &Forcing, penetration: f64) -> f64 {
    match method {
        SwCloudCorrMethod::None => 1.0,
        SwCloudCorrMethod::Ubcwm => 1.0 - (1.0 - penetration) * f.cloud_cover,
    }
}

/// Multiplier on shortwave for the forest canopy.
pub fn sw_canopy_correction(
    method: SwCanopyCorrMethod,
    forest_coverage: f64,
    forest_exposure: f64,
) -> f64 {
    match method {
        SwCanopyCorrMethod::None => 1.0,
        SwCanopyCorrMethod::Ubcwm => forest_coverage * forest_exposure + (1.0 - forest_coverage),
    }
}

/// Net longwave radiation [W/m²] (negative means surface loss).
pub fn estimate_longwave(method: LwRadiationMethod, f: &Forcing) -> f64 {
    match method {
        LwRadiationMethod::Data => f.lw_radia,
        LwRadiationMethod::Default => {
            // FAO-56 style: emissivity from vapor pressure, damped by cloudiness
            const SIGMA: f64 = 5.67e-8;
            let t_k = f.temp_ave + super::ZERO_CELSIUS;
            let ea = f.rel_humidity * super::atmosphere::saturated_vapor_pressure(f.temp_ave);
            let emissivity_term = (0.34 - 0.14 * ea.max(0.0).sqrt()).max(0.05);
            let cloud_term = if f.sw_radia_unc > 1.0 {
                (1.35 * (f.sw_radia / f.sw_radia_unc).clamp(0.0, 1.0) - 0.35).max(0.05)
            } else {
                0.5
            };
            -SIGMA * t_k.powi(4) * emissivity_term * cloud_term
        }
    }
}

/// Convert a radiation flux to an evaporation-equivalent depth [mm/d].
pub fn radiation_to_mm_per_day(watts_per_m2: f64) -> f64 {
    watts_per_m2 * MM_PER_DAY_PER_WATT
}

/// Diurnal weight for the SIMPLE subdaily method: a cosine envelope between
/// dawn and dusk, normalized so the weights integrate to one over the day.
///
/// `time_of_day` and `dt` are fractions of a day.
pub fn subdaily_simple(day_len: f64, time_of_day: f64, dt: f64) -> f64 {
    let dl = day_len;
    if dl <= 0.0 {
        return 0.0;
    }
    let dawn = 0.5 - 0.5 * dl;
    let dusk = 0.5 + 0.5 * dl;
    let t = time_of_day;

    if t > dawn && t + dt <= dusk {
        -0.5 * ((PI * (t + dt - dawn) / dl).cos() - (PI * (t - dawn) / dl).cos()) / dt
    } else if t < dawn && t + dt >= dawn {
        -0.5 * ((PI * (t + dt - dawn) / dl).cos() - 1.0) / dt
    } else if t < dusk && t + dt >= dusk {
        -0.5 * (-1.0 - (PI * (t - dawn) / dl).cos()) / dt
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn equinox_day_length_near_half() {
        // around day 80 (late March) declination is ~0
        let da = day_angle(80.0);
        let dl = day_length(45f64.to_radians(), solar_declination(da));
        assert!((dl - 0.5).abs() < 0.02);
    }

    #[test]
    fn polar_night_and_day() {
        let da = day_angle(355.0); // late December
        let dl = day_length(80f64.to_radians(), solar_declination(da));
        assert_relative_eq!(dl, 0.0, epsilon = 1e-9);
        let da = day_angle(172.0); // late June
        let dl = day_length(80f64.to_radians(), solar_declination(da));
        assert_relative_eq!(dl, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn extraterrestrial_midlat_summer_range() {
        let ra = extraterrestrial_radiation(45f64.to_radians(), day_angle(172.0));
        // ~480 W/m² daily average at 45° N midsummer
        assert!(ra > 400.0 && ra < 520.0, "ra = {ra}");
    }

    #[test]
    fn subdaily_weights_integrate_to_one() {
        let dl = 0.6;
        let dt = 1.0 / 24.0;
        let mut sum = 0.0;
        for i in 0..24 {
            sum += subdaily_simple(dl, i as f64 * dt, dt) * dt;
        }
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn subdaily_zero_at_night() {
        assert_relative_eq!(subdaily_simple(0.5, 0.0, 1.0 / 24.0), 0.0);
        assert_relative_eq!(subdaily_simple(0.5, 0.9, 1.0 / 24.0), 0.0);
    }

    #[test]
    fn cloud_correction_interpolates_to_penetration() {
        let mut f = Forcing::zero();
        f.cloud_cover = 1.0;
        let c = sw_cloud_cover_correction(SwCloudCorrMethod::Ubcwm, &f, 0.25);
        assert_relative_eq!(c, 0.25);
        f.cloud_cover = 0.0;
        assert_relative_eq!(sw_cloud_cover_correction(SwCloudCorrMethod::Ubcwm, &f, 0.25), 1.0);
    }

    #[test]
    fn longwave_is_a_loss_under_clear_dry_sky() {
        let mut f = Forcing::zero();
        f.temp_ave = 10.0;
        f.rel_humidity = 0.3;
        f.sw_radia = 200.0;
        f.sw_radia_unc = 200.0;
        let lw = estimate_longwave(LwRadiationMethod::Default, &f);
        assert!(lw < 0.0);
    }
}
