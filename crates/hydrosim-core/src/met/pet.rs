//! Potential evapotranspiration and potential melt estimation.

use super::radiation::radiation_to_mm_per_day;
use crate::forcing::Forcing;
use crate::options::{EvaporationMethod, OroPetMethod, PotentialMeltMethod};
use crate::params::{GlobalParams, LandUseClass, TerrainClass};

/// Potential evapotranspiration [mm/d].
///
/// Daily-envelope methods (from-monthly, Hargreaves) are redistributed over
/// the day with the subdaily weight; data series are assumed to already carry
/// the model resolution.
pub fn estimate_pet(method: EvaporationMethod, f: &Forcing, data_value: f64) -> f64 {
    let pet = match method {
        EvaporationMethod::Data => return data_value.max(0.0),
        EvaporationMethod::FromMonthly => f.pet_month_ave,
        EvaporationMethod::Hargreaves1985 => {
            let range = (f.temp_daily_max - f.temp_daily_min).max(0.0);
            let ra_mm = radiation_to_mm_per_day(f.et_radia);
            0.0023 * ra_mm * (f.temp_daily_ave + 17.8) * range.sqrt()
        }
    };
    (pet * f.subdaily_corr).max(0.0)
}

/// Orographic PET correction, applied last in the forcing pipeline.
pub fn correct_pet(method: OroPetMethod, pet: f64, elev: f64, ref_elev: f64, g: &GlobalParams) -> f64 {
    match method {
        OroPetMethod::None => pet,
        OroPetMethod::SimpleLapse | OroPetMethod::Ubcwm => {
            (pet - g.pet_lapse * (elev - ref_elev) / 1000.0).max(0.0)
        }
    }
}

/// Potential melt rate [mm/d].
pub fn estimate_potential_melt(
    method: PotentialMeltMethod,
    f: &Forcing,
    g: &GlobalParams,
    landuse: &LandUseClass,
    terrain: &TerrainClass,
    aspect_rad: f64,
) -> f64 {
    let melt = match method {
        PotentialMeltMethod::None => 0.0,
        PotentialMeltMethod::Data => return f.potential_melt.max(0.0),
        PotentialMeltMethod::DegreeDay => {
            landuse.melt_factor * (f.temp_daily_ave - g.melt_temp).max(0.0)
        }
        PotentialMeltMethod::Hbv => {
            // aspect correction: south faces melt faster than north faces
            let aspect_factor = 1.0 - terrain.melt_aspect_corr * aspect_rad.cos();
            landuse.melt_factor * aspect_factor.max(0.0) * (f.temp_daily_ave - g.melt_temp).max(0.0)
        }
    };
    (melt * f.subdaily_corr).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Environment;
    use approx::assert_relative_eq;

    fn daily_forcing() -> Forcing {
        let mut f = Forcing::zero();
        f.temp_daily_ave = 15.0;
        f.temp_daily_min = 8.0;
        f.temp_daily_max = 22.0;
        f.et_radia = 350.0;
        f.pet_month_ave = 3.0;
        f.subdaily_corr = 1.0;
        f
    }

    #[test]
    fn hargreaves_magnitude_is_plausible() {
        let f = daily_forcing();
        let pet = estimate_pet(EvaporationMethod::Hargreaves1985, &f, 0.0);
        // summer mid-latitude PET, roughly 2-8 mm/d
        assert!(pet > 1.0 && pet < 10.0, "pet = {pet}");
    }

    #[test]
    fn hargreaves_zero_range_gives_zero() {
        let mut f = daily_forcing();
        f.temp_daily_min = 15.0;
        f.temp_daily_max = 15.0;
        assert_relative_eq!(estimate_pet(EvaporationMethod::Hargreaves1985, &f, 0.0), 0.0);
    }

    #[test]
    fn from_monthly_scales_with_subdaily_weight() {
        let mut f = daily_forcing();
        f.subdaily_corr = 2.0;
        assert_relative_eq!(estimate_pet(EvaporationMethod::FromMonthly, &f, 0.0), 6.0);
    }

    #[test]
    fn pet_lapse_clamps_at_zero() {
        let mut g = GlobalParams::default();
        g.pet_lapse = 5.0;
        let corrected = correct_pet(OroPetMethod::SimpleLapse, 1.0, 2000.0, 1000.0, &g);
        assert_relative_eq!(corrected, 0.0);
    }

    #[test]
    fn degree_day_melt_below_freezing_is_zero() {
        let env = Environment::default();
        let mut f = daily_forcing();
        f.temp_daily_ave = -5.0;
        let melt = estimate_potential_melt(
            PotentialMeltMethod::DegreeDay,
            &f,
            &env.globals,
            &env.landuse[0],
            &env.terrain[0],
            0.0,
        );
        assert_relative_eq!(melt, 0.0);
    }

    #[test]
    fn degree_day_melt_scales_with_temperature() {
        let env = Environment::default();
        let f = daily_forcing();
        let melt = estimate_potential_melt(
            PotentialMeltMethod::DegreeDay,
            &f,
            &env.globals,
            &env.landuse[0],
            &env.terrain[0],
            0.0,
        );
        assert_relative_eq!(melt, env.landuse[0].melt_factor * 15.0);
    }
}
