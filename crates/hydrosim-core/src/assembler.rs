//! Per-HRU forcing synthesis from the gauge set.
//!
//! Each step, gauge readings are extracted once, combined by fixed
//! HRU-to-gauge weights, then pushed through the correction pipeline in a
//! fixed stage order. Deviating from the order breaks the lapse-rate
//! contract: corrections must see uncorrected values where noted.

use crate::errors::{HydroError, HydroResult};
use crate::forcing::Forcing;
use crate::gauge::Gauge;
use crate::hru::Hru;
use crate::met::{atmosphere, pet, precip, radiation};
use crate::options::{InterpolationMethod, Options, OroTempMethod, SubdailyMethod, TimeStep};
use crate::params::Environment;
use serde::{Deserialize, Serialize};

const WEIGHT_TOLERANCE: f64 = 1e-6;
/// Gauges closer than this (squared degrees) count as coincident.
const COINCIDENT_DIST2: f64 = 1e-12;

/// Fixed HRU-to-gauge interpolation weights.
///
/// Every row is a convex combination: non-negative entries summing to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcingAssembler {
    weights: Vec<Vec<f64>>,
}

impl ForcingAssembler {
    /// Compute weights from the selected interpolation method.
    pub fn build(
        method: InterpolationMethod,
        gauges: &[Gauge],
        hrus: &[Hru],
        file_weights: Option<Vec<Vec<f64>>>,
    ) -> HydroResult<Self> {
        if gauges.is_empty() {
            return Err(HydroError::Config("no gauges defined".to_string()));
        }
        let n_g = gauges.len();
        let weights: Vec<Vec<f64>> = match method {
            InterpolationMethod::AverageAll => hrus
                .iter()
                .map(|_| vec![1.0 / n_g as f64; n_g])
                .collect(),
            InterpolationMethod::NearestNeighbor => hrus
                .iter()
                .map(|hru| {
                    let nearest = (0..n_g)
                        .min_by(|&a, &b| {
                            gauges[a]
                                .distance2_to(hru.latitude, hru.longitude)
                                .total_cmp(&gauges[b].distance2_to(hru.latitude, hru.longitude))
                        })
                        .expect("at least one gauge");
                    let mut row = vec![0.0; n_g];
                    row[nearest] = 1.0;
                    row
                })
                .collect(),
            InterpolationMethod::InverseDistance => hrus
                .iter()
                .map(|hru| {
                    let d2: Vec<f64> = gauges
                        .iter()
                        .map(|g| g.distance2_to(hru.latitude, hru.longitude))
                        .collect();
                    if let Some(hit) = d2.iter().position(|&d| d < COINCIDENT_DIST2) {
                        let mut row = vec![0.0; n_g];
                        row[hit] = 1.0;
                        return row;
                    }
                    let inv: Vec<f64> = d2.iter().map(|&d| 1.0 / d).collect();
                    let sum: f64 = inv.iter().sum();
                    inv.into_iter().map(|w| w / sum).collect()
                })
                .collect(),
            InterpolationMethod::FromFile => file_weights.ok_or_else(|| {
                HydroError::Config(
                    "interpolation = from_file but no weight table was supplied".to_string(),
                )
            })?,
        };

        let assembler = Self { weights };
        assembler.validate(hrus.len(), n_g)?;
        Ok(assembler)
    }

    fn validate(&self, n_hrus: usize, n_gauges: usize) -> HydroResult<()> {
        if self.weights.len() != n_hrus {
            return Err(HydroError::Config(format!(
                "gauge weight table has {} rows for {} HRUs",
                self.weights.len(),
                n_hrus
            )));
        }
        for (k, row) in self.weights.iter().enumerate() {
            if row.len() != n_gauges {
                return Err(HydroError::Config(format!(
                    "gauge weight row {k} has {} entries for {} gauges",
                    row.len(),
                    n_gauges
                )));
            }
            if row.iter().any(|&w| w < 0.0) {
                return Err(HydroError::Config(format!(
                    "gauge weight row {k} has negative entries"
                )));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
                return Err(HydroError::Config(format!(
                    "gauge weights for HRU row {k} sum to {sum}, expected 1"
                )));
            }
        }
        Ok(())
    }

    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    /// Refresh every HRU's forcing vector for timestep `tt`.
    pub fn update_forcings(
        &self,
        options: &Options,
        env: &Environment,
        tt: &TimeStep,
        gauges: &[Gauge],
        hrus: &mut [Hru],
    ) {
        let dt = options.timestep;
        let mid_day = tt.julian_day.floor() + 0.5;

        // stage 1: gauge extraction
        let fg: Vec<Forcing> = gauges
            .iter()
            .map(|g| g.extract(tt, dt, options.month_interp))
            .collect();

        for k in 0..hrus.len() {
            let elev = hrus[k].elevation;
            let landuse = &env.landuse[hrus[k].landuse_class];
            let mut f = Forcing::zero();

            // not gauge-based: solar geometry advances only with the day
            if tt.day_changed {
                f.day_angle = radiation::day_angle(mid_day);
                f.day_length =
                    radiation::day_length(hrus[k].lat_rad(), radiation::solar_declination(f.day_angle));
            }

            // stage 2: weighted interpolation
            let mut ref_elev = 0.0;
            for (g, gauge) in gauges.iter().enumerate() {
                let wt = self.weights[k][g];
                if wt != 0.0 {
                    f.add_weighted(&fg[g], wt);
                    ref_elev += wt * gauge.elevation;
                }
            }
            f.temp_ave_unc = f.temp_daily_ave;
            f.temp_min_unc = f.temp_daily_min;
            f.temp_max_unc = f.temp_daily_max;

            // stage 4: temperature lapse against the weighted gauge elevation
            correct_temp(options, env, &mut f, elev, ref_elev);

            // stage 3/4b: intra-day steps reuse the day's cached envelope,
            // established after correction so the cache holds corrected values
            if !tt.day_changed {
                f.copy_daily_from(&hrus[k].forcing);
            }

            // stage 5: diurnal weight
            f.subdaily_corr = self.subdaily_correction(options, env, tt, gauges, k, elev, ref_elev, &f);

            // stage 6: pressure, density, humidity
            f.air_pres = atmosphere::estimate_air_pressure(options.air_pressure, &f, elev);
            f.air_dens = atmosphere::air_density(f.temp_ave, f.air_pres);
            f.rel_humidity = atmosphere::estimate_rel_humidity(options.rel_humidity, &f);

            // stage 7: rain/snow partition on corrected temperatures
            f.snow_frac = precip::estimate_snow_fraction(options.rainsnow, &f, &env.globals);

            // stage 8: undercatch rebuild replaces the interpolated precip
            f.precip = 0.0;
            f.precip_daily_ave = 0.0;
            f.precip_5day = 0.0;
            for (g, gauge) in gauges.iter().enumerate() {
                let wt = self.weights[k][g];
                if wt == 0.0 {
                    continue;
                }
                let gauge_corr =
                    f.snow_frac * gauge.snowfall_corr + (1.0 - f.snow_frac) * gauge.rainfall_corr;
                f.precip += wt * gauge_corr * fg[g].precip;
                f.precip_daily_ave += wt * gauge_corr * fg[g].precip_daily_ave;
                f.precip_5day += wt * gauge_corr * fg[g].precip_5day;
            }

            // stage 9: orographic precipitation
            precip::correct_precip(options.orocorr_precip, &mut f, elev, ref_elev, &env.globals);

            // stage 10: wind and cloud cover
            f.wind_vel = atmosphere::estimate_wind_velocity(
                options.wind_velocity,
                &f,
                elev,
                landuse.forest_coverage,
                &env.globals.ubc_lapse,
            );
            let (cloud_min, cloud_max) = self.weighted_cloud_ranges(k, gauges);
            f.cloud_cover =
                atmosphere::estimate_cloud_cover(options.cloud_cover, &f, cloud_min, cloud_max);

            // stage 11: radiation chain
            f.sw_radia =
                radiation::estimate_shortwave(options.sw_radiation, &f, hrus[k].lat_rad(), elev);
            f.sw_radia_unc = f.sw_radia;
            f.sw_radia *= radiation::sw_cloud_cover_correction(
                options.sw_cloud_corr,
                &f,
                env.globals.cloud_penetration,
            );
            f.sw_radia *= radiation::sw_canopy_correction(
                options.sw_canopy_corr,
                landuse.forest_coverage,
                landuse.forest_exposure,
            );
            let albedo = env.vegetation[hrus[k].veg_class].albedo;
            f.sw_radia_net = f.sw_radia * (1.0 - albedo);
            f.lw_radia = radiation::estimate_longwave(options.lw_radiation, &f);

            // stage 12: potential melt, then PET, then its oro-correction
            f.potential_melt = pet::estimate_potential_melt(
                options.pot_melt,
                &f,
                &env.globals,
                landuse,
                &env.terrain[hrus[k].terrain_class],
                hrus[k].aspect_rad(),
            );
            f.pet = pet::estimate_pet(options.evaporation, &f, f.pet);
            f.ow_pet = pet::estimate_pet(options.ow_evaporation, &f, f.ow_pet);
            f.pet = pet::correct_pet(options.orocorr_pet, f.pet, elev, ref_elev, &env.globals);
            f.ow_pet = pet::correct_pet(options.orocorr_pet, f.ow_pet, elev, ref_elev, &env.globals);

            hrus[k].update_forcing(f);
        }
    }

    fn weighted_cloud_ranges(&self, k: usize, gauges: &[Gauge]) -> (f64, f64) {
        let mut min_range = 0.0;
        let mut max_range = 0.0;
        for (g, gauge) in gauges.iter().enumerate() {
            min_range += self.weights[k][g] * gauge.cloud_min_range;
            max_range += self.weights[k][g] * gauge.cloud_max_range;
        }
        (min_range, max_range)
    }

    /// Diurnal weight so that the weights integrate to one over the day.
    ///
    /// The UBC method re-extracts and re-corrects the temperature at every
    /// subdaily slot of the current day: expensive, but the corrected
    /// positive-degree weighting demands it.
    #[allow(clippy::too_many_arguments)]
    fn subdaily_correction(
        &self,
        options: &Options,
        env: &Environment,
        tt: &TimeStep,
        gauges: &[Gauge],
        k: usize,
        elev: f64,
        ref_elev: f64,
        f: &Forcing,
    ) -> f64 {
        if options.timestep >= 1.0 {
            return 1.0;
        }
        match options.subdaily {
            SubdailyMethod::None => 1.0,
            SubdailyMethod::Simple => {
                let time_of_day = tt.model_time - tt.model_time.floor();
                radiation::subdaily_simple(f.day_length, time_of_day, options.timestep)
            }
            SubdailyMethod::Ubc => {
                let dt = options.timestep;
                let nn_start = (tt.model_time.floor() / dt) as usize;
                let nn_end = ((tt.model_time.floor() + 1.0) / dt) as usize;
                let mut sum = 0.0;
                for nnn in nn_start..nn_end {
                    let mut slot = Forcing::zero();
                    for (g, gauge) in gauges.iter().enumerate() {
                        let wt = self.weights[k][g];
                        if wt == 0.0 {
                            continue;
                        }
                        let t_ave = match &gauge.series.temp_ave {
                            Some(ts) => ts.value_at_step(nnn, dt),
                            None => match (&gauge.series.temp_daily_min, &gauge.series.temp_daily_max)
                            {
                                (Some(lo), Some(hi)) => {
                                    0.5 * (lo.value_at_step(nnn, dt) + hi.value_at_step(nnn, dt))
                                }
                                _ => 0.0,
                            },
                        };
                        slot.temp_ave += wt * t_ave;
                    }
                    correct_temp(options, env, &mut slot, elev, ref_elev);
                    sum += slot.temp_ave.max(0.0);
                }
                if sum == 0.0 {
                    0.0
                } else {
                    f.temp_ave.max(0.0) / sum / options.timestep
                }
            }
        }
    }
}

/// Elevation lapse on the corrected temperature fields. The `_unc` fields
/// are inputs to this computation and are never touched.
fn correct_temp(options: &Options, env: &Environment, f: &mut Forcing, elev: f64, ref_elev: f64) {
    let lapse = match options.orocorr_temp {
        OroTempMethod::None => return,
        OroTempMethod::SimpleLapse | OroTempMethod::HbvLapse => env.globals.adiabatic_lapse,
    };
    let correction = -lapse * (elev - ref_elev) / 1000.0;
    f.temp_ave += correction;
    f.temp_daily_ave += correction;
    f.temp_daily_min += correction;
    f.temp_daily_max += correction;
    f.temp_month_ave += correction;
    f.temp_month_min += correction;
    f.temp_month_max += correction;
}
