//! Global parameter catalog and class property tables.
//!
//! Everything here is immutable after model assembly. Per-step HRU calls
//! receive an [`Environment`] handle instead of holding back-references to
//! the model.

use crate::errors::{HydroError, HydroResult};
use serde::{Deserialize, Serialize};

/// Lapse parameters for the UBC watershed-model correction family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UbcLapseParams {
    /// Lapse rate of the daily temperature range below the reference
    /// elevation [°C/km].
    pub p0tedl: f64,
    /// Lapse rate of the daily temperature range above the reference
    /// elevation [°C/km].
    pub p0tedu: f64,
    /// Upper bound on the usable daily temperature range [°C].
    pub max_range_temp: f64,
    /// Precipitation gradient below the band split [%/100m].
    pub p0gradl: f64,
    /// Precipitation gradient above the band split [%/100m].
    pub p0gradu: f64,
}

impl Default for UbcLapseParams {
    fn default() -> Self {
        Self {
            p0tedl: 2.0,
            p0tedu: 2.0,
            max_range_temp: 25.0,
            p0gradl: 5.0,
            p0gradu: 2.0,
        }
    }
}

/// Global scalar parameters shared by every HRU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalParams {
    /// Rain/snow partition midpoint temperature [°C].
    pub rainsnow_temp: f64,
    /// Width of the rain/snow transition band [°C].
    pub rainsnow_delta: f64,
    /// Temperature lapse rate [°C/km].
    pub adiabatic_lapse: f64,
    /// Additive precipitation lapse [mm/d per km].
    pub precip_lapse: f64,
    /// Exponential precipitation gradient [1/m], HBV style.
    pub hbv_precip_gradient: f64,
    /// Additive PET lapse [mm/d per km].
    pub pet_lapse: f64,
    /// Fraction of shortwave penetrating full cloud cover.
    pub cloud_penetration: f64,
    /// Degree-day melt base temperature [°C].
    pub melt_temp: f64,
    pub ubc_lapse: UbcLapseParams,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            rainsnow_temp: 0.15,
            rainsnow_delta: 2.0,
            adiabatic_lapse: 6.4,
            precip_lapse: 0.0,
            hbv_precip_gradient: 0.00041,
            pet_lapse: 0.0,
            cloud_penetration: 0.25,
            melt_temp: 0.0,
            ubc_lapse: UbcLapseParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilClass {
    pub name: String,
    /// Field capacity expressed as a storage depth [mm].
    pub field_capacity: f64,
    /// HBV infiltration shape exponent.
    pub beta: f64,
    /// Percolation rate constant [1/d].
    pub perc_coeff: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VegetationClass {
    pub name: String,
    /// Canopy albedo [-].
    pub albedo: f64,
    /// Fraction of rainfall intercepted by the canopy [-].
    pub rain_icept_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandUseClass {
    pub name: String,
    /// Forested fraction of the HRU [-].
    pub forest_coverage: f64,
    /// Degree-day melt factor [mm/d/°C].
    pub melt_factor: f64,
    /// Canopy shortwave exposure factor for the UBC correction [-].
    pub forest_exposure: f64,
    /// Groundwater (baseflow) rate constant [1/d].
    pub baseflow_coeff: f64,
    /// Interflow rate constant [1/d].
    pub interflow_coeff: f64,
    /// Recharge rate constant [1/d].
    pub recharge_coeff: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainClass {
    pub name: String,
    /// Aspect-based melt correction amplitude [-], HBV style.
    pub melt_aspect_corr: f64,
}

/// Immutable class tables plus global parameters.
///
/// One `Environment` is built at assembly and shared read-only by the forcing
/// assembler, the process kernels and the transport model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub globals: GlobalParams,
    pub soils: Vec<SoilClass>,
    pub vegetation: Vec<VegetationClass>,
    pub landuse: Vec<LandUseClass>,
    pub terrain: Vec<TerrainClass>,
}

impl Environment {
    /// Validate class references used by an HRU definition.
    pub fn check_class_indices(
        &self,
        soil: usize,
        veg: usize,
        landuse: usize,
        terrain: usize,
    ) -> HydroResult<()> {
        if soil >= self.soils.len() {
            return Err(HydroError::Config(format!("soil class index {soil} out of range")));
        }
        if veg >= self.vegetation.len() {
            return Err(HydroError::Config(format!(
                "vegetation class index {veg} out of range"
            )));
        }
        if landuse >= self.landuse.len() {
            return Err(HydroError::Config(format!(
                "land-use class index {landuse} out of range"
            )));
        }
        if terrain >= self.terrain.len() {
            return Err(HydroError::Config(format!(
                "terrain class index {terrain} out of range"
            )));
        }
        Ok(())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            globals: GlobalParams::default(),
            soils: vec![SoilClass {
                name: "DEFAULT_SOIL".to_string(),
                field_capacity: 150.0,
                beta: 2.0,
                perc_coeff: 0.05,
            }],
            vegetation: vec![VegetationClass {
                name: "DEFAULT_VEG".to_string(),
                albedo: 0.15,
                rain_icept_pct: 0.12,
            }],
            landuse: vec![LandUseClass {
                name: "DEFAULT_LU".to_string(),
                forest_coverage: 0.5,
                melt_factor: 4.0,
                forest_exposure: 0.6,
                baseflow_coeff: 0.05,
                interflow_coeff: 0.1,
                recharge_coeff: 0.02,
            }],
            terrain: vec![TerrainClass {
                name: "DEFAULT_TERRAIN".to_string(),
                melt_aspect_corr: 0.0,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_environment_is_self_consistent() {
        let env = Environment::default();
        assert!(env.check_class_indices(0, 0, 0, 0).is_ok());
        assert!(env.check_class_indices(1, 0, 0, 0).is_err());
    }

    #[test]
    fn globals_parse_with_partial_overrides() {
        let g: GlobalParams = toml::from_str("rainsnow_delta = 4.0").unwrap();
        assert_eq!(g.rainsnow_delta, 4.0);
        assert_eq!(g.adiabatic_lapse, 6.4);
    }
}
