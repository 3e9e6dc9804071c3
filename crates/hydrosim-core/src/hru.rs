//! Hydrologic response units: the smallest homogeneous water-balance columns.

use crate::forcing::Forcing;
use serde::{Deserialize, Serialize};

/// Dense storage indices. Depths are in mm over the HRU area.
pub const PONDED: usize = 0;
pub const SNOW: usize = 1;
pub const SOIL_TOP: usize = 2;
pub const SOIL_LOW: usize = 3;
pub const GROUNDWATER: usize = 4;
pub const NUM_STORAGES: usize = 5;

pub fn storage_name(i: usize) -> &'static str {
    match i {
        PONDED => "PONDED",
        SNOW => "SNOW",
        SOIL_TOP => "SOIL[0]",
        SOIL_LOW => "SOIL[1]",
        GROUNDWATER => "GROUNDWATER",
        _ => "UNKNOWN",
    }
}

/// Endpoint of a water movement.
///
/// `Atmosphere` and `SurfaceWater` are boundary compartments: precipitation
/// enters from the atmosphere, evaporation leaves to it, and lateral runoff
/// leaves to surface water (the owning subbasin). Boundary compartments are
/// exempt from the non-negativity clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compartment {
    Storage(usize),
    Atmosphere,
    SurfaceWater,
}

/// One homogeneous column of the watershed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hru {
    pub id: i64,
    /// Contributing area [km²].
    pub area: f64,
    /// Elevation [m a.s.l.].
    pub elevation: f64,
    /// Latitude [deg].
    pub latitude: f64,
    /// Longitude [deg].
    pub longitude: f64,
    /// Ground slope [deg].
    pub slope: f64,
    /// Aspect [deg clockwise from north].
    pub aspect: f64,

    pub soil_class: usize,
    pub veg_class: usize,
    pub landuse_class: usize,
    pub terrain_class: usize,

    /// ID of the owning subbasin.
    pub subbasin_id: i64,

    /// Storage state [mm], indexed by the constants above.
    pub storages: Vec<f64>,
    /// Cumulative water moved through each process connection [mm].
    pub cumul_flux: Vec<f64>,
    /// Current forcing vector; also serves as the intra-day daily cache.
    pub forcing: Forcing,
}

impl Hru {
    pub fn new(id: i64, area: f64, elevation: f64, latitude: f64, subbasin_id: i64) -> Self {
        Self {
            id,
            area,
            elevation,
            latitude,
            longitude: 0.0,
            slope: 0.0,
            aspect: 0.0,
            soil_class: 0,
            veg_class: 0,
            landuse_class: 0,
            terrain_class: 0,
            subbasin_id,
            storages: vec![0.0; NUM_STORAGES],
            cumul_flux: Vec::new(),
            forcing: Forcing::zero(),
        }
    }

    pub fn lat_rad(&self) -> f64 {
        self.latitude.to_radians()
    }

    pub fn aspect_rad(&self) -> f64 {
        self.aspect.to_radians()
    }

    /// Size the cumulative-flux ledger once the process set is known.
    pub fn init_flux_ledger(&mut self, n_connections: usize) {
        self.cumul_flux = vec![0.0; n_connections];
    }

    pub fn update_forcing(&mut self, f: Forcing) {
        self.forcing = f;
    }

    pub fn total_storage(&self) -> f64 {
        self.storages.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_hru_starts_dry() {
        let hru = Hru::new(1, 12.5, 800.0, 47.0, 10);
        assert_eq!(hru.storages.len(), NUM_STORAGES);
        assert!(hru.storages.iter().all(|&v| v == 0.0));
        assert_eq!(hru.total_storage(), 0.0);
    }

    #[test]
    fn storage_names_cover_all_indices() {
        for i in 0..NUM_STORAGES {
            assert_ne!(storage_name(i), "UNKNOWN");
        }
    }
}
