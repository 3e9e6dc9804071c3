//! The per-HRU forcing vector.

use serde::{Deserialize, Serialize};

/// Meteorological driver variables for one HRU over one timestep.
///
/// The `_unc` fields hold the uncorrected daily temperatures used as inputs
/// to lapse-rate computations; they are assigned once after interpolation and
/// are never themselves lapsed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Forcing {
    /// Precipitation [mm/d].
    pub precip: f64,
    /// Snow fraction of precipitation [0..1].
    pub snow_frac: f64,
    /// Daily average precipitation [mm/d].
    pub precip_daily_ave: f64,
    /// Accumulated precipitation over the trailing five days [mm].
    pub precip_5day: f64,

    /// Average temperature over the current step [°C].
    pub temp_ave: f64,
    pub temp_daily_ave: f64,
    pub temp_daily_min: f64,
    pub temp_daily_max: f64,
    pub temp_month_ave: f64,
    pub temp_month_min: f64,
    pub temp_month_max: f64,

    /// Uncorrected copies of the daily temperatures (never lapsed).
    pub temp_ave_unc: f64,
    pub temp_min_unc: f64,
    pub temp_max_unc: f64,

    /// Potential evapotranspiration [mm/d].
    pub pet: f64,
    /// Open-water potential evapotranspiration [mm/d].
    pub ow_pet: f64,
    pub pet_month_ave: f64,

    /// Potential melt rate [mm/d].
    pub potential_melt: f64,

    /// Incident shortwave radiation [W/m²].
    pub sw_radia: f64,
    /// Net shortwave after albedo [W/m²].
    pub sw_radia_net: f64,
    /// Shortwave before cloud/canopy corrections [W/m²].
    pub sw_radia_unc: f64,
    /// Net longwave radiation [W/m²].
    pub lw_radia: f64,
    /// Extraterrestrial radiation [W/m²].
    pub et_radia: f64,

    /// Air pressure [kPa].
    pub air_pres: f64,
    /// Air density [kg/m³].
    pub air_dens: f64,
    /// Relative humidity [0..1].
    pub rel_humidity: f64,
    /// Wind velocity [m/s].
    pub wind_vel: f64,
    /// Cloud cover [0..1].
    pub cloud_cover: f64,

    /// Day angle [rad].
    pub day_angle: f64,
    /// Day length as a fraction of the day [0..1].
    pub day_length: f64,
    /// Diurnal redistribution weight for daily melt/PET totals.
    pub subdaily_corr: f64,
}

impl Forcing {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Accumulate `other` scaled by an interpolation weight.
    pub fn add_weighted(&mut self, other: &Forcing, wt: f64) {
        self.precip += wt * other.precip;
        self.precip_daily_ave += wt * other.precip_daily_ave;
        self.precip_5day += wt * other.precip_5day;
        self.snow_frac += wt * other.snow_frac;
        self.temp_ave += wt * other.temp_ave;
        self.temp_daily_ave += wt * other.temp_daily_ave;
        self.temp_daily_min += wt * other.temp_daily_min;
        self.temp_daily_max += wt * other.temp_daily_max;
        self.temp_month_ave += wt * other.temp_month_ave;
        self.temp_month_min += wt * other.temp_month_min;
        self.temp_month_max += wt * other.temp_month_max;
        self.rel_humidity += wt * other.rel_humidity;
        self.wind_vel += wt * other.wind_vel;
        self.cloud_cover += wt * other.cloud_cover;
        self.et_radia += wt * other.et_radia;
        self.lw_radia += wt * other.lw_radia;
        self.sw_radia += wt * other.sw_radia;
        self.sw_radia_net += wt * other.sw_radia_net;
        self.pet_month_ave += wt * other.pet_month_ave;
        self.pet += wt * other.pet;
        self.ow_pet += wt * other.ow_pet;
        self.potential_melt += wt * other.potential_melt;
        self.air_pres += wt * other.air_pres;
    }

    /// Copy the daily envelope from a cached forcing so that intra-day steps
    /// share one set of daily values.
    pub fn copy_daily_from(&mut self, cached: &Forcing) {
        self.temp_daily_ave = cached.temp_daily_ave;
        self.temp_daily_min = cached.temp_daily_min;
        self.temp_daily_max = cached.temp_daily_max;
        self.precip_daily_ave = cached.precip_daily_ave;
        self.precip_5day = cached.precip_5day;
        self.day_angle = cached.day_angle;
        self.day_length = cached.day_length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_accumulation_is_convex() {
        let mut a = Forcing::zero();
        let mut g1 = Forcing::zero();
        g1.precip = 10.0;
        g1.temp_ave = 4.0;
        let mut g2 = Forcing::zero();
        g2.precip = 20.0;
        g2.temp_ave = -2.0;
        a.add_weighted(&g1, 0.25);
        a.add_weighted(&g2, 0.75);
        assert!((a.precip - 17.5).abs() < 1e-12);
        assert!((a.temp_ave - (-0.5)).abs() < 1e-12);
    }

    #[test]
    fn daily_copy_leaves_step_values_alone() {
        let mut cached = Forcing::zero();
        cached.temp_daily_ave = 3.0;
        cached.day_length = 0.4;
        let mut f = Forcing::zero();
        f.temp_ave = 1.5;
        f.copy_daily_from(&cached);
        assert_eq!(f.temp_daily_ave, 3.0);
        assert_eq!(f.day_length, 0.4);
        assert_eq!(f.temp_ave, 1.5);
    }
}
