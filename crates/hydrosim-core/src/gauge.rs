//! Meteorological gauges: fixed points carrying forcing time series.

use crate::forcing::Forcing;
use crate::options::{MonthInterpMethod, TimeStep};
use crate::timeseries::{MonthlyValues, Timeseries};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The time series a gauge may provide. Any of them can be absent; missing
/// streams fall back to derived values or to the method kernels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaugeSeries {
    pub precip: Option<Timeseries>,
    pub temp_ave: Option<Timeseries>,
    pub temp_daily_ave: Option<Timeseries>,
    pub temp_daily_min: Option<Timeseries>,
    pub temp_daily_max: Option<Timeseries>,
    pub snow_frac: Option<Timeseries>,
    pub pet: Option<Timeseries>,
    pub ow_pet: Option<Timeseries>,
    pub potential_melt: Option<Timeseries>,
    pub sw_radia: Option<Timeseries>,
    pub sw_radia_net: Option<Timeseries>,
    pub lw_radia: Option<Timeseries>,
    pub et_radia: Option<Timeseries>,
    pub air_pres: Option<Timeseries>,
    pub rel_humidity: Option<Timeseries>,
    pub cloud_cover: Option<Timeseries>,
    pub wind_vel: Option<Timeseries>,
}

/// A forcing gauge: location, observed series, monthly climatology and
/// station correction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gauge {
    pub name: String,
    /// Station elevation [m a.s.l.].
    pub elevation: f64,
    /// Latitude [deg].
    pub latitude: f64,
    /// Longitude [deg].
    pub longitude: f64,

    pub series: GaugeSeries,

    pub monthly_ave_temp: MonthlyValues,
    pub monthly_min_temp: MonthlyValues,
    pub monthly_max_temp: MonthlyValues,
    pub monthly_ave_pet: MonthlyValues,

    /// Rainfall undercatch correction factor [-].
    pub rainfall_corr: f64,
    /// Snowfall undercatch correction factor [-].
    pub snowfall_corr: f64,

    /// Daily temperature range at which cloud cover is complete [°C].
    pub cloud_min_range: f64,
    /// Daily temperature range at which the sky is clear [°C].
    pub cloud_max_range: f64,
}

impl Gauge {
    pub fn new(name: impl Into<String>, elevation: f64, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            elevation,
            latitude,
            longitude,
            series: GaugeSeries::default(),
            monthly_ave_temp: MonthlyValues::uniform(0.0),
            monthly_min_temp: MonthlyValues::uniform(0.0),
            monthly_max_temp: MonthlyValues::uniform(0.0),
            monthly_ave_pet: MonthlyValues::uniform(0.0),
            rainfall_corr: 1.0,
            snowfall_corr: 1.0,
            cloud_min_range: 0.0,
            cloud_max_range: 0.0,
        }
    }

    /// Great-circle-free planar distance proxy [deg²] used for interpolation
    /// weights; only relative magnitudes matter.
    pub fn distance2_to(&self, lat: f64, lon: f64) -> f64 {
        let dlat = self.latitude - lat;
        let dlon = (self.longitude - lon) * self.latitude.to_radians().cos();
        dlat * dlat + dlon * dlon
    }

    fn read(series: &Option<Timeseries>, nn: usize, dt: f64) -> f64 {
        series.as_ref().map_or(0.0, |ts| ts.value_at_step(nn, dt))
    }

    /// Extract the gauge forcing for timestep `tt`.
    ///
    /// Uncorrected daily temperatures are copied into the `_unc` fields here,
    /// before any correction can run. A reversed daily temperature range is
    /// warned about, never fatal.
    pub fn extract(&self, tt: &TimeStep, dt: f64, month_interp: MonthInterpMethod) -> Forcing {
        let nn = tt.step_index;
        let mut f = Forcing::zero();
        let model_day = tt.model_time.floor();

        f.precip = Self::read(&self.series.precip, nn, dt);
        f.precip_daily_ave = self
            .series
            .precip
            .as_ref()
            .map_or(0.0, |ts| ts.aggregate(model_day, 1.0));
        f.precip_5day = self
            .series
            .precip
            .as_ref()
            .map_or(0.0, |ts| ts.aggregate(tt.model_time - 5.0, 5.0) * 5.0);
        f.snow_frac = Self::read(&self.series.snow_frac, nn, dt);

        f.temp_daily_min = Self::read(&self.series.temp_daily_min, nn, dt);
        f.temp_daily_max = Self::read(&self.series.temp_daily_max, nn, dt);
        f.temp_daily_ave = match &self.series.temp_daily_ave {
            Some(ts) => ts.value_at_step(nn, dt),
            None => 0.5 * (f.temp_daily_min + f.temp_daily_max),
        };
        f.temp_ave = match &self.series.temp_ave {
            Some(ts) => ts.value_at_step(nn, dt),
            None => f.temp_daily_ave,
        };

        f.temp_ave_unc = f.temp_daily_ave;
        f.temp_min_unc = f.temp_daily_min;
        f.temp_max_unc = f.temp_daily_max;

        f.temp_month_ave = self.monthly_ave_temp.at(tt.julian_day, month_interp);
        f.temp_month_min = self.monthly_min_temp.at(tt.julian_day, month_interp);
        f.temp_month_max = self.monthly_max_temp.at(tt.julian_day, month_interp);
        f.pet_month_ave = self.monthly_ave_pet.at(tt.julian_day, month_interp);

        f.lw_radia = Self::read(&self.series.lw_radia, nn, dt);
        f.sw_radia = Self::read(&self.series.sw_radia, nn, dt);
        f.sw_radia_net = Self::read(&self.series.sw_radia_net, nn, dt);
        f.et_radia = Self::read(&self.series.et_radia, nn, dt);
        f.sw_radia_unc = f.sw_radia;

        f.pet = Self::read(&self.series.pet, nn, dt);
        f.ow_pet = Self::read(&self.series.ow_pet, nn, dt);
        f.potential_melt = Self::read(&self.series.potential_melt, nn, dt);

        f.air_pres = Self::read(&self.series.air_pres, nn, dt);
        f.rel_humidity = Self::read(&self.series.rel_humidity, nn, dt);
        f.cloud_cover = Self::read(&self.series.cloud_cover, nn, dt);
        f.wind_vel = Self::read(&self.series.wind_vel, nn, dt);

        if self.series.temp_daily_min.is_some()
            && self.series.temp_daily_max.is_some()
            && f.temp_daily_max < f.temp_daily_min
        {
            warn!(
                gauge = %self.name,
                step = nn,
                "daily max temperature below daily min temperature"
            );
        }

        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Clock;
    use approx::assert_relative_eq;

    fn gauge_with_precip() -> Gauge {
        let mut g = Gauge::new("G1", 500.0, 47.0, 8.0);
        g.series.precip =
            Some(Timeseries::new(0.0, 1.0, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap());
        g.series.temp_daily_min = Some(Timeseries::constant(-2.0, 7.0));
        g.series.temp_daily_max = Some(Timeseries::constant(6.0, 7.0));
        g
    }

    #[test]
    fn five_day_precip_accumulates() {
        let g = gauge_with_precip();
        let clock = Clock::new(0.0, 2000, 7.0, 1.0).unwrap();
        let tt = clock.at_step(5); // window [0,5): 1+2+3+4+5
        let f = g.extract(&tt, 1.0, MonthInterpMethod::Uniform);
        assert_relative_eq!(f.precip_5day, 15.0);
    }

    #[test]
    fn daily_ave_derived_from_min_max() {
        let g = gauge_with_precip();
        let clock = Clock::new(0.0, 2000, 7.0, 1.0).unwrap();
        let f = g.extract(&clock.at_step(0), 1.0, MonthInterpMethod::Uniform);
        assert_relative_eq!(f.temp_daily_ave, 2.0);
        assert_relative_eq!(f.temp_ave, 2.0);
    }

    #[test]
    fn uncorrected_fields_mirror_daily_values() {
        let g = gauge_with_precip();
        let clock = Clock::new(0.0, 2000, 7.0, 1.0).unwrap();
        let f = g.extract(&clock.at_step(0), 1.0, MonthInterpMethod::Uniform);
        assert_eq!(f.temp_min_unc, f.temp_daily_min);
        assert_eq!(f.temp_max_unc, f.temp_daily_max);
        assert_eq!(f.temp_ave_unc, f.temp_daily_ave);
    }
}
