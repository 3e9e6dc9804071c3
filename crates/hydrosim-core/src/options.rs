//! Simulation clock and global method selectors.
//!
//! Every algorithmic choice in the engine is a closed enumeration selected in
//! the model-definition file; dispatch is a tagged match, so adding a method
//! means adding a variant plus its implementation.

use crate::errors::{HydroError, HydroResult};
use serde::{Deserialize, Serialize};

/// Model time in days since simulation start.
pub type Time = f64;

/// Guard against `floor` landing one step low from accumulated round-off.
pub const TIME_CORRECTION: f64 = 1e-7;

/// Cumulative day-of-year at the start of each month (no-leap calendar).
const MONTH_STARTS: [f64; 13] = [
    0.0, 31.0, 59.0, 90.0, 120.0, 151.0, 181.0, 212.0, 243.0, 273.0, 304.0, 334.0, 365.0,
];

/// Snapshot of the simulation clock for one timestep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeStep {
    /// Days since simulation start.
    pub model_time: Time,
    /// Index of the current step.
    pub step_index: usize,
    /// Day of year in [0, 365).
    pub julian_day: f64,
    /// Calendar month, 1..=12.
    pub month: u32,
    pub year: i32,
    /// True when this step begins a new calendar day.
    pub day_changed: bool,
}

/// The simulation clock. Immutable after initialization; the orchestrator
/// derives a [`TimeStep`] from it each step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clock {
    /// Julian day (0-based day of year) at simulation start.
    pub start_julian: f64,
    pub start_year: i32,
    /// Simulation duration [d].
    pub duration: f64,
    /// Timestep [d].
    pub timestep: f64,
}

impl Clock {
    pub fn new(start_julian: f64, start_year: i32, duration: f64, timestep: f64) -> HydroResult<Self> {
        if timestep <= 0.0 || timestep > 1.0 {
            return Err(HydroError::Config(format!(
                "timestep must be in (0, 1] days, got {timestep}"
            )));
        }
        if duration <= 0.0 {
            return Err(HydroError::Config(format!(
                "duration must be positive, got {duration}"
            )));
        }
        Ok(Self {
            start_julian,
            start_year,
            duration,
            timestep,
        })
    }

    pub fn num_steps(&self) -> usize {
        ((self.duration + TIME_CORRECTION) / self.timestep) as usize
    }

    /// Clock state for step `nn`.
    pub fn at_step(&self, nn: usize) -> TimeStep {
        let model_time = nn as f64 * self.timestep;
        let total = self.start_julian + model_time + TIME_CORRECTION;
        let year = self.start_year + (total / 365.0) as i32;
        let julian_day = total % 365.0;
        let day_changed = if nn == 0 {
            true
        } else {
            let prev = self.start_julian + (nn - 1) as f64 * self.timestep + TIME_CORRECTION;
            (total.floor() - prev.floor()).abs() > 0.5
        };
        TimeStep {
            model_time,
            step_index: nn,
            julian_day,
            month: month_of_julian(julian_day),
            year,
            day_changed,
        }
    }
}

/// Calendar month (1..=12) for a day of year in [0, 365).
pub fn month_of_julian(julian_day: f64) -> u32 {
    let jd = julian_day.rem_euclid(365.0);
    for m in 1..=12usize {
        if jd < MONTH_STARTS[m] {
            return m as u32;
        }
    }
    12
}

/// Day of year at the middle of month `m` (1..=12).
pub fn mid_month_julian(m: u32) -> f64 {
    let m = m as usize;
    0.5 * (MONTH_STARTS[m - 1] + MONTH_STARTS[m])
}

/// Day of year of the first day of month `m` (1..=12).
pub fn first_of_month_julian(m: u32) -> f64 {
    MONTH_STARTS[m as usize - 1]
}

// ---------------------------------------------------------------------------
// Method selectors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    #[default]
    AverageAll,
    NearestNeighbor,
    InverseDistance,
    FromFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    #[default]
    None,
    PlugFlow,
    DiffusiveWave,
    Muskingum,
    MuskingumCunge,
    StorageCoeff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatchmentRoutingMethod {
    #[default]
    Dump,
    DelayedFirstOrder,
    GammaConvolution,
    TriConvolution,
    ReservoirSeries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaporationMethod {
    Data,
    #[default]
    FromMonthly,
    Hargreaves1985,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OroTempMethod {
    #[default]
    None,
    SimpleLapse,
    HbvLapse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OroPrecipMethod {
    #[default]
    None,
    SimpleLapse,
    Hbv,
    Ubcwm2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OroPetMethod {
    #[default]
    None,
    SimpleLapse,
    Ubcwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwRadiationMethod {
    Data,
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LwRadiationMethod {
    Data,
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloudCoverMethod {
    #[default]
    None,
    Data,
    Ubcwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwCanopyCorrMethod {
    #[default]
    None,
    Ubcwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwCloudCorrMethod {
    #[default]
    None,
    Ubcwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RainSnowMethod {
    Data,
    Dingman,
    #[default]
    Hbv,
    Ubcwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PotentialMeltMethod {
    None,
    Data,
    #[default]
    DegreeDay,
    Hbv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubdailyMethod {
    #[default]
    None,
    Simple,
    Ubc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindVelocityMethod {
    #[default]
    Constant,
    Data,
    Ubcwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelHumidityMethod {
    #[default]
    Constant,
    MinDewpoint,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AirPressureMethod {
    Data,
    #[default]
    Basic,
    Ubc,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonthInterpMethod {
    Uniform,
    LinearFom,
    #[default]
    LinearMid,
    Linear21,
}

/// Global model options: the timestep plus one selector per pluggable method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub timestep: f64,
    pub interpolation: InterpolationMethod,
    pub routing: RoutingMethod,
    pub catchment_routing: CatchmentRoutingMethod,
    pub evaporation: EvaporationMethod,
    pub ow_evaporation: EvaporationMethod,
    pub orocorr_temp: OroTempMethod,
    pub orocorr_precip: OroPrecipMethod,
    pub orocorr_pet: OroPetMethod,
    pub sw_radiation: SwRadiationMethod,
    pub lw_radiation: LwRadiationMethod,
    pub cloud_cover: CloudCoverMethod,
    pub sw_canopy_corr: SwCanopyCorrMethod,
    pub sw_cloud_corr: SwCloudCorrMethod,
    pub rainsnow: RainSnowMethod,
    pub pot_melt: PotentialMeltMethod,
    pub subdaily: SubdailyMethod,
    pub wind_velocity: WindVelocityMethod,
    pub rel_humidity: RelHumidityMethod,
    pub air_pressure: AirPressureMethod,
    pub month_interp: MonthInterpMethod,
    /// Muskingum weighting factor used when `routing = muskingum`.
    pub muskingum_x: f64,
    /// Abort on a mass-balance violation instead of logging it.
    pub strict_mass_balance: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timestep: 1.0,
            interpolation: Default::default(),
            routing: Default::default(),
            catchment_routing: Default::default(),
            evaporation: Default::default(),
            ow_evaporation: Default::default(),
            orocorr_temp: Default::default(),
            orocorr_precip: Default::default(),
            orocorr_pet: Default::default(),
            sw_radiation: Default::default(),
            lw_radiation: Default::default(),
            cloud_cover: Default::default(),
            sw_canopy_corr: Default::default(),
            sw_cloud_corr: Default::default(),
            rainsnow: Default::default(),
            pot_melt: Default::default(),
            subdaily: Default::default(),
            wind_velocity: Default::default(),
            rel_humidity: Default::default(),
            air_pressure: Default::default(),
            month_interp: Default::default(),
            muskingum_x: 0.2,
            strict_mass_balance: false,
        }
    }
}
