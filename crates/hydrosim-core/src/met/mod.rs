//! Method kernels for per-HRU forcing synthesis.
//!
//! Each function dispatches on its method selector; the forcing assembler
//! calls them in a fixed stage order.

pub mod atmosphere;
pub mod pet;
pub mod precip;
pub mod radiation;

/// Standard atmospheric pressure at sea level [kPa].
pub const AMBIENT_AIR_PRESSURE: f64 = 101.3;
/// Pressure of one atmosphere [kPa].
pub const KPA_PER_ATM: f64 = 101.325;
/// 0 °C in Kelvin.
pub const ZERO_CELSIUS: f64 = 273.15;
/// Evaporation-equivalent depth of 1 W/m² sustained for a day [mm/d].
pub const MM_PER_DAY_PER_WATT: f64 = 0.0353;
