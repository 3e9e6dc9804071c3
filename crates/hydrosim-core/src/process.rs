//! Process kernels: pluggable algorithms moving water between storages.
//!
//! The orchestrator does not know kernel identities; each kernel exposes its
//! connection set and a rate function of (forcing, environment, HRU state).
//! Rates are in mm/d over the HRU area.

use crate::forcing::Forcing;
use crate::hru::{Compartment, Hru, GROUNDWATER, PONDED, SNOW, SOIL_LOW, SOIL_TOP};
use crate::params::Environment;

/// One directed water movement a kernel participates in.
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub from: Compartment,
    pub to: Compartment,
    /// Evaporative connections carry constituent mass only for constituents
    /// that can evaporate.
    pub evaporative: bool,
}

impl Connection {
    pub fn new(from: Compartment, to: Compartment) -> Self {
        Self {
            from,
            to,
            evaporative: false,
        }
    }

    pub fn evaporative(from: Compartment, to: Compartment) -> Self {
        Self {
            from,
            to,
            evaporative: true,
        }
    }
}

/// A water-moving process.
///
/// `rates` must fill one entry per connection, in the order reported by
/// `connections()`; the orchestrator integrates rates over the timestep,
/// clips for storage availability and commits the result.
pub trait ProcessKernel: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn connections(&self) -> Vec<Connection>;
    fn rates(&self, f: &Forcing, env: &Environment, hru: &Hru, dt: f64, rates: &mut [f64]);
}

// ---------------------------------------------------------------------------
// Built-in kernels
// ---------------------------------------------------------------------------

/// Partitions incoming precipitation into throughfall and snowfall.
/// Canopy-intercepted rain never reaches the column.
#[derive(Debug, Default)]
pub struct Precipitation;

impl ProcessKernel for Precipitation {
    fn name(&self) -> &'static str {
        "PRECIPITATION"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![
            Connection::new(Compartment::Atmosphere, Compartment::Storage(PONDED)),
            Connection::new(Compartment::Atmosphere, Compartment::Storage(SNOW)),
        ]
    }

    fn rates(&self, f: &Forcing, env: &Environment, hru: &Hru, _dt: f64, rates: &mut [f64]) {
        let icept = env.vegetation[hru.veg_class].rain_icept_pct;
        let rain = f.precip * (1.0 - f.snow_frac);
        let snow = f.precip * f.snow_frac;
        rates[0] = rain * (1.0 - icept);
        rates[1] = snow;
    }
}

/// Melts the snowpack at the potential melt rate.
#[derive(Debug, Default)]
pub struct Snowmelt;

impl ProcessKernel for Snowmelt {
    fn name(&self) -> &'static str {
        "SNOWMELT"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![Connection::new(
            Compartment::Storage(SNOW),
            Compartment::Storage(PONDED),
        )]
    }

    fn rates(&self, f: &Forcing, _env: &Environment, _hru: &Hru, _dt: f64, rates: &mut [f64]) {
        rates[0] = f.potential_melt.max(0.0);
    }
}

/// Drains ponded water within the step, splitting it between infiltration
/// (HBV beta curve on the upper soil) and direct surface runoff.
#[derive(Debug, Default)]
pub struct Infiltration;

impl ProcessKernel for Infiltration {
    fn name(&self) -> &'static str {
        "INFILTRATION"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![
            Connection::new(Compartment::Storage(PONDED), Compartment::Storage(SOIL_TOP)),
            Connection::new(Compartment::Storage(PONDED), Compartment::SurfaceWater),
        ]
    }

    fn rates(&self, _f: &Forcing, env: &Environment, hru: &Hru, dt: f64, rates: &mut [f64]) {
        let soil = &env.soils[hru.soil_class];
        let ponded_rate = hru.storages[PONDED] / dt;
        let sat = (hru.storages[SOIL_TOP] / soil.field_capacity).clamp(0.0, 1.0);
        let infil = ponded_rate * (1.0 - sat.powf(soil.beta));
        rates[0] = infil;
        rates[1] = ponded_rate - infil;
    }
}

/// Evaporates from the upper soil at a moisture-limited fraction of PET.
#[derive(Debug, Default)]
pub struct SoilEvaporation;

/// Soil saturation above which evaporation proceeds at the full PET rate.
const EVAP_SAT_LIMIT: f64 = 0.6;

impl ProcessKernel for SoilEvaporation {
    fn name(&self) -> &'static str {
        "SOIL_EVAPORATION"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![Connection::evaporative(
            Compartment::Storage(SOIL_TOP),
            Compartment::Atmosphere,
        )]
    }

    fn rates(&self, f: &Forcing, env: &Environment, hru: &Hru, _dt: f64, rates: &mut [f64]) {
        let soil = &env.soils[hru.soil_class];
        let limit = EVAP_SAT_LIMIT * soil.field_capacity;
        let moisture_factor = if limit > 0.0 {
            (hru.storages[SOIL_TOP] / limit).clamp(0.0, 1.0)
        } else {
            1.0
        };
        rates[0] = f.pet * moisture_factor;
    }
}

/// Linear percolation from the upper to the lower soil.
#[derive(Debug, Default)]
pub struct Percolation;

impl ProcessKernel for Percolation {
    fn name(&self) -> &'static str {
        "PERCOLATION"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![Connection::new(
            Compartment::Storage(SOIL_TOP),
            Compartment::Storage(SOIL_LOW),
        )]
    }

    fn rates(&self, _f: &Forcing, env: &Environment, hru: &Hru, _dt: f64, rates: &mut [f64]) {
        rates[0] = env.soils[hru.soil_class].perc_coeff * hru.storages[SOIL_TOP];
    }
}

/// Linear interflow from the lower soil to surface water.
#[derive(Debug, Default)]
pub struct Interflow;

impl ProcessKernel for Interflow {
    fn name(&self) -> &'static str {
        "INTERFLOW"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![Connection::new(
            Compartment::Storage(SOIL_LOW),
            Compartment::SurfaceWater,
        )]
    }

    fn rates(&self, _f: &Forcing, env: &Environment, hru: &Hru, _dt: f64, rates: &mut [f64]) {
        rates[0] = env.landuse[hru.landuse_class].interflow_coeff * hru.storages[SOIL_LOW];
    }
}

/// Linear recharge from the lower soil to groundwater.
#[derive(Debug, Default)]
pub struct Recharge;

impl ProcessKernel for Recharge {
    fn name(&self) -> &'static str {
        "RECHARGE"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![Connection::new(
            Compartment::Storage(SOIL_LOW),
            Compartment::Storage(GROUNDWATER),
        )]
    }

    fn rates(&self, _f: &Forcing, env: &Environment, hru: &Hru, _dt: f64, rates: &mut [f64]) {
        rates[0] = env.landuse[hru.landuse_class].recharge_coeff * hru.storages[SOIL_LOW];
    }
}

/// Linear groundwater release to surface water.
#[derive(Debug, Default)]
pub struct Baseflow;

impl ProcessKernel for Baseflow {
    fn name(&self) -> &'static str {
        "BASEFLOW"
    }

    fn connections(&self) -> Vec<Connection> {
        vec![Connection::new(
            Compartment::Storage(GROUNDWATER),
            Compartment::SurfaceWater,
        )]
    }

    fn rates(&self, _f: &Forcing, env: &Environment, hru: &Hru, _dt: f64, rates: &mut [f64]) {
        rates[0] = env.landuse[hru.landuse_class].baseflow_coeff * hru.storages[GROUNDWATER];
    }
}

/// The default kernel stack, in application order.
pub fn standard_kernels() -> Vec<Box<dyn ProcessKernel>> {
    vec![
        Box::new(Precipitation),
        Box::new(Snowmelt),
        Box::new(Infiltration),
        Box::new(SoilEvaporation),
        Box::new(Percolation),
        Box::new(Interflow),
        Box::new(Recharge),
        Box::new(Baseflow),
    ]
}

// ---------------------------------------------------------------------------
// Non-negativity clipping
// ---------------------------------------------------------------------------

/// Scale down withdrawing fluxes so no storage goes negative.
///
/// All withdrawals from a deficit storage are reduced by the same factor.
/// Because scaling an upstream storage's outflow shrinks a downstream
/// storage's inflow, passes repeat until a pass finds no violation.
/// Returns the number of deficit events encountered.
pub fn clip_negative_storages(
    storages: &[f64],
    connections: &[Connection],
    fluxes: &mut [f64],
) -> usize {
    const TINY: f64 = 1e-12;
    let n = storages.len();
    let mut events = 0;

    for _pass in 0..(2 * n + 1) {
        let mut violated = false;
        for i in 0..n {
            let mut inflow = 0.0;
            let mut outflow = 0.0;
            for (q, conn) in connections.iter().enumerate() {
                if conn.to == Compartment::Storage(i) {
                    inflow += fluxes[q];
                }
                if conn.from == Compartment::Storage(i) {
                    outflow += fluxes[q];
                }
            }
            if outflow > TINY && storages[i] + inflow - outflow < -TINY {
                let scale = ((storages[i] + inflow) / outflow).max(0.0);
                for (q, conn) in connections.iter().enumerate() {
                    if conn.from == Compartment::Storage(i) {
                        fluxes[q] *= scale;
                    }
                }
                events += 1;
                violated = true;
            }
        }
        if !violated {
            break;
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hru::NUM_STORAGES;
    use approx::assert_relative_eq;

    fn test_hru() -> Hru {
        let mut hru = Hru::new(1, 10.0, 500.0, 47.0, 1);
        hru.storages = vec![0.0; NUM_STORAGES];
        hru
    }

    #[test]
    fn precipitation_partitions_by_snow_fraction() {
        let env = Environment::default();
        let hru = test_hru();
        let mut f = Forcing::zero();
        f.precip = 10.0;
        f.snow_frac = 0.3;
        let kernel = Precipitation;
        let mut rates = vec![0.0; 2];
        kernel.rates(&f, &env, &hru, 1.0, &mut rates);
        let icept = env.vegetation[0].rain_icept_pct;
        assert_relative_eq!(rates[0], 7.0 * (1.0 - icept));
        assert_relative_eq!(rates[1], 3.0);
    }

    #[test]
    fn infiltration_splits_all_ponded_water() {
        let env = Environment::default();
        let mut hru = test_hru();
        hru.storages[PONDED] = 20.0;
        hru.storages[SOIL_TOP] = 75.0; // half of field capacity
        let kernel = Infiltration;
        let mut rates = vec![0.0; 2];
        kernel.rates(&Forcing::zero(), &env, &hru, 1.0, &mut rates);
        assert_relative_eq!(rates[0] + rates[1], 20.0, epsilon = 1e-12);
        assert!(rates[0] > 0.0 && rates[1] > 0.0);
    }

    #[test]
    fn infiltration_saturated_soil_sheds_everything() {
        let env = Environment::default();
        let mut hru = test_hru();
        hru.storages[PONDED] = 20.0;
        hru.storages[SOIL_TOP] = env.soils[0].field_capacity;
        let kernel = Infiltration;
        let mut rates = vec![0.0; 2];
        kernel.rates(&Forcing::zero(), &env, &hru, 1.0, &mut rates);
        assert_relative_eq!(rates[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(rates[1], 20.0, epsilon = 1e-12);
    }

    #[test]
    fn clip_scales_all_withdrawals_equally() {
        let storages = vec![5.0, 0.0, 0.0, 0.0, 0.0];
        let connections = vec![
            Connection::new(Compartment::Storage(PONDED), Compartment::Storage(SOIL_TOP)),
            Connection::new(Compartment::Storage(PONDED), Compartment::SurfaceWater),
        ];
        let mut fluxes = vec![6.0, 4.0]; // 10 mm demanded of a 5 mm store
        let events = clip_negative_storages(&storages, &connections, &mut fluxes);
        assert_eq!(events, 1);
        assert_relative_eq!(fluxes[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(fluxes[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn clip_handles_chained_deficits() {
        // A feeds B; clipping A's outflow starves B, whose own outflow
        // must then be clipped too.
        let storages = vec![2.0, 0.0, 0.0, 0.0, 0.0];
        let connections = vec![
            Connection::new(Compartment::Storage(0), Compartment::Storage(1)),
            Connection::new(Compartment::Storage(1), Compartment::SurfaceWater),
        ];
        let mut fluxes = vec![10.0, 8.0];
        let events = clip_negative_storages(&storages, &connections, &mut fluxes);
        assert!(events >= 2);
        assert_relative_eq!(fluxes[0], 2.0, epsilon = 1e-9);
        assert!(fluxes[1] <= 2.0 + 1e-9);
        // B never goes negative
        assert!(storages[1] + fluxes[0] - fluxes[1] >= -1e-9);
    }

    #[test]
    fn clip_leaves_satisfied_storages_alone() {
        let storages = vec![100.0, 0.0, 0.0, 0.0, 0.0];
        let connections = vec![Connection::new(
            Compartment::Storage(PONDED),
            Compartment::SurfaceWater,
        )];
        let mut fluxes = vec![50.0];
        let events = clip_negative_storages(&storages, &connections, &mut fluxes);
        assert_eq!(events, 0);
        assert_relative_eq!(fluxes[0], 50.0);
    }

    #[test]
    fn standard_kernel_stack_is_consistent() {
        for kernel in standard_kernels() {
            let conns = kernel.connections();
            assert!(!conns.is_empty(), "{} has no connections", kernel.name());
            let mut rates = vec![0.0; conns.len()];
            let env = Environment::default();
            let hru = test_hru();
            kernel.rates(&Forcing::zero(), &env, &hru, 1.0, &mut rates);
            assert!(rates.iter().all(|r| r.is_finite() && *r >= 0.0));
        }
    }
}
