//! Constituent transport: an advective overlay coupling a set of solutes to
//! every water storage and every water movement.
//!
//! Each constituent carries a parallel mass layer [mg] over every HRU storage
//! plus ring-buffered in-channel loading histories per subbasin. Mass moves
//! in lockstep with the water fluxes of the same step, then decays; channel
//! routing reuses the water unit hydrographs. The transport model is an
//! explicit handle threaded through the orchestrator, never global state.

use crate::errors::{HydroError, HydroResult};
use crate::hru::{Compartment, Hru, NUM_STORAGES, SOIL_LOW, SOIL_TOP};
use crate::options::{Options, Time};
use crate::process::Connection;
use crate::subbasin::SubBasin;
use crate::timeseries::Timeseries;
use crate::utils::ring::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SEC_PER_DAY: f64 = 86400.0;
/// Liters held by 1 mm of water over 1 km².
const LITERS_PER_MM_KM2: f64 = 1e6;
/// Liters per day carried by 1 m³/s.
const LITERS_PER_DAY_PER_CMS: f64 = 1000.0 * SEC_PER_DAY;
/// Storages drier than this read as concentration zero [mm].
const DRY_STORAGE_MM: f64 = 1e-9;
/// Discharges below this give concentration zero [m³/s].
const DRY_FLOW_CMS: f64 = 1e-6;

/// A transported constituent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constituent {
    pub name: String,
    /// Tracers are dimensionless and conservative by convention.
    pub is_tracer: bool,
    /// Whether evaporative connections may carry this constituent.
    pub can_evaporate: bool,
    /// Linear decay rate [1/d].
    pub decay_rate: f64,
    /// Cumulative mass added to the system [mg].
    pub cumul_input: f64,
    /// Cumulative mass removed from the system [mg].
    pub cumul_output: f64,
    /// Mass in the system at initialization [mg].
    pub initial_mass: f64,
}

impl Constituent {
    pub fn new(name: impl Into<String>, is_tracer: bool) -> Self {
        Self {
            name: name.into(),
            is_tracer,
            can_evaporate: false,
            decay_rate: 0.0,
            cumul_input: 0.0,
            cumul_output: 0.0,
            initial_mass: 0.0,
        }
    }
}

/// Per-constituent transport parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportParams {
    /// Retardation factor per soil class; >= 1, non-finite blocks transport.
    pub retardation: Vec<f64>,
}

/// How a source prescribes mass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Fixed concentration [mg/L].
    DirichletConcentration { value: f64 },
    DirichletSeries { series: Timeseries },
    /// Fixed areal influx [mg/m²/d].
    NeumannFlux { value: f64 },
    NeumannSeries { series: Timeseries },
}

/// A source addressed by (constituent, storage, HRU group or all).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstituentSource {
    pub constituent: usize,
    pub storage: usize,
    /// HRU indices the source applies to; `None` means all.
    pub hru_indices: Option<Vec<usize>>,
    pub kind: SourceKind,
}

/// Dirichlet condition on a subbasin's specified upstream inflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InflowConcentration {
    pub constituent: usize,
    pub subbasin: usize,
    /// Concentration [mg/L], constant or a series.
    pub series: Timeseries,
}

/// In-channel mass state for one (subbasin, constituent) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMassState {
    m_in_hist: RingBuffer,
    m_lat_hist: RingBuffer,
    /// End-of-step load at each channel segment [mg/d].
    m_out: Vec<f64>,
    m_out_last: f64,
    /// Mass in transit in the reach [mg].
    channel_mass: f64,
    /// Mass in transit in the rivulets [mg].
    rivulet_mass: f64,
}

/// The transport model for the whole watershed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportModel {
    pub constituents: Vec<Constituent>,
    pub params: Vec<TransportParams>,
    /// Mass state [mg], indexed `[constituent][hru][storage]`.
    pub mass: Vec<Vec<Vec<f64>>>,
    pub sources: Vec<ConstituentSource>,
    pub inflow_concentrations: Vec<InflowConcentration>,
    /// Per-HRU decay overrides, keyed by HRU index, per constituent.
    pub decay_overrides: Vec<HashMap<usize, f64>>,
    channel_state: Vec<Vec<ChannelMassState>>,
}

impl TransportModel {
    pub fn empty() -> Self {
        Self {
            constituents: Vec::new(),
            params: Vec::new(),
            mass: Vec::new(),
            sources: Vec::new(),
            inflow_concentrations: Vec::new(),
            decay_overrides: Vec::new(),
            channel_state: Vec::new(),
        }
    }

    pub fn num_constituents(&self) -> usize {
        self.constituents.len()
    }

    pub fn add_constituent(&mut self, c: Constituent, params: TransportParams) {
        self.constituents.push(c);
        self.params.push(params);
        self.decay_overrides.push(HashMap::new());
    }

    /// Size all mass arrays once HRUs and subbasins are known.
    pub fn initialize(&mut self, hrus: &[Hru], subbasins: &[SubBasin]) -> HydroResult<()> {
        for (c, params) in self.constituents.iter().zip(&self.params) {
            for (soil, &r) in params.retardation.iter().enumerate() {
                if r < 1.0 {
                    return Err(HydroError::Config(format!(
                        "constituent '{}': retardation for soil class {soil} is {r}, must be >= 1",
                        c.name
                    )));
                }
            }
        }
        let n_c = self.constituents.len();
        self.mass = vec![vec![vec![0.0; NUM_STORAGES]; hrus.len()]; n_c];
        self.channel_state = subbasins
            .iter()
            .map(|sb| {
                (0..n_c)
                    .map(|_| ChannelMassState {
                        m_in_hist: RingBuffer::zeros(sb.inflow_history_len()),
                        m_lat_hist: RingBuffer::zeros(sb.lat_history_len()),
                        m_out: vec![0.0; sb.num_segments()],
                        m_out_last: 0.0,
                        channel_mass: 0.0,
                        rivulet_mass: 0.0,
                    })
                    .collect()
            })
            .collect();
        for source in &self.sources {
            if source.constituent >= n_c {
                return Err(HydroError::Config(format!(
                    "constituent source references unknown constituent {}",
                    source.constituent
                )));
            }
            if source.storage >= NUM_STORAGES {
                return Err(HydroError::Config(format!(
                    "constituent source references unknown storage {}",
                    source.storage
                )));
            }
        }
        for c in 0..n_c {
            self.constituents[c].initial_mass = self.total_mass(c);
        }
        Ok(())
    }

    /// Total constituent mass currently in the system [mg].
    pub fn total_mass(&self, c: usize) -> f64 {
        let in_storages: f64 = self.mass[c].iter().flatten().sum();
        let in_channels: f64 = self
            .channel_state
            .iter()
            .map(|per_c| per_c[c].channel_mass + per_c[c].rivulet_mass)
            .sum();
        in_storages + in_channels
    }

    /// Concentration in a storage [mg/L]; zero when the storage is dry.
    pub fn concentration(&self, c: usize, k: usize, storage: usize, hru: &Hru) -> f64 {
        let depth = hru.storages[storage];
        if depth <= DRY_STORAGE_MM {
            return 0.0;
        }
        self.mass[c][k][storage] / (depth * hru.area * LITERS_PER_MM_KM2)
    }

    // -- per-step phases ---------------------------------------------------

    /// Apply Dirichlet and Neumann sources at the start of the step.
    pub fn apply_sources(&mut self, hrus: &[Hru], t: Time, dt: f64) {
        for si in 0..self.sources.len() {
            let (c, storage, hru_sel, kind) = {
                let s = &self.sources[si];
                (s.constituent, s.storage, s.hru_indices.clone(), s.kind.clone())
            };
            let apply_to: Vec<usize> = match &hru_sel {
                Some(list) => list.clone(),
                None => (0..hrus.len()).collect(),
            };
            for k in apply_to {
                match &kind {
                    SourceKind::DirichletConcentration { value } => {
                        self.apply_dirichlet(c, k, storage, *value, &hrus[k]);
                    }
                    SourceKind::DirichletSeries { series } => {
                        self.apply_dirichlet(c, k, storage, series.value_at(t), &hrus[k]);
                    }
                    SourceKind::NeumannFlux { value } => {
                        self.apply_neumann(c, k, storage, *value, &hrus[k], dt);
                    }
                    SourceKind::NeumannSeries { series } => {
                        self.apply_neumann(c, k, storage, series.value_at(t), &hrus[k], dt);
                    }
                }
            }
        }
    }

    /// Pin a storage to a fixed concentration; the induced mass change is
    /// booked as system input or output.
    fn apply_dirichlet(&mut self, c: usize, k: usize, storage: usize, conc: f64, hru: &Hru) {
        let volume_l = hru.storages[storage] * hru.area * LITERS_PER_MM_KM2;
        let target = conc.max(0.0) * volume_l;
        let delta = target - self.mass[c][k][storage];
        if delta >= 0.0 {
            self.constituents[c].cumul_input += delta;
        } else {
            self.constituents[c].cumul_output -= delta;
        }
        self.mass[c][k][storage] = target;
    }

    /// Add an areal influx [mg/m²/d] over the step.
    fn apply_neumann(&mut self, c: usize, k: usize, storage: usize, flux: f64, hru: &Hru, dt: f64) {
        let added = flux * hru.area * 1e6 * dt;
        self.mass[c][k][storage] += added;
        self.constituents[c].cumul_input += added;
    }

    /// Advect mass along this step's water fluxes for one HRU.
    ///
    /// `fluxes` are the clipped per-connection water movements [mm] and
    /// `storages_before` the start-of-step storages [mm]. Returns the mass
    /// load leaving to surface water per constituent [mg].
    pub fn advect(
        &mut self,
        k: usize,
        hru: &Hru,
        connections: &[Connection],
        fluxes: &[f64],
        storages_before: &[f64],
    ) -> Vec<f64> {
        let n_c = self.constituents.len();
        let mut lateral = vec![0.0; n_c];

        for (q, conn) in connections.iter().enumerate() {
            let from = match conn.from {
                Compartment::Storage(i) => i,
                // boundary compartments carry no constituent mass inward
                _ => continue,
            };
            let depth = storages_before[from];
            if depth <= DRY_STORAGE_MM || fluxes[q] <= 0.0 {
                continue;
            }
            let moved_fraction = (fluxes[q] / depth).min(1.0);

            for c in 0..n_c {
                if conn.evaporative && !self.constituents[c].can_evaporate {
                    continue;
                }
                let retardation = self.retardation_for(c, hru, from);
                if !retardation.is_finite() {
                    continue;
                }
                let mass_flux =
                    (self.mass[c][k][from] * moved_fraction / retardation).min(self.mass[c][k][from]);
                if mass_flux <= 0.0 {
                    continue;
                }
                self.mass[c][k][from] -= mass_flux;
                match conn.to {
                    Compartment::Storage(j) => self.mass[c][k][j] += mass_flux,
                    Compartment::SurfaceWater => lateral[c] += mass_flux,
                    Compartment::Atmosphere => self.constituents[c].cumul_output += mass_flux,
                }
            }
        }
        lateral
    }

    /// Retardation factor for a connection leaving storage `from`.
    ///
    /// Retardation is soil-specific: it divides the advected mass flux and
    /// applies only to movements out of soil storages.
    fn retardation_for(&self, c: usize, hru: &Hru, from: usize) -> f64 {
        if from == SOIL_TOP || from == SOIL_LOW {
            self.params[c]
                .retardation
                .get(hru.soil_class)
                .copied()
                .unwrap_or(1.0)
        } else {
            1.0
        }
    }

    /// First-order decay after advection; decayed mass is booked as output.
    pub fn decay(&mut self, dt: f64) {
        for c in 0..self.constituents.len() {
            let base_rate = self.constituents[c].decay_rate;
            if base_rate <= 0.0 && self.decay_overrides[c].is_empty() {
                continue;
            }
            let mut lost = 0.0;
            for (k, per_hru) in self.mass[c].iter_mut().enumerate() {
                let rate = self.decay_overrides[c].get(&k).copied().unwrap_or(base_rate);
                if rate <= 0.0 {
                    continue;
                }
                let factor = (-rate * dt).exp();
                for m in per_hru.iter_mut() {
                    lost += *m * (1.0 - factor);
                    *m *= factor;
                }
            }
            self.constituents[c].cumul_output += lost;
        }
    }

    /// Record the upstream mass inflow for subbasin `p` this step.
    ///
    /// `upstream_load` sums the outlet loads of upstream subbasins [mg/d];
    /// a Dirichlet inflow condition adds `C_s * Q_specified` on top and is
    /// booked as system input.
    pub fn set_mass_inflow(
        &mut self,
        p: usize,
        sb: &SubBasin,
        upstream_load: Vec<f64>,
        t: Time,
        dt: f64,
    ) {
        let q_specified = sb.specified_inflow(t);
        let mut load = upstream_load;
        for ic in &self.inflow_concentrations {
            if ic.subbasin == p {
                let conc = ic.series.value_at(t).max(0.0);
                let added = conc * q_specified * LITERS_PER_DAY_PER_CMS;
                load[ic.constituent] += added;
                self.constituents[ic.constituent].cumul_input += added * dt;
            }
        }
        for (c, l) in load.into_iter().enumerate() {
            self.channel_state[p][c].m_in_hist.push_front(l);
        }
    }

    /// Record lateral mass influx for subbasin `p` this step [mg/d].
    pub fn set_lateral_influx(&mut self, p: usize, loads: &[f64]) {
        for (c, &l) in loads.iter().enumerate() {
            self.channel_state[p][c].m_lat_hist.push_front(l.max(0.0));
        }
    }

    /// Route mass through subbasin `p` with the water unit hydrographs.
    ///
    /// Pure convolution; in-reach decay is applied when the result is
    /// committed. Returns the end-of-step segment loads per constituent
    /// [mg/d].
    pub fn route_mass(&self, p: usize, sb: &SubBasin, options: &Options) -> Vec<Vec<f64>> {
        (0..self.constituents.len())
            .map(|c| {
                let state = &self.channel_state[p][c];
                let lat_conv = sb.convolve_lateral(&state.m_lat_hist);
                sb.route_history(&state.m_in_hist, lat_conv, &state.m_out, options)
            })
            .collect()
    }

    /// Commit routed mass loads for subbasin `p`.
    ///
    /// The in-transit pools advance by continuity; decay removed in-reach and
    /// the outlet load of terminal subbasins are booked as system output.
    pub fn update_mass_outflows(
        &mut self,
        p: usize,
        sb: &SubBasin,
        m_out_new: Vec<Vec<f64>>,
        dt: f64,
    ) {
        let tau = sb.reach_travel_time();
        let terminal = sb.downstream_id < 0;
        for (c, mut m_out) in m_out_new.into_iter().enumerate() {
            let rate = self.constituents[c].decay_rate;
            let last = m_out.len() - 1;
            let routed = m_out[last];
            // in-reach decay acts on the outflowing parcel
            let decay_factor = if rate > 0.0 && tau > 0.0 {
                (-rate * tau).exp()
            } else {
                1.0
            };
            m_out[last] = routed * decay_factor;
            let decayed = routed - m_out[last];

            let state = &mut self.channel_state[p][c];
            let lat_conv = sb.convolve_lateral(&state.m_lat_hist);
            let head = state.m_in_hist.get(0) + lat_conv;
            state.channel_mass += dt * (head - routed);
            state.rivulet_mass += dt * (state.m_lat_hist.get(0) - lat_conv);
            state.m_in_hist.add_to_head(lat_conv);
            state.m_out_last = state.m_out[last];
            state.m_out = m_out;

            self.constituents[c].cumul_output += decayed * dt;
            if terminal {
                let outlet = self.channel_state[p][c].m_out[last];
                self.constituents[c].cumul_output += outlet * dt;
            }
        }
    }

    /// Outlet load of subbasin `p` [mg/d].
    pub fn outlet_load(&self, p: usize, c: usize) -> f64 {
        let state = &self.channel_state[p][c];
        state.m_out[state.m_out.len() - 1]
    }

    /// Outlet concentration [mg/L] with a safe divide for dry channels.
    pub fn outflow_concentration(&self, p: usize, c: usize, q_out: f64) -> f64 {
        if q_out < DRY_FLOW_CMS {
            return 0.0;
        }
        self.outlet_load(p, c) / (q_out * LITERS_PER_DAY_PER_CMS)
    }

    /// Mass removed through the outlet of subbasin `p`, integrated over the
    /// last step [mg].
    pub fn integrated_mass_outflow(&self, p: usize, c: usize, dt: f64) -> f64 {
        let state = &self.channel_state[p][c];
        0.5 * (state.m_out_last + self.outlet_load(p, c)) * dt
    }

    /// Global balance residual for constituent `c` [mg]:
    /// `total + cumul_output - cumul_input - initial_mass`.
    pub fn mass_residual(&self, c: usize) -> f64 {
        let constituent = &self.constituents[c];
        self.total_mass(c) + constituent.cumul_output
            - constituent.cumul_input
            - constituent.initial_mass
    }

    /// Global per-constituent balance check; the tolerance scales with the
    /// ledgers.
    pub fn check_mass_balance(&self, c: usize) -> HydroResult<()> {
        let constituent = &self.constituents[c];
        let total = self.total_mass(c);
        let residual = self.mass_residual(c);
        let scale = constituent
            .initial_mass
            .abs()
            .max(constituent.cumul_input.abs())
            .max(total.abs());
        let tolerance = 1e-8 * scale + 1e-6;
        if residual.abs() > tolerance {
            return Err(HydroError::MassBalance {
                context: format!("constituent '{}'", constituent.name),
                residual,
                tolerance,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hru::{GROUNDWATER, PONDED};
    use approx::assert_relative_eq;

    fn one_hru() -> Vec<Hru> {
        let mut hru = Hru::new(1, 10.0, 500.0, 47.0, 1);
        hru.storages[PONDED] = 100.0;
        hru.storages[SOIL_TOP] = 50.0;
        vec![hru]
    }

    fn tracer_model(hrus: &[Hru], subbasins: &[SubBasin]) -> TransportModel {
        let mut tm = TransportModel::empty();
        tm.add_constituent(
            Constituent::new("tracer", true),
            TransportParams {
                retardation: vec![1.0],
            },
        );
        tm.initialize(hrus, subbasins).unwrap();
        tm
    }

    fn no_route_subbasin() -> Vec<SubBasin> {
        let mut sb = SubBasin::new(1, "B1", -1, None, 1000.0, 1.0, true);
        sb.initialize(1.0, 1.0, 10.0, &Options::default()).unwrap();
        vec![sb]
    }

    #[test]
    fn dirichlet_pins_concentration() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = tracer_model(&hrus, &subbasins);
        tm.sources.push(ConstituentSource {
            constituent: 0,
            storage: PONDED,
            hru_indices: None,
            kind: SourceKind::DirichletConcentration { value: 2.0 },
        });
        tm.apply_sources(&hrus, 0.0, 1.0);
        assert_relative_eq!(tm.concentration(0, 0, PONDED, &hrus[0]), 2.0, epsilon = 1e-12);
        // the injected mass is booked as input
        let volume_l = 100.0 * 10.0 * LITERS_PER_MM_KM2;
        assert_relative_eq!(tm.constituents[0].cumul_input, 2.0 * volume_l);
        tm.check_mass_balance(0).unwrap();
    }

    #[test]
    fn dirichlet_removal_books_output() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = tracer_model(&hrus, &subbasins);
        tm.mass[0][0][PONDED] = 500.0;
        tm.constituents[0].initial_mass = tm.total_mass(0);
        tm.sources.push(ConstituentSource {
            constituent: 0,
            storage: PONDED,
            hru_indices: None,
            kind: SourceKind::DirichletConcentration { value: 0.0 },
        });
        tm.apply_sources(&hrus, 0.0, 1.0);
        assert_relative_eq!(tm.mass[0][0][PONDED], 0.0);
        assert_relative_eq!(tm.constituents[0].cumul_output, 500.0);
        tm.check_mass_balance(0).unwrap();
    }

    #[test]
    fn neumann_adds_flux_times_area_and_time() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = tracer_model(&hrus, &subbasins);
        tm.sources.push(ConstituentSource {
            constituent: 0,
            storage: SOIL_TOP,
            hru_indices: Some(vec![0]),
            kind: SourceKind::NeumannFlux { value: 3.0 },
        });
        tm.apply_sources(&hrus, 0.0, 0.5);
        // 3 mg/m²/d * 10 km² * 0.5 d
        assert_relative_eq!(tm.mass[0][0][SOIL_TOP], 3.0 * 10.0e6 * 0.5);
        tm.check_mass_balance(0).unwrap();
    }

    #[test]
    fn advection_moves_mass_with_water() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = tracer_model(&hrus, &subbasins);
        tm.mass[0][0][PONDED] = 1000.0;
        tm.constituents[0].initial_mass = tm.total_mass(0);

        let connections = vec![Connection::new(
            Compartment::Storage(PONDED),
            Compartment::Storage(SOIL_TOP),
        )];
        // 40 of 100 mm moves
        let lateral = tm.advect(0, &hrus[0], &connections, &[40.0], &hrus[0].storages.clone());
        assert_relative_eq!(tm.mass[0][0][PONDED], 600.0);
        assert_relative_eq!(tm.mass[0][0][SOIL_TOP], 400.0);
        assert!(lateral.iter().all(|&l| l == 0.0));
        tm.check_mass_balance(0).unwrap();
    }

    #[test]
    fn retardation_divides_soil_outflow() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = TransportModel::empty();
        tm.add_constituent(
            Constituent::new("solute", false),
            TransportParams {
                retardation: vec![4.0],
            },
        );
        tm.initialize(&hrus, &subbasins).unwrap();
        tm.mass[0][0][SOIL_TOP] = 800.0;

        let connections = vec![Connection::new(
            Compartment::Storage(SOIL_TOP),
            Compartment::Storage(GROUNDWATER),
        )];
        // half of the 50 mm soil water moves; retardation 4 quarters the mass
        tm.advect(0, &hrus[0], &connections, &[25.0], &hrus[0].storages.clone());
        assert_relative_eq!(tm.mass[0][0][GROUNDWATER], 800.0 * 0.5 / 4.0);
    }

    #[test]
    fn infinite_retardation_blocks_transport() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = TransportModel::empty();
        tm.add_constituent(
            Constituent::new("stuck", false),
            TransportParams {
                retardation: vec![f64::INFINITY],
            },
        );
        tm.initialize(&hrus, &subbasins).unwrap();
        tm.mass[0][0][SOIL_TOP] = 800.0;
        let connections = vec![Connection::new(
            Compartment::Storage(SOIL_TOP),
            Compartment::SurfaceWater,
        )];
        let lateral =
            tm.advect(0, &hrus[0], &connections, &[25.0], &hrus[0].storages.clone());
        assert_relative_eq!(tm.mass[0][0][SOIL_TOP], 800.0);
        assert_relative_eq!(lateral[0], 0.0);
    }

    #[test]
    fn evaporative_connections_respect_can_evaporate() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = tracer_model(&hrus, &subbasins);
        tm.mass[0][0][PONDED] = 100.0;
        let connections = vec![Connection::evaporative(
            Compartment::Storage(PONDED),
            Compartment::Atmosphere,
        )];
        tm.advect(0, &hrus[0], &connections, &[10.0], &hrus[0].storages.clone());
        // tracer cannot evaporate: mass stays put
        assert_relative_eq!(tm.mass[0][0][PONDED], 100.0);

        tm.constituents[0].can_evaporate = true;
        tm.advect(0, &hrus[0], &connections, &[10.0], &hrus[0].storages.clone());
        assert_relative_eq!(tm.mass[0][0][PONDED], 90.0);
        assert_relative_eq!(tm.constituents[0].cumul_output, 10.0);
    }

    #[test]
    fn decay_is_exponential_and_booked() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = TransportModel::empty();
        let mut c = Constituent::new("decaying", false);
        c.decay_rate = 0.1;
        tm.add_constituent(
            c,
            TransportParams {
                retardation: vec![1.0],
            },
        );
        tm.initialize(&hrus, &subbasins).unwrap();
        tm.mass[0][0][PONDED] = 1000.0;
        tm.constituents[0].initial_mass = 1000.0;

        tm.decay(2.0);
        let expected = 1000.0 * (-0.2f64).exp();
        assert_relative_eq!(tm.mass[0][0][PONDED], expected, max_relative = 1e-12);
        assert_relative_eq!(tm.constituents[0].cumul_output, 1000.0 - expected);
        tm.check_mass_balance(0).unwrap();
    }

    #[test]
    fn channel_routing_conserves_tracer_mass() {
        let hrus = one_hru();
        let mut subbasins = no_route_subbasin();
        let mut tm = tracer_model(&hrus, &subbasins);
        let options = Options::default();
        let dt = options.timestep;

        // push a lateral mass pulse through the dump catchment hydrograph
        for step in 0..5 {
            let t = step as f64 * dt;
            let load = if step == 0 { 1000.0 } else { 0.0 };
            subbasins[0].set_lateral_inflow(0.0);
            subbasins[0].set_inflow(0.0, t);
            tm.set_lateral_influx(0, &[load]);
            tm.set_mass_inflow(0, &subbasins[0], vec![0.0], t, dt);
            let routed = subbasins[0].route_water(t, &options, 0.0);
            let m_out = tm.route_mass(0, &subbasins[0], &options);
            subbasins[0].update_outflows(&routed, &options, false);
            tm.update_mass_outflows(0, &subbasins[0], m_out, dt);
        }
        // everything that entered left through the terminal outlet and the
        // in-transit pools drained
        assert_relative_eq!(tm.constituents[0].cumul_output, 1000.0 * dt, epsilon = 1e-9);
        assert_relative_eq!(tm.total_mass(0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn outflow_concentration_safe_divides() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let tm = tracer_model(&hrus, &subbasins);
        assert_relative_eq!(tm.outflow_concentration(0, 0, 0.0), 0.0);
    }

    #[test]
    fn sub_unit_retardation_is_rejected() {
        let hrus = one_hru();
        let subbasins = no_route_subbasin();
        let mut tm = TransportModel::empty();
        tm.add_constituent(
            Constituent::new("bad", false),
            TransportParams {
                retardation: vec![0.5],
            },
        );
        assert!(tm.initialize(&hrus, &subbasins).is_err());
    }
}
