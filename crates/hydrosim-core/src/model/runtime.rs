//! The per-timestep schedule.

use crate::assembler::ForcingAssembler;
use crate::errors::{HydroError, HydroResult};
use crate::gauge::Gauge;
use crate::hru::{Compartment, Hru};
use crate::options::{Clock, Options, TimeStep};
use crate::params::Environment;
use crate::process::{clip_negative_storages, Connection, ProcessKernel};
use crate::subbasin::SubBasin;
use crate::transport::TransportModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Conversion from mm/d over km² to m³/s.
const MM_KM2_PER_CMS: f64 = 86.4;
/// Water-balance closure tolerance per HRU per step [mm] (1e-9 m).
const WATER_BALANCE_TOL_MM: f64 = 1e-6;

/// Counters surfaced at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub steps_completed: usize,
    /// Clipping and convergence events; never fatal.
    pub numerical_events: usize,
    /// Mass-balance checks that exceeded tolerance (fatal in strict mode).
    pub mass_balance_events: usize,
    /// End-of-run global balance residual per constituent [mg].
    pub constituent_residuals: Vec<f64>,
    pub aborted: bool,
}

/// End-of-run state snapshot, sufficient to resume a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionDump {
    pub time_index: usize,
    /// Storage arrays per HRU [mm].
    pub hru_storages: Vec<Vec<f64>>,
    /// Per subbasin: segment outflows, last outflow, inflow history
    /// (newest first), lateral history (newest first), channel and rivulet
    /// storage.
    pub subbasin_state: Vec<SubbasinDump>,
    /// Mass arrays per constituent per HRU [mg].
    pub constituent_mass: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubbasinDump {
    pub id: i64,
    pub q_out: Vec<f64>,
    pub q_out_last: f64,
    pub q_lat_last: f64,
    pub q_in_hist: Vec<f64>,
    pub q_lat_hist: Vec<f64>,
    pub channel_storage: f64,
    pub rivulet_storage: f64,
    pub reservoir_stage: Option<f64>,
}

/// The assembled watershed model.
///
/// Single-threaded and deterministic: each step is a sequential pipeline
/// over HRUs, then subbasins in topological order. The clock, gauges and
/// configuration are immutable after assembly.
#[derive(Debug)]
pub struct Model {
    pub options: Options,
    pub clock: Clock,
    pub env: Environment,
    pub gauges: Vec<Gauge>,
    pub hrus: Vec<Hru>,
    pub subbasins: Vec<SubBasin>,
    pub transport: TransportModel,

    index_by_id: HashMap<i64, usize>,
    topo_order: Vec<usize>,
    assembler: ForcingAssembler,
    kernels: Vec<Box<dyn ProcessKernel>>,
    connections: Vec<Connection>,
    kernel_spans: Vec<(usize, usize)>,

    time_index: usize,
    report: RunReport,
}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn assemble(
        options: Options,
        clock: Clock,
        env: Environment,
        gauges: Vec<Gauge>,
        hrus: Vec<Hru>,
        subbasins: Vec<SubBasin>,
        index_by_id: HashMap<i64, usize>,
        topo_order: Vec<usize>,
        assembler: ForcingAssembler,
        kernels: Vec<Box<dyn ProcessKernel>>,
        connections: Vec<Connection>,
        kernel_spans: Vec<(usize, usize)>,
        transport: TransportModel,
    ) -> HydroResult<Self> {
        Ok(Self {
            options,
            clock,
            env,
            gauges,
            hrus,
            subbasins,
            transport,
            index_by_id,
            topo_order,
            assembler,
            kernels,
            connections,
            kernel_spans,
            time_index: 0,
            report: RunReport::default(),
        })
    }

    pub fn current_step(&self) -> TimeStep {
        self.clock.at_step(self.time_index)
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    pub fn finished(&self) -> bool {
        self.time_index >= self.clock.num_steps()
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn subbasin_by_id(&self, id: i64) -> Option<&SubBasin> {
        self.index_by_id.get(&id).map(|&p| &self.subbasins[p])
    }

    pub fn subbasin_index(&self, id: i64) -> Option<usize> {
        self.index_by_id.get(&id).copied()
    }

    /// Evaluation order of the subbasins (upstream before downstream).
    pub fn topological_order(&self) -> &[usize] {
        &self.topo_order
    }

    pub fn gauge_weights(&self) -> &[Vec<f64>] {
        self.assembler.weights()
    }

    /// Advance one timestep.
    pub fn step(&mut self) -> HydroResult<()> {
        debug_assert!(!self.finished());
        let tt = self.clock.at_step(self.time_index);
        let dt = self.options.timestep;
        let n_c = self.transport.num_constituents();

        // phase 1: forcings
        self.assembler
            .update_forcings(&self.options, &self.env, &tt, &self.gauges, &mut self.hrus);

        // constituent sources enter before any water moves
        self.transport.apply_sources(&self.hrus, tt.model_time, dt);

        // phase 2+3: process kernels over every HRU, clipped jointly
        let mut lateral_mm = vec![0.0; self.hrus.len()];
        let mut lateral_mass = vec![vec![0.0; n_c]; self.hrus.len()];
        for k in 0..self.hrus.len() {
            let storages_before = self.hrus[k].storages.clone();

            let mut fluxes = vec![0.0; self.connections.len()];
            let mut rates_buf = Vec::new();
            for (j, kernel) in self.kernels.iter().enumerate() {
                let (start, len) = self.kernel_spans[j];
                rates_buf.clear();
                rates_buf.resize(len, 0.0);
                kernel.rates(&self.hrus[k].forcing, &self.env, &self.hrus[k], dt, &mut rates_buf);
                for (i, &rate) in rates_buf.iter().enumerate() {
                    fluxes[start + i] = rate.max(0.0) * dt;
                }
            }

            let events = clip_negative_storages(&storages_before, &self.connections, &mut fluxes);
            self.report.numerical_events += events;

            // commit fluxes and accumulate boundary exchange
            let mut precip_in = 0.0;
            let mut et_out = 0.0;
            for (q, conn) in self.connections.iter().enumerate() {
                let flux = fluxes[q];
                if flux == 0.0 {
                    continue;
                }
                match conn.from {
                    Compartment::Storage(i) => self.hrus[k].storages[i] -= flux,
                    Compartment::Atmosphere => precip_in += flux,
                    Compartment::SurfaceWater => {}
                }
                match conn.to {
                    Compartment::Storage(i) => self.hrus[k].storages[i] += flux,
                    Compartment::Atmosphere => et_out += flux,
                    Compartment::SurfaceWater => lateral_mm[k] += flux,
                }
                self.hrus[k].cumul_flux[q] += flux;
            }
            // round-off guard: keep storages non-negative after clipping
            for v in self.hrus[k].storages.iter_mut() {
                if *v < 0.0 {
                    debug_assert!(*v > -1e-9);
                    *v = 0.0;
                }
            }

            let balance = (self.hrus[k].total_storage()
                - storages_before.iter().sum::<f64>())
                - (precip_in - et_out - lateral_mm[k]);
            if balance.abs() > WATER_BALANCE_TOL_MM {
                self.report.mass_balance_events += 1;
                let err = HydroError::MassBalance {
                    context: format!("water balance of HRU {}", self.hrus[k].id),
                    residual: balance * 1e-3,
                    tolerance: WATER_BALANCE_TOL_MM * 1e-3,
                };
                if self.options.strict_mass_balance {
                    return Err(err);
                }
                warn!("{err}");
            }

            lateral_mass[k] = self.transport.advect(
                k,
                &self.hrus[k],
                &self.connections,
                &fluxes,
                &storages_before,
            );
        }

        // phase 4+5: subbasins in topological order, water and mass in
        // lockstep; upstream outflows were advanced earlier this step
        for p_pos in 0..self.topo_order.len() {
            let p = self.topo_order[p_pos];

            let mut q_lat = 0.0;
            let mut lat_loads = vec![0.0; n_c];
            let mut ow_pet_area = 0.0;
            for &k in &self.subbasins[p].hru_indices {
                q_lat += lateral_mm[k] * self.hrus[k].area / (MM_KM2_PER_CMS * dt);
                ow_pet_area += self.hrus[k].forcing.ow_pet * self.hrus[k].area;
                for c in 0..n_c {
                    lat_loads[c] += lateral_mass[k][c] / dt;
                }
            }
            let ow_pet = if self.subbasins[p].basin_area > 0.0 {
                ow_pet_area / self.subbasins[p].basin_area
            } else {
                0.0
            };

            let mut q_up = 0.0;
            let mut upstream_load = vec![0.0; n_c];
            for (up_pos, up) in self.subbasins.iter().enumerate() {
                if up_pos != p && up.downstream_id == self.subbasins[p].id {
                    q_up += up.outflow_rate();
                    for (c, load) in upstream_load.iter_mut().enumerate() {
                        *load += self.transport.outlet_load(up_pos, c);
                    }
                }
            }

            let sb = &mut self.subbasins[p];
            sb.set_lateral_inflow(q_lat);
            sb.set_inflow(q_up, tt.model_time);
            sb.update_flow_rules(tt.model_time, &self.options);

            let losses = if sb.reservoir.is_some() {
                sb.channel_losses(ow_pet)
            } else {
                0.0
            };
            let routed = sb.route_water(tt.model_time, &self.options, losses);
            self.report.numerical_events += routed.convergence_failures;

            self.transport.set_lateral_influx(p, &lat_loads);
            self.transport
                .set_mass_inflow(p, sb, upstream_load, tt.model_time, dt);
            let m_out = self.transport.route_mass(p, sb, &self.options);

            sb.update_outflows(&routed, &self.options, false);
            self.transport.update_mass_outflows(p, sb, m_out, dt);
        }

        // phase 6: commit and check the constituent ledgers
        for c in 0..n_c {
            if let Err(err) = self.transport.check_mass_balance(c) {
                self.report.mass_balance_events += 1;
                if self.options.strict_mass_balance {
                    return Err(err);
                }
                warn!("{err}");
            }
        }

        self.time_index += 1;
        self.report.steps_completed += 1;
        Ok(())
    }

    fn finalize_report(&mut self) {
        self.report.constituent_residuals = (0..self.transport.num_constituents())
            .map(|c| self.transport.mass_residual(c))
            .collect();
    }

    /// Final report for callers that drive the step loop themselves.
    pub fn final_report(&mut self) -> RunReport {
        self.finalize_report();
        self.report.clone()
    }

    /// Run to the end of the clock.
    pub fn run(&mut self) -> HydroResult<RunReport> {
        while !self.finished() {
            self.step()?;
        }
        self.finalize_report();
        Ok(self.report.clone())
    }

    /// Run until the clock ends or `cancel` is raised. Cancellation is
    /// step-granular: the current step always completes.
    pub fn run_with_cancel(&mut self, cancel: &AtomicBool) -> HydroResult<RunReport> {
        self.report.aborted = false;
        while !self.finished() {
            if cancel.load(Ordering::Relaxed) {
                self.report.aborted = true;
                break;
            }
            self.step()?;
        }
        self.finalize_report();
        Ok(self.report.clone())
    }

    // -- solution dump -----------------------------------------------------

    /// Snapshot all mutable state.
    pub fn solution_dump(&self) -> SolutionDump {
        SolutionDump {
            time_index: self.time_index,
            hru_storages: self.hrus.iter().map(|h| h.storages.clone()).collect(),
            subbasin_state: self
                .subbasins
                .iter()
                .map(|sb| SubbasinDump {
                    id: sb.id,
                    q_out: sb.segment_outflows().to_vec(),
                    q_out_last: sb.outflow_last(),
                    q_lat_last: sb.lateral_last(),
                    q_in_hist: sb.inflow_history(),
                    q_lat_hist: sb.lat_history(),
                    channel_storage: sb.channel_storage(),
                    rivulet_storage: sb.rivulet_storage(),
                    reservoir_stage: sb.reservoir.as_ref().map(|r| r.stage),
                })
                .collect(),
            constituent_mass: self.transport.mass.clone(),
        }
    }

    /// Restore state from a dump, continuing the clock where it left off.
    pub fn restore_solution(&mut self, dump: &SolutionDump) -> HydroResult<()> {
        if dump.hru_storages.len() != self.hrus.len()
            || dump.subbasin_state.len() != self.subbasins.len()
        {
            return Err(HydroError::Config(
                "solution dump does not match the assembled model".to_string(),
            ));
        }
        self.time_index = dump.time_index;
        for (hru, storages) in self.hrus.iter_mut().zip(&dump.hru_storages) {
            hru.storages = storages.clone();
        }
        for state in &dump.subbasin_state {
            let p = self.subbasin_index(state.id).ok_or_else(|| {
                HydroError::Config(format!("solution dump references unknown subbasin {}", state.id))
            })?;
            let sb = &mut self.subbasins[p];
            sb.set_qout_array(state.q_out.clone(), state.q_out_last);
            sb.set_qin_history(&state.q_in_hist);
            sb.set_qlat_history(&state.q_lat_hist, state.q_lat_last);
            sb.set_channel_storage(state.channel_storage);
            sb.set_rivulet_storage(state.rivulet_storage);
            if let (Some(res), Some(h)) = (sb.reservoir.as_mut(), state.reservoir_stage) {
                res.set_stage(h);
            }
        }
        if dump.constituent_mass.len() == self.transport.mass.len() {
            self.transport.mass = dump.constituent_mass.clone();
        }
        Ok(())
    }
}
