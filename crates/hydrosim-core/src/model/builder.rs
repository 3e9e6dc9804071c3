//! Model assembly: validation, topology ordering and state sizing.
//!
//! The builder wires gauges, HRUs, subbasins, kernels and transport into a
//! runnable [`Model`]. The subbasin network is checked for cycles and
//! dangling references with a directed graph; nodes are inserted in
//! ascending-ID order so the resulting evaluation order is invariant to the
//! order subbasins appear in the input.

use crate::assembler::ForcingAssembler;
use crate::errors::{HydroError, HydroResult};
use crate::gauge::Gauge;
use crate::hru::Hru;
use crate::options::{Clock, Options};
use crate::params::Environment;
use crate::process::{standard_kernels, Connection, ProcessKernel};
use crate::subbasin::SubBasin;
use crate::transport::TransportModel;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;

use super::runtime::Model;

/// Builds a [`Model`] from its parts.
pub struct ModelBuilder {
    options: Options,
    clock: Option<Clock>,
    env: Environment,
    gauges: Vec<Gauge>,
    hrus: Vec<Hru>,
    subbasins: Vec<SubBasin>,
    kernels: Option<Vec<Box<dyn ProcessKernel>>>,
    transport: TransportModel,
    gauge_weights: Option<Vec<Vec<f64>>>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            clock: None,
            env: Environment::default(),
            gauges: Vec::new(),
            hrus: Vec::new(),
            subbasins: Vec::new(),
            kernels: None,
            transport: TransportModel::empty(),
            gauge_weights: None,
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.options.timestep = clock.timestep;
        self.clock = Some(clock);
        self
    }

    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn with_gauge(mut self, gauge: Gauge) -> Self {
        self.gauges.push(gauge);
        self
    }

    pub fn with_hru(mut self, hru: Hru) -> Self {
        self.hrus.push(hru);
        self
    }

    pub fn with_subbasin(mut self, subbasin: SubBasin) -> Self {
        self.subbasins.push(subbasin);
        self
    }

    /// Replace the default kernel stack.
    pub fn with_kernels(mut self, kernels: Vec<Box<dyn ProcessKernel>>) -> Self {
        self.kernels = Some(kernels);
        self
    }

    pub fn with_transport(mut self, transport: TransportModel) -> Self {
        self.transport = transport;
        self
    }

    /// Explicit HRU-to-gauge weights, used with `interpolation = from_file`.
    pub fn with_gauge_weights(mut self, weights: Vec<Vec<f64>>) -> Self {
        self.gauge_weights = Some(weights);
        self
    }

    pub fn build(self) -> HydroResult<Model> {
        let ModelBuilder {
            options,
            clock,
            env,
            gauges,
            mut hrus,
            mut subbasins,
            kernels,
            mut transport,
            gauge_weights,
        } = self;

        let clock = clock
            .ok_or_else(|| HydroError::Config("no simulation clock configured".to_string()))?;
        // the clock owns the timestep, whatever order the parts arrived in
        let mut options = options;
        options.timestep = clock.timestep;
        if subbasins.is_empty() {
            return Err(HydroError::Config("no subbasins defined".to_string()));
        }
        if hrus.is_empty() {
            return Err(HydroError::Config("no HRUs defined".to_string()));
        }

        // evaluation order must not depend on input order
        subbasins.sort_by_key(|sb| sb.id);

        let mut index_by_id: HashMap<i64, usize> = HashMap::new();
        for (p, sb) in subbasins.iter().enumerate() {
            if sb.id < 0 {
                return Err(HydroError::Config(format!(
                    "subbasin ID {} must be positive",
                    sb.id
                )));
            }
            if index_by_id.insert(sb.id, p).is_some() {
                return Err(HydroError::Config(format!("duplicate subbasin ID {}", sb.id)));
            }
        }

        // attach HRUs and accumulate basin areas
        for sb in &mut subbasins {
            sb.hru_indices.clear();
            sb.basin_area = 0.0;
        }
        for (k, hru) in hrus.iter().enumerate() {
            if hru.area <= 0.0 {
                return Err(HydroError::Config(format!(
                    "HRU {} has non-positive area",
                    hru.id
                )));
            }
            env.check_class_indices(
                hru.soil_class,
                hru.veg_class,
                hru.landuse_class,
                hru.terrain_class,
            )?;
            let p = *index_by_id.get(&hru.subbasin_id).ok_or_else(|| {
                HydroError::Config(format!(
                    "HRU {} references unknown subbasin {}",
                    hru.id, hru.subbasin_id
                ))
            })?;
            subbasins[p].hru_indices.push(k);
            subbasins[p].basin_area += hru.area;
        }

        // network graph: edge from each subbasin to its downstream neighbor
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<_> = (0..subbasins.len()).map(|p| graph.add_node(p)).collect();
        for (p, sb) in subbasins.iter().enumerate() {
            if sb.downstream_id >= 0 {
                let q = *index_by_id.get(&sb.downstream_id).ok_or_else(|| {
                    HydroError::Config(format!(
                        "subbasin {} drains to unknown subbasin {}",
                        sb.id, sb.downstream_id
                    ))
                })?;
                if q == p {
                    return Err(HydroError::Config(format!(
                        "subbasin {} drains into itself",
                        sb.id
                    )));
                }
                graph.add_edge(nodes[p], nodes[q], ());
            }
        }
        let topo_order: Vec<usize> = toposort(&graph, None)
            .map_err(|cycle| {
                HydroError::Config(format!(
                    "subbasin network contains a cycle through subbasin {}",
                    subbasins[graph[cycle.node_id()]].id
                ))
            })?
            .into_iter()
            .map(|n| graph[n])
            .collect();

        // headwater flags and upstream drainage areas, in evaluation order
        let mut has_upstream = vec![false; subbasins.len()];
        for sb in &subbasins {
            if sb.downstream_id >= 0 {
                has_upstream[index_by_id[&sb.downstream_id]] = true;
            }
        }
        let mut drainage = vec![0.0; subbasins.len()];
        for &p in &topo_order {
            drainage[p] += subbasins[p].basin_area;
            let down = subbasins[p].downstream_id;
            if down >= 0 {
                let q = index_by_id[&down];
                drainage[q] += drainage[p];
            }
        }
        for (p, sb) in subbasins.iter_mut().enumerate() {
            sb.is_headwater = !has_upstream[p] && sb.inflow_series.is_none();
        }

        // reference flows default to 1 mm/d of runoff over the drained area
        for (p, sb) in subbasins.iter_mut().enumerate() {
            let q_lat_avg = sb.basin_area / 86.4;
            let q_in_avg = (drainage[p] - sb.basin_area) / 86.4;
            sb.initialize(q_in_avg, q_lat_avg, drainage[p], &options)?;
        }

        let assembler =
            ForcingAssembler::build(options.interpolation, &gauges, &hrus, gauge_weights)?;

        // flatten the kernel connection sets into the advection table
        let kernels = kernels.unwrap_or_else(standard_kernels);
        let mut connections: Vec<Connection> = Vec::new();
        let mut kernel_spans: Vec<(usize, usize)> = Vec::new();
        for kernel in &kernels {
            let conns = kernel.connections();
            kernel_spans.push((connections.len(), conns.len()));
            connections.extend(conns);
        }
        for hru in &mut hrus {
            hru.init_flux_ledger(connections.len());
        }

        transport.initialize(&hrus, &subbasins)?;

        Model::assemble(
            options,
            clock,
            env,
            gauges,
            hrus,
            subbasins,
            index_by_id,
            topo_order,
            assembler,
            kernels,
            connections,
            kernel_spans,
            transport,
        )
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
