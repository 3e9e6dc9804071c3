//! Subbasins: contiguous watershed sections with a single primary reach.
//!
//! A subbasin convolves lateral HRU runoff through a catchment unit
//! hydrograph into its reach, then routes the reach inflow to its outlet by
//! the selected channel method. Histories are fixed-length ring buffers.

use crate::channel::{ChannelProfile, ChannelReference};
use crate::errors::{HydroError, HydroResult};
use crate::options::{CatchmentRoutingMethod, Options, RoutingMethod, Time};
use crate::reservoir::Reservoir;
use crate::timeseries::Timeseries;
use crate::utils::ring::RingBuffer;
use crate::utils::special::{erfc, gamma_cdf};
use serde::{Deserialize, Serialize};

const SEC_PER_DAY: f64 = 86400.0;
/// A unit hydrograph is long enough once its missing tail is below this.
const UH_TAIL_TOLERANCE: f64 = 1e-6;
/// Hard cap on hydrograph length, a guard against degenerate parameters.
const UH_MAX_LENGTH: usize = 2000;

/// Muskingum working coefficients for one segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MuskingumCoeffs {
    c0: f64,
    c1: f64,
    c2: f64,
}

/// Flows produced by [`SubBasin::route_water`]; committed separately by
/// [`SubBasin::update_outflows`].
#[derive(Debug, Clone)]
pub struct RoutedFlows {
    /// End-of-step outflow at each channel segment [m³/s].
    pub q_out: Vec<f64>,
    /// Convolved rivulet outflow entering the reach this step [m³/s].
    pub q_lat_conv: f64,
    /// End-of-step reservoir stage, if a reservoir exists [m].
    pub reservoir_stage: Option<f64>,
    /// Reservoir substeps that failed to converge.
    pub convergence_failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubBasin {
    pub id: i64,
    pub name: String,
    /// Downstream subbasin ID; negative means this outlet leaves the domain.
    pub downstream_id: i64,
    /// Contributing surface area [km²].
    pub basin_area: f64,
    /// Total upstream drainage area, this subbasin included [km²].
    pub drainage_area: f64,
    /// Reach length [m].
    pub reach_length: f64,
    /// Reference flow rate [m³/s].
    pub q_ref: f64,
    /// Hydrographs are emitted for gauged subbasins.
    pub gauged: bool,
    /// True when nothing drains into this subbasin and it has no specified
    /// inflow series.
    pub is_headwater: bool,

    pub channel: Option<ChannelProfile>,

    /// Catchment time of concentration [d].
    pub t_conc: f64,
    /// Catchment time to peak [d].
    pub t_peak: f64,
    /// Catchment lag [d].
    pub t_lag: f64,
    /// Linear catchment routing constant [1/d].
    pub reservoir_constant: f64,
    /// Reservoirs in the in-catchment cascade.
    pub num_reservoirs: usize,

    /// Indices of the member HRUs in the model's HRU list.
    pub hru_indices: Vec<usize>,
    pub inflow_series: Option<Timeseries>,
    pub reservoir: Option<Reservoir>,

    // routing state
    n_segments: usize,
    q_out: Vec<f64>,
    q_out_last: f64,
    q_lat_last: f64,
    q_in_hist: RingBuffer,
    q_lat_hist: RingBuffer,
    u_route: Vec<f64>,
    u_cat: Vec<f64>,
    muskingum: Option<MuskingumCoeffs>,
    reference: Option<ChannelReference>,
    channel_storage: f64,
    rivulet_storage: f64,
}

impl SubBasin {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        downstream_id: i64,
        channel: Option<ChannelProfile>,
        reach_length: f64,
        q_ref: f64,
        gauged: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            downstream_id,
            basin_area: 0.0,
            drainage_area: 0.0,
            reach_length,
            q_ref,
            gauged,
            is_headwater: true,
            channel,
            t_conc: 1.0,
            t_peak: 0.5,
            t_lag: 0.0,
            reservoir_constant: 1.0,
            num_reservoirs: 1,
            hru_indices: Vec::new(),
            inflow_series: None,
            reservoir: None,
            n_segments: 1,
            q_out: vec![0.0],
            q_out_last: 0.0,
            q_lat_last: 0.0,
            q_in_hist: RingBuffer::zeros(1),
            q_lat_hist: RingBuffer::zeros(1),
            u_route: vec![1.0],
            u_cat: vec![1.0],
            muskingum: None,
            reference: None,
            channel_storage: 0.0,
            rivulet_storage: 0.0,
        }
    }

    pub fn num_segments(&self) -> usize {
        self.n_segments
    }

    /// Outflow at the downstream end of the reach, point in time [m³/s].
    pub fn outflow_rate(&self) -> f64 {
        self.q_out[self.n_segments - 1]
    }

    /// Outflow volume over the last committed step [m³].
    pub fn integrated_outflow(&self, dt: f64) -> f64 {
        0.5 * (self.q_out_last + self.outflow_rate()) * dt * SEC_PER_DAY
    }

    /// End-of-step outflow at every channel segment [m³/s].
    pub fn segment_outflows(&self) -> &[f64] {
        &self.q_out
    }

    /// Outlet outflow at the start of the current step [m³/s].
    pub fn outflow_last(&self) -> f64 {
        self.q_out_last
    }

    /// Convolved lateral outflow at the start of the current step [m³/s].
    pub fn lateral_last(&self) -> f64 {
        self.q_lat_last
    }

    pub fn channel_storage(&self) -> f64 {
        self.channel_storage
    }

    pub fn rivulet_storage(&self) -> f64 {
        self.rivulet_storage
    }

    pub fn unit_hydrograph(&self) -> &[f64] {
        &self.u_cat
    }

    pub fn routing_hydrograph(&self) -> &[f64] {
        &self.u_route
    }

    pub fn lat_history_len(&self) -> usize {
        self.q_lat_hist.len()
    }

    pub fn inflow_history_len(&self) -> usize {
        self.q_in_hist.len()
    }

    pub fn inflow_history(&self) -> Vec<f64> {
        self.q_in_hist.to_vec()
    }

    pub fn lat_history(&self) -> Vec<f64> {
        self.q_lat_hist.to_vec()
    }

    /// Specified inflow at the upstream boundary [m³/s].
    pub fn specified_inflow(&self, t: Time) -> f64 {
        self.inflow_series.as_ref().map_or(0.0, |ts| ts.value_at(t))
    }

    /// Evaporative losses from the open channel surface [m³/s].
    pub fn channel_losses(&self, ow_pet_mm_d: f64) -> f64 {
        match &self.reference {
            Some(rf) => ow_pet_mm_d * 1e-3 * rf.top_width * self.reach_length / SEC_PER_DAY,
            None => 0.0,
        }
    }

    // -- initialization ----------------------------------------------------

    /// Build unit hydrographs and size the routing state.
    ///
    /// `q_in_avg` and `q_lat_avg` are representative average flows used to
    /// fix the reference hydraulics.
    pub fn initialize(
        &mut self,
        q_in_avg: f64,
        q_lat_avg: f64,
        total_drain_area: f64,
        options: &Options,
    ) -> HydroResult<()> {
        self.drainage_area = total_drain_area;
        if self.q_ref <= 0.0 {
            self.q_ref = (q_in_avg + q_lat_avg).max(1.0);
        }

        if options.routing != RoutingMethod::None {
            let channel = self.channel.as_ref().ok_or_else(|| {
                HydroError::Config(format!(
                    "subbasin {} routes with {:?} but has no channel profile",
                    self.id, options.routing
                ))
            })?;
            channel.validate()?;
            self.reference = Some(channel.reference(self.q_ref)?);
        }

        self.u_cat = self.generate_catchment_hydrograph(options)?;
        self.generate_routing_hydrograph(options)?;

        self.q_lat_hist = RingBuffer::zeros(self.u_cat.len());
        let n_qin = self.u_route.len().max(2);
        self.q_in_hist = RingBuffer::zeros(n_qin);
        self.q_out = vec![0.0; self.n_segments];
        self.q_out_last = 0.0;
        self.q_lat_last = 0.0;
        if let Some(res) = &self.reservoir {
            res.validate()?;
        }
        Ok(())
    }

    /// Unit hydrograph ordinates from a cumulative distribution, one per
    /// timestep, extended until the missing tail is negligible and
    /// renormalized to unit area.
    fn uh_from_cdf(cdf: impl Fn(f64) -> f64, dt: f64) -> HydroResult<Vec<f64>> {
        let mut u = Vec::new();
        for i in 0..UH_MAX_LENGTH {
            let f0 = cdf(i as f64 * dt);
            let f1 = cdf((i + 1) as f64 * dt);
            u.push((f1 - f0).max(0.0));
            if 1.0 - f1 < UH_TAIL_TOLERANCE {
                break;
            }
        }
        let sum: f64 = u.iter().sum();
        if sum <= 0.0 {
            return Err(HydroError::Numerical(
                "unit hydrograph has zero area".to_string(),
            ));
        }
        for v in &mut u {
            *v /= sum;
        }
        Ok(u)
    }

    fn generate_catchment_hydrograph(&self, options: &Options) -> HydroResult<Vec<f64>> {
        let dt = options.timestep;
        match options.catchment_routing {
            CatchmentRoutingMethod::Dump => Ok(vec![1.0]),
            CatchmentRoutingMethod::DelayedFirstOrder => {
                let k = self.reservoir_constant;
                let lag = self.t_lag;
                if k <= 0.0 {
                    return Err(HydroError::Config(format!(
                        "subbasin {}: delayed first-order routing needs a positive reservoir constant",
                        self.id
                    )));
                }
                Self::uh_from_cdf(|t| 1.0 - (-k * (t - lag).max(0.0)).exp(), dt)
            }
            CatchmentRoutingMethod::GammaConvolution => {
                let t_peak = self.t_peak;
                if t_peak <= 0.0 {
                    return Err(HydroError::Config(format!(
                        "subbasin {}: gamma routing needs a positive time to peak",
                        self.id
                    )));
                }
                Self::uh_from_cdf(|t| gamma_cdf(3.0, 3.0 * t / t_peak), dt)
            }
            CatchmentRoutingMethod::TriConvolution => {
                let tp = self.t_peak;
                let tc = self.t_conc;
                if !(tp > 0.0 && tc > tp) {
                    return Err(HydroError::Config(format!(
                        "subbasin {}: triangular routing needs 0 < t_peak < t_conc",
                        self.id
                    )));
                }
                Self::uh_from_cdf(
                    |t| {
                        if t <= 0.0 {
                            0.0
                        } else if t <= tp {
                            t * t / (tp * tc)
                        } else if t < tc {
                            1.0 - (tc - t) * (tc - t) / (tc * (tc - tp))
                        } else {
                            1.0
                        }
                    },
                    dt,
                )
            }
            CatchmentRoutingMethod::ReservoirSeries => {
                let k = self.reservoir_constant;
                let n = self.num_reservoirs.max(1) as f64;
                if k <= 0.0 {
                    return Err(HydroError::Config(format!(
                        "subbasin {}: reservoir-series routing needs a positive reservoir constant",
                        self.id
                    )));
                }
                Self::uh_from_cdf(|t| gamma_cdf(n, k * t), dt)
            }
        }
    }

    fn generate_routing_hydrograph(&mut self, options: &Options) -> HydroResult<()> {
        let dt = options.timestep;
        self.n_segments = 1;
        self.muskingum = None;

        match options.routing {
            RoutingMethod::None => {
                self.u_route = vec![1.0];
            }
            RoutingMethod::PlugFlow => {
                let rf = self.reference.expect("reference set for routed subbasin");
                let tau = self.reach_length / rf.celerity / SEC_PER_DAY; // [d]
                let pos = tau / dt;
                let i0 = pos.floor() as usize;
                let frac = pos - i0 as f64;
                let mut u = vec![0.0; i0 + 2];
                // mass-preserving linear split across the two bracketing bins
                u[i0] = 1.0 - frac;
                u[i0 + 1] = frac;
                self.u_route = u;
            }
            RoutingMethod::DiffusiveWave => {
                let rf = self.reference.expect("reference set for routed subbasin");
                let length = self.reach_length;
                let c = rf.celerity;
                let d = rf.diffusivity().max(1e-6);
                let peclet = c * length / d;
                self.u_route = Self::uh_from_cdf(
                    |t_days| {
                        let t = t_days * SEC_PER_DAY;
                        if t <= 0.0 {
                            return 0.0;
                        }
                        let denom = 2.0 * (d * t).sqrt();
                        let mut f = 0.5 * erfc((length - c * t) / denom);
                        // reflected term vanishes for advection-dominated reaches
                        if peclet < 25.0 {
                            f += 0.5 * peclet.exp() * erfc((length + c * t) / denom);
                        }
                        f.min(1.0)
                    },
                    dt,
                )?;
            }
            RoutingMethod::StorageCoeff => {
                let rf = self.reference.expect("reference set for routed subbasin");
                let k = rf.muskingum_k(self.reach_length).max(1e-6);
                let a = (-dt / k).exp();
                self.u_route = Self::uh_from_cdf(|t| 1.0 - (-t / k).exp(), dt)?;
                debug_assert!((self.u_route[0] - (1.0 - a)).abs() < 1e-6);
            }
            RoutingMethod::Muskingum | RoutingMethod::MuskingumCunge => {
                let rf = self.reference.expect("reference set for routed subbasin");
                let k_total = rf.muskingum_k(self.reach_length);

                // pick the segment count so 2KX <= dt <= 2K(1-X) holds
                let x_probe = match options.routing {
                    RoutingMethod::MuskingumCunge => rf.muskingum_x(self.reach_length),
                    _ => options.muskingum_x,
                };
                let n_lo = ((2.0 * k_total * x_probe / dt).ceil() as usize).max(1);
                let n_hi = ((2.0 * k_total * (1.0 - x_probe) / dt).floor() as usize).max(1);
                self.n_segments = n_lo.min(n_hi);

                let dx = self.reach_length / self.n_segments as f64;
                let k = k_total / self.n_segments as f64;
                let x = match options.routing {
                    RoutingMethod::MuskingumCunge => rf.muskingum_x(dx),
                    _ => options.muskingum_x.clamp(0.0, 0.5),
                };

                let denom = 2.0 * k * (1.0 - x) + dt;
                self.muskingum = Some(MuskingumCoeffs {
                    c0: (dt - 2.0 * k * x) / denom,
                    c1: (dt + 2.0 * k * x) / denom,
                    c2: (2.0 * k * (1.0 - x) - dt) / denom,
                });

                // the cascade's pulse response doubles as the reportable
                // routing hydrograph
                self.u_route = self.muskingum_pulse_response(dt);
            }
        }
        Ok(())
    }

    /// Response of the Muskingum cascade to a one-step unit-width pulse.
    fn muskingum_pulse_response(&self, dt: f64) -> Vec<f64> {
        let coeffs = self.muskingum.expect("muskingum coefficients set");
        let pulse = 1.0 / dt;
        let mut seg_out = vec![0.0; self.n_segments];
        let mut u = Vec::new();
        let mut cum = 0.0;
        for step in 0..UH_MAX_LENGTH {
            let mut i_new = if step == 0 { pulse } else { 0.0 };
            let mut i_old = if step == 1 { pulse } else { 0.0 };
            for seg in seg_out.iter_mut() {
                let o_new =
                    (coeffs.c0 * i_new + coeffs.c1 * i_old + coeffs.c2 * *seg).max(0.0);
                i_new = o_new;
                i_old = *seg;
                *seg = o_new;
            }
            let ordinate = seg_out[self.n_segments - 1] * dt;
            u.push(ordinate);
            cum += ordinate;
            if step > 0 && 1.0 - cum < UH_TAIL_TOLERANCE {
                break;
            }
        }
        let sum: f64 = u.iter().sum();
        if sum > 0.0 {
            for v in &mut u {
                *v /= sum;
            }
        }
        u
    }

    // -- per-step operations ----------------------------------------------

    /// Record upstream inflow for this step; specified inflows are added at
    /// the upstream boundary.
    pub fn set_inflow(&mut self, q_up: f64, t: Time) {
        self.q_in_hist.push_front(q_up + self.specified_inflow(t));
    }

    /// Record total lateral HRU runoff for this step [m³/s].
    pub fn set_lateral_inflow(&mut self, q_lat: f64) {
        self.q_lat_hist.push_front(q_lat.max(0.0));
    }

    /// Hook for time-varying flow rules. The built-in rating relations are
    /// fixed after initialization and extraction series are evaluated inside
    /// the reservoir solve, so there is nothing to refresh here yet.
    pub fn update_flow_rules(&mut self, _t: Time, _options: &Options) {}

    /// Route one step of an inflow history through the reach.
    ///
    /// Shared by water routing and constituent mass routing. `lat_conv` is
    /// the convolved lateral signal joining at the head; `seg_state` holds
    /// the previous end-of-step value at each segment.
    pub fn route_history(
        &self,
        hist: &RingBuffer,
        lat_conv: f64,
        seg_state: &[f64],
        options: &Options,
    ) -> Vec<f64> {
        let head = hist.get(0) + lat_conv;
        let mut out = seg_state.to_vec();
        match options.routing {
            RoutingMethod::Muskingum | RoutingMethod::MuskingumCunge => {
                let coeffs = self.muskingum.expect("muskingum coefficients set");
                let mut i_new = head;
                // the committed history already carries last step's lateral
                let mut i_old = hist.get(1);
                for seg in 0..self.n_segments {
                    let o_old = seg_state[seg];
                    let o_new =
                        (coeffs.c0 * i_new + coeffs.c1 * i_old + coeffs.c2 * o_old).max(0.0);
                    i_new = o_new;
                    i_old = o_old;
                    out[seg] = o_new;
                }
            }
            _ => {
                let mut q = self.u_route[0] * head;
                for (i, u) in self.u_route.iter().enumerate().skip(1) {
                    if i < hist.len() {
                        q += u * hist.get(i);
                    }
                }
                out[self.n_segments - 1] = q.max(0.0);
            }
        }
        out
    }

    /// Convolved lateral outflow for an arbitrary lateral history.
    pub fn convolve_lateral(&self, lat_hist: &RingBuffer) -> f64 {
        lat_hist.convolve(&self.u_cat)
    }

    /// Reach travel time at the reference flow [d]; zero without a channel.
    pub fn reach_travel_time(&self) -> f64 {
        self.reference
            .map(|rf| self.reach_length / rf.celerity / SEC_PER_DAY)
            .unwrap_or(0.0)
    }

    /// Route the current state to end-of-step outflows. Pure: commits
    /// nothing; pass the result to [`Self::update_outflows`].
    pub fn route_water(&self, t: Time, options: &Options, losses: f64) -> RoutedFlows {
        let q_lat_conv = self.q_lat_hist.convolve(&self.u_cat);
        let mut q_out = self.route_history(&self.q_in_hist, q_lat_conv, &self.q_out, options);

        // a reservoir swallows the reach outflow and releases by its rules
        let mut reservoir_stage = None;
        let mut convergence_failures = 0;
        if let Some(res) = &self.reservoir {
            let (h, q_avg, failures) =
                res.route(q_out[self.n_segments - 1], t, options.timestep, losses);
            q_out[self.n_segments - 1] = q_avg;
            reservoir_stage = Some(h);
            convergence_failures = failures;
        }

        RoutedFlows {
            q_out,
            q_lat_conv,
            reservoir_stage,
            convergence_failures,
        }
    }

    /// Commit routed flows: advance storages, fold the lateral contribution
    /// into the inflow history, and move the reservoir stage.
    pub fn update_outflows(&mut self, routed: &RoutedFlows, options: &Options, initialize: bool) {
        if !initialize {
            let dt_s = options.timestep * SEC_PER_DAY;
            let inflow_upstream = self.q_in_hist.get(0) + routed.q_lat_conv;
            self.channel_storage +=
                dt_s * (inflow_upstream - routed.q_out[self.n_segments - 1]);
            self.rivulet_storage += dt_s * (self.q_lat_hist.get(0) - routed.q_lat_conv);
            self.q_out_last = self.q_out[self.n_segments - 1];
            self.q_lat_last = routed.q_lat_conv;
            self.q_in_hist.add_to_head(routed.q_lat_conv);
        }
        self.q_out.copy_from_slice(&routed.q_out);
        if let (Some(res), Some(h)) = (self.reservoir.as_mut(), routed.reservoir_stage) {
            res.set_stage(h);
        }
    }

    // -- solution-dump support --------------------------------------------

    pub fn set_qout_array(&mut self, q_out: Vec<f64>, q_out_last: f64) {
        self.q_out = q_out;
        self.n_segments = self.q_out.len();
        self.q_out_last = q_out_last;
    }

    pub fn set_qin_history(&mut self, newest_first: &[f64]) {
        self.q_in_hist.fill_from(newest_first);
    }

    pub fn set_qlat_history(&mut self, newest_first: &[f64], q_lat_last: f64) {
        self.q_lat_hist.fill_from(newest_first);
        self.q_lat_last = q_lat_last;
    }

    pub fn set_channel_storage(&mut self, v: f64) {
        self.channel_storage = v;
    }

    pub fn set_rivulet_storage(&mut self, v: f64) {
        self.rivulet_storage = v;
    }
}
