//! Input files: model definition, classes, topology and time series.
//!
//! Four TOML files describe a simulation. The model definition names the
//! other three by path (relative paths resolve against its directory) and
//! carries the method selectors; unknown keywords fail at parse time.

use crate::channel::ChannelProfile;
use crate::errors::{HydroError, HydroResult};
use crate::gauge::{Gauge, GaugeSeries};
use crate::hru::{self, Hru};
use crate::model::{Model, ModelBuilder};
use crate::options::{Clock, Options};
use crate::params::{Environment, GlobalParams};
use crate::reservoir::{Reservoir, StageRelation};
use crate::subbasin::SubBasin;
use crate::timeseries::{MonthlyValues, Timeseries};
use crate::transport::{
    Constituent, ConstituentSource, InflowConcentration, SourceKind, TransportModel,
    TransportParams,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Model definition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    #[serde(default)]
    pub start_julian: f64,
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    pub duration: f64,
    pub timestep: f64,
}

fn default_start_year() -> i32 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesConfig {
    pub classes: Option<PathBuf>,
    pub topology: PathBuf,
    pub timeseries: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstituentConfig {
    pub name: String,
    #[serde(default)]
    pub is_tracer: bool,
    #[serde(default)]
    pub can_evaporate: bool,
    #[serde(default)]
    pub decay_rate: f64,
    /// Retardation factor per soil class; defaults to 1 everywhere.
    #[serde(default)]
    pub retardation: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub constituent: String,
    /// Storage compartment name, e.g. "PONDED" or "SOIL[0]".
    pub storage: String,
    /// HRU IDs the source applies to; absent means all.
    #[serde(default)]
    pub hrus: Option<Vec<i64>>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InflowConcentrationConfig {
    pub constituent: String,
    pub subbasin: i64,
    pub concentration: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDefinition {
    pub time: TimeConfig,
    #[serde(default)]
    pub methods: Options,
    pub files: FilesConfig,
    #[serde(default)]
    pub globals: GlobalParams,
    #[serde(default)]
    pub constituents: Vec<ConstituentConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub inflow_concentrations: Vec<InflowConcentrationConfig>,
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassesFile {
    #[serde(default)]
    pub globals: Option<GlobalParams>,
    pub soils: Vec<crate::params::SoilClass>,
    pub vegetation: Vec<crate::params::VegetationClass>,
    pub landuse: Vec<crate::params::LandUseClass>,
    pub terrain: Vec<crate::params::TerrainClass>,
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservoirConfig {
    pub volume: StageRelation,
    pub discharge: StageRelation,
    #[serde(default)]
    pub initial_stage: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubbasinConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub downstream_id: i64,
    /// Channel profile name; required for channel routing methods.
    #[serde(default)]
    pub channel: Option<String>,
    pub reach_length: f64,
    #[serde(default)]
    pub q_ref: f64,
    #[serde(default)]
    pub gauged: bool,
    #[serde(default = "default_t_conc")]
    pub t_conc: f64,
    #[serde(default = "default_t_peak")]
    pub t_peak: f64,
    #[serde(default)]
    pub t_lag: f64,
    #[serde(default = "default_reservoir_constant")]
    pub reservoir_constant: f64,
    #[serde(default = "default_num_reservoirs")]
    pub num_reservoirs: usize,
    #[serde(default)]
    pub reservoir: Option<ReservoirConfig>,
}

fn default_t_conc() -> f64 {
    1.0
}
fn default_t_peak() -> f64 {
    0.5
}
fn default_reservoir_constant() -> f64 {
    1.0
}
fn default_num_reservoirs() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HruConfig {
    pub id: i64,
    pub area: f64,
    pub elevation: f64,
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub slope: f64,
    #[serde(default)]
    pub aspect: f64,
    pub subbasin: i64,
    #[serde(default)]
    pub soil: Option<String>,
    #[serde(default)]
    pub vegetation: Option<String>,
    #[serde(default)]
    pub landuse: Option<String>,
    #[serde(default)]
    pub terrain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    #[serde(default)]
    pub channels: Vec<ChannelProfile>,
    pub subbasins: Vec<SubbasinConfig>,
    pub hrus: Vec<HruConfig>,
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesConfig {
    #[serde(default)]
    pub start: f64,
    pub interval: f64,
    pub values: Vec<f64>,
}

impl SeriesConfig {
    pub fn build(&self) -> HydroResult<Timeseries> {
        Timeseries::new(self.start, self.interval, self.values.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GaugeSeriesConfig {
    pub precip: Option<SeriesConfig>,
    pub temp_ave: Option<SeriesConfig>,
    pub temp_daily_ave: Option<SeriesConfig>,
    pub temp_daily_min: Option<SeriesConfig>,
    pub temp_daily_max: Option<SeriesConfig>,
    pub snow_frac: Option<SeriesConfig>,
    pub pet: Option<SeriesConfig>,
    pub ow_pet: Option<SeriesConfig>,
    pub potential_melt: Option<SeriesConfig>,
    pub sw_radia: Option<SeriesConfig>,
    pub sw_radia_net: Option<SeriesConfig>,
    pub lw_radia: Option<SeriesConfig>,
    pub et_radia: Option<SeriesConfig>,
    pub air_pres: Option<SeriesConfig>,
    pub rel_humidity: Option<SeriesConfig>,
    pub cloud_cover: Option<SeriesConfig>,
    pub wind_vel: Option<SeriesConfig>,
}

impl GaugeSeriesConfig {
    fn build(&self) -> HydroResult<GaugeSeries> {
        fn opt(s: &Option<SeriesConfig>) -> HydroResult<Option<Timeseries>> {
            s.as_ref().map(|c| c.build()).transpose()
        }
        Ok(GaugeSeries {
            precip: opt(&self.precip)?,
            temp_ave: opt(&self.temp_ave)?,
            temp_daily_ave: opt(&self.temp_daily_ave)?,
            temp_daily_min: opt(&self.temp_daily_min)?,
            temp_daily_max: opt(&self.temp_daily_max)?,
            snow_frac: opt(&self.snow_frac)?,
            pet: opt(&self.pet)?,
            ow_pet: opt(&self.ow_pet)?,
            potential_melt: opt(&self.potential_melt)?,
            sw_radia: opt(&self.sw_radia)?,
            sw_radia_net: opt(&self.sw_radia_net)?,
            lw_radia: opt(&self.lw_radia)?,
            et_radia: opt(&self.et_radia)?,
            air_pres: opt(&self.air_pres)?,
            rel_humidity: opt(&self.rel_humidity)?,
            cloud_cover: opt(&self.cloud_cover)?,
            wind_vel: opt(&self.wind_vel)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GaugeConfig {
    pub name: String,
    pub elevation: f64,
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub series: GaugeSeriesConfig,
    pub monthly_ave_temp: Option<[f64; 12]>,
    pub monthly_min_temp: Option<[f64; 12]>,
    pub monthly_max_temp: Option<[f64; 12]>,
    pub monthly_ave_pet: Option<[f64; 12]>,
    #[serde(default = "default_corr")]
    pub rainfall_corr: f64,
    #[serde(default = "default_corr")]
    pub snowfall_corr: f64,
    #[serde(default)]
    pub cloud_min_range: f64,
    #[serde(default)]
    pub cloud_max_range: f64,
}

fn default_corr() -> f64 {
    1.0
}

impl GaugeConfig {
    fn build(&self) -> HydroResult<Gauge> {
        let mut gauge = Gauge::new(
            self.name.clone(),
            self.elevation,
            self.latitude,
            self.longitude,
        );
        gauge.series = self.series.build()?;
        if let Some(v) = self.monthly_ave_temp {
            gauge.monthly_ave_temp = MonthlyValues(v);
        }
        if let Some(v) = self.monthly_min_temp {
            gauge.monthly_min_temp = MonthlyValues(v);
        }
        if let Some(v) = self.monthly_max_temp {
            gauge.monthly_max_temp = MonthlyValues(v);
        }
        if let Some(v) = self.monthly_ave_pet {
            gauge.monthly_ave_pet = MonthlyValues(v);
        }
        gauge.rainfall_corr = self.rainfall_corr;
        gauge.snowfall_corr = self.snowfall_corr;
        gauge.cloud_min_range = self.cloud_min_range;
        gauge.cloud_max_range = self.cloud_max_range;
        Ok(gauge)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InflowConfig {
    pub subbasin: i64,
    #[serde(flatten)]
    pub series: SeriesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub subbasin: i64,
    #[serde(flatten)]
    pub series: SeriesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeseriesFile {
    pub gauges: Vec<GaugeConfig>,
    #[serde(default)]
    pub inflows: Vec<InflowConfig>,
    #[serde(default)]
    pub extractions: Vec<ExtractionConfig>,
    /// Explicit HRU-to-gauge weights for `interpolation = from_file`.
    #[serde(default)]
    pub gauge_weights: Option<Vec<Vec<f64>>>,
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

fn parse_toml<T: serde::de::DeserializeOwned>(path: &Path) -> HydroResult<T> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| HydroError::Config(format!("{}: {e}", path.display())))
}

fn storage_index(name: &str) -> HydroResult<usize> {
    (0..hru::NUM_STORAGES)
        .find(|&i| hru::storage_name(i) == name)
        .ok_or_else(|| HydroError::Config(format!("unknown storage compartment '{name}'")))
}

fn class_index<T>(classes: &[T], name: &Option<String>, get: impl Fn(&T) -> &str, what: &str) -> HydroResult<usize> {
    match name {
        None => Ok(0),
        Some(n) => classes
            .iter()
            .position(|c| get(c) == n)
            .ok_or_else(|| HydroError::Config(format!("unknown {what} class '{n}'"))),
    }
}

/// Build a runnable model from a parsed definition and its companion files.
pub fn assemble_model(
    def: &ModelDefinition,
    classes: Option<&ClassesFile>,
    topology: &TopologyFile,
    series: &TimeseriesFile,
) -> HydroResult<Model> {
    let env = match classes {
        Some(c) => Environment {
            globals: c.globals.clone().unwrap_or_else(|| def.globals.clone()),
            soils: c.soils.clone(),
            vegetation: c.vegetation.clone(),
            landuse: c.landuse.clone(),
            terrain: c.terrain.clone(),
        },
        None => Environment {
            globals: def.globals.clone(),
            ..Environment::default()
        },
    };

    let clock = Clock::new(
        def.time.start_julian,
        def.time.start_year,
        def.time.duration,
        def.time.timestep,
    )?;
    let mut options = def.methods.clone();
    options.timestep = def.time.timestep;

    let channels: HashMap<&str, &ChannelProfile> = topology
        .channels
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();

    let inflow_by_subbasin: HashMap<i64, Timeseries> = series
        .inflows
        .iter()
        .map(|i| Ok((i.subbasin, i.series.build()?)))
        .collect::<HydroResult<_>>()?;
    let extraction_by_subbasin: HashMap<i64, Timeseries> = series
        .extractions
        .iter()
        .map(|e| Ok((e.subbasin, e.series.build()?)))
        .collect::<HydroResult<_>>()?;

    let mut builder = ModelBuilder::new()
        .with_clock(clock)
        .with_options(options)
        .with_environment(env.clone());

    for gc in &series.gauges {
        builder = builder.with_gauge(gc.build()?);
    }
    if let Some(weights) = &series.gauge_weights {
        builder = builder.with_gauge_weights(weights.clone());
    }

    for sc in &topology.subbasins {
        let channel = match &sc.channel {
            Some(name) => Some(
                channels
                    .get(name.as_str())
                    .copied()
                    .cloned()
                    .ok_or_else(|| {
                        HydroError::Config(format!(
                            "subbasin {} references unknown channel '{name}'",
                            sc.id
                        ))
                    })?,
            ),
            None => None,
        };
        let mut sb = SubBasin::new(
            sc.id,
            sc.name.clone().unwrap_or_else(|| format!("sub{}", sc.id)),
            sc.downstream_id,
            channel,
            sc.reach_length,
            sc.q_ref,
            sc.gauged,
        );
        sb.t_conc = sc.t_conc;
        sb.t_peak = sc.t_peak;
        sb.t_lag = sc.t_lag;
        sb.reservoir_constant = sc.reservoir_constant;
        sb.num_reservoirs = sc.num_reservoirs;
        sb.inflow_series = inflow_by_subbasin.get(&sc.id).cloned();
        if let Some(rc) = &sc.reservoir {
            sb.reservoir = Some(Reservoir {
                volume: rc.volume.clone(),
                discharge: rc.discharge.clone(),
                stage: rc.initial_stage,
                extraction: extraction_by_subbasin.get(&sc.id).cloned(),
            });
        }
        builder = builder.with_subbasin(sb);
    }

    let mut hru_index_by_id: HashMap<i64, usize> = HashMap::new();
    for (k, hc) in topology.hrus.iter().enumerate() {
        let mut hru = Hru::new(hc.id, hc.area, hc.elevation, hc.latitude, hc.subbasin);
        hru.longitude = hc.longitude;
        hru.slope = hc.slope;
        hru.aspect = hc.aspect;
        hru.soil_class = class_index(&env.soils, &hc.soil, |c| c.name.as_str(), "soil")?;
        hru.veg_class =
            class_index(&env.vegetation, &hc.vegetation, |c| c.name.as_str(), "vegetation")?;
        hru.landuse_class =
            class_index(&env.landuse, &hc.landuse, |c| c.name.as_str(), "land-use")?;
        hru.terrain_class =
            class_index(&env.terrain, &hc.terrain, |c| c.name.as_str(), "terrain")?;
        hru_index_by_id.insert(hc.id, k);
        builder = builder.with_hru(hru);
    }

    // transport
    let mut transport = TransportModel::empty();
    let mut constituent_index: HashMap<&str, usize> = HashMap::new();
    for (c, cc) in def.constituents.iter().enumerate() {
        let mut constituent = Constituent::new(cc.name.clone(), cc.is_tracer);
        constituent.can_evaporate = cc.can_evaporate;
        constituent.decay_rate = cc.decay_rate;
        let retardation = if cc.retardation.is_empty() {
            vec![1.0; env.soils.len()]
        } else {
            cc.retardation.clone()
        };
        transport.add_constituent(constituent, TransportParams { retardation });
        constituent_index.insert(cc.name.as_str(), c);
    }
    let lookup_constituent = |name: &str| -> HydroResult<usize> {
        constituent_index
            .get(name)
            .copied()
            .ok_or_else(|| HydroError::Config(format!("unknown constituent '{name}'")))
    };
    for sc in &def.sources {
        let hru_indices = match &sc.hrus {
            None => None,
            Some(ids) => Some(
                ids.iter()
                    .map(|id| {
                        hru_index_by_id.get(id).copied().ok_or_else(|| {
                            HydroError::Config(format!("source references unknown HRU {id}"))
                        })
                    })
                    .collect::<HydroResult<Vec<_>>>()?,
            ),
        };
        transport.sources.push(ConstituentSource {
            constituent: lookup_constituent(&sc.constituent)?,
            storage: storage_index(&sc.storage)?,
            hru_indices,
            kind: sc.kind.clone(),
        });
    }

    // inflow concentrations address subbasins by position after the ID sort
    let mut sorted_ids: Vec<i64> = topology.subbasins.iter().map(|s| s.id).collect();
    sorted_ids.sort_unstable();
    for ic in &def.inflow_concentrations {
        let p = sorted_ids
            .iter()
            .position(|&id| id == ic.subbasin)
            .ok_or_else(|| {
                HydroError::Config(format!(
                    "inflow concentration references unknown subbasin {}",
                    ic.subbasin
                ))
            })?;
        transport.inflow_concentrations.push(InflowConcentration {
            constituent: lookup_constituent(&ic.constituent)?,
            subbasin: p,
            series: Timeseries::constant(ic.concentration, def.time.duration),
        });
    }

    builder.with_transport(transport).build()
}

/// Load a model from a model-definition file on disk.
pub fn load_model(path: &Path) -> HydroResult<Model> {
    let def: ModelDefinition = parse_toml(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let resolve = |p: &Path| -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    };
    let classes: Option<ClassesFile> = def
        .files
        .classes
        .as_ref()
        .map(|p| parse_toml(&resolve(p)))
        .transpose()?;
    let topology: TopologyFile = parse_toml(&resolve(&def.files.topology))?;
    let series: TimeseriesFile = parse_toml(&resolve(&def.files.timeseries))?;
    assemble_model(&def, classes.as_ref(), &topology, &series)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL_DEF: &str = r#"
        [time]
        duration = 10.0
        timestep = 1.0

        [methods]
        routing = "none"
        catchment_routing = "dump"

        [files]
        topology = "topo.toml"
        timeseries = "series.toml"

        [[constituents]]
        name = "tracer"
        is_tracer = true
    "#;

    const TOPOLOGY: &str = r#"
        [[subbasins]]
        id = 1
        downstream_id = -1
        reach_length = 5000.0
        gauged = true

        [[hrus]]
        id = 1
        area = 12.0
        elevation = 600.0
        latitude = 47.0
        subbasin = 1
    "#;

    const SERIES: &str = r#"
        [[gauges]]
        name = "G1"
        elevation = 500.0
        latitude = 47.0

        [gauges.series.precip]
        interval = 1.0
        values = [4.0, 0.0, 2.0]

        [gauges.series.temp_daily_min]
        interval = 1.0
        values = [1.0, 1.0, 1.0]

        [gauges.series.temp_daily_max]
        interval = 1.0
        values = [9.0, 9.0, 9.0]
    "#;

    fn parse_all() -> (ModelDefinition, TopologyFile, TimeseriesFile) {
        (
            toml::from_str(MODEL_DEF).unwrap(),
            toml::from_str(TOPOLOGY).unwrap(),
            toml::from_str(SERIES).unwrap(),
        )
    }

    #[test]
    fn minimal_configuration_assembles() {
        let (def, topo, series) = parse_all();
        let model = assemble_model(&def, None, &topo, &series).unwrap();
        assert_eq!(model.hrus.len(), 1);
        assert_eq!(model.subbasins.len(), 1);
        assert_eq!(model.transport.num_constituents(), 1);
    }

    #[test]
    fn unknown_method_keyword_fails_at_parse() {
        let bad = MODEL_DEF.replace("\"none\"", "\"sorcery\"");
        assert!(toml::from_str::<ModelDefinition>(&bad).is_err());
    }

    #[test]
    fn unknown_field_fails_at_parse() {
        let bad = format!("{MODEL_DEF}\nfrobnication = 3\n");
        assert!(toml::from_str::<ModelDefinition>(&bad).is_err());
    }

    #[test]
    fn unknown_channel_reference_is_rejected() {
        let (def, mut topo, series) = parse_all();
        topo.subbasins[0].channel = Some("missing".to_string());
        let err = assemble_model(&def, None, &topo, &series).unwrap_err();
        assert!(err.to_string().contains("unknown channel"));
    }

    #[test]
    fn source_storage_names_resolve() {
        let (mut def, topo, series) = parse_all();
        let source: SourceConfig = toml::from_str(
            r#"
            constituent = "tracer"
            storage = "SOIL[0]"
            kind = "neumann_flux"
            value = 2.0
            "#,
        )
        .unwrap();
        def.sources.push(source);
        let model = assemble_model(&def, None, &topo, &series).unwrap();
        assert_eq!(model.transport.sources.len(), 1);
        assert_eq!(model.transport.sources[0].storage, crate::hru::SOIL_TOP);
    }

    #[test]
    fn unknown_constituent_in_source_is_rejected() {
        let (mut def, topo, series) = parse_all();
        def.sources.push(SourceConfig {
            constituent: "nope".to_string(),
            storage: "PONDED".to_string(),
            hrus: None,
            kind: SourceKind::NeumannFlux { value: 1.0 },
        });
        let err = assemble_model(&def, None, &topo, &series).unwrap_err();
        assert!(err.to_string().contains("unknown constituent"));
    }

    #[test]
    fn load_model_from_files() {
        let dir = std::env::temp_dir().join(format!("hydrosim-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.toml"), MODEL_DEF).unwrap();
        std::fs::write(dir.join("topo.toml"), TOPOLOGY).unwrap();
        std::fs::write(dir.join("series.toml"), SERIES).unwrap();
        let model = load_model(&dir.join("model.toml")).unwrap();
        assert_eq!(model.subbasins.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
