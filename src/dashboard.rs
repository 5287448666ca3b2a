//! Dashboard session state.
//!
//! A [`Dashboard`] holds everything one user session has on screen: the
//! selection, the scenario adjustments, the layer on each map panel, the AQI
//! chart and the shared view. Fetches are split into `begin_*` (issue a
//! ticket and build the request) and `finish_*` (apply the response if the
//! ticket is still the newest for its panel), so callers can release any lock
//! around the dashboard while the request is in flight.

use crate::client::{ApiError, PredictionApi, RequestSequencer, Ticket};
use crate::color::{to_css, Palette};
use crate::config::{AppConfig, PropertyConfig};
use crate::data::Surface;
use crate::histogram::{AqiHistogram, ChartData};
use crate::layers::{ChoroplethLayer, LayerRegistry, PanelId};
use crate::report::ReportRequest;
use crate::scenario::{ScenarioAdjustments, ScenarioError};
use crate::throttle::{ViewState, ViewSync};
use crate::types::{PredictRequest, Selection, SurfaceQuery};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("no scenario prediction loaded yet")]
    NoScenario,
    #[error("no baseline prediction loaded yet")]
    NoBaseline,
}

/// Whether a panel has data, failed to get it, or has not asked yet.
#[derive(Debug, Clone, Default)]
pub enum LoadState<T> {
    #[default]
    Empty,
    Failed(String),
    Loaded(T),
}

impl<T> LoadState<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            LoadState::Loaded(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LoadState::Failed(_))
    }
}

/// What the air-pollution panel is showing.
#[derive(Debug, Clone, Default)]
pub enum DisplayState {
    #[default]
    Baseline,
    Scenario(Arc<ChoroplethLayer>),
    Error(String),
}

impl DisplayState {
    pub fn name(&self) -> &'static str {
        match self {
            DisplayState::Baseline => "baseline",
            DisplayState::Scenario(_) => "scenario",
            DisplayState::Error(_) => "error",
        }
    }
}

/// Result of handing a response to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Stale,
    Failed(String),
}

/// A request that has been ticketed but not yet sent.
#[derive(Debug, Clone)]
pub struct Pending<Q> {
    pub ticket: Ticket,
    pub request: Q,
}

/// Serializable overview of one panel, for logs and the HTTP front-end.
#[derive(Debug, Clone, Serialize)]
pub struct PanelSummary {
    pub panel: PanelId,
    pub property: String,
    pub features: usize,
    pub min: f64,
    pub max: f64,
    pub palette: Palette,
    /// CSS colors for `min` and `max`.
    pub legend: [String; 2],
}

impl PanelSummary {
    pub fn of(panel: PanelId, layer: &ChoroplethLayer) -> Self {
        PanelSummary {
            panel,
            property: layer.property().to_string(),
            features: layer.values().len(),
            min: layer.scale().min(),
            max: layer.scale().max(),
            palette: layer.scale().palette(),
            legend: [
                to_css(&layer.scale().color(layer.scale().min())),
                to_css(&layer.scale().color(layer.scale().max())),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Palettes {
    feature: Palette,
    baseline: Palette,
    scenario: Palette,
}

pub struct Dashboard {
    pub selection: Selection,
    properties: PropertyConfig,
    palettes: Palettes,
    changes: ScenarioAdjustments,
    slider: i32,
    registry: LayerRegistry,
    feature_vector: LoadState<Arc<ChoroplethLayer>>,
    baseline: LoadState<Arc<ChoroplethLayer>>,
    scenario: LoadState<Arc<ChoroplethLayer>>,
    display: DisplayState,
    chart: Option<ChartData>,
    sequencer: RequestSequencer,
    view: ViewSync,
}

impl Dashboard {
    pub fn new(config: &AppConfig) -> Self {
        Dashboard {
            selection: config.dashboard.selection.clone(),
            properties: config.properties.clone(),
            palettes: Palettes {
                feature: config.render.feature_palette,
                baseline: config.render.baseline_palette,
                scenario: config.render.scenario_palette,
            },
            changes: ScenarioAdjustments::new(),
            slider: 0,
            registry: LayerRegistry::new(),
            feature_vector: LoadState::Empty,
            baseline: LoadState::Empty,
            scenario: LoadState::Empty,
            display: DisplayState::Baseline,
            chart: None,
            sequencer: RequestSequencer::new(),
            view: ViewSync::new(config.dashboard.view_update_interval()),
        }
    }

    // Feature-vector panel

    pub fn begin_feature_vector(&mut self) -> Pending<SurfaceQuery> {
        Pending {
            ticket: self.sequencer.issue(PanelId::FeatureVector),
            request: self.selection.feature_vector_query(),
        }
    }

    pub fn finish_feature_vector(&mut self, pending: Pending<SurfaceQuery>, result: Result<Surface, ApiError>) -> Outcome {
        if !self.sequencer.is_current(&pending.ticket) {
            warn!("Discarding stale feature-vector response (ticket {})", pending.ticket.token());
            return Outcome::Stale;
        }
        let property = pending.request.data_type;
        let layer = result
            .map_err(|e| e.to_string())
            .and_then(|surface| {
                ChoroplethLayer::build(Arc::new(surface), &property, self.palettes.feature)
                    .map_err(|e| e.to_string())
            });

        match layer {
            Ok(layer) => {
                let layer = Arc::new(layer);
                info!("Loaded feature vector '{}' over {} cells", property, layer.values().len());
                self.registry.replace(PanelId::FeatureVector, layer.clone());
                self.feature_vector = LoadState::Loaded(layer);
                Outcome::Applied
            }
            Err(message) => {
                warn!("Error fetching feature vector '{}': {}", property, message);
                self.registry.dispose(PanelId::FeatureVector);
                self.feature_vector = LoadState::Failed(message.clone());
                Outcome::Failed(message)
            }
        }
    }

    pub async fn load_feature_vector<A: PredictionApi + ?Sized>(&mut self, api: &A) -> Outcome {
        let pending = self.begin_feature_vector();
        let result = api.feature_vector(&pending.request).await;
        self.finish_feature_vector(pending, result)
    }

    // Air-pollution panel: baseline

    pub fn begin_air_pollution(&mut self) -> Pending<SurfaceQuery> {
        Pending {
            ticket: self.sequencer.issue(PanelId::AirPollution),
            request: self.selection.air_pollution_query(),
        }
    }

    pub fn finish_air_pollution(&mut self, pending: Pending<SurfaceQuery>, result: Result<Surface, ApiError>) -> Outcome {
        if !self.sequencer.is_current(&pending.ticket) {
            warn!("Discarding stale air-pollution response (ticket {})", pending.ticket.token());
            return Outcome::Stale;
        }
        let pollutant = pending.request.data_type;
        let built = result
            .map_err(|e| e.to_string())
            .and_then(|surface| self.build_pollution_layer(surface, &pollutant, self.palettes.baseline));

        match built {
            Ok((layer, hist)) => {
                info!(
                    "Loaded {} over {} cells ({} binned)",
                    layer.property(),
                    layer.values().len(),
                    hist.total()
                );
                self.registry.replace(PanelId::AirPollution, layer.clone());
                self.baseline = LoadState::Loaded(layer);
                self.scenario = LoadState::Empty;
                self.chart = Some(ChartData::baseline(&self.properties.aqi_for(&pollutant), &hist));
                self.display = DisplayState::Baseline;
                Outcome::Applied
            }
            Err(message) => {
                warn!("Error fetching air pollution data: {}", message);
                self.fail_air_pollution(&message);
                self.baseline = LoadState::Failed(message.clone());
                self.scenario = LoadState::Empty;
                self.chart = None;
                Outcome::Failed(message)
            }
        }
    }

    pub async fn load_air_pollution<A: PredictionApi + ?Sized>(&mut self, api: &A) -> Outcome {
        let pending = self.begin_air_pollution();
        let result = api.air_pollution(&pending.request).await;
        self.finish_air_pollution(pending, result)
    }

    // Air-pollution panel: scenario

    pub fn begin_prediction(&mut self) -> Pending<PredictRequest> {
        Pending {
            ticket: self.sequencer.issue(PanelId::AirPollution),
            request: self.selection.predict_request(self.changes.to_query()),
        }
    }

    pub fn finish_prediction(&mut self, pending: Pending<PredictRequest>, result: Result<Surface, ApiError>) -> Outcome {
        if !self.sequencer.is_current(&pending.ticket) {
            warn!("Discarding stale prediction response (ticket {})", pending.ticket.token());
            return Outcome::Stale;
        }
        let PredictRequest {
            changes,
            air_pollutant,
            ..
        } = pending.request;
        let built = result
            .map_err(|e| e.to_string())
            .and_then(|surface| self.build_pollution_layer(surface, &air_pollutant, self.palettes.scenario));

        match built {
            Ok((layer, hist)) => {
                info!("Applied scenario '{}' to {}", changes, layer.property());
                let aqi_property = self.properties.aqi_for(&air_pollutant);
                self.registry.replace(PanelId::AirPollution, layer.clone());
                self.scenario = LoadState::Loaded(layer.clone());
                self.chart = Some(ChartData::with_scenario(self.chart.as_ref(), &aqi_property, &hist));
                self.display = DisplayState::Scenario(layer);
                Outcome::Applied
            }
            Err(message) => {
                warn!("Error making prediction: {}", message);
                self.fail_air_pollution(&message);
                self.scenario = LoadState::Failed(message.clone());
                self.chart = self.chart.as_ref().and_then(ChartData::without_scenario);
                Outcome::Failed(message)
            }
        }
    }

    pub async fn make_prediction<A: PredictionApi + ?Sized>(&mut self, api: &A) -> Outcome {
        let pending = self.begin_prediction();
        let result = api.predict(&pending.request).await;
        self.finish_prediction(pending, result)
    }

    fn build_pollution_layer(
        &self,
        surface: Surface,
        pollutant: &str,
        palette: Palette,
    ) -> Result<(Arc<ChoroplethLayer>, AqiHistogram), String> {
        let aqi = surface
            .numeric_property(&self.properties.aqi_for(pollutant))
            .map_err(|e| e.to_string())?;
        let concentration = self.properties.concentration_for(pollutant);
        let layer = ChoroplethLayer::build(Arc::new(surface), &concentration, palette)
            .map_err(|e| e.to_string())?;
        Ok((Arc::new(layer), AqiHistogram::from_values(aqi)))
    }

    // Stale visuals are taken down rather than left looking current.
    fn fail_air_pollution(&mut self, message: &str) {
        self.registry.dispose(PanelId::AirPollution);
        self.display = DisplayState::Error(message.to_string());
    }

    // Scenario editing

    pub fn set_slider(&mut self, percent: i32) {
        self.slider = percent;
    }

    pub fn slider(&self) -> i32 {
        self.slider
    }

    /// Records the slider value against the selected feature.
    pub fn select_change(&mut self) -> Result<(), DashboardError> {
        self.changes.select(&self.selection.feature, self.slider)?;
        Ok(())
    }

    pub fn changes(&self) -> &ScenarioAdjustments {
        &self.changes
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    // Presentation

    /// Flips the air-pollution panel between baseline and scenario. From the
    /// error state it falls back to the baseline when there is one.
    pub fn toggle_display(&mut self) -> Result<&DisplayState, DashboardError> {
        let next = match &self.display {
            DisplayState::Baseline => {
                let layer = self.scenario.loaded().ok_or(DashboardError::NoScenario)?.clone();
                self.registry.replace(PanelId::AirPollution, layer.clone());
                DisplayState::Scenario(layer)
            }
            DisplayState::Scenario(_) | DisplayState::Error(_) => {
                let layer = self.baseline.loaded().ok_or(DashboardError::NoBaseline)?.clone();
                self.registry.replace(PanelId::AirPollution, layer);
                DisplayState::Baseline
            }
        };
        self.display = next;
        Ok(&self.display)
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn chart(&self) -> Option<&ChartData> {
        self.chart.as_ref()
    }

    pub fn layer(&self, panel: PanelId) -> Option<&Arc<ChoroplethLayer>> {
        self.registry.get(panel)
    }

    pub fn baseline(&self) -> &LoadState<Arc<ChoroplethLayer>> {
        &self.baseline
    }

    pub fn scenario(&self) -> &LoadState<Arc<ChoroplethLayer>> {
        &self.scenario
    }

    pub fn feature_vector(&self) -> &LoadState<Arc<ChoroplethLayer>> {
        &self.feature_vector
    }

    pub fn summary(&self, panel: PanelId) -> Option<PanelSummary> {
        self.registry.get(panel).map(|layer| PanelSummary::of(panel, layer))
    }

    /// Value of the displayed property under a clicked point.
    pub fn click(&self, panel: PanelId, lon: f64, lat: f64) -> Option<f64> {
        self.registry.get(panel)?.value_at(lon, lat)
    }

    pub fn update_view(&mut self, now: Instant, view: ViewState) -> Option<ViewState> {
        self.view.update(now, view)
    }

    pub fn flush_view(&mut self, now: Instant) -> Option<ViewState> {
        self.view.flush(now)
    }

    pub fn view(&self) -> ViewState {
        self.view.current()
    }

    pub fn report_request(&self) -> ReportRequest {
        ReportRequest::from_parts(&self.selection, &self.changes, self.slider)
    }
}
