use crate::client::{HttpPredictionClient, PredictionApi};
use crate::config::AppConfig;
use crate::dashboard::{Dashboard, DisplayState, Outcome};
use crate::layers::PanelId;
use crate::render::{encode_png, render_layer, RenderOptions};
use crate::status::{spawn_status_poller, ServiceStatus};
use crate::throttle::ViewState;
use crate::types::{HourOfDay, Month, Weekday};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub struct AppState {
    pub session: Mutex<Dashboard>,
    pub api: Arc<dyn PredictionApi>,
    pub status: watch::Receiver<ServiceStatus>,
    pub render: RenderOptions,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn outcome_status(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::Applied => StatusCode::OK,
        Outcome::Stale => StatusCode::CONFLICT,
        Outcome::Failed(_) => StatusCode::BAD_GATEWAY,
    }
}

fn outcome_json(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Applied => json!({ "outcome": "applied" }),
        Outcome::Stale => json!({ "outcome": "stale" }),
        Outcome::Failed(message) => json!({ "outcome": "failed", "error": message }),
    }
}

fn display_json(display: &DisplayState) -> Value {
    match display {
        DisplayState::Error(message) => json!({ "state": display.name(), "error": message }),
        _ => json!({ "state": display.name() }),
    }
}

/// Optional selection overrides, named as the upstream service names them.
#[derive(Debug, Deserialize, Default)]
pub struct SelectionParams {
    #[serde(rename = "dataType")]
    data_type: Option<String>,
    month: Option<String>,
    day: Option<String>,
    hour: Option<String>,
}

impl SelectionParams {
    /// Leaves the selection untouched unless every override parses.
    fn apply(&self, session: &mut Dashboard, panel: PanelId) -> Result<(), String> {
        let month = self.month.as_deref().map(str::parse::<Month>).transpose();
        let day = self.day.as_deref().map(str::parse::<Weekday>).transpose();
        let hour = self.hour.as_deref().map(str::parse::<HourOfDay>).transpose();
        let (month, day, hour) = (
            month.map_err(|e| e.to_string())?,
            day.map_err(|e| e.to_string())?,
            hour.map_err(|e| e.to_string())?,
        );

        if let Some(month) = month {
            session.selection.month = month;
        }
        if let Some(day) = day {
            session.selection.day = day;
        }
        if let Some(hour) = hour {
            session.selection.hour = hour;
        }
        if let Some(name) = &self.data_type {
            match panel {
                PanelId::FeatureVector => session.selection.feature = name.clone(),
                PanelId::AirPollution => session.selection.pollutant = name.clone(),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeBody {
    feature: Option<String>,
    percent: i32,
}

#[derive(Debug, Deserialize)]
pub struct ClickParams {
    panel: String,
    lat: f64,
    lon: f64,
}

pub fn router(state: Arc<AppState>, static_dir: &FsPath) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/feature-vector", get(feature_vector_handler))
        .route("/api/air-pollution", get(air_pollution_handler))
        .route("/api/changes", post(select_change_handler).delete(clear_changes_handler).get(changes_handler))
        .route("/api/predict", post(predict_handler))
        .route("/api/toggle", post(toggle_handler))
        .route("/api/chart", get(chart_handler))
        .route("/api/query", get(query_handler))
        .route("/api/view", get(view_handler).post(update_view_handler))
        .route("/api/report", post(report_handler))
        .route("/panels/:panel", get(panel_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let api: Arc<dyn PredictionApi> = Arc::new(
        HttpPredictionClient::new(&config.api, &config.properties)
            .context("Failed to build prediction client")?,
    );
    let (status, _poller) = spawn_status_poller(api.clone(), config.dashboard.status_poll_interval());

    let state = Arc::new(AppState {
        session: Mutex::new(Dashboard::new(&config)),
        api,
        status,
        render: RenderOptions::from_config(&config.render),
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = router(state, &config.server.static_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(state.status.borrow().clone())
}

async fn feature_vector_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectionParams>,
) -> ApiResult {
    let pending = {
        let mut session = state.session.lock().await;
        params
            .apply(&mut session, PanelId::FeatureVector)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
        session.begin_feature_vector()
    };
    // The session stays unlocked while the upstream call is in flight.
    let result = state.api.feature_vector(&pending.request).await;

    let mut session = state.session.lock().await;
    let outcome = session.finish_feature_vector(pending, result);
    let mut body = outcome_json(&outcome);
    body["summary"] = json!(session.summary(PanelId::FeatureVector));
    respond(outcome, body)
}

async fn air_pollution_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectionParams>,
) -> ApiResult {
    let pending = {
        let mut session = state.session.lock().await;
        params
            .apply(&mut session, PanelId::AirPollution)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
        session.begin_air_pollution()
    };
    let result = state.api.air_pollution(&pending.request).await;

    let mut session = state.session.lock().await;
    let outcome = session.finish_air_pollution(pending, result);
    let mut body = outcome_json(&outcome);
    body["summary"] = json!(session.summary(PanelId::AirPollution));
    body["chart"] = json!(session.chart());
    body["display"] = display_json(session.display());
    respond(outcome, body)
}

async fn predict_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let pending = state.session.lock().await.begin_prediction();
    let result = state.api.predict(&pending.request).await;

    let mut session = state.session.lock().await;
    let outcome = session.finish_prediction(pending, result);
    let mut body = outcome_json(&outcome);
    body["summary"] = json!(session.summary(PanelId::AirPollution));
    body["chart"] = json!(session.chart());
    body["display"] = display_json(session.display());
    respond(outcome, body)
}

fn respond(outcome: Outcome, body: Value) -> ApiResult {
    if outcome == Outcome::Applied {
        Ok(Json(body))
    } else {
        Err((outcome_status(&outcome), Json(body)))
    }
}

async fn select_change_handler(State(state): State<Arc<AppState>>, Json(change): Json<ChangeBody>) -> ApiResult {
    let mut session = state.session.lock().await;
    if let Some(feature) = change.feature {
        session.selection.feature = feature;
    }
    session.set_slider(change.percent);
    session
        .select_change()
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(Json(json!({
        "changes": session.changes(),
        "query": session.changes().to_query(),
        "slider": session.slider(),
    })))
}

async fn changes_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let session = state.session.lock().await;
    Json(json!({
        "changes": session.changes(),
        "query": session.changes().to_query(),
        "slider": session.slider(),
    }))
}

async fn clear_changes_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.lock().await.clear_changes();
    StatusCode::NO_CONTENT
}

async fn toggle_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let mut session = state.session.lock().await;
    let display = session
        .toggle_display()
        .map_err(|e| api_error(StatusCode::CONFLICT, e.to_string()))?;
    Ok(Json(display_json(display)))
}

async fn chart_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.session.lock().await.chart()))
}

async fn query_handler(State(state): State<Arc<AppState>>, Query(params): Query<ClickParams>) -> ApiResult {
    let panel: PanelId = params
        .panel
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
    let session = state.session.lock().await;
    let (Some(layer), Some(value)) = (session.layer(panel), session.click(panel, params.lon, params.lat)) else {
        return Ok(Json(Value::Null));
    };
    Ok(Json(json!({ "panel": panel, "property": layer.property(), "value": value })))
}

async fn view_handler(State(state): State<Arc<AppState>>) -> Json<ViewState> {
    let mut session = state.session.lock().await;
    session.flush_view(Instant::now());
    Json(session.view())
}

async fn update_view_handler(State(state): State<Arc<AppState>>, Json(view): Json<ViewState>) -> Json<Value> {
    let mut session = state.session.lock().await;
    let now = Instant::now();
    let applied = session.update_view(now, view).is_some() || session.flush_view(now).is_some();
    Json(json!({ "applied": applied, "view": session.view() }))
}

async fn report_handler(State(state): State<Arc<AppState>>) -> Response {
    let request = state.session.lock().await.report_request();
    match state.api.generate_report(&request).await {
        Ok(pdf) => (
            [
                (header::CONTENT_TYPE, "application/pdf"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"report.pdf\""),
            ],
            pdf,
        )
            .into_response(),
        Err(e) => {
            warn!("Error generating report: {}", e);
            api_error(StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

async fn panel_handler(State(state): State<Arc<AppState>>, Path(panel): Path<String>) -> Response {
    let panel: PanelId = match panel.trim_end_matches(".png").parse() {
        Ok(p) => p,
        Err(e) => return api_error(StatusCode::NOT_FOUND, e).into_response(),
    };
    let Some(layer) = state.session.lock().await.layer(panel).cloned() else {
        return api_error(StatusCode::NOT_FOUND, format!("panel {panel} has no layer")).into_response();
    };

    let opts = state.render.clone();
    let rendered = tokio::task::spawn_blocking(move || render_layer(&layer, &opts).and_then(|img| encode_png(&img))).await;
    match rendered {
        Ok(Ok(png)) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Err(e)) => api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockApi;
    use crate::data::fixtures::pollution_grid;
    use crate::types::Selection;
    use tempfile::tempdir;

    async fn spawn(api: Arc<MockApi>) -> (String, tempfile::TempDir) {
        let config = AppConfig::default();
        let (_tx, status) = watch::channel(ServiceStatus::Up);
        let state = Arc::new(AppState {
            session: Mutex::new(Dashboard::new(&config)),
            api,
            status,
            render: RenderOptions {
                width: 32,
                height: 32,
                ..RenderOptions::default()
            },
        });
        let dir = tempdir().unwrap();
        let app = router(state, dir.path());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), dir)
    }

    fn mock() -> Arc<MockApi> {
        let api = MockApi::default();
        *api.air_pollution.lock().unwrap() = Some(Ok(pollution_grid("o3", [1.0, 2.0, 3.0, 4.0], [1, 2, 2, 10])));
        *api.predict.lock().unwrap() = Some(Ok(json!({
            "updated_geojson": pollution_grid("o3", [2.0, 2.0, 2.0, 2.0], [3, 3, 3, 3])
        })
        .to_string()));
        Arc::new(api)
    }

    #[tokio::test]
    async fn test_dashboard_round_trip() {
        let (base, _dir) = spawn(mock()).await;
        let http = reqwest::Client::new();

        let resp = http
            .get(format!("{base}/api/air-pollution?dataType=o3&month=3&day=monday&hour=09:00"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["summary"]["property"], "o3 Prediction mean");
        assert_eq!(body["chart"]["datasets"][0]["data"][9], 1);
        assert_eq!(body["display"]["state"], "baseline");

        let clicked: Value = http
            .get(format!("{base}/api/query?panel=air-pollution&lat=51.5&lon=1.5"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(clicked["value"], 4.0);

        let changes: Value = http
            .post(format!("{base}/api/changes"))
            .json(&json!({ "feature": "Urban", "percent": -25 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(changes["query"], "Urban:-25");
        assert_eq!(changes["slider"], -25);

        let predicted: Value = http
            .post(format!("{base}/api/predict"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(predicted["display"]["state"], "scenario");
        assert_eq!(predicted["chart"]["datasets"][1]["label"], "Updated o3 AQI count");

        let toggled: Value = http
            .post(format!("{base}/api/toggle"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(toggled["state"], "baseline");

        let png = http
            .get(format!("{base}/panels/air-pollution.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(png.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(&png.bytes().await.unwrap()[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_bad_selection_rejected() {
        let (base, _dir) = spawn(mock()).await;
        let resp = reqwest::get(format!("{base}/api/air-pollution?month=13")).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[test]
    fn test_rejected_overrides_leave_selection_alone() {
        let mut session = Dashboard::new(&AppConfig::default());
        let params = SelectionParams {
            data_type: Some("o3".to_string()),
            month: Some("7".to_string()),
            day: Some("Funday".to_string()),
            hour: None,
        };
        let err = params.apply(&mut session, PanelId::AirPollution).unwrap_err();
        assert!(err.contains("Funday"));
        assert_eq!(session.selection, Selection::default());

        let params = SelectionParams {
            month: Some("7".to_string()),
            day: Some("sunday".to_string()),
            ..SelectionParams::default()
        };
        params.apply(&mut session, PanelId::AirPollution).unwrap();
        assert_eq!(session.selection.month.get(), 7);
        assert_eq!(session.selection.day, Weekday::Sunday);
    }

    #[tokio::test]
    async fn test_view_post_reports_latest_view() {
        let (base, _dir) = spawn(mock()).await;
        let http = reqwest::Client::new();
        let first = json!({ "center": [51.5, -0.1], "zoom": 9.0 });
        let resp: Value = http
            .post(format!("{base}/api/view"))
            .json(&first)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["applied"], true);
        assert_eq!(resp["view"], first);

        let second = json!({ "center": [52.0, -1.0], "zoom": 10.0 });
        let resp: Value = http
            .post(format!("{base}/api/view"))
            .json(&second)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        // Within the rate limit the update is held back, and the reply says so.
        if resp["applied"] == true {
            assert_eq!(resp["view"], second);
        } else {
            assert_eq!(resp["view"], first);
        }
    }

    #[tokio::test]
    async fn test_upstream_failure_reports_error_state() {
        let api = mock();
        *api.air_pollution.lock().unwrap() = Some(Err(500));
        let (base, _dir) = spawn(api).await;

        let resp = reqwest::get(format!("{base}/api/air-pollution")).await.unwrap();
        assert_eq!(resp.status(), 502);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["outcome"], "failed");
        assert_eq!(body["display"]["state"], "error");

        let missing = reqwest::get(format!("{base}/panels/air-pollution")).await.unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_status_and_report() {
        let (base, _dir) = spawn(mock()).await;
        let status: Value = reqwest::get(format!("{base}/api/status")).await.unwrap().json().await.unwrap();
        assert_eq!(status["state"], "up");

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/report"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"%PDF no2");
    }

    #[tokio::test]
    async fn test_toggle_without_prediction_conflicts() {
        let (base, _dir) = spawn(mock()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/toggle"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
    }
}
