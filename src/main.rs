pub mod catalog;
pub mod client;
pub mod color;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod histogram;
pub mod layers;
pub mod render;
pub mod report;
pub mod scenario;
pub mod server;
pub mod status;
pub mod throttle;
pub mod types;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client::{HttpPredictionClient, PredictionApi};
use color::ColorScale;
use config::AppConfig;
use dashboard::{Dashboard, Outcome};
use layers::PanelId;
use render::RenderOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::{HourOfDay, Month, Weekday};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the configured default selection.
#[derive(Args, Debug, Default)]
struct SelectionArgs {
    /// Air pollutant, e.g. no2 or pm2.5
    #[arg(long)]
    pollutant: Option<String>,
    /// Feature vector name, e.g. "Bicycle Score"
    #[arg(long)]
    feature: Option<String>,
    /// Month, 1-12
    #[arg(long)]
    month: Option<Month>,
    /// Day of week, e.g. Friday
    #[arg(long)]
    day: Option<Weekday>,
    /// Hour of day, e.g. 08:00
    #[arg(long)]
    hour: Option<HourOfDay>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and render one feature vector
    FeatureVector {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Fetch and render the baseline air pollution prediction
    AirPollution {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Apply feature changes and render the scenario next to the baseline
    Predict {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Feature adjustment as "feature:percent"; repeatable
        #[arg(long = "change", value_name = "FEATURE:PCT")]
        changes: Vec<String>,
        /// Color both panels of the comparison on one value range
        #[arg(long)]
        shared_scale: bool,
    },
    /// Download a PDF report for the current selection
    Report {
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long = "change", value_name = "FEATURE:PCT")]
        changes: Vec<String>,
        /// Output file, defaults to report.pdf in the output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check whether the prediction service is up
    Status,
    /// List the known pollutants and feature vectors
    Catalog,
    /// Serve the dashboard session over HTTP
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Catalog => {
            println!("Air pollutants:");
            for name in catalog::AIR_POLLUTANTS {
                println!("  {}", name);
            }
            println!("Feature vectors:");
            for name in catalog::feature_vector_names() {
                println!("  {}", name);
            }
        }
        Commands::Serve => {
            let app_config = load_config(&cli.config)?;
            server::start_server(app_config).await?;
        }
        Commands::Status => {
            let app_config = load_config(&cli.config)?;
            let api = HttpPredictionClient::new(&app_config.api, &app_config.properties)?;
            let status = status::probe(&api).await;
            println!("{}: {:?}", app_config.api.base_url, status);
            if !status.is_up() {
                bail!("Prediction service is not available");
            }
        }
        Commands::FeatureVector { selection } => {
            let (app_config, api, mut session) = open_session(&cli.config, &selection)?;
            check_outcome(session.load_feature_vector(&api).await)?;
            write_panel(&session, PanelId::FeatureVector, &app_config, "feature-vector.png")?;
        }
        Commands::AirPollution { selection } => {
            let (app_config, api, mut session) = open_session(&cli.config, &selection)?;
            check_outcome(session.load_air_pollution(&api).await)?;
            write_panel(&session, PanelId::AirPollution, &app_config, "air-pollution.png")?;
            write_chart(&session, &app_config)?;
        }
        Commands::Predict {
            selection,
            changes,
            shared_scale,
        } => {
            let (app_config, api, mut session) = open_session(&cli.config, &selection)?;
            apply_changes(&mut session, &changes)?;
            check_outcome(session.load_air_pollution(&api).await)?;
            check_outcome(session.make_prediction(&api).await)?;

            write_panel(&session, PanelId::AirPollution, &app_config, "scenario.png")?;
            write_chart(&session, &app_config)?;
            write_comparison(&session, &app_config, shared_scale)?;
        }
        Commands::Report {
            selection,
            changes,
            out,
        } => {
            let (app_config, api, mut session) = open_session(&cli.config, &selection)?;
            apply_changes(&mut session, &changes)?;
            let pdf = api
                .generate_report(&session.report_request())
                .await
                .context("Error generating report")?;
            let path = out.unwrap_or_else(|| app_config.output.dir.join("report.pdf"));
            report::save_report(&path, &pdf)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    info!("Using config: {:?}", path);
    AppConfig::load_from_file(path)
}

fn open_session(path: &Path, args: &SelectionArgs) -> Result<(AppConfig, HttpPredictionClient, Dashboard)> {
    let app_config = load_config(path)?;
    let api = HttpPredictionClient::new(&app_config.api, &app_config.properties)
        .context("Failed to build prediction client")?;
    let mut session = Dashboard::new(&app_config);

    if let Some(pollutant) = &args.pollutant {
        if !catalog::is_known_pollutant(pollutant) {
            warn!("'{}' is not a known air pollutant", pollutant);
        }
        session.selection.pollutant = pollutant.clone();
    }
    if let Some(feature) = &args.feature {
        if !catalog::is_known_feature(feature) {
            warn!("'{}' is not a known feature vector", feature);
        }
        session.selection.feature = feature.clone();
    }
    if let Some(month) = args.month {
        session.selection.month = month;
    }
    if let Some(day) = args.day {
        session.selection.day = day;
    }
    if let Some(hour) = args.hour {
        session.selection.hour = hour;
    }
    Ok((app_config, api, session))
}

fn apply_changes(session: &mut Dashboard, changes: &[String]) -> Result<()> {
    for entry in changes {
        let (feature, percent) = scenario::parse_change(entry)?;
        if !catalog::is_known_feature(&feature) {
            warn!("'{}' is not a known feature vector", feature);
        }
        session.selection.feature = feature;
        session.set_slider(percent);
        session.select_change()?;
    }
    if !changes.is_empty() {
        info!("Changes: {}", session.changes());
    }
    Ok(())
}

fn check_outcome(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Applied => Ok(()),
        Outcome::Stale => bail!("Response was superseded by a newer request"),
        Outcome::Failed(message) => bail!(message),
    }
}

fn write_panel(session: &Dashboard, panel: PanelId, config: &AppConfig, file: &str) -> Result<()> {
    let layer = session
        .layer(panel)
        .with_context(|| format!("No {} layer to render", panel))?;
    if let Some(summary) = session.summary(panel) {
        println!(
            "{}: {} over {} cells, range {:.3} to {:.3}",
            summary.panel, summary.property, summary.features, summary.min, summary.max
        );
    }
    let img = render::render_layer(layer, &RenderOptions::from_config(&config.render))?;
    render::save_png(&img, &config.output.dir.join(file))
}

fn write_chart(session: &Dashboard, config: &AppConfig) -> Result<()> {
    match session.chart() {
        Some(chart) => render::write_chart_json(chart, &config.output.dir.join("chart.json")),
        None => Ok(()),
    }
}

fn write_comparison(session: &Dashboard, config: &AppConfig, shared_scale: bool) -> Result<()> {
    let (Some(baseline), Some(scenario)) = (session.baseline().loaded(), session.scenario().loaded()) else {
        bail!("Comparison needs both a baseline and a scenario");
    };
    let opts = RenderOptions::from_config(&config.render);
    let path = config.output.dir.join("comparison.png");

    if shared_scale {
        let scale = ColorScale::spanning(&[baseline.values(), scenario.values()], baseline.scale().palette())
            .context("Nothing to scale")?;
        let left = baseline.rescaled(scale);
        let right = scenario.rescaled(scale.with_palette(scenario.scale().palette()));
        info!("Shared scale {:.3} to {:.3}", scale.min(), scale.max());
        render::save_png(&render::render_comparison(&left, &right, &opts)?, &path)
    } else {
        render::save_png(&render::render_comparison(baseline, scenario, &opts)?, &path)
    }
}
