use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ifm_dashboard::catalog::CatalogKey;
use ifm_dashboard::config::AppConfig;
use ifm_dashboard::dashboard::Dashboard;
use ifm_dashboard::render::{self, ViewParams};
use ifm_dashboard::{check, server};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve layers, tables, charts and the artifact catalog as JSON
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load every configured artifact and report the ones that fail
    Check {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Rasterize a chart to PNG
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Chart name from the configuration
        #[arg(long)]
        chart: String,
        /// Year (2018) or period (2015-2018) for per-period tables
        #[arg(long)]
        period: Option<CatalogKey>,
        /// Keep only points at or below this value
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
}

fn open(config: &Path) -> anyhow::Result<Dashboard> {
    info!("Loading configuration from {:?}", config);
    let app_config = AppConfig::load_from_file(config)?;
    Dashboard::open(app_config).context("Failed to build the artifact catalog")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let dashboard = open(&config)?;
            server::start_server(dashboard).await?;
        }
        Commands::Check { config } => {
            let dashboard = open(&config)?;
            let report = tokio::task::spawn_blocking(move || check::check_all(&dashboard)).await?;
            if !report.is_ok() {
                bail!(
                    "{} of {} artifacts failed validation",
                    report.failures.len(),
                    report.checked
                );
            }
            info!("All {} artifacts are valid", report.checked);
        }
        Commands::Render {
            config,
            chart,
            period,
            threshold,
            out,
            width,
            height,
        } => {
            let dashboard = open(&config)?;
            let colors = render::palette(&dashboard.chart_config(&chart)?.colors)?;
            let model = dashboard.chart(&chart, &ViewParams { period, threshold })?;
            let img = render::rasterize(&model, width, height, &colors);
            img.save(&out)
                .with_context(|| format!("Failed to write chart image: {:?}", out))?;
            info!("Wrote {:?}", out);
        }
    }

    Ok(())
}
