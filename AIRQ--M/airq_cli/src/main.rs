use std::{path::PathBuf, sync::Arc};

use airq_forecasting::{ForecastConfig, ForecastPipeline, ForecastTelemetry, SiteId};
use airq_serving::{
    aqi_category, health_recommendation, ArtifactCatalog, UserProfile, DEFAULT_HORIZON,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use shared_event_bus::FileEventPublisher;

#[derive(Parser, Debug)]
#[command(name = "airq", version, about = "Per-site O3/NO2 forecasting")]
struct Cli {
    /// TOML configuration; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains and predicts every configured site, then prints the batch summary.
    Run {
        /// Comma-separated subset of the configured sites.
        #[arg(long, value_delimiter = ',')]
        sites: Option<Vec<SiteId>>,
    },
    /// Lists configured sites.
    Sites,
    /// Shows persisted predictions for a site.
    Forecast {
        #[arg(long)]
        site: SiteId,
        #[arg(long, default_value_t = DEFAULT_HORIZON)]
        horizon: usize,
        /// Emit CSV instead of JSON.
        #[arg(long)]
        csv: bool,
    },
    /// Shows persisted metrics with combined scores.
    Metrics(MetricsArgs),
    /// Prints the AQI category and health advice for a profile.
    Recommend {
        #[arg(long)]
        aqi: i32,
        #[arg(long, default_value = "adult")]
        age_group: String,
        /// Repeatable, e.g. `--condition asthma`.
        #[arg(long = "condition")]
        conditions: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct MetricsArgs {
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    site: Option<SiteId>,
    #[arg(long, default_value = "O3")]
    pollutant: String,
    /// Every site and pollutant with persisted metrics.
    #[arg(long)]
    all: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ForecastConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Commands::Run { sites } => handle_run(&config, sites),
        Commands::Sites => print_json(&json!({ "sites": config.sites })),
        Commands::Forecast { site, horizon, csv } => {
            let catalog = ArtifactCatalog::from_config(&config);
            if csv {
                print!("{}", catalog.forecast_csv(site, horizon)?);
                Ok(())
            } else {
                print_json(&catalog.site_forecast(site, horizon)?)
            }
        }
        Commands::Metrics(args) => {
            let catalog = ArtifactCatalog::from_config(&config);
            match args.site {
                Some(site) if !args.all => {
                    print_json(&catalog.site_metrics(site, &args.pollutant)?)
                }
                _ => print_json(&json!({ "metrics": catalog.all_metrics()? })),
            }
        }
        Commands::Recommend {
            aqi,
            age_group,
            conditions,
        } => {
            let profile = UserProfile {
                age_group,
                conditions,
            };
            print_json(&json!({
                "aqi": aqi,
                "category": aqi_category(aqi),
                "profile": profile,
                "recommendations": health_recommendation(aqi, &profile),
            }))
        }
    }
}

fn handle_run(config: &ForecastConfig, sites: Option<Vec<SiteId>>) -> Result<()> {
    let sites = match sites {
        Some(requested) => {
            if let Some(unknown) = requested.iter().find(|site| !config.sites.contains(site)) {
                bail!("site {unknown} is not configured (configured: {:?})", config.sites);
            }
            requested
        }
        None => config.sites.clone(),
    };
    let publisher = FileEventPublisher::new(&config.paths.event_log)
        .with_context(|| format!("opening event log {}", config.paths.event_log.display()))?;
    let telemetry = ForecastTelemetry::builder("airq")
        .log_path(&config.paths.log_path)
        .min_level(config.logging.level)
        .event_publisher(Arc::new(publisher))
        .build()
        .with_context(|| format!("opening log {}", config.paths.log_path.display()))?;
    let pipeline = ForecastPipeline::from_config(config, telemetry);
    let summary = pipeline.run_batch(&sites);
    print_json(&summary)?;
    if summary.failed > 0 {
        bail!("{} of {} sites failed", summary.failed, sites.len());
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_comma_separated_sites() {
        let cli = Cli::try_parse_from(["airq", "--config", "airq.toml", "run", "--sites", "1,3,5"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("airq.toml")));
        match cli.command {
            Commands::Run { sites } => assert_eq!(sites, Some(vec![1, 3, 5])),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn metrics_requires_a_site_or_all() {
        assert!(Cli::try_parse_from(["airq", "metrics"]).is_err());
        assert!(Cli::try_parse_from(["airq", "metrics", "--all", "--site", "2"]).is_err());
        let cli = Cli::try_parse_from(["airq", "metrics", "--site", "2", "--pollutant", "NO2"])
            .unwrap();
        match cli.command {
            Commands::Metrics(args) => {
                assert_eq!(args.site, Some(2));
                assert_eq!(args.pollutant, "NO2");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn recommend_collects_repeated_conditions() {
        let cli = Cli::try_parse_from([
            "airq",
            "recommend",
            "--aqi",
            "120",
            "--condition",
            "asthma",
            "--condition",
            "respiratory",
        ])
        .unwrap();
        match cli.command {
            Commands::Recommend {
                aqi,
                age_group,
                conditions,
            } => {
                assert_eq!(aqi, 120);
                assert_eq!(age_group, "adult");
                assert_eq!(conditions, vec!["asthma", "respiratory"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
