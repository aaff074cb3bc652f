use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use incident_timeline::config::AppConfig;
use incident_timeline::detect::filter::FilterValue;
use incident_timeline::detect::{FilterCriteria, Incident, IncidentState, Severity};
use incident_timeline::window::Lookback;

#[derive(Parser)]
#[command(
    name = "incident-timeline",
    about = "Cluster health incident timeline from Prometheus metrics",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address (defaults to server.listen_address)
        #[arg(long)]
        bind: Option<String>,

        /// Serve a fixture file instead of querying Prometheus
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Derive and list incidents once
    Incidents {
        /// Lookback window: "1 day", "3 days", "7 days" or "15 days"
        #[arg(long)]
        days: Option<String>,

        /// Keep only these severities (critical, warning, info)
        #[arg(long)]
        severity: Vec<String>,

        /// Keep only these states (firing, resolved)
        #[arg(long)]
        state: Vec<String>,

        /// Keep only these incident ids
        #[arg(long = "group-id")]
        group_id: Vec<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Read samples from a fixture file instead of Prometheus
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Correlate the alerts of one incident
    Alerts {
        /// Incident id
        #[arg(long = "group-id")]
        group_id: String,

        /// Lookback window
        #[arg(long)]
        days: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Read samples from a fixture file instead of Prometheus
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Show the query ranges a lookback is split into
    Chunks {
        /// Lookback window
        #[arg(long)]
        days: Option<String>,
    },
}

fn lookback(days: Option<&str>, config: &AppConfig) -> Option<Lookback> {
    match days {
        Some(label) => {
            let parsed = Lookback::parse(label);
            if parsed.is_none() {
                tracing::warn!(%label, "unknown lookback, nothing will be queried");
            }
            parsed
        }
        None => Some(config.filters.default_days),
    }
}

fn build_criteria(
    days: Option<Lookback>,
    severity: &[String],
    state: &[String],
    group_id: &[String],
) -> Result<FilterCriteria> {
    let mut criteria = FilterCriteria::default().with_days(days);
    for value in severity {
        match Severity::parse(value) {
            Some(s) => criteria.toggle(FilterValue::Severity(s)),
            None => bail!("unknown severity {:?} (expected critical, warning or info)", value),
        }
    }
    for value in state {
        match IncidentState::parse(value) {
            Some(s) => criteria.toggle(FilterValue::State(s)),
            None => bail!("unknown state {:?} (expected firing or resolved)", value),
        }
    }
    for id in group_id {
        if !criteria.group_id.contains(id) {
            criteria.toggle(FilterValue::GroupId(id.clone()));
        }
    }
    Ok(criteria)
}

fn fmt_time(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_incidents(incidents: &[&Incident]) {
    println!(
        "{:<38} | {:<8} | {:<8} | {:<16} | {:<16} | Component",
        "Incident", "Severity", "State", "Start", "End"
    );
    println!("{:-<38}-|-{:-<8}-|-{:-<8}-|-{:-<16}-|-{:-<16}-|-{:-<20}", "", "", "", "", "", "");
    for incident in incidents {
        println!(
            "{:<38} | {:<8} | {:<8} | {:<16} | {:<16} | {}",
            incident.id,
            incident.severity,
            incident.state(),
            fmt_time(Some(incident.firing_start)),
            fmt_time(incident.firing_end),
            incident.label("component").unwrap_or("-"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.config.as_deref())?;
    incident_timeline::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind, fixture } => {
            let bind = bind.unwrap_or_else(|| config.server.listen_address.clone());
            tracing::info!(%bind, "Starting incident-timeline server");
            let source = incident_timeline::build_source(&config, fixture.as_deref())?;
            incident_timeline::serve(&config, &bind, source).await?;
        }
        Commands::Incidents {
            days,
            severity,
            state,
            group_id,
            json,
            fixture,
        } => {
            let criteria = build_criteria(lookback(days.as_deref(), &config), &severity, &state, &group_id)?;
            let source = incident_timeline::build_source(&config, fixture.as_deref())?;
            let pipeline = incident_timeline::build_pipeline(&config, source, FilterCriteria::default());
            pipeline.apply_filters(criteria).await?;

            let snap = pipeline.snapshot().await;
            let incidents: Vec<&Incident> = snap.filtered.iter().map(|i| i.as_ref()).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&incidents)?);
            } else {
                print_incidents(&incidents);
                println!(
                    "\n{} of {} incidents shown ({} malformed samples skipped)",
                    incidents.len(),
                    snap.incidents.len(),
                    snap.warnings.skipped_samples
                );
            }
        }
        Commands::Alerts {
            group_id,
            days,
            json,
            fixture,
        } => {
            let criteria = build_criteria(lookback(days.as_deref(), &config), &[], &[], &[group_id.clone()])?;
            let source = incident_timeline::build_source(&config, fixture.as_deref())?;
            let pipeline = incident_timeline::build_pipeline(&config, source, FilterCriteria::default());
            pipeline.apply_filters(criteria).await?;

            let snap = pipeline.snapshot().await;
            if let Some(err) = &snap.last_error {
                bail!("alert correlation failed: {}", err);
            }
            if !snap.incidents.iter().any(|i| i.id == group_id) {
                bail!("no incident with id {:?} in the selected window", group_id);
            }
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "alerts": snap.alerts,
                        "table": snap.table,
                    }))?
                );
            } else {
                println!("\nAlerts for incident {}", group_id);
                println!(
                    "{:<32} | {:<28} | {:<8} | {:<8} | {:<16} | {:<16} | Count",
                    "Alert", "Namespace", "Severity", "State", "Start", "End"
                );
                println!(
                    "{:-<32}-|-{:-<28}-|-{:-<8}-|-{:-<8}-|-{:-<16}-|-{:-<16}-|-{:-<5}",
                    "", "", "", "", "", "", ""
                );
                for row in &snap.table {
                    println!(
                        "{:<32} | {:<28} | {:<8} | {:<8} | {:<16} | {:<16} | {}",
                        row.rule,
                        row.namespace.as_deref().unwrap_or("-"),
                        row.severity,
                        row.state,
                        fmt_time(Some(row.firing_start)),
                        fmt_time(row.firing_end),
                        row.alerts,
                    );
                }
                if snap.warnings.unmatched_alert_samples > 0 {
                    println!(
                        "\n{} alert samples did not match the incident",
                        snap.warnings.unmatched_alert_samples
                    );
                }
            }
        }
        Commands::Chunks { days } => {
            let chunker = config.query.chunker();
            let now = chrono::Utc::now();
            let ranges = chunker.chunk_lookback(lookback(days.as_deref(), &config), now);
            println!("{:<4} | {:<25} | {:<25} | Hours", "#", "Start", "End");
            println!("{:-<4}-|-{:-<25}-|-{:-<25}-|-{:-<6}", "", "", "", "");
            for (i, range) in ranges.iter().enumerate() {
                println!(
                    "{:<4} | {:<25} | {:<25} | {:.1}",
                    i + 1,
                    range.start().format("%Y-%m-%d %H:%M:%S"),
                    range.end().format("%Y-%m-%d %H:%M:%S"),
                    range.duration().num_seconds() as f64 / 3600.0
                );
            }
            println!(
                "\n{} queries at step {}s",
                ranges.len(),
                chunker.step().num_seconds()
            );
        }
    }

    Ok(())
}
