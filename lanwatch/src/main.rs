use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use inventory_sqlite::{Db, HostField};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

mod config;
mod oui;
mod output;
mod run;

use config::{load_config, Overrides, Settings};
use output::OutputFormat;
use run::PortScanMode;

#[derive(Debug, Parser)]
#[command(name = "lanwatch", version, about = "LAN host inventory: ARP discovery, reconciliation and history")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./lanwatch.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Inventory database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Discover hosts, reconcile the inventory and purge old history
    Run {
        /// Network range to sweep, e.g. 192.168.1.0/24 (overrides config)
        #[arg(long)]
        network: Option<String>,
        /// Probe ports now, ignoring the scan interval
        #[arg(long, conflicts_with = "no_port_scan")]
        force_port_scan: bool,
        /// Skip the port sub-scan for this run
        #[arg(long)]
        no_port_scan: bool,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List the host inventory
    Hosts {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write CSV instead of text/json when --out is provided
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Show status history grouped by host
    History {
        address: Option<Ipv4Addr>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Edit operator-owned fields of a host
    Edit {
        address: Ipv4Addr,
        #[arg(long)]
        known: Option<bool>,
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Delete a host from the inventory
    Forget { address: Ipv4Addr },
    /// Delete history for one host, or all of it
    ClearHistory {
        #[arg(required_unless_present = "all")]
        address: Option<Ipv4Addr>,
        #[arg(long, conflicts_with = "address")]
        all: bool,
    },
    /// Delete history older than N days (default: history_retention_days)
    Purge {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Download the IEEE OUI table to the configured oui_file
    FetchOui,
    /// Resolve a hardware address to a vendor using the current tables
    Vendor { mac: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn open_db(settings: &Settings) -> Result<Db> {
    Db::open_or_create(&settings.database).with_context(|| format!("open inventory at {}", settings.database.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = load_config(cli.config.as_deref())?;
    let network = match &cli.command {
        Commands::Run { network, .. } => network.clone(),
        _ => None,
    };
    let settings = Settings::resolve(cfg, Overrides { network, database: cli.db.clone() });

    match cli.command {
        Commands::Version => {
            println!("lanwatch {} (core {})", env!("CARGO_PKG_VERSION"), lanwatch_core::version());
        }
        Commands::Run { force_port_scan, no_port_scan, format, .. } => {
            let mode = if no_port_scan {
                PortScanMode::Disabled
            } else if force_port_scan {
                PortScanMode::Forced
            } else {
                PortScanMode::Scheduled
            };
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(run::execute(&settings, mode))?;
            print!("{}", output::render_report(&report, format)?);
        }
        Commands::Hosts { format, out, csv } => {
            let hosts = open_db(&settings)?.hosts()?;
            match (csv, out) {
                (true, Some(path)) => output::write_hosts_csv(&hosts, &path)?,
                (true, None) => bail!("--csv requires --out <file>"),
                (false, out) => output::emit(&output::render_hosts(&hosts, format)?, out.as_deref())?,
            }
        }
        Commands::History { address, format } => {
            let db = open_db(&settings)?;
            let events = db.history(address)?;
            print!("{}", output::render_history(&events, &db.hosts()?, format)?);
        }
        Commands::Edit { address, known, hostname, note } => {
            if known.is_none() && hostname.is_none() && note.is_none() {
                bail!("nothing to edit: pass --known, --hostname or --note");
            }
            let db = open_db(&settings)?;
            if let Some(k) = known {
                db.set_known(address, k)?;
            }
            if let Some(h) = hostname {
                db.set_field(address, HostField::Hostname, &h)?;
            }
            if let Some(n) = note {
                db.set_field(address, HostField::Note, &n)?;
            }
            println!("updated {address}");
        }
        Commands::Forget { address } => {
            if !open_db(&settings)?.forget_host(address)? {
                bail!("no host with address {address}");
            }
            println!("removed {address}");
        }
        Commands::ClearHistory { address, all } => {
            let db = open_db(&settings)?;
            let n = match address {
                Some(a) if !all => db.delete_history_for(a)?,
                _ => db.delete_all_history()?,
            };
            println!("deleted {n} history events");
        }
        Commands::Purge { days } => {
            let mut db = open_db(&settings)?;
            let days = days.unwrap_or(settings.history_retention_days);
            let n = reconcile::purge_older_than(&mut db, reconcile::retention_days(days), OffsetDateTime::now_utc())?;
            println!("purged {n} history events");
        }
        Commands::FetchOui => {
            let rt = tokio::runtime::Runtime::new()?;
            let bytes = rt.block_on(oui::download(&settings.oui_url, &settings.oui_file))?;
            println!("saved {} bytes to {}", bytes, settings.oui_file.display());
        }
        Commands::Vendor { mac } => {
            let rt = tokio::runtime::Runtime::new()?;
            let resolver = rt.block_on(oui::load_resolver(&settings));
            println!("{}", resolver.resolve(&mac));
        }
    }
    Ok(())
}
