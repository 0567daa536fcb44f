use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gridscan::config::{GridMode, ScanOptions};
use gridscan::grid::api;
use gridscan::grid::client::GridClient;
use gridscan::grid::instance::Instance;
use gridscan::scan::audit::NullAuditor;
use gridscan::scan::progress::ProgressOptions;
use gridscan::scan::spider::{spawn_null_spider, spider_channel};
use gridscan::scan::ScanCoordinator;

#[derive(Parser)]
#[command(
    name = "gridscan",
    version,
    about = "Distributed web-application scanner grid",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scanner instance and expose its RPC surface
    Serve {
        /// Bind address
        #[arg(long)]
        address: Option<String>,

        /// Bind port
        #[arg(long)]
        port: Option<u16>,

        /// Scan target URL
        #[arg(long)]
        target: Option<String>,

        /// Grid mode (standalone, high_performance)
        #[arg(long)]
        grid_mode: Option<String>,

        /// Dispatcher URLs (comma separated)
        #[arg(long)]
        dispatchers: Option<String>,

        /// Slave slots to request from dispatchers
        #[arg(long)]
        slaves: Option<usize>,

        /// Start the scan immediately
        #[arg(long, default_value = "false")]
        run: bool,
    },

    /// Query a running instance for status and progress
    Status {
        /// Instance address ("host:port")
        #[arg(long)]
        url: String,

        /// The instance's public token
        #[arg(long)]
        token: String,
    },

    /// Attach a slave instance to a running master
    Enslave {
        /// Master address ("host:port")
        #[arg(long)]
        master: String,

        /// Master's public token
        #[arg(long)]
        master_token: String,

        /// Slave address ("host:port")
        #[arg(long)]
        slave: String,

        /// Slave's public token
        #[arg(long)]
        slave_token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, &cli.log_format);

    match cli.command {
        Commands::Serve {
            address,
            port,
            target,
            grid_mode,
            dispatchers,
            slaves,
            run,
        } => {
            let mut options = ScanOptions::from_env()?;
            if let Some(address) = address {
                options.rpc_address = address;
            }
            if let Some(port) = port {
                options.rpc_port = port;
            }
            if let Some(target) = target {
                options.url = Some(target);
            }
            if let Some(mode) = grid_mode {
                options.grid_mode = GridMode::parse(&mode)
                    .ok_or_else(|| anyhow::anyhow!("unknown grid mode: {mode}"))?;
            }
            if let Some(list) = dispatchers {
                options.dispatchers = list
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect();
            }
            if let Some(slots) = slaves {
                options.spawn_slaves = slots;
            }

            serve(options, run).await
        }

        Commands::Status { url, token } => status(url, token).await,

        Commands::Enslave {
            master,
            master_token,
            slave,
            slave_token,
        } => enslave(master, master_token, slave, slave_token).await,
    }
}

async fn serve(options: ScanOptions, run: bool) -> Result<()> {
    let bind: SocketAddr = options
        .self_url()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    let (spider, port) = spider_channel();
    let _ = spawn_null_spider(port);

    let high_performance = options.high_performance();
    let coordinator = ScanCoordinator::new(options, Arc::new(NullAuditor), spider)?;
    println!("instance token: {}", coordinator.public_token());

    // Role elevation is always explicit: an operator asking for high
    // performance mode gets a master instance from the start.
    if high_performance {
        coordinator.set_as_master().await;
    }

    let (bound, server) = api::spawn(coordinator.clone(), bind).await?;
    println!("listening on {bound}");

    if run {
        coordinator.run().await;
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            coordinator.clean_up().await;
        }
        _ = server => {}
    }

    Ok(())
}

async fn status(url: String, token: String) -> Result<()> {
    let client = GridClient::new(Duration::from_secs(10))?;
    let instance = Instance::new(url, token);

    let report = client
        .progress(&instance, ProgressOptions::default())
        .await?;

    println!("status: {}", report.status);
    println!("busy:   {}", report.busy);
    if let Some(stats) = &report.stats {
        println!(
            "pages: {}  elements: {}  issues: {}",
            stats.pages_crawled, stats.elements_audited, stats.issues_found
        );
    }
    if let Some(issues) = &report.issues {
        for issue in issues {
            println!("[{:?}] {} at {}", issue.severity, issue.name, issue.url);
        }
    }
    for peer in &report.instances {
        println!("slave {}: {}", peer.url, peer.status);
    }

    Ok(())
}

async fn enslave(
    master: String,
    master_token: String,
    slave: String,
    slave_token: String,
) -> Result<()> {
    let client = GridClient::new(Duration::from_secs(10))?;
    let master = Instance::new(master, master_token);
    let slave = Instance::new(slave, slave_token);

    let enslaved = client.enslave(&master, &slave).await?;
    if enslaved {
        println!("enslaved {}", slave.url);
    } else {
        anyhow::bail!("master refused to enslave {}", slave.url);
    }

    Ok(())
}

fn init_tracing(verbose: bool, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" })
        });

    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
