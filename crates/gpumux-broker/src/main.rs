//! Broker binary.
//!
//! Long-lived process for the trusted zone. Takes no positional
//! arguments; every flag has a working default. Exits 0 on clean
//! shutdown, non-zero on initialization failure.
//!
//! ```bash
//! # Defaults: broker is zone 1, serving tenant zone 2 over shm
//! gpumux-broker
//!
//! # Serve several tenants
//! gpumux-broker --zone 1 --tenant 2 --tenant 3
//! ```

use clap::Parser;
use gpumux_broker::{Broker, HostGpu};
use gpumux_proto::ZoneId;
use gpumux_transport::{Backend, Role, Transport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// GPU virtualization broker
#[derive(Parser, Debug)]
#[command(name = "gpumux-broker")]
#[command(about = "Trusted-zone GPU broker over shared-memory IDM")]
#[command(version)]
struct Args {
    /// Zone id of this (trusted) zone
    #[arg(long, default_value = "1")]
    zone: u32,

    /// Tenant zone id; repeat for several tenants
    #[arg(long, default_values_t = vec![2u32])]
    tenant: Vec<u32>,

    /// Emulated device memory in MiB
    #[arg(long, default_value = "256")]
    device_memory: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(zone = args.zone, tenants = ?args.tenant, "gpumux broker starting");

    let broker_zone = ZoneId(args.zone);
    let mut connections = Vec::with_capacity(args.tenant.len());
    for tenant in &args.tenant {
        let transport =
            Transport::open(Backend::Shm, broker_zone, ZoneId(*tenant), Role::Server)?;
        connections.push(transport);
    }

    let driver = HostGpu::new(args.device_memory * 1024 * 1024);
    let mut broker = Broker::start(connections, driver)?;

    // Termination signals flip the shutdown flag; the loop exits at
    // its next receive timeout.
    let shutdown = broker.shutdown_flag();
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown)?;

    broker.run()?;

    Ok(())
}
