use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dhcpd_conflict::{ConflictDetector, InMemoryConflictDetector, InMemoryRogueDetector, TcpReachabilityProbe};
use dhcpd_core::config::{Config, LoggingConfig};
use dhcpd_dhcp::handler::Handler;
use dhcpd_dhcp::lease::InMemoryLeaseStore;
use dhcpd_dhcp::ratelimit::RateLimiter;
use dhcpd_dhcp::server::ListenerGroup;
use dhcpd_dhcp::subnet::Subnet;
use dhcpd_ha::{Fsm, PeerCallbacks, PeerTransport};

#[derive(Parser)]
#[command(name = "dhcpd", about = "DHCPv4 server with active/standby failover and conflict detection")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/dhcpd/dhcpd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    init_logging(&config.logging);
    info!(instance_id = %config.instance.id, "starting dhcpd");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let events: Arc<dyn dhcpd_msg::MessageBus> =
        Arc::from(dhcpd_msg::create_message_bus(&config.messaging.backend, &config.instance.id));

    let server_id = resolve_server_id(&config)?;

    let subnets: Vec<Arc<Subnet>> = config
        .dhcp
        .subnets
        .iter()
        .map(Subnet::from_config)
        .collect::<dhcpd_core::error::Result<Vec<_>>>()?
        .into_iter()
        .map(Arc::new)
        .collect();

    let reservations = config
        .dhcp
        .subnets
        .iter()
        .flat_map(|s| s.reservations.iter().map(move |r| (s.cidr.clone(), r.clone())))
        .collect();
    let lease_store = InMemoryLeaseStore::new(reservations);

    let conflict_detector: Option<Arc<dyn ConflictDetector>> = if config.dhcp.conflict_detection.enabled {
        Some(Arc::new(InMemoryConflictDetector::new(
            Arc::new(TcpReachabilityProbe),
            Duration::from_millis(config.dhcp.conflict_detection.probe_timeout_ms),
        )))
    } else {
        None
    };

    let rogue_detector: Option<Arc<dyn dhcpd_conflict::RogueServerDetector>> =
        Some(Arc::new(InMemoryRogueDetector::new(vec![server_id])));

    let rate_limiter = if config.rate_limit.enabled {
        Some(Arc::new(RateLimiter::new(
            config.rate_limit.global_capacity,
            config.rate_limit.per_client_capacity,
            config.rate_limit.refill_interval_secs,
        )))
    } else {
        None
    };

    let (ha_fsm, ha_transport): (Option<Arc<Fsm>>, Option<Arc<PeerTransport>>) = if let Some(ha_config) = &config.ha
    {
        let fsm = Fsm::new(
            config.instance.id.clone(),
            ha_config.role,
            Duration::from_secs(ha_config.failover_timeout_secs),
            events.clone(),
        );

        let role = ha_config.role;
        let config_snapshot = serde_json::to_value(&config.dhcp).unwrap_or(serde_json::Value::Null);
        let callbacks = PeerCallbacks {
            on_lease_update: Box::new(|payload| {
                info!(?payload, "received lease update from HA peer (reference store is read-only)");
            }),
            on_bulk_lease: Box::new(|payload| {
                info!(?payload, "received bulk lease record from HA peer");
            }),
            on_conflict_update: Box::new(|payload| {
                info!(?payload, "received conflict record from HA peer");
            }),
            on_config_sync: Box::new(|_payload| {
                warn!("received config-sync from HA peer; live config swap is not wired in this binary");
            }),
            on_adjacency_formed: Box::new(move |transport| {
                if role == dhcpd_core::types::HaRole::Primary {
                    let transport = transport.clone();
                    let config_snapshot = config_snapshot.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.send_config_sync(config_snapshot).await {
                            warn!(error = %e, "failed to push config to HA peer on adjacency");
                        }
                    });
                }
            }),
        };

        let transport = PeerTransport::new(
            ha_config.bind.clone(),
            Some(ha_config.peer_addr.clone()),
            Duration::from_secs(ha_config.heartbeat_interval_secs),
            fsm.clone(),
            callbacks,
        );

        let transport_for_task = transport.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = transport_for_task.run(rx).await {
                error!(error = %e, "HA peer transport exited");
            }
        }));

        let fsm_for_timer = fsm.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            fsm_for_timer.run_timeout_checker(rx).await;
        }));

        (Some(fsm), Some(transport))
    } else {
        (None, None)
    };

    let handler = Arc::new(Handler {
        instance_id: config.instance.id.clone(),
        server_id,
        subnets: subnets.clone(),
        lease_store: lease_store.clone(),
        conflict_detector,
        conflict_max_probes: config.dhcp.conflict_detection.max_probes,
        rogue_detector,
        ha_fsm,
        ha_transport,
        rate_limiter,
        events: events.clone(),
    });

    let listeners = ListenerGroup::new(handler);
    let interfaces: Vec<String> = subnets.iter().map(|s| s.interface.clone()).collect();
    listeners.reload(&interfaces).await;

    {
        let lease_store = lease_store.clone();
        let mut rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match lease_store.purge_expired(chrono::Duration::hours(24)).await {
                            Ok(0) => {}
                            Ok(n) => info!(purged = n, "purged expired leases"),
                            Err(e) => error!(error = %e, "lease purge failed"),
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping dhcpd");
    let _ = shutdown_tx.send(true);

    listeners.shutdown().await;
    if let Err(e) = events.shutdown().await {
        error!(error = %e, "message bus shutdown error");
    }
    for task in tasks {
        let _ = task.await;
    }

    info!("dhcpd stopped");
    Ok(())
}

/// Resolves the server identifier advertised in option 54: the
/// operator-configured address if set, else the gateway of the first
/// configured subnet (see `InstanceConfig::server_id`).
fn resolve_server_id(config: &Config) -> Result<Ipv4Addr> {
    if let Some(id) = &config.instance.server_id {
        return Ok(id.parse()?);
    }
    for subnet in &config.dhcp.subnets {
        if let Some(router) = subnet.routers.first() {
            return Ok(router.parse()?);
        }
    }
    anyhow::bail!("no server_id configured and no subnet router to fall back to")
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
