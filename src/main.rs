use clap::Parser;
use log::{debug, error, info};
use sensor_snmp_bridge::bus::{DbusBus, MemoryBus, SensorBus};
use sensor_snmp_bridge::config::{BusKind, Config, load_dotenv};
use sensor_snmp_bridge::error::Result;
use sensor_snmp_bridge::sensors::{SensorRegistry, SharedRegistry};
use sensor_snmp_bridge::simulation;
use sensor_snmp_bridge::snmp::{
    Agent, CellValue, register_sensor_tables, sensor_tables_root, unregister_sensor_tables,
};
use sensor_snmp_bridge::watcher::{ChangeWatcher, LoggingObserver};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;

/// Seconds between simulated value drifts.
const SIMULATION_PERIOD_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "sensor-snmp-bridge")]
#[command(about = "Serve BMC sensors from D-Bus as read-only SNMP tables")]
struct Args {
    /// Message bus to connect to
    #[arg(long, value_enum)]
    bus: Option<BusKind>,

    /// Run against simulated sensors instead of D-Bus
    #[arg(long)]
    simulate: bool,

    /// Log a walk of all tables every N seconds (0 disables)
    #[arg(long)]
    walk_interval: Option<u64>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    let dotenv_vars = load_dotenv();
    init_logger();
    let args = Args::parse();

    info!("Starting Sensor SNMP Bridge");
    if dotenv_vars > 0 {
        debug!("Loaded {} variables from .env", dotenv_vars);
    }

    if let Err(e) = run(args).await {
        error!("Sensor SNMP Bridge failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(kind) = args.bus {
        config.bus.kind = kind;
    }
    if let Some(secs) = args.walk_interval {
        config.agent.walk_interval_secs = secs;
    }

    info!("Configuration loaded:");
    if args.simulate {
        info!("  Bus: simulated");
    } else {
        info!("  Bus: {}", config.bus.kind);
    }
    info!("  Sensors root: {}", config.bus.sensors_root);
    info!(
        "  Power state: {} {}.{}",
        config.power.path, config.power.interface, config.power.property
    );

    let registry = SensorRegistry::shared();

    let mut simulation_task = None;
    let bus: Arc<dyn SensorBus> = if args.simulate {
        let bus = MemoryBus::new();
        simulation::seed(&bus, &config);
        simulation_task = Some(simulation::run_sensor_simulation(
            bus.clone(),
            &config,
            Duration::from_secs(SIMULATION_PERIOD_SECS),
        ));
        Arc::new(bus)
    } else {
        Arc::new(DbusBus::connect(config.bus.kind).await?)
    };

    let result = serve(bus, registry, &config).await;

    if let Some(task) = simulation_task {
        task.abort();
    }
    result
}

/// Start the watcher and the tables, then run until Ctrl+C.
async fn serve(bus: Arc<dyn SensorBus>, registry: SharedRegistry, config: &Config) -> Result<()> {
    let mut watcher = ChangeWatcher::new(bus, registry.clone(), Arc::new(LoggingObserver), config);
    watcher.update_power_state().await?;
    watcher.update_sensors().await?;
    info!(
        "Tracking {} sensors, power state {}",
        registry.read().total(),
        watcher.power_state().unwrap_or_default()
    );

    let agent = Arc::new(Agent::new());
    register_sensor_tables(&agent, &registry)?;

    // The watcher task owns every subscription; aborting it releases them.
    let watcher_task = tokio::spawn(async move {
        watcher.run().await;
    });

    let walk_task = match config.agent.walk_interval_secs {
        0 => None,
        secs => Some(spawn_walk_logger(agent.clone(), Duration::from_secs(secs))),
    };

    info!("Sensor SNMP Bridge is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some(task) = walk_task {
        task.abort();
    }
    watcher_task.abort();
    let _ = watcher_task.await;

    unregister_sensor_tables(&agent)?;
    info!("Sensor SNMP Bridge stopped");
    Ok(())
}

/// Periodically walk every table and log what a poller would see.
fn spawn_walk_logger(agent: Arc<Agent>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let root = sensor_tables_root();
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let walked = agent.walk(&root);
            for varbind in &walked {
                if let CellValue::Integer(value) = varbind.value {
                    debug!("[Agent] {} = INTEGER: {}", varbind.oid, value);
                }
            }
            info!("[Agent] Walk returned {} values", walked.len());
        }
    })
}
