//! Dump every sensor table once, the way an SNMP walk would see it.
//!
//! Usage:
//!   cargo run --bin sensor-walk
//!   cargo run --bin sensor-walk -- --simulate --json

use clap::Parser;
use log::{error, info};
use sensor_snmp_bridge::bus::{DbusBus, MemoryBus, SensorBus};
use sensor_snmp_bridge::config::{BusKind, Config, load_dotenv};
use sensor_snmp_bridge::error::Result;
use sensor_snmp_bridge::sensors::SensorRegistry;
use sensor_snmp_bridge::simulation;
use sensor_snmp_bridge::snmp::{Agent, CellValue, Oid, SENSOR_TABLES, register_sensor_tables};
use sensor_snmp_bridge::watcher::{ChangeWatcher, NoopObserver};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sensor-walk")]
#[command(about = "Print the contents of all sensor tables")]
struct Cli {
    /// Message bus to connect to
    #[arg(long, value_enum)]
    bus: Option<BusKind>,

    /// Walk simulated sensors instead of D-Bus
    #[arg(long)]
    simulate: bool,

    /// Print JSON instead of one line per value
    #[arg(long)]
    json: bool,

    /// Only walk below this OID
    #[arg(long)]
    prefix: Option<Oid>,
}

#[tokio::main]
async fn main() {
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(e) = walk(cli).await {
        error!("Walk failed: {}", e);
        std::process::exit(1);
    }
}

async fn walk(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(kind) = cli.bus {
        config.bus.kind = kind;
    }

    let bus: Arc<dyn SensorBus> = if cli.simulate {
        let bus = MemoryBus::new();
        simulation::seed(&bus, &config);
        Arc::new(bus)
    } else {
        Arc::new(DbusBus::connect(config.bus.kind).await?)
    };

    let registry = SensorRegistry::shared();
    let mut watcher = ChangeWatcher::new(bus, registry.clone(), Arc::new(NoopObserver), &config);
    watcher.update_sensors().await?;
    info!("Loaded {} sensors", registry.read().total());

    let agent = Agent::new();
    register_sensor_tables(&agent, &registry)?;

    let prefixes: Vec<(String, Oid)> = match cli.prefix {
        Some(prefix) => vec![(prefix.to_string(), prefix)],
        None => SENSOR_TABLES
            .iter()
            .map(|t| (t.name.to_string(), t.oid()))
            .collect(),
    };

    if cli.json {
        let tables: serde_json::Map<String, serde_json::Value> = prefixes
            .iter()
            .map(|(name, oid)| -> Result<(String, serde_json::Value)> {
                Ok((name.clone(), serde_json::to_value(agent.walk(oid))?))
            })
            .collect::<Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&tables)?);
    } else {
        for (name, oid) in &prefixes {
            println!("# {} ({})", name, oid);
            for varbind in agent.walk(oid) {
                if let CellValue::Integer(value) = varbind.value {
                    println!("{} = INTEGER: {}", varbind.oid, value);
                }
            }
        }
    }
    Ok(())
}
