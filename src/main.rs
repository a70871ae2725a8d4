// src/main.rs - Brewery host running every configured vessel on simulated hardware
use clap::Parser;
use mashtun_rs::config::Config;
use mashtun_rs::decimal::Decimal;
use mashtun_rs::hardware::sim::{Kettle, SimPins};
use mashtun_rs::hardware::PinFactory;
use mashtun_rs::runtime::Brewery;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "brew-host", version, about = "Mash tun and kettle temperature controller")]
struct Args {
    /// Configuration file
    #[arg(default_value = "brewery.toml")]
    config: String,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Seconds between status reports
    #[arg(long, default_value_t = 30)]
    status_secs: u64,

    /// Ambient temperature of the simulated vessels, in Fahrenheit
    #[arg(long, default_value_t = 68.0)]
    ambient_f: f64,

    /// Write the live state back to the configuration file on exit
    #[arg(long)]
    save_on_exit: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::info!("Starting brew-host {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config);

    let config = Config::load(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let ambient = Decimal::from_f64(args.ambient_f).unwrap_or(Decimal::from_int(68));
    let pins = Arc::new(SimPins::new(ambient));
    let mut brewery = Brewery::from_config(&config, pins.clone() as Arc<dyn PinFactory>).await?;

    let kettles: Vec<Kettle> = config
        .vessels
        .iter()
        .filter_map(|vessel| {
            let probe = pins.probe(&vessel.probe)?;
            let mut kettle = Kettle::new(probe, args.ambient_f);
            if let Some(heat) = &vessel.heat {
                if let Some(handle) = pins.output(&heat.pin) {
                    kettle = kettle.with_heater(handle, heat.inverted);
                }
            }
            if let Some(cool) = &vessel.cool {
                if let Some(handle) = pins.output(&cool.pin) {
                    kettle = kettle.with_cooler(handle, cool.inverted);
                }
            }
            Some(kettle)
        })
        .collect();
    tracing::info!("{} vessels running", kettles.len());

    let mut physics = tokio::time::interval(Duration::from_secs(1));
    physics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(Duration::from_secs(args.status_secs.max(1)));
    status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = physics.tick() => {
                for kettle in &kettles {
                    kettle.step(1.0);
                }
            }
            _ = status.tick() => {
                for vessel in brewery.status().await {
                    match serde_json::to_string(&vessel) {
                        Ok(json) => tracing::info!("status {}", json),
                        Err(e) => tracing::warn!("Failed to encode status: {}", e),
                    }
                }
            }
        }
    }

    if args.save_on_exit {
        let snapshot = brewery.snapshot_config().await;
        if let Err(e) = snapshot.save(&args.config) {
            tracing::error!("Failed to save configuration: {}", e);
        }
    }
    brewery.shutdown().await;
    tracing::info!("brew-host stopped");
    Ok(())
}
