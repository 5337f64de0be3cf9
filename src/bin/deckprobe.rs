//! `deckprobe`: list attached Stream Decks or watch one for input.

use clap::{Parser, Subcommand};
use deckhand::backends::hid::streamdeck_plugin;
use deckhand::eventbus::EventFilter;
use deckhand::logger::TracingListener;
use deckhand::plugin::{core_plugin, CORE_PLUGIN};
use deckhand::render::builtin::ButtonSettings;
use deckhand::render::RendererSettings;
use deckhand::screen::RenderableItem;
use deckhand::{CoreConfig, DeviceManager, NamespacedName, Registry, RenderPipeline, ScreenItem};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "deckprobe", version, about = "Inspect Stream Deck surfaces")]
struct Cli {
    /// TOML file with core settings.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every attached device with its layout.
    List,

    /// Connect to a device and log its input until Ctrl-C.
    Watch {
        /// Serial number; the first device found if omitted.
        serial: Option<String>,

        /// Fill every key with a solid color.
        #[arg(long, value_parser = parse_color)]
        paint: Option<[u8; 4]>,
    },
}

fn parse_color(s: &str) -> Result<[u8; 4], String> {
    let hex = s.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(format!("expected RRGGBB, got `{s}`"));
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    Ok([byte(0)?, byte(2)?, byte(4)?, 255])
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match CoreConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => CoreConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    if let Err(e) = run(cli.command, config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = Registry::builder();
    builder.add_plugin(core_plugin())?;
    builder.add_plugin(streamdeck_plugin()?)?;
    let registry = Arc::new(builder.build());
    let manager = DeviceManager::new(registry.clone(), config, tokio::runtime::Handle::current());

    match command {
        Commands::List => {
            let devices = manager.list_devices();
            if devices.is_empty() {
                println!("no devices found");
            }
            for id in devices {
                println!("{id}  {}", id.description);
            }
            Ok(())
        }
        Commands::Watch { serial, paint } => {
            let report = manager.refresh().await;
            let id = report
                .appeared
                .into_iter()
                .find(|id| serial.as_deref().map_or(true, |s| s == id.identifier))
                .ok_or("no matching device")?;

            let device = manager.connect(&id).await?;
            info!(device = %id, inputs = device.inputs().len(), "watching");
            for input in device.inputs() {
                input.add_listener(Arc::new(TracingListener::new(id.to_string())), EventFilter::All);
            }

            if let Some(color) = paint {
                let pipeline = RenderPipeline::new(registry.clone());
                let mut item = RenderableItem::default();
                item.set_renderer(&registry, NamespacedName::new(CORE_PLUGIN, "button"));
                item.settings = Some(RendererSettings::of(&ButtonSettings::solid(color))?);
                let mut item = ScreenItem::Renderable(item);
                for input in device.inputs() {
                    if let Err(e) = pipeline.render(&mut item, input).await {
                        warn!(input = input.index(), error = %e, "paint failed");
                    }
                }
            }

            let mut poll = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = poll.tick() => {
                        if !manager.reap_lost().await.is_empty() {
                            warn!(device = %id, "device lost");
                            break;
                        }
                    }
                }
            }
            manager.shutdown().await;
            Ok(())
        }
    }
}
