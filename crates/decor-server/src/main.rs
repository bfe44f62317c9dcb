mod config;
mod console;

use std::sync::Arc;
use std::time::Duration;

use config::DecorConfig;
use console::Console;
use decor_core::{load_mechanics, Collaborators, Engine, MechanicCatalog, MemoryHost};
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

/// Encode and drop every packet the engine emitted since the last tick.
fn flush_outbox(host: &MemoryHost) {
    let packets = host.take_packets();
    if packets.is_empty() {
        return;
    }
    let bytes: usize = packets.iter().map(|(_, p)| p.encode().len()).sum();
    debug!("Flushed {} packet(s), {} byte(s)", packets.len(), bytes);
}

#[tokio::main]
async fn main() {
    let config = match DecorConfig::load("decor.toml") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load decor.toml: {e}");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("decor-server v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Settle delay: {} tick(s), load settle delay: {} tick(s), view radius: {}",
        config.engine.settle_delay_ticks,
        config.engine.load_settle_delay_ticks,
        config.engine.view_radius
    );

    let mechanics = match load_mechanics(&config.mechanics.path) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to load {}: {}; starting with no mechanics", config.mechanics.path, e);
            Default::default()
        }
    };

    let host = Arc::new(MemoryHost::new());
    let engine = Arc::new(Engine::new(
        config.engine,
        MechanicCatalog::new(mechanics),
        Collaborators {
            world: host.clone(),
            viewers: host.clone(),
            sink: host.clone(),
            drops: host.clone(),
        },
    ));
    let console = Console::new(Arc::clone(&engine), Arc::clone(&host), config.mechanics.path);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    // Handle Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Console REPL: read lines from stdin
    let (console_tx, mut console_rx) = tokio::sync::mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut tick_interval = tokio::time::interval(Duration::from_millis(config.tick.interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                engine.tick();
                flush_outbox(&host);
            }
            Some(line) = console_rx.recv() => {
                let result = console.execute(&line);
                for message in &result.messages {
                    println!("{message}");
                }
                flush_outbox(&host);
                if result.should_stop {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let retracted = engine.retract_all();
                    info!("Retracted {} packet(s) before shutdown", retracted);
                    flush_outbox(&host);
                    break;
                }
            }
        }
    }

    info!("Server shut down.");
}
