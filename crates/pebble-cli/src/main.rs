//! `pebble` – Pebble Command Line Interface
//!
//! Runs the companion control loop against the simulated robot and the
//! in-process loopback channel:
//!
//! 1. Loads `~/.pebble/config.toml`, writing the defaults when absent.
//! 2. Initialises logging (and OTLP span export when configured).
//! 3. Plays a short demo scene: a face, then a weather notification.
//!    Every status the loop publishes is echoed to the console.
//! 4. Intercepts **Ctrl-C** to drop the simulated robot connection, which
//!    makes the loop shut down cooperatively.

mod config;

use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use pebble_hal::SimRobot;
use pebble_middleware::{InboundQueue, LoopbackChannel, NotificationChannel, TopicObserver};
use pebble_runtime::{ControlLoop, init_tracing};
use pebble_types::{Face, Pose};

fn main() {
    let (cfg, config_error) = match config::load() {
        Ok(Some(cfg)) => (cfg, None),
        Ok(None) => {
            // Persist plain defaults; env overrides stay process-local.
            let saved = config::save(&config::Config::default()).err();
            (config::defaults_with_env(), saved)
        }
        Err(e) => (config::defaults_with_env(), Some(e)),
    };

    // Hold the guard until exit so pending spans are flushed.
    let _telemetry = init_tracing("pebble", &cfg.logging);

    print_banner();
    match config_error {
        Some(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
        None => println!(
            "  Config: {}",
            config::config_path().display().to_string().bold()
        ),
    }
    println!(
        "  Status on {}, running on the loopback channel.",
        cfg.topics.status.dimmed()
    );
    println!();

    let sim = Arc::new(
        SimRobot::new()
            .on_charger()
            .with_known_charger(Pose::new(0.0, 0.0, 0.0, 0.0, 1))
            .with_charge_duration(Duration::from_secs(30)),
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let sim_ctrlc = Arc::clone(&sim);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – shutting down …".yellow().bold()
        );
        sim_ctrlc.drop_connection();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will exit abruptly");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let (sender, inbound) = InboundQueue::new();
        let channel = Arc::new(LoopbackChannel::new(sender));
        tokio::spawn(echo_status(
            channel.subscribe_topic(cfg.topics.status.clone()),
        ));
        tokio::spawn(demo_scene(
            Arc::clone(&sim),
            Arc::clone(&channel),
            cfg.topics.weather.clone(),
        ));

        let control = ControlLoop::new(
            sim,
            Some(channel as Arc<dyn NotificationChannel>),
            inbound,
            cfg.control_loop(),
        );
        control.run().await
    });

    match result {
        Ok(()) => println!("{}", "  ✓ Pebble stopped.".green()),
        Err(e) => {
            println!("{}: {}", "Pebble stopped with an error".red(), e);
            std::process::exit(1);
        }
    }
}

async fn echo_status(mut observer: TopicObserver) {
    while let Some(published) = observer.recv().await {
        if let Some(status) = published.payload["status"].as_str() {
            println!("  {} {}", "●".cyan(), status.bold());
        }
    }
}

/// A friendly face drops by, then the weather service chimes in.
async fn demo_scene(sim: Arc<SimRobot>, channel: Arc<LoopbackChannel>, weather_topic: String) {
    tokio::time::sleep(Duration::from_secs(3)).await;
    info!("demo: a face appears");
    sim.set_visible_faces(vec![Face::named(1, "Alice")]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    sim.set_visible_faces(Vec::new());
    info!("demo: weather notification");
    let payload = br#"{"msg":"It will be clear and sunny all day."}"#;
    if !channel.inject(&weather_topic, payload) {
        warn!("demo: notification not delivered");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ___       __    __    __   "#.bold().cyan());
    println!("{}", r#"   / _ \___  / /   / /   / /__ "#.bold().cyan());
    println!("{}", r#"  / ___/ -_)/ _ \ / _ \ / / -_)"#.bold().cyan());
    println!("{}", r#" /_/   \__//_.__//_.__//_/\__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Pebble".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Desktop robot companion");
    println!();
}
