//! `homelink` – the HomeLink hub binary.
//!
//! Wires the whole stack together:
//!
//! 1. Initialises structured logging (`RUST_LOG` filter; set
//!    `HOMELINK_LOG_FORMAT=json` for newline-delimited JSON logs).
//! 2. Loads `homelink.toml` (defaults apply when absent).
//! 3. Starts the four relay channels and the WebSocket push server.
//! 4. Drops into a small stdin control loop: plain lines go out on the
//!    command channel, `voice start` / `voice stop` hit the trigger
//!    client, `quit` exits.

mod config;

use std::sync::Arc;

use colored::Colorize;
use homelink_bridge::EventBridge;
use homelink_push::PushServer;
use homelink_relay::{ChannelServer, TriggerClient};
use homelink_types::ChannelKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!("  No config file found, using defaults.");
            config::HubConfig::default()
        }
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            println!("  Using default configuration.");
            config::HubConfig::default()
        }
    };

    let bridge = Arc::new(EventBridge::new());

    let command = ChannelServer::new(ChannelKind::Command, Arc::clone(&bridge));
    let sensor = ChannelServer::new(ChannelKind::Sensor, Arc::clone(&bridge));
    let door = ChannelServer::new(ChannelKind::DoorEvent, Arc::clone(&bridge));
    let voice = ChannelServer::new(ChannelKind::Voice, Arc::clone(&bridge));

    // Local observers, the console equivalent of the original front end's
    // status labels.
    command.add_listener(|line| info!(target: "homelink::command", line, "command observed"));
    sensor.add_listener(|line| info!(target: "homelink::sensor", line, "telemetry received"));
    door.add_listener(|line| info!(target: "homelink::door", state = line, "door event"));
    voice.add_listener(|line| info!(target: "homelink::voice", text = line, "transcription"));

    // A bind failure is fatal for its channel only; the rest keep running.
    for (server, port) in [
        (&command, cfg.command_port),
        (&sensor, cfg.sensor_port),
        (&door, cfg.door_port),
        (&voice, cfg.voice_port),
    ] {
        match server.start(port).await {
            Ok(addr) => println!("  {} channel on {}", server.kind().to_string().bold(), addr),
            Err(e) => {
                error!(channel = %server.kind(), error = %e, "channel unavailable");
                println!("  {} channel {}: {e}", server.kind().to_string().bold(), "DOWN".red());
            }
        }
    }

    let trigger = TriggerClient::new(cfg.trigger_addr.clone());

    let push = PushServer::new(
        Arc::clone(&bridge),
        Arc::clone(&command),
        trigger.clone(),
    )
    .with_port(cfg.push_port);
    println!("  push server on port {}", cfg.push_port.to_string().bold());
    tokio::spawn(async move {
        if let Err(e) = push.run().await {
            error!(error = %e, "push server failed");
        }
    });

    println!();
    println!(
        "  Type a command to broadcast it, {} / {} for voice capture, {} to exit.",
        "voice start".bold(),
        "voice stop".bold(),
        "quit".bold()
    );
    control_loop(&command, &trigger).await;

    info!("homelink hub shutting down");
}

/// Read operator input until `quit`, stdin EOF + Ctrl-C, or Ctrl-C.
async fn control_loop(command: &Arc<ChannelServer>, trigger: &TriggerClient) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Ctrl-C received, exiting.".yellow());
                return;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_input(line.trim(), command, trigger).await {
                            return;
                        }
                    }
                    Ok(None) | Err(_) => {
                        // stdin closed (e.g. running as a service): keep
                        // serving until Ctrl-C.
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                }
            }
        }
    }
}

/// Returns `false` when the operator asked to quit.
async fn handle_input(input: &str, command: &Arc<ChannelServer>, trigger: &TriggerClient) -> bool {
    match input {
        "" => {}
        "quit" | "exit" => return false,
        "voice start" => match trigger.start_recording().await {
            Ok(()) => println!("  {}", "voice capture started".green()),
            Err(e) => {
                warn!(error = %e, "voice trigger failed");
                println!("  {}: {e}", "voice trigger failed".red());
            }
        },
        "voice stop" => match trigger.stop_recording().await {
            Ok(()) => println!("  {}", "voice capture stopped".green()),
            Err(e) => {
                warn!(error = %e, "voice trigger failed");
                println!("  {}: {e}", "voice trigger failed".red());
            }
        },
        line => {
            let delivered = command.send_command(line);
            println!("  sent to {delivered} peer(s)");
        }
    }
    true
}

/// Initialise tracing-subscriber from `RUST_LOG` (default `info`).
///
/// The control loop's operator-facing output still uses `println!` for UX
/// consistency.
fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("HOMELINK_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}

fn print_banner() {
    println!();
    println!("  {}", "HomeLink Hub".bold());
    println!("  {}", "line-protocol relay for the home automation LAN".dimmed());
    println!();
}
