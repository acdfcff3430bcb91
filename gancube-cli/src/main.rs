use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gancube_lib::message::Command as CubeCommand;
use gancube_lib::{CubeEvent, CubeManager, ManagerConfig};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long one-shot commands wait for the cube to connect and answer.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to a GAN Gen3 smart cube over BLE")]
struct Args {
    /// Override the key-derivation address when the host hides the real one
    #[arg(long)]
    mac: Option<String>,

    /// Scan timeout in seconds
    #[arg(long, default_value = "15")]
    scan_timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Connect and stream cube events until interrupted
    Listen {
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
        /// Enable move-pattern solve detection for cubes without facelets
        #[arg(long)]
        heuristic: bool,
    },
    /// Query the battery level
    Battery,
    /// Query hardware information
    Hardware,
    /// Request and print the current cube state
    Facelets,
    /// Reset the cube's internal state to solved
    Reset,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = ManagerConfig {
        scan_timeout: Duration::from_secs(args.scan_timeout),
        identifier_override: args.mac.clone(),
        move_heuristic: matches!(args.command, CliCommand::Listen { heuristic: true, .. }),
        ..ManagerConfig::default()
    };

    let manager = CubeManager::new(config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.register_event_callback(Box::new(move |event| {
        let _ = tx.send(event.clone());
    }));
    manager.start();

    let result = match args.command {
        CliCommand::Listen { json, .. } => listen(&mut rx, json).await,
        CliCommand::Battery => {
            one_shot(&manager, &mut rx, CubeCommand::RequestBattery, |event| {
                if let CubeEvent::Battery(level) = event {
                    println!("Battery: {level}%");
                    true
                } else {
                    false
                }
            })
            .await
        }
        CliCommand::Hardware => {
            one_shot(&manager, &mut rx, CubeCommand::RequestHardware, |event| {
                if let CubeEvent::Hardware(hw) = event {
                    println!("Hardware: {}", hw.hardware_name.as_deref().unwrap_or("unknown"));
                    println!("Software version: {}", hw.software_version.as_deref().unwrap_or("unknown"));
                    println!("Hardware version: {}", hw.hardware_version.as_deref().unwrap_or("unknown"));
                    if let Some(gyro) = hw.gyro_supported {
                        println!("Gyro: {}", if gyro { "yes" } else { "no" });
                    }
                    true
                } else {
                    false
                }
            })
            .await
        }
        CliCommand::Facelets => {
            one_shot(&manager, &mut rx, CubeCommand::RequestFacelets, |event| {
                if let CubeEvent::Facelets(data) = event {
                    println!("{}", data.facelets);
                    println!("Solved: {}", if data.state.is_solved() { "yes" } else { "no" });
                    true
                } else {
                    false
                }
            })
            .await
        }
        CliCommand::Reset => {
            match wait_connected(&mut rx).await {
                Ok(()) => {
                    manager.send_command(CubeCommand::Reset)?;
                    info!("reset command queued");
                    // Give the drain tick a moment to push the frame out.
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    };

    manager.stop().await;

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!(error = %e, "command failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Stream events to stdout until Ctrl+C.
async fn listen(
    rx: &mut mpsc::UnboundedReceiver<CubeEvent>,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    info!("listening, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => return Ok(()),
            event = rx.recv() => {
                let Some(event) = event else { return Ok(()) };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }
            }
        }
    }
}

fn print_event(event: &CubeEvent) {
    match event {
        CubeEvent::Move(mv) => println!("{:>3}  {}", mv.serial, mv.notation()),
        CubeEvent::Facelets(data) => println!("state  {}", data.facelets),
        CubeEvent::Battery(level) => println!("battery  {level}%"),
        CubeEvent::Hardware(hw) => println!("hardware  {hw:?}"),
        CubeEvent::Solved => println!("*** SOLVED ***"),
        CubeEvent::ConnectionChanged(up) => {
            println!("{}", if *up { "connected" } else { "disconnected" })
        }
    }
}

/// Wait for a connection, issue one command and print its answer.
async fn one_shot(
    manager: &CubeManager,
    rx: &mut mpsc::UnboundedReceiver<CubeEvent>,
    command: CubeCommand,
    mut handle: impl FnMut(&CubeEvent) -> bool,
) -> Result<(), Box<dyn Error>> {
    wait_connected(rx).await?;
    manager.send_command(command)?;

    let answered = timeout(RESPONSE_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if handle(&event) {
                return true;
            }
        }
        false
    })
    .await;

    match answered {
        Ok(true) => Ok(()),
        Ok(false) => Err("event stream closed before the cube answered".into()),
        Err(_) => Err("timed out waiting for the cube's answer".into()),
    }
}

async fn wait_connected(
    rx: &mut mpsc::UnboundedReceiver<CubeEvent>,
) -> Result<(), Box<dyn Error>> {
    let connected = timeout(RESPONSE_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if matches!(event, CubeEvent::ConnectionChanged(true)) {
                return true;
            }
        }
        false
    })
    .await;

    match connected {
        Ok(true) => Ok(()),
        Ok(false) => Err("event stream closed while waiting for a cube".into()),
        Err(_) => Err("no cube found".into()),
    }
}
