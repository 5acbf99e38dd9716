//! Subcommand implementations

use anyhow::{Context, Result};
use choreo_core::codec::{load_project, save_project, to_json_pretty};
use choreo_core::{Choreography, Point5, Rig};
use choreo_telemetry::{spawn_reader, LinkFault, MotionSession};
use std::path::Path;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::Config;

/// Print the devices, groups and move sets of a project
pub fn inspect(project: &Path, rig: Option<&Rig>) -> Result<()> {
    let choreo = load_project(project)
        .with_context(|| format!("failed to load project {}", project.display()))?;

    println!("Devices ({}):", choreo.rig.len());
    for device in choreo.rig.devices() {
        println!(
            "  - {} (id {}) home {}",
            device.name,
            device.id,
            format_point(&device.home_position)
        );
    }

    println!("Groups:");
    for group in choreo.rig.groups() {
        let aux: Vec<String> = group.aux_devices.iter().map(|d| d.to_string()).collect();
        println!("  - main {} aux [{}]", group.main_device, aux.join(", "));
    }

    for (index, set) in choreo.move_sets.iter().enumerate() {
        println!("Move set {} ({} moves):", index, set.len());
        for mv in &set.moves {
            let actions: Vec<&str> = mv.end_pose.actions.iter().map(|a| a.kind().as_str()).collect();
            println!(
                "  - device {} {} {} -> {}{}",
                mv.device,
                mv.move_type,
                format_point(&mv.start_pose.position),
                format_point(&mv.end_pose.position),
                if actions.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", actions.join(", "))
                }
            );
        }
    }

    if let Some(rig) = rig {
        let warnings = reach_warnings(&choreo, rig);
        for w in &warnings {
            warn!("{}", w);
        }
        println!("Rig check: {} warning(s)", warnings.len());
    }

    Ok(())
}

/// Decode and re-encode a project, writing the canonical document
pub fn normalize(project: &Path, output: Option<&Path>) -> Result<()> {
    let choreo = load_project(project)
        .with_context(|| format!("failed to load project {}", project.display()))?;

    match output {
        Some(path) => save_project(path, &choreo)?,
        None => println!("{}", to_json_pretty(&choreo)?),
    }
    Ok(())
}

/// Log every idle window from the controller until the link closes
pub async fn monitor(config: &Config) -> Result<()> {
    let stream = TcpStream::connect(&config.link.address)
        .await
        .with_context(|| format!("failed to connect to {}", config.link.address))?;
    info!(address = %config.link.address, "Monitoring controller link");

    let mut reader = spawn_reader(stream, &config.link.reader);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping monitor");
                reader.shutdown();
            }
            window = reader.recv() => {
                let Some(window) = window else { break };
                for record in &window.records {
                    println!("{}", serde_json::to_string(record)?);
                }
                if window.idle {
                    info!(records = window.records.len(), "Controller idle");
                }
            }
        }
    }

    match reader.join().await {
        Ok(()) | Err(LinkFault::Closed) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Send a command file to the controller, one line at a time, pacing on idle
pub async fn run(config: &Config, commands: &Path) -> Result<()> {
    let content = std::fs::read_to_string(commands)
        .with_context(|| format!("failed to read {}", commands.display()))?;

    let stream = TcpStream::connect(&config.link.address)
        .await
        .with_context(|| format!("failed to connect to {}", config.link.address))?;

    let mut session = MotionSession::open(stream, &config.link.reader);
    let issued = session.execute(content.lines()).await?;
    println!("Issued {} command(s)", issued);
    session.close().await?;
    Ok(())
}

/// Moves whose device is missing from the rig or whose destination leaves its envelope
fn reach_warnings(choreo: &Choreography, rig: &Rig) -> Vec<String> {
    let mut warnings = Vec::new();
    for (index, set) in choreo.move_sets.iter().enumerate() {
        for mv in &set.moves {
            let Some(device) = rig.device(mv.device) else {
                warnings.push(format!("move set {}: device {} is not in the rig", index, mv.device));
                continue;
            };
            if !device.range_3d.is_empty() && !device.can_reach(&mv.end_pose.position) {
                warnings.push(format!(
                    "move set {}: {} cannot reach {}",
                    index,
                    device.name,
                    format_point(&mv.end_pose.position)
                ));
            }
        }
    }
    warnings
}

fn format_point(p: &Point5) -> String {
    format!("({}, {}, {}, {}, {})", p.x, p.y, p.z, p.pan, p.tilt)
}
