use std::path::Path;

use {anyhow::Result, rainbow_bridge::RegistrySnapshot};

const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let (path, config) = crate::load(config_path)?;

    if let Some(ref path) = path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; nothing is bridged.\n");
    }

    let (snapshot, issues) = RegistrySnapshot::build(&config);

    for issue in &issues {
        eprintln!("  {BOLD}{YELLOW}warning{RESET} {issue}");
    }

    if verbose {
        let mut bridges: Vec<_> = snapshot.bridges().collect();
        bridges.sort_by(|a, b| a.id.cmp(&b.id));
        for bridge in bridges {
            let (color, state) = if bridge.is_active() {
                (GREEN, "active")
            } else {
                (DIM, "inert")
            };
            eprintln!(
                "  {BOLD}{color}{state}{RESET} {} ({}): {} channel(s), {:?}",
                bridge.id,
                bridge.name,
                bridge.channels.len(),
                bridge.direction
            );
        }
    }

    if !issues.is_empty() || verbose {
        eprintln!();
    }

    eprintln!(
        "{} active, {} inert bridge(s)",
        snapshot.active_count(),
        snapshot.inert_count()
    );
    if issues.is_empty() {
        eprintln!("No issues found.");
    } else {
        eprintln!("{} issue(s)", issues.len());
        std::process::exit(1);
    }

    Ok(())
}
