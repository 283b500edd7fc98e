//! List frameworks command

use std::path::Path;

use anyhow::Result;

use crate::config::BenchdConfig;
use crate::launcher::CommandLauncher;

/// Print the configured frameworks, optionally probing each one
pub async fn frameworks(config_path: Option<&Path>, probe: bool) -> Result<()> {
    let config = BenchdConfig::load(config_path)?;
    let launcher = CommandLauncher::new(config.frameworks.clone(), &config.supervisor);

    println!("Frameworks:\n");
    for (name, fw) in &config.frameworks {
        let label = fw.label.as_deref().unwrap_or(name);
        println!("  {} ({})", name, label);
        println!("    url:     http://{}:{}{}", fw.host, fw.port, fw.health_path);
        println!("    command: {} {}", fw.launch.command, fw.launch.args.join(" "));
        if !fw.models.is_empty() {
            let presets: Vec<&str> = fw.models.keys().map(String::as_str).collect();
            println!("    models:  {}", presets.join(", "));
        }

        if probe {
            let report = launcher.check(name).await?;
            match (report.healthy, report.error) {
                (true, _) => println!("    health:  up ({:.0} ms)", report.response_time_ms),
                (false, Some(error)) => println!("    health:  down ({})", error),
                (false, None) => println!("    health:  down"),
            }
        }
        println!();
    }

    println!("Scenarios: {}", config.bench.scenarios.join(", "));
    Ok(())
}
