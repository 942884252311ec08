use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Maintenance CLI for a hub's persisted state, kept separate from the
/// long-lived daemon binary the way a distributed build system's tooling
/// layers a small `clap` CLI over the core it maintains.
#[derive(Parser)]
#[command(name = "hub-tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wipes persisted JSON state under a data directory for local testing.
    /// Never invoked from the wire protocol or the operator console.
    Reset {
        #[arg(long)]
        data_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Reset { data_dir } => reset(&data_dir),
    }
}

fn reset(data_dir: &std::path::Path) -> anyhow::Result<()> {
    const FILES: &[&str] = &["users.json", "groups.json", "scheduled_commands.json", "server_state.json", "crash.log"];
    const DIRS: &[&str] = &["history", "scheduled_results", "files", "command_output", "saved"];

    for name in FILES {
        let path = data_dir.join(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("removed {}", path.display());
        }
    }
    for name in DIRS {
        let path = data_dir.join(name);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
            println!("removed {}", path.display());
        }
    }
    println!("reset complete for {}", data_dir.display());
    Ok(())
}
