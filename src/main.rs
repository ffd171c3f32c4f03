//! uEnv Sync CLI
//!
//! Entry point for the `uenv-sync` command-line tool.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use uenv_sync::backup::BackupInfo;
use uenv_sync::inventory::{InventoryError, TargetInventory, DEFAULT_REMOTE_PATH};
use uenv_sync::merge::{Change, ChangeLog};
use uenv_sync::ops::{self, OpError};
use uenv_sync::signal::{InterruptGuard, InterruptState};
use uenv_sync::transport::{SshConfig, SshStore};

#[derive(Parser)]
#[command(name = "uenv-sync")]
#[command(about = "Merge and deploy uEnv.txt boot configuration to a BeagleBone", version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Device hostname or IP address
    #[arg(long, global = true, env = "REMOTE_HOST")]
    host: Option<String>,

    /// SSH user on the device
    #[arg(long, global = true, env = "REMOTE_USER")]
    user: Option<String>,

    /// SSH port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// SSH identity file
    #[arg(long = "key", short = 'i', global = true)]
    key: Option<String>,

    /// Path of the boot configuration on the device (default: /boot/uEnv.txt)
    #[arg(long, global = true)]
    remote_path: Option<String>,

    /// Named target from the inventory file
    #[arg(long, short = 't', global = true)]
    target: Option<String>,

    /// Path to the target inventory file (default: ~/.config/uenv-sync/targets.toml)
    #[arg(long, global = true)]
    inventory: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the local uEnv.txt into the device copy
    Update {
        /// Path to the local uEnv.txt
        #[arg(long, short = 'l', default_value = "uEnv.txt")]
        local: PathBuf,

        /// Apply without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show what an update would change, without writing anything
    Preview {
        /// Path to the local uEnv.txt
        #[arg(long, short = 'l', default_value = "uEnv.txt")]
        local: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Take a timestamped backup of the device copy
    Backup {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Restore the device copy from the most recent backup
    Restore {
        /// Restore without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the device copy, its digest, and the available backups
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List configured targets
    Targets {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    match cli.command {
        Commands::Update { local, yes, json } => {
            let (store, remote_path) = connect(&cli.connection);
            let interrupt = install_interrupt();
            run_update(&store, &local, &remote_path, &interrupt, yes, json);
        }
        Commands::Preview { local, json } => {
            let (store, remote_path) = connect(&cli.connection);
            run_preview(&store, &local, &remote_path, json);
        }
        Commands::Backup { json } => {
            let (store, remote_path) = connect(&cli.connection);
            run_backup(&store, &remote_path, json);
        }
        Commands::Restore { yes, json } => {
            let (store, remote_path) = connect(&cli.connection);
            let interrupt = install_interrupt();
            run_restore(&store, &remote_path, &interrupt, yes, json);
        }
        Commands::Show { json } => {
            let (store, remote_path) = connect(&cli.connection);
            run_show(&store, &remote_path, json);
        }
        Commands::Targets { json } => {
            run_targets(cli.connection.inventory.as_deref(), json);
        }
    }
}

/// Resolve connection settings and build the ssh-backed store.
///
/// Precedence: explicit flags (and REMOTE_HOST/REMOTE_USER) override the
/// target entry, which overrides the built-in defaults.
fn connect(args: &ConnectionArgs) -> (SshStore, String) {
    let mut config = SshConfig::default();
    let mut remote_path = DEFAULT_REMOTE_PATH.to_string();

    if let Some(ref name) = args.target {
        let inventory = match load_inventory(args.inventory.as_deref()) {
            Ok(inv) => inv,
            Err(e) => {
                eprintln!("Error loading target inventory: {}", e);
                process::exit(1);
            }
        };

        let target = match inventory.get(name) {
            Some(t) => t,
            None => {
                eprintln!("Target '{}' not found in inventory.", name);
                eprintln!(
                    "Available targets: {}",
                    inventory
                        .targets
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                process::exit(1);
            }
        };

        config.host = target.host.clone();
        config.user = target.user.clone();
        config.port = target.port;
        config.key_path = target
            .expanded_ssh_key_path()
            .map(|p| p.display().to_string());
        remote_path = target.remote_path.clone();
    }

    if let Some(ref host) = args.host {
        config.host = host.clone();
    }
    if let Some(ref user) = args.user {
        config.user = user.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref key) = args.key {
        config.key_path = Some(key.clone());
    }
    if let Some(ref path) = args.remote_path {
        remote_path = path.clone();
    }

    if config.host.is_empty() {
        eprintln!("No device host given. Pass --host, set REMOTE_HOST, or pick --target NAME.");
        process::exit(1);
    }

    (SshStore::new(config), remote_path)
}

fn load_inventory(path: Option<&Path>) -> Result<TargetInventory, InventoryError> {
    match path {
        Some(p) => TargetInventory::load(p),
        None => TargetInventory::load_default(),
    }
}

fn install_interrupt() -> Arc<InterruptState> {
    let guard = InterruptGuard::new();
    if let Err(e) = guard.install() {
        eprintln!("Error installing signal handler: {}", e);
        process::exit(1);
    }
    guard.state()
}

fn run_update(
    store: &SshStore,
    local: &Path,
    remote_path: &str,
    interrupt: &InterruptState,
    yes: bool,
    json: bool,
) {
    // The prompt and the change listing go to stderr so --json output
    // stays parseable.
    let mut confirm = |log: &ChangeLog| {
        if yes {
            return true;
        }
        eprint!("{}", format_change_log(log));
        prompt_yes_no("Apply these changes to the device?")
    };

    match ops::update(store, local, remote_path, interrupt, &mut confirm) {
        Ok(report) => {
            if json {
                print_json(&report);
            } else if !report.applied {
                println!(
                    "Already up to date: {} matches {}",
                    remote_path,
                    local.display()
                );
            } else {
                if yes {
                    print!("{}", format_change_log(&report.changes));
                }
                println!(
                    "Updated {} ({} updated, {} added, {} protected)",
                    remote_path,
                    report.changes.updates(),
                    report.changes.adds(),
                    report.changes.skips()
                );
                if let Some(ref backup) = report.backup_path {
                    println!("Backup: {}", backup);
                }
                if let Some(ref digest) = report.sha256 {
                    println!("Verified sha256: {}", digest);
                }
            }
        }
        Err(OpError::Declined) => {
            eprintln!("Aborted. Nothing was written; the backup was kept.");
            process::exit(1);
        }
        Err(e) => fail(e),
    }
}

fn run_preview(store: &SshStore, local: &Path, remote_path: &str, json: bool) {
    match ops::preview(store, local, remote_path) {
        Ok(report) => {
            if json {
                print_json(&report);
            } else if report.changes.is_noop() {
                println!(
                    "Already up to date: {} matches {}",
                    remote_path,
                    local.display()
                );
            } else {
                print!("{}", format_change_log(&report.changes));
                println!(
                    "Would update {} ({} updated, {} added, {} protected)",
                    remote_path,
                    report.changes.updates(),
                    report.changes.adds(),
                    report.changes.skips()
                );
            }
        }
        Err(e) => fail(e),
    }
}

fn run_backup(store: &SshStore, remote_path: &str, json: bool) {
    match ops::backup(store, remote_path) {
        Ok(report) => {
            if json {
                print_json(&report);
            } else {
                println!("Backed up {} to {}", report.remote_path, report.backup_path);
            }
        }
        Err(e) => fail(e),
    }
}

fn run_restore(
    store: &SshStore,
    remote_path: &str,
    interrupt: &InterruptState,
    yes: bool,
    json: bool,
) {
    let mut confirm = |backup: &BackupInfo| {
        if yes {
            return true;
        }
        prompt_yes_no(&format!(
            "Restore {} from {} (taken {})?",
            remote_path,
            backup.name,
            backup.stamp.format("%Y-%m-%d %H:%M:%S")
        ))
    };

    match ops::restore(store, remote_path, interrupt, &mut confirm) {
        Ok(report) => {
            if json {
                print_json(&report);
            } else {
                println!(
                    "Restored {} from {}",
                    report.remote_path, report.restored_from.name
                );
            }
        }
        Err(OpError::Declined) => {
            eprintln!("Aborted. The device copy was not changed.");
            process::exit(1);
        }
        Err(e) => fail(e),
    }
}

fn run_show(store: &SshStore, remote_path: &str, json: bool) {
    match ops::show(store, remote_path) {
        Ok(report) => {
            if json {
                print_json(&report);
            } else {
                println!("# {} (sha256 {})", report.remote_path, report.sha256);
                print!("{}", report.content);
                if !report.content.ends_with('\n') {
                    println!();
                }
                println!();
                if report.backups.is_empty() {
                    println!("No backups on the device.");
                } else {
                    println!("Backups ({} total):", report.backups.len());
                    for backup in &report.backups {
                        println!(
                            "  {} ({})",
                            backup.name,
                            backup.stamp.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }
        }
        Err(e) => fail(e),
    }
}

fn run_targets(inventory_path: Option<&Path>, json: bool) {
    let inventory = match load_inventory(inventory_path) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("Error loading target inventory: {}", e);
            process::exit(1);
        }
    };

    if json {
        print_json(&inventory.targets);
        return;
    }

    if inventory.is_empty() {
        println!("No targets configured.");
        return;
    }

    println!("Configured targets ({} total):\n", inventory.len());
    for target in &inventory.targets {
        println!("  {} ({})", target.name, target.host);
        println!(
            "    Address: {}@{}:{}",
            target.user, target.host, target.port
        );
        println!("    Remote path: {}", target.remote_path);
        if let Some(ref key) = target.ssh_key_path {
            println!("    SSH key: {}", key);
        }
        println!();
    }
}

/// Render a change log for terminal display. `Same` entries are folded
/// into a count rather than listed.
fn format_change_log(log: &ChangeLog) -> String {
    let mut out = String::new();
    for change in &log.entries {
        match change {
            Change::Skip { key } => {
                out.push_str(&format!("  protected  {} (device value kept)\n", key));
            }
            Change::Update { key, old, new } => {
                out.push_str(&format!("  update     {}\n", key));
                out.push_str(&format!("    - {}\n", old));
                out.push_str(&format!("    + {}\n", new));
            }
            Change::Add { line } => {
                out.push_str(&format!("  add        {}\n", line));
            }
            Change::Same { .. } => {}
        }
    }
    if log.unchanged() > 0 {
        out.push_str(&format!("  ({} lines unchanged)\n", log.unchanged()));
    }
    out
}

fn prompt_yes_no(question: &str) -> bool {
    eprint!("{} [y/N] ", question);
    let _ = io::stderr().flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes" | "YES")
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn fail(e: OpError) -> ! {
    eprintln!("Error: {}", e);
    process::exit(e.exit_code());
}
