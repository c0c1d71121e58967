//! # synapse CLI
//!
//! Command-line front end for a Synapse model store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::{style, Emoji};

use synapse_config::logging::{init_logging, LogLevel};
use synapse_config::Config;
use synapse_core::{BackOutcome, Library, RebuildScope};
use synapse_pack::Pack;

mod doctor;
mod gc;
mod update;

static CHECK: Emoji<'_, '_> = Emoji("✔ ", "[ok] ");
static CROSS: Emoji<'_, '_> = Emoji("✘ ", "[!!] ");
static WARN_ICON: Emoji<'_, '_> = Emoji("⚠ ", "[??] ");

/// Synapse - content-addressed library for generative-model assets
#[derive(Parser)]
#[command(name = "synapse")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Store root (overrides config and SYNAPSE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a pack declaration (pack.json)
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Overwrite an existing pack of the same name
        #[arg(long)]
        replace: bool,
    },

    /// Download and store every dependency of a pack
    Install { pack: String },

    /// Remove a pack declaration (blobs stay until gc)
    Remove { pack: String },

    /// List imported packs
    Packs,

    /// Print a pack declaration as JSON
    Show { pack: String },

    /// Activate a pack on top of global for a UI
    Use {
        pack: String,

        #[arg(long)]
        ui: String,
    },

    /// Return a UI to its previous profile
    Back {
        #[arg(long)]
        ui: String,
    },

    /// Show stack, active profile and view state
    Status {
        /// Only this UI (default: all registered UIs)
        #[arg(long)]
        ui: Option<String>,
    },

    /// Recompute views for a UI from scratch
    Rebuild {
        #[arg(long)]
        ui: String,

        /// Rebuild every stacked profile, not only the top
        #[arg(long)]
        all: bool,
    },

    /// Check follow_latest dependencies for newer versions
    Check { pack: String },

    Update(update::UpdateArgs),

    /// Verify blobs and Holy-Trinity consistency
    Doctor {
        /// Rebuild every stacked view and repoint active pointers
        #[arg(long)]
        rebuild_views: bool,
    },

    Gc(gc::GcArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default config to ~/.synapse/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn main() -> Result<()> {
    init_logging(LogLevel::Warn);

    let cli = Cli::parse();

    synapse_config::reload().context("Failed to load config")?;
    let mut config = synapse_config::config().clone();
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }

    let command = match cli.command {
        Commands::Config { command } => return cmd_config(command, &config),
        command => command,
    };
    let lib = Library::open(config).context("Failed to open store")?;
    run(&lib, command)
}

fn run(lib: &Library, command: Commands) -> Result<()> {
    match command {
        Commands::Import { file, replace } => cmd_import(lib, &file, replace),
        Commands::Install { pack } => cmd_install(lib, &pack),
        Commands::Remove { pack } => {
            lib.remove_pack(&pack)?;
            println!("{} Removed {}", CHECK, style(&pack).bold());
            Ok(())
        }
        Commands::Packs => cmd_packs(lib),
        Commands::Show { pack } => {
            let pack = lib.get_pack(&pack)?;
            println!("{}", serde_json::to_string_pretty(&pack)?);
            Ok(())
        }
        Commands::Use { pack, ui } => {
            let switch = lib.use_pack(&pack, &ui)?;
            for shadow in &switch.view.shadows {
                println!("{} {}", WARN_ICON, style(shadow).yellow());
            }
            for missing in &switch.view.missing {
                println!(
                    "{} {} '{}' has no blob in the store",
                    CROSS,
                    missing.pack,
                    missing.dependency
                );
            }
            println!(
                "{} {} -> {} ({} files)",
                CHECK,
                style(&switch.ui).bold(),
                style(&switch.profile).cyan(),
                switch.view.linked
            );
            println!("  stack: {}", switch.stack.join(" > "));
            Ok(())
        }
        Commands::Back { ui } => {
            match lib.back(&ui)? {
                BackOutcome::Popped { from, to, stack } => {
                    println!("{} {}: {} -> {}", CHECK, style(&ui).bold(), from, style(&to).cyan());
                    println!("  stack: {}", stack.join(" > "));
                }
                BackOutcome::AtGlobal => {
                    println!("{} {} is already at global", WARN_ICON, style(&ui).bold());
                }
            }
            Ok(())
        }
        Commands::Status { ui } => cmd_status(lib, ui),
        Commands::Rebuild { ui, all } => {
            let scope = if all {
                RebuildScope::AllProfiles
            } else {
                RebuildScope::StackTop
            };
            for view in lib.rebuild(&ui, scope)? {
                println!("{} {} ({} files)", CHECK, view.profile, view.linked);
            }
            Ok(())
        }
        Commands::Check { pack } => update::cmd_check(lib, &pack),
        Commands::Update(args) => update::run(lib, args),
        Commands::Doctor { rebuild_views } => doctor::run(lib, rebuild_views),
        Commands::Gc(args) => gc::run(lib, args),
        Commands::Config { command } => cmd_config(command, lib.config()),
    }
}

fn cmd_import(lib: &Library, file: &Path, replace: bool) -> Result<()> {
    let pack = Pack::load(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let pack = lib.import_pack(pack, replace)?;
    println!(
        "{} Imported {} ({} dependencies)",
        CHECK,
        style(&pack.name).bold(),
        pack.dependencies.len()
    );
    Ok(())
}

fn cmd_install(lib: &Library, name: &str) -> Result<()> {
    match lib.install_pack(name) {
        Ok(report) => {
            for warning in &report.warnings {
                println!("{} {}", WARN_ICON, style(warning).yellow());
            }
            println!(
                "{} Installed {}: {} resolved, {} already present",
                CHECK,
                style(&report.pack).bold(),
                report.resolved.len(),
                report.already_installed.len()
            );
            Ok(())
        }
        Err(synapse_core::CoreError::PartialFailure {
            operation,
            succeeded,
            failed,
        }) => {
            for dep in &succeeded {
                println!("  {} {}", CHECK, dep);
            }
            for failure in &failed {
                println!("  {} {}", CROSS, style(failure).red());
            }
            anyhow::bail!("{}: {} of {} dependencies failed", operation, failed.len(), succeeded.len() + failed.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_packs(lib: &Library) -> Result<()> {
    let packs = lib.list_packs()?;
    if packs.is_empty() {
        println!("No packs imported");
        return Ok(());
    }
    for pack in packs {
        let mark = if pack.installed { CHECK } else { WARN_ICON };
        println!(
            "{} {} {} ({} dependencies)",
            mark,
            style(&pack.name).bold(),
            pack.version.as_deref().unwrap_or("-"),
            pack.dependencies
        );
    }
    Ok(())
}

fn cmd_status(lib: &Library, ui: Option<String>) -> Result<()> {
    let uis = match ui {
        Some(ui) => vec![ui],
        None => lib.uis()?,
    };
    let mut inconsistent = false;

    for ui in uis {
        let status = lib.status(&ui)?;
        println!("{}", style(&status.ui).bold());
        println!("  stack:  {}", status.stack.join(" > "));
        println!("  active: {}", status.active.as_deref().unwrap_or("(none)"));
        match status.problem() {
            None => println!("  {} consistent", CHECK),
            Some(problem) => {
                inconsistent = true;
                println!("  {} {}", CROSS, style(problem).red());
            }
        }
    }

    if inconsistent {
        println!();
        println!(
            "{}",
            style("Run 'synapse doctor --rebuild-views' to repair.").dim()
        );
    }
    Ok(())
}

fn cmd_config(command: ConfigCommands, config: &Config) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = Config::global_config_path().context("Cannot determine home directory")?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::default_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Wrote {}", CHECK, path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            print!("{}", toml_string(config)?);
            Ok(())
        }
    }
}

fn toml_string(config: &Config) -> Result<String> {
    let mut config = config.clone();
    config.storage.root = config.store_root();
    Ok(config.to_toml()?)
}
