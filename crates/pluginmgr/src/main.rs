use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{debug, error};
use pluginmgr_core::{AbstractManager, LoadState, ManagerSettings};

/// Inspect and load plugin directories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Directory holding plugin binaries and their metadata files
    #[arg(short, long)]
    directory: PathBuf,

    /// Interface string the plugins have to report, required for loading
    #[arg(long)]
    interface: Option<String>,

    /// Plugin binary suffix, defaults to the platform's shared library suffix
    #[arg(long)]
    suffix: Option<String>,

    /// Metadata file suffix, empty if plugins have no metadata files
    #[arg(long)]
    metadata_suffix: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List discovered plugins and their load state
    List {
        /// Also list every alias and the plugin it resolves to
        #[arg(long)]
        aliases: bool,
    },
    /// Show the metadata of one plugin
    Inspect {
        /// Plugin name or alias
        plugin: String,
    },
    /// Load plugins and their dependencies, then unload them again
    Load {
        /// Plugin names, aliases or paths to plugin binaries
        #[arg(required = true)]
        plugins: Vec<String>,
    },
}

// Manager settings carry 'static strings, the CLI lives for the whole process.
fn leak(value: String) -> &'static str {
    Box::leak(value.into_boxed_str())
}

fn build_manager(args: &CliArgs, interface: &str) -> AbstractManager {
    let mut settings = ManagerSettings::new(leak(interface.to_string()));
    if let Some(suffix) = &args.suffix {
        settings.plugin_suffix = leak(suffix.clone());
    }
    if let Some(metadata_suffix) = &args.metadata_suffix {
        settings.metadata_suffix = leak(metadata_suffix.clone());
    }
    settings.plugin_directory = Some(args.directory.clone());
    debug!("Creating manager with {:?}", settings);
    AbstractManager::new(settings)
}

fn list(manager: &AbstractManager, aliases: bool) -> ExitCode {
    let plugins = manager.plugin_list();
    if plugins.is_empty() {
        println!("No plugins found in {}", manager.plugin_directory().unwrap_or_default().display());
        return ExitCode::SUCCESS;
    }
    for plugin in &plugins {
        println!("{} {}", plugin, manager.load_state(plugin));
    }
    if aliases {
        println!();
        for alias in manager.alias_list() {
            let target = manager.metadata(&alias).map(|metadata| metadata.name().to_string());
            println!("{} -> {}", alias, target.unwrap_or_default());
        }
    }
    ExitCode::SUCCESS
}

fn inspect(manager: &AbstractManager, plugin: &str) -> ExitCode {
    let state = manager.load_state(plugin);
    let Some(metadata) = manager.metadata(plugin) else {
        eprintln!("Plugin '{}' was not found", plugin);
        return ExitCode::FAILURE;
    };
    println!("Name: {}", metadata.name());
    println!("State: {}", state);
    println!("Depends: {}", metadata.depends().join(", "));
    println!("Provides: {}", metadata.provides().join(", "));
    println!("Used by: {}", metadata.used_by().join(", "));
    match serde_json::to_string_pretty(&metadata.configuration().to_value()) {
        Ok(configuration) => println!("Configuration: {}", configuration),
        Err(e) => error!("Failed to serialize configuration of {}: {}", metadata.name(), e),
    }
    ExitCode::SUCCESS
}

fn load(manager: &AbstractManager, plugins: &[String]) -> ExitCode {
    let mut loaded = Vec::new();
    let mut failed = false;
    for plugin in plugins {
        let state = manager.load(plugin);
        println!("{} {}", plugin, state);
        if state == LoadState::Loaded {
            loaded.push(plugin.clone());
        } else if !state.is_active() {
            failed = true;
        }
    }
    // Unload in reverse so dependents go first. Dropping the manager takes
    // care of dependencies that were pulled in along the way.
    for plugin in loaded.iter().rev() {
        let state = manager.unload(plugin);
        debug!("Unloading {}: {}", plugin, state);
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if !args.directory.is_dir() {
        eprintln!("Plugin directory {} does not exist", args.directory.display());
        return ExitCode::FAILURE;
    }

    match &args.command {
        Commands::List { aliases } => {
            let manager = build_manager(&args, args.interface.as_deref().unwrap_or_default());
            list(&manager, *aliases)
        }
        Commands::Inspect { plugin } => {
            let manager = build_manager(&args, args.interface.as_deref().unwrap_or_default());
            inspect(&manager, plugin)
        }
        Commands::Load { plugins } => {
            let Some(interface) = args.interface.as_deref() else {
                eprintln!("Loading plugins requires --interface");
                return ExitCode::FAILURE;
            };
            let manager = build_manager(&args, interface);
            load(&manager, plugins)
        }
    }
}
