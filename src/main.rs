use clap::Parser;
use egil_scim_client::cache::codec;
use egil_scim_client::{run_config_file, AppConfig, RunOptions, SyncResult};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Synchronise school-domain records with a SCIM server.
#[derive(Debug, Parser)]
#[command(name = "egil-scim-client", version, about)]
struct Cli {
    /// Configuration files to process, one sync run each
    #[arg(required = true, value_name = "CONFIG")]
    config_files: Vec<PathBuf>,

    /// Send every current object as a create and rebuild the cache
    #[arg(long)]
    rebuild_cache: bool,

    /// Exclude a type from loading (repeatable)
    #[arg(long = "skip-load", value_name = "TYPE")]
    skip_load: Vec<String>,

    /// Stop before dispatching any SCIM operations
    #[arg(long)]
    test: bool,

    /// Print the contents of each configuration's cache file and exit
    #[arg(long)]
    print_cache: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let options = RunOptions {
        rebuild_cache: cli.rebuild_cache,
        skip_types: cli.skip_load.clone(),
        dry_run: cli.test,
    };

    let mut any_failed = false;
    for path in &cli.config_files {
        info!("processing {}", path.display());

        let result = if cli.print_cache {
            print_cache(path)
        } else {
            run_config_file(path, &options)
        };

        match result {
            Ok(()) => {
                if !cli.print_cache {
                    info!(
                        "successfully performed SCIM operations for {}",
                        path.display()
                    );
                }
            }
            Err(e) => {
                error!("{}: {e}", path.display());
                any_failed = true;
            }
        }
    }

    if any_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Operator debugging aid: dump the cache a configuration points at.
fn print_cache(config_path: &Path) -> SyncResult<()> {
    let config = AppConfig::load(config_path)?;
    let cache_path = config.resolve_path(&config.cache_file);
    let cached = codec::read(&cache_path)?;

    println!("{} objects in {}", cached.len(), cache_path.display());
    for object in cached.iter() {
        println!("{} {}", object.egil_type(), object.id());
        match serde_json::from_str::<serde_json::Value>(object.json()) {
            Ok(value) => match serde_json::to_string_pretty(&value) {
                Ok(pretty) => println!("{pretty}"),
                Err(_) => println!("{}", object.json()),
            },
            Err(_) => println!("{}", object.json()),
        }
    }
    Ok(())
}
