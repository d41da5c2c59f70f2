//! cfaflash - CFA firmware archive upgrade tool
//!
//! Upgrades the DataFlash of register-mapped boards from CFA firmware
//! archives (or raw bitstreams) and manages the key and license page.
//!
//! # Architecture
//!
//! The CLI only parses arguments, opens a device through
//! `cfaflash-device` and hands it to `cfaflash-core`:
//! - **Upgrade** runs the orchestrator, which parses the archive, matches
//!   the board against the candidate models, then erases, programs and
//!   verifies the selected image slot
//! - **Key, license and release** commands open a flash session, match
//!   the board against the model catalog and run a single operation
//!
//! The device is always closed before a command returns.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use cfaflash_core::archive::ParseOptions;
use cfaflash_core::model::{MatchOptions, ModelCatalog};
use cfaflash_core::transport::CancelToken;
use cfaflash_device::{open_device, DeviceHandle};
use commands::{CommandError, UpgradeArgs};

use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    // Load model catalog
    let catalog = match load_model_catalog(cli.model_db.as_deref()) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("Failed to load model catalog: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Loaded {} model definitions", catalog.len());

    let cancel = setup_cancel_token()?;
    let device = cli.device.as_deref();

    match cli.command {
        Commands::Upgrade {
            input,
            slot,
            rbf,
            no_verify,
            verify_only,
            erase_only,
            key,
            flash_type_register,
            archive,
        } => {
            let args = UpgradeArgs {
                slot,
                raw: rbf,
                mode: UpgradeArgs::mode_from_flags(no_verify, verify_only, erase_only),
                key,
                parse: ParseOptions {
                    legacy_id_cutoff: archive.legacy_cutoff,
                },
                matching: match flash_type_register {
                    Some(register) => MatchOptions {
                        flash_type_register: register,
                    },
                    None => MatchOptions::default(),
                },
            };
            let handle = open(device, &catalog)?;
            commands::cmd_upgrade(handle, &input, &args, &catalog, cancel)
        }
        Commands::Keyinfo => commands::cmd_keyinfo(open(device, &catalog)?, &catalog),
        Commands::Setkey { key } => commands::cmd_setkey(open(device, &catalog)?, key, &catalog),
        Commands::License { delete } => {
            commands::cmd_license(open(device, &catalog)?, delete, &catalog)
        }
        Commands::Fwrelease { register } => {
            commands::cmd_fwrelease(open(device, &catalog)?, register, &catalog)
        }
        Commands::Inspect { input, archive } => commands::cmd_inspect(
            &input,
            &ParseOptions {
                legacy_id_cutoff: archive.legacy_cutoff,
            },
            &catalog,
        ),
        Commands::ListModels { family } => {
            commands::list_models(&catalog, family.as_deref());
            Ok(())
        }
        Commands::ListDevices => {
            commands::list_devices();
            Ok(())
        }
        #[cfg(feature = "tcp")]
        Commands::Serve {
            listen,
            connections,
        } => commands::cmd_serve(open(device, &catalog)?, &listen, connections, cancel),
    }
}

/// Open the device named on the command line
fn open(device: Option<&str>, catalog: &ModelCatalog) -> Result<DeviceHandle, Box<dyn std::error::Error>> {
    let device = device.ok_or(CommandError::NoDevice)?;
    let handle = open_device(device, catalog)?;
    log::debug!("Opened {:?}", handle);
    Ok(handle)
}

/// Cancel the running command on the first Ctrl-C, exit on the second
fn setup_cancel_token() -> Result<CancelToken, ctrlc::Error> {
    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();

    ctrlc::set_handler(move || {
        if handler_cancel.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("Interrupted, stopping after the current page...");
        handler_cancel.cancel();
    })?;

    Ok(cancel)
}

/// Load the model catalog from the specified path or default locations
fn load_model_catalog(path: Option<&Path>) -> Result<ModelCatalog, Box<dyn std::error::Error>> {
    let mut catalog = ModelCatalog::new();

    if let Some(path) = path {
        // User specified a path
        if path.is_dir() {
            catalog.load_dir(path)?;
        } else if path.is_file() {
            catalog.load_file(path)?;
        } else {
            return Err(format!("Model catalog path not found: {}", path.display()).into());
        }
    } else {
        // Try default locations
        let default_paths = [
            PathBuf::from("models"),
            PathBuf::from("/usr/share/cfaflash/models"),
            PathBuf::from("/usr/local/share/cfaflash/models"),
        ];

        let mut loaded = false;
        for dir in &default_paths {
            if dir.is_dir() {
                match catalog.load_dir(dir) {
                    Ok(count) => {
                        log::debug!("Loaded {} models from {}", count, dir.display());
                        loaded = true;
                    }
                    Err(e) => {
                        log::warn!("Failed to load models from {}: {}", dir.display(), e);
                    }
                }
            }
        }

        if !loaded {
            log::warn!("No model catalog found in default locations");
        }
    }

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_models_load() {
        let mut catalog = ModelCatalog::new();
        let count = catalog
            .load_ron(include_str!("../models/cfa.ron"))
            .expect("bundled catalog");
        assert_eq!(count, 3);
        assert_eq!(catalog.find(3).map(|m| m.geometry.page_bytes()), Some(1056));
    }

    #[test]
    fn test_missing_model_db_path() {
        let err = load_model_catalog(Some(Path::new("/nonexistent/cfaflash/models"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_open_requires_device() {
        let err = open(None, &ModelCatalog::new()).unwrap_err();
        assert!(err.to_string().contains("--device"));
    }
}
