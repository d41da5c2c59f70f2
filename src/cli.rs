//! CLI argument parsing

use cfaflash_core::flash::ImageSlot;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse an image slot: `standard`, `backup` or a slot index
fn parse_slot(s: &str) -> Result<ImageSlot, String> {
    match s.to_ascii_lowercase().as_str() {
        "standard" | "std" => Ok(ImageSlot::Standard),
        "backup" => Ok(ImageSlot::Backup),
        other => other
            .parse::<usize>()
            .map(ImageSlot::Index)
            .map_err(|_| format!("Invalid slot '{}' (expected standard, backup or a number)", s)),
    }
}

/// Parse a key of up to 16 hex digits, with or without a 0x prefix
fn parse_key(s: &str) -> Result<u64, String> {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if hex.is_empty() || hex.len() > 16 {
        return Err(format!("Invalid key '{}': expected 1 to 16 hex digits", s));
    }
    u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid key '{}': {}", s, e))
}

/// Generate dynamic help text for the device argument
fn device_help() -> String {
    format!(
        "Device to use, as name:key=value,... [available: {}]",
        cfaflash_device::device_names_short()
    )
}

#[derive(Parser)]
#[command(name = "cfaflash")]
#[command(author, version, about = "CFA firmware archive upgrade tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to model catalog directory or file (.ron)
    /// Defaults to looking in ./models/ and /usr/share/cfaflash/models/
    #[arg(long, global = true)]
    pub model_db: Option<PathBuf>,

    #[arg(short, long, global = true, help = device_help())]
    pub device: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Archive decoding options shared across commands
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct ArchiveArgs {
    /// Segment type ids above this value use the legacy numbering
    #[arg(long, default_value = "100")]
    pub legacy_cutoff: u32,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upgrade the board firmware from an archive or raw bitstream
    Upgrade {
        /// Firmware archive (or raw bitstream with --rbf)
        input: PathBuf,

        /// Image slot: standard, backup or a slot index
        #[arg(default_value = "standard", value_parser = parse_slot)]
        slot: ImageSlot,

        /// Input is a raw bitstream; the model is matched from the catalog
        #[arg(long, alias = "raw")]
        rbf: bool,

        /// Program without reading pages back
        #[arg(long, conflicts_with_all = ["verify_only", "erase_only"])]
        no_verify: bool,

        /// Compare the slot against the image without writing
        #[arg(long, conflicts_with = "erase_only")]
        verify_only: bool,

        /// Only erase the slot
        #[arg(long)]
        erase_only: bool,

        /// Key to write to the license page after programming (hex)
        #[arg(long, value_parser = parse_key)]
        key: Option<u64>,

        /// Register holding the flash type (hex, e.g., 0xF050)
        #[arg(long, value_parser = parse_hex_u32)]
        flash_type_register: Option<u32>,

        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// Show the security register and the stored key
    Keyinfo,

    /// Write a key to the license page
    Setkey {
        /// Key (up to 16 hex digits)
        #[arg(value_parser = parse_key)]
        key: u64,
    },

    /// Show or delete the license data
    License {
        /// Erase the license data (the key is kept)
        #[arg(long)]
        delete: bool,
    },

    /// Show the release of the running firmware
    Fwrelease {
        /// Firmware release register (hex)
        #[arg(long, default_value = "0x8124", value_parser = parse_hex_u32)]
        register: u32,
    },

    /// Decode an archive and print its segments
    Inspect {
        /// Firmware archive
        input: PathBuf,

        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// List models in the catalog
    ListModels {
        /// Filter by family name
        #[arg(short, long)]
        family: Option<String>,
    },

    /// List available device backends
    ListDevices,

    /// Expose the device as a TCP register bridge
    #[cfg(feature = "tcp")]
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:5025")]
        listen: String,

        /// Stop after serving this many connections
        #[arg(long)]
        connections: Option<usize>,
    },
}
