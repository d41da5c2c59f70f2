//! Upgrade command implementation

use std::path::Path;

use cfaflash_core::archive::ParseOptions;
use cfaflash_core::flash::ImageSlot;
use cfaflash_core::model::{MatchOptions, ModelCatalog};
use cfaflash_core::transport::{CancelToken, RegisterDevice, SystemClock};
use cfaflash_core::upgrade::{
    Phase, ProgressSink, UpgradeMode, UpgradeRequest, UpgradeState, Upgrader,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::read_input;

/// Options of one `upgrade` invocation
#[derive(Debug, Clone)]
pub struct UpgradeArgs {
    /// Target image slot
    pub slot: ImageSlot,
    /// Input is a raw bitstream rather than an archive
    pub raw: bool,
    /// Phases to run
    pub mode: UpgradeMode,
    /// Key for the license page post-step
    pub key: Option<u64>,
    /// Archive decoding options
    pub parse: ParseOptions,
    /// Model matching options
    pub matching: MatchOptions,
}

impl UpgradeArgs {
    /// Pick the run mode from the mutually exclusive CLI flags
    pub fn mode_from_flags(no_verify: bool, verify_only: bool, erase_only: bool) -> UpgradeMode {
        if erase_only {
            UpgradeMode::EraseOnly
        } else if verify_only {
            UpgradeMode::VerifyOnly
        } else if no_verify {
            UpgradeMode::NoVerify
        } else {
            UpgradeMode::Full
        }
    }

    fn request(&self, bytes: Vec<u8>) -> UpgradeRequest {
        let mut request = if self.raw {
            UpgradeRequest::raw(bytes)
        } else {
            UpgradeRequest::archive(bytes)
        }
        .with_slot(self.slot)
        .with_mode(self.mode);
        if let Some(key) = self.key {
            request = request.with_key(key);
        }
        request.parse = self.parse;
        request.matching = self.matching;
        request
    }
}

/// Progress reporter using indicatif progress bars
struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
    phase: Option<Phase>,
}

impl IndicatifProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
            phase: None,
        }
    }

    fn create_bar(&mut self, phase: Phase) {
        self.finish();
        let pb = self.multi.add(ProgressBar::new(100));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos:>3}}% {}",
                    phase
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.current_bar = Some(pb);
        self.phase = Some(phase);
    }

    fn finish(&mut self) {
        if let (Some(pb), Some(phase)) = (self.current_bar.take(), self.phase.take()) {
            pb.finish_with_message(format!("{} complete", phase));
        }
    }

    fn abandon(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
        self.phase = None;
    }
}

impl ProgressSink for IndicatifProgress {
    fn state(&mut self, state: &UpgradeState) {
        match state {
            UpgradeState::Done(_) => self.finish(),
            UpgradeState::Failed(_) => self.abandon(),
            _ => {}
        }
    }

    fn progress(&mut self, phase: Phase, percent: u8) {
        if self.phase != Some(phase) {
            self.create_bar(phase);
        }
        if let Some(pb) = &self.current_bar {
            pb.set_position(percent as u64);
        }
    }
}

/// Run an upgrade from `input` on `device`
///
/// The device is closed before this returns: by the orchestrator once it
/// owns it, or here when the input cannot be read.
pub fn cmd_upgrade<D: RegisterDevice>(
    mut device: D,
    input: &Path,
    args: &UpgradeArgs,
    catalog: &ModelCatalog,
    cancel: CancelToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = match read_input(input) {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(close) = device.close() {
                log::warn!("Failed to close device: {}", close);
            }
            return Err(e.into());
        }
    };
    log::info!(
        "Upgrading {} slot from {} ({} bytes, {})",
        args.slot,
        input.display(),
        bytes.len(),
        if args.raw { "raw bitstream" } else { "archive" }
    );

    let request = args.request(bytes);
    let mut progress = IndicatifProgress::new();
    let report = Upgrader::new(device, SystemClock::new())
        .with_cancel(cancel)
        .run_with_progress(&request, catalog, &mut progress)?;

    match &report.model_name {
        Some(name) => println!("Model:          {} ({})", report.model_id, name),
        None => println!("Model:          {}", report.model_id),
    }
    println!("Slot:           {} (page {})", args.slot, report.slot_base_page);
    println!("Erase ops:      {}", report.erase_ops);
    println!("Pages written:  {}", report.pages_written);
    println!("Pages verified: {}", report.pages_verified);
    println!("Bytes written:  {}", report.bytes_written);
    if report.key_written {
        println!("Key:            written");
    }
    println!("Upgrade complete.");
    Ok(())
}
