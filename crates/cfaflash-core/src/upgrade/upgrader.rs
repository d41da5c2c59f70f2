//! Upgrade orchestrator
//!
//! One run walks `Idle -> Opened -> Parsed -> ModelResolved`, then the
//! phases its [`UpgradeMode`] asks for, and ends in `Done` or `Failed`.
//! The device is closed on every exit path.
//!
//! Pages are programmed strictly in order and, in [`UpgradeMode::Full`],
//! each page is read back and compared before the next one is written.
//! Programming therefore covers the per-page verification; the
//! `Verifying` state is used by [`UpgradeMode::VerifyOnly`].

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use super::progress::{Deciles, NoProgress, Phase, ProgressSink};
use super::session::{compare_page, FlashSession};
use crate::archive::{parse_archive, ParseOptions};
use crate::error::{Error, Result};
use crate::flash::{FlashGeometry, ImageSlot, PollConfig};
use crate::mirror::{BitstreamImage, FlashImage};
use crate::model::{archive_candidates, catalog_candidates, MatchOptions, ModelCatalog};
use crate::transport::{CancelToken, Clock, RegisterDevice};

/// Where the firmware comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeSource {
    /// A CFA archive
    Archive(Vec<u8>),
    /// A raw bitstream; the model is resolved from the catalog alone
    Raw(Vec<u8>),
}

/// What an upgrade run does to the image slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeMode {
    /// Erase, program and verify each page
    #[default]
    Full,
    /// Erase the slot only
    EraseOnly,
    /// Erase and program without reading back
    NoVerify,
    /// Compare the slot against the image without writing
    VerifyOnly,
}

impl UpgradeMode {
    fn erases(self) -> bool {
        matches!(self, Self::Full | Self::EraseOnly | Self::NoVerify)
    }

    fn programs(self) -> bool {
        matches!(self, Self::Full | Self::NoVerify)
    }
}

/// Parameters of one upgrade run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Firmware source
    pub source: UpgradeSource,
    /// Target image slot
    pub slot: ImageSlot,
    /// Phases to run
    pub mode: UpgradeMode,
    /// Key written to the license page after a successful programming run
    pub key: Option<u64>,
    /// Archive decoding options
    pub parse: ParseOptions,
    /// Model matching options
    pub matching: MatchOptions,
}

impl UpgradeRequest {
    /// Full upgrade of the standard slot from an archive
    pub fn archive(bytes: Vec<u8>) -> Self {
        Self::from_source(UpgradeSource::Archive(bytes))
    }

    /// Full upgrade of the standard slot from a raw bitstream
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self::from_source(UpgradeSource::Raw(bytes))
    }

    fn from_source(source: UpgradeSource) -> Self {
        Self {
            source,
            slot: ImageSlot::default(),
            mode: UpgradeMode::default(),
            key: None,
            parse: ParseOptions::default(),
            matching: MatchOptions::default(),
        }
    }

    /// Target another image slot
    pub fn with_slot(mut self, slot: ImageSlot) -> Self {
        self.slot = slot;
        self
    }

    /// Run another mode
    pub fn with_mode(mut self, mode: UpgradeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Write `key` to the license page after programming
    pub fn with_key(mut self, key: u64) -> Self {
        self.key = Some(key);
        self
    }
}

/// Terminal result of a run that reached the flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Every requested phase completed
    Success,
    /// A page read back differently from what was written
    VerifyMismatch,
}

/// Orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    /// Not started
    Idle,
    /// Device handle owned by the run
    Opened,
    /// Firmware source decoded
    Parsed,
    /// Board model matched and geometry bound
    ModelResolved,
    /// Erasing the image slot
    Erasing,
    /// Programming pages
    Programming,
    /// Comparing pages without writing
    Verifying,
    /// Finished; the device is closed
    Done(UpgradeOutcome),
    /// Aborted; the device is closed
    Failed(Error),
}

impl UpgradeState {
    /// Check whether the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

impl core::fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Opened => write!(f, "opened"),
            Self::Parsed => write!(f, "parsed"),
            Self::ModelResolved => write!(f, "model resolved"),
            Self::Erasing => write!(f, "erasing"),
            Self::Programming => write!(f, "programming"),
            Self::Verifying => write!(f, "verifying"),
            Self::Done(UpgradeOutcome::Success) => write!(f, "done"),
            Self::Done(UpgradeOutcome::VerifyMismatch) => write!(f, "done (verify mismatch)"),
            Self::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeReport {
    /// Matched model id
    pub model_id: u32,
    /// Matched model name, when known
    pub model_name: Option<String>,
    /// First page of the target slot
    pub slot_base_page: u32,
    /// Pages programmed
    pub pages_written: u32,
    /// Pages read back and compared
    pub pages_verified: u32,
    /// Erase commands issued
    pub erase_ops: u32,
    /// Firmware bytes programmed
    pub bytes_written: usize,
    /// Whether the key post-step ran
    pub key_written: bool,
}

/// Page layout of an image inside its slot
#[derive(Debug, Clone, Copy)]
struct ImagePlan {
    base: u32,
    pages: u32,
    page_bytes: usize,
    image_len: usize,
    /// Splice offset when the image is smaller than one page
    pll_offset: Option<usize>,
}

impl ImagePlan {
    fn new(geometry: &FlashGeometry, slot: ImageSlot, image_len: usize) -> Result<Self> {
        geometry.check_page_range()?;
        let base = geometry.slot_base(slot)?;
        let page_bytes = geometry.page_bytes();
        let slot_bytes = geometry.slot_bytes();

        if image_len > slot_bytes {
            return Err(Error::ImageTooLarge {
                image_bytes: image_len,
                slot_bytes,
            });
        }

        let (pages, pll_offset) = if image_len > 0 && image_len < page_bytes {
            let offset = geometry.pll_offset();
            if offset + image_len > page_bytes {
                return Err(Error::ImageTooLarge {
                    image_bytes: image_len,
                    slot_bytes: page_bytes - offset,
                });
            }
            (1, Some(offset))
        } else {
            (image_len.div_ceil(page_bytes) as u32, None)
        };

        Ok(Self {
            base,
            pages,
            page_bytes,
            image_len,
            pll_offset,
        })
    }

    // `index < pages <= coverage`, and `base + coverage` was checked in `new`
    fn page(&self, index: u32) -> u32 {
        self.base + index
    }

    fn is_last(&self, index: u32) -> bool {
        index + 1 == self.pages
    }

    /// Whether the last page keeps bytes that are not part of the image
    fn needs_snapshot(&self) -> bool {
        self.pll_offset.is_some() || self.image_len % self.page_bytes != 0
    }

    /// Firmware bytes of page `index`: (range in page, range in image)
    fn ranges(&self, index: u32) -> (Range<usize>, Range<usize>) {
        match self.pll_offset {
            Some(offset) => (offset..offset + self.image_len, 0..self.image_len),
            None => {
                let start = index as usize * self.page_bytes;
                let end = (start + self.page_bytes).min(self.image_len);
                (0..end - start, start..end)
            }
        }
    }

    /// Full contents of page `index` after programming
    fn compose(&self, index: u32, image: &[u8], snapshot: Option<&[u8]>) -> Vec<u8> {
        let mut page = match snapshot {
            Some(snapshot) if self.is_last(index) => snapshot.to_vec(),
            _ => vec![0xFF; self.page_bytes],
        };
        let (dst, src) = self.ranges(index);
        page[dst].copy_from_slice(&image[src]);
        page
    }
}

/// Runs one upgrade against an exclusively owned device
pub struct Upgrader<D: RegisterDevice, C: Clock> {
    session: FlashSession<D, C>,
    cancel: Option<CancelToken>,
    state: UpgradeState,
}

impl<D: RegisterDevice, C: Clock> Upgrader<D, C> {
    /// Create an upgrader owning `device`
    pub fn new(device: D, clock: C) -> Self {
        Self {
            session: FlashSession::new(device, clock),
            cancel: None,
            state: UpgradeState::Idle,
        }
    }

    /// Use custom status polling parameters
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.session = self.session.with_poll(poll);
        self
    }

    /// Abort the run when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.session = self.session.with_cancel(cancel.clone());
        self.cancel = Some(cancel);
        self
    }

    /// Current state
    pub fn state(&self) -> &UpgradeState {
        &self.state
    }

    /// Run the upgrade without progress reporting
    pub fn run(self, request: &UpgradeRequest, catalog: &ModelCatalog) -> Result<UpgradeReport> {
        self.run_with_progress(request, catalog, &mut NoProgress)
    }

    /// Run the upgrade, reporting states and progress to `progress`
    ///
    /// The device is closed before this returns, whatever the outcome.
    pub fn run_with_progress<P: ProgressSink + ?Sized>(
        mut self,
        request: &UpgradeRequest,
        catalog: &ModelCatalog,
        progress: &mut P,
    ) -> Result<UpgradeReport> {
        let result = self.execute(request, catalog, progress);
        let closed = self.session.close();

        match (result, closed) {
            (Ok(report), Ok(())) => {
                self.transition(UpgradeState::Done(UpgradeOutcome::Success), progress);
                log::info!(
                    "Upgrade complete: {} pages written, {} verified, {} erase operations",
                    report.pages_written,
                    report.pages_verified,
                    report.erase_ops
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                self.transition(UpgradeState::Failed(e), progress);
                Err(e)
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    log::warn!("Failed to close device after error: {}", close_err);
                }
                let state = match e {
                    Error::VerifyMismatch { .. } => {
                        UpgradeState::Done(UpgradeOutcome::VerifyMismatch)
                    }
                    e => UpgradeState::Failed(e),
                };
                self.transition(state, progress);
                Err(e)
            }
        }
    }

    fn transition<P: ProgressSink + ?Sized>(&mut self, next: UpgradeState, progress: &mut P) {
        log::debug!("Upgrade state: {} -> {}", self.state, next);
        progress.state(&next);
        self.state = next;
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            log::warn!("Upgrade cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn execute<P: ProgressSink + ?Sized>(
        &mut self,
        request: &UpgradeRequest,
        catalog: &ModelCatalog,
        progress: &mut P,
    ) -> Result<UpgradeReport> {
        self.transition(UpgradeState::Opened, progress);

        let archive = match &request.source {
            UpgradeSource::Archive(bytes) => {
                let archive = parse_archive(bytes, &request.parse)?;
                for summary in archive.summaries() {
                    log::info!("{}", summary);
                }
                Some(archive)
            }
            UpgradeSource::Raw(bytes) => {
                log::info!("Raw image, {} bytes", bytes.len());
                None
            }
        };
        self.transition(UpgradeState::Parsed, progress);

        let candidates = match &archive {
            Some(archive) => archive_candidates(archive, catalog),
            None => catalog_candidates(catalog),
        };
        let model = self.session.resolve(&candidates, &request.matching)?;
        self.transition(UpgradeState::ModelResolved, progress);

        let bitstream = match (archive, &request.source) {
            (Some(archive), _) => model
                .segment
                .and_then(|index| archive.into_segment_image(index))
                .ok_or(Error::NoCompatibleModel)?,
            (None, UpgradeSource::Raw(bytes)) => BitstreamImage::new(bytes.clone()),
            (None, UpgradeSource::Archive(_)) => return Err(Error::NoCompatibleModel),
        };
        let image = bitstream.into_flash_order();

        let geometry = model.geometry.clone();
        let plan = ImagePlan::new(&geometry, request.slot, image.len())?;
        log::info!(
            "Target {} slot at page {}: {} bytes in {} page(s) of {} bytes",
            request.slot,
            plan.base,
            image.len(),
            plan.pages,
            plan.page_bytes
        );

        let mut report = UpgradeReport {
            model_id: model.model_id(),
            model_name: model.name.clone(),
            slot_base_page: plan.base,
            ..Default::default()
        };

        let mode = request.mode;

        // Snapshot the bytes sharing the last page before anything is erased
        let snapshot = if mode.programs() && plan.pages > 0 && plan.needs_snapshot() {
            let last = plan.page(plan.pages - 1);
            log::debug!("Saving page {} before erase", last);
            Some(self.session.flash()?.read_page_vec(last)?)
        } else {
            None
        };

        if mode.erases() {
            self.erase_slot(&geometry, &plan, &mut report, progress)?;
        }

        if mode.programs() {
            self.program(&plan, &image, snapshot.as_deref(), mode, &mut report, progress)?;
        }

        if mode == UpgradeMode::VerifyOnly {
            self.verify(&plan, &image, &mut report, progress)?;
        }

        if let Some(key) = request.key {
            if mode.programs() {
                self.session.write_key(key)?;
                report.key_written = true;
            } else {
                log::warn!("Key is only written after programming; ignoring it");
            }
        }

        Ok(report)
    }

    fn erase_slot<P: ProgressSink + ?Sized>(
        &mut self,
        geometry: &FlashGeometry,
        plan: &ImagePlan,
        report: &mut UpgradeReport,
        progress: &mut P,
    ) -> Result<()> {
        self.transition(UpgradeState::Erasing, progress);
        let ops = geometry.erase.plan(plan.base)?;
        log::info!("Erasing {} {:?} unit(s)", ops.len(), geometry.erase.unit());

        let mut deciles = Deciles::start(Phase::Erase, ops.len(), progress);
        for (done, op) in ops.into_iter().enumerate() {
            self.check_cancelled()?;
            self.session.flash()?.erase(op)?;
            report.erase_ops += 1;
            deciles.update(done + 1, progress);
        }
        deciles.finish(progress);
        Ok(())
    }

    fn program<P: ProgressSink + ?Sized>(
        &mut self,
        plan: &ImagePlan,
        image: &FlashImage,
        snapshot: Option<&[u8]>,
        mode: UpgradeMode,
        report: &mut UpgradeReport,
        progress: &mut P,
    ) -> Result<()> {
        self.transition(UpgradeState::Programming, progress);
        let verify = mode == UpgradeMode::Full;

        let mut deciles = Deciles::start(Phase::Program, plan.pages as usize, progress);
        for index in 0..plan.pages {
            self.check_cancelled()?;
            let page = plan.page(index);
            let data = plan.compose(index, image.as_bytes(), snapshot);

            let mut flash = self.session.flash()?;
            flash.write_page(page, &data)?;
            report.pages_written += 1;

            if verify {
                let readback = flash.read_page_vec(page)?;
                compare_page(page, &data, &readback, 0..data.len())?;
                report.pages_verified += 1;
            }
            deciles.update(index as usize + 1, progress);
        }
        deciles.finish(progress);

        report.bytes_written = image.len();
        Ok(())
    }

    fn verify<P: ProgressSink + ?Sized>(
        &mut self,
        plan: &ImagePlan,
        image: &FlashImage,
        report: &mut UpgradeReport,
        progress: &mut P,
    ) -> Result<()> {
        self.transition(UpgradeState::Verifying, progress);

        let mut deciles = Deciles::start(Phase::Verify, plan.pages as usize, progress);
        for index in 0..plan.pages {
            self.check_cancelled()?;
            let page = plan.page(index);
            let actual = self.session.flash()?.read_page_vec(page)?;

            let (dst, src) = plan.ranges(index);
            let mut expected = actual.clone();
            expected[dst.clone()].copy_from_slice(&image.as_bytes()[src]);
            compare_page(page, &expected, &actual, dst)?;

            report.pages_verified += 1;
            deciles.update(index as usize + 1, progress);
        }
        deciles.finish(progress);
        Ok(())
    }
}
