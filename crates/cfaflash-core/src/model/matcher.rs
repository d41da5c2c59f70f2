//! Register-probing model matcher

use super::types::Candidate;
use crate::error::{Error, Result};
use crate::transport::RegisterAccess;

/// Register reporting the flash type fitted on the board
pub const FLASH_TYPE_REGISTER: u32 = 0xF050;

/// Matcher options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Register read for the flash type gate
    pub flash_type_register: u32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            flash_type_register: FLASH_TYPE_REGISTER,
        }
    }
}

/// Select the first candidate that the board confirms
///
/// Candidates are tried in order. A candidate is confirmed when every
/// register check reads back its expected value and the flash type
/// register agrees with the candidate's enable level
/// (`flash_type * 2 == enable_level`). A failed check moves on to the next
/// candidate; a failed register access aborts the match.
pub fn match_model<'c, R: RegisterAccess + ?Sized>(
    candidates: &'c [Candidate],
    regs: &mut R,
    options: &MatchOptions,
) -> Result<&'c Candidate> {
    for candidate in candidates {
        if confirm(candidate, regs, options)? {
            log::info!(
                "Board matches model {}{}",
                candidate.model_id(),
                candidate
                    .name
                    .as_deref()
                    .map(|n| alloc::format!(" ({})", n))
                    .unwrap_or_default()
            );
            return Ok(candidate);
        }
    }
    log::warn!(
        "None of {} candidate model(s) matched the board",
        candidates.len()
    );
    Err(Error::NoCompatibleModel)
}

fn confirm<R: RegisterAccess + ?Sized>(
    candidate: &Candidate,
    regs: &mut R,
    options: &MatchOptions,
) -> Result<bool> {
    let width = candidate.geometry.register_width;

    for check in &candidate.descriptor.checks {
        let value = regs.read_register(check.address, width)?;
        if value != check.expected & width.mask() {
            log::debug!(
                "Model {}: register 0x{:04X} reads 0x{:X}, expected 0x{:X}",
                candidate.model_id(),
                check.address,
                value,
                check.expected
            );
            return Ok(false);
        }
    }

    let flash_type = regs.read_register(options.flash_type_register, width)?;
    if flash_type.wrapping_mul(2) != candidate.geometry.enable_level {
        log::debug!(
            "Model {}: flash type {} does not fit enable level {}",
            candidate.model_id(),
            flash_type,
            candidate.geometry.enable_level
        );
        return Ok(false);
    }

    Ok(true)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::flash::PageSize;
    use crate::model::{ModelDescriptor, RegisterCheck};
    use crate::testutil::{geometry, MockBoard};
    use crate::transport::RegisterWidth;
    use alloc::vec;
    use alloc::vec::Vec;

    const ID_REGISTER: u32 = 0x8100;

    fn candidate(model_id: u32, expected: u32, enable_level: u32) -> Candidate {
        let mut geometry = geometry(PageSize::P264, RegisterWidth::W32);
        geometry.enable_level = enable_level;
        Candidate {
            descriptor: ModelDescriptor {
                model_id,
                checks: vec![RegisterCheck {
                    address: ID_REGISTER,
                    expected,
                }],
            },
            name: None,
            geometry,
            segment: Some(0),
        }
    }

    fn board(id: u32, flash_type: u32) -> MockBoard {
        let mut board = MockBoard::new(&geometry(PageSize::P264, RegisterWidth::W32), 64);
        board.set_register(ID_REGISTER, id);
        board.set_register(FLASH_TYPE_REGISTER, flash_type);
        board
    }

    #[test]
    fn test_first_failing_second_matching() {
        let candidates = vec![candidate(3, 3, 0), candidate(7, 7, 0)];
        let mut board = board(7, 0);

        let selected = match_model(&candidates, &mut board, &MatchOptions::default()).unwrap();
        assert_eq!(selected.model_id(), 7);
    }

    #[test]
    fn test_no_match() {
        let candidates = vec![candidate(3, 3, 0), candidate(7, 7, 0)];
        let mut board = board(5, 0);

        assert_eq!(
            match_model(&candidates, &mut board, &MatchOptions::default()),
            Err(Error::NoCompatibleModel)
        );
    }

    #[test]
    fn test_empty_candidates() {
        let mut board = board(5, 0);
        assert_eq!(
            match_model(&[], &mut board, &MatchOptions::default()),
            Err(Error::NoCompatibleModel)
        );
    }

    #[test]
    fn test_flash_type_gate() {
        // Same predicates, different flash type; only the second fits
        let candidates = vec![candidate(7, 7, 0), candidate(8, 7, 2)];
        let mut board = board(7, 1);

        let selected = match_model(&candidates, &mut board, &MatchOptions::default()).unwrap();
        assert_eq!(selected.model_id(), 8);
    }

    #[test]
    fn test_declaration_order_wins() {
        let candidates = vec![candidate(7, 7, 0), candidate(9, 7, 0)];
        let mut board = board(7, 0);

        let selected = match_model(&candidates, &mut board, &MatchOptions::default()).unwrap();
        assert_eq!(selected.model_id(), 7);

        let reversed: Vec<Candidate> = candidates.into_iter().rev().collect();
        let selected = match_model(&reversed, &mut board, &MatchOptions::default()).unwrap();
        assert_eq!(selected.model_id(), 9);
    }

    #[test]
    fn test_custom_flash_type_register() {
        let candidates = vec![candidate(7, 7, 4)];
        let mut board = board(7, 0);
        board.set_register(0xF060, 2);

        let options = MatchOptions {
            flash_type_register: 0xF060,
        };
        let selected = match_model(&candidates, &mut board, &options).unwrap();
        assert_eq!(selected.model_id(), 7);
    }

    #[test]
    fn test_register_failure_aborts() {
        let candidates = vec![candidate(7, 7, 0)];
        let mut board = board(7, 0);
        board.fail_after(0);

        assert!(matches!(
            match_model(&candidates, &mut board, &MatchOptions::default()),
            Err(Error::RegisterIo { .. })
        ));
    }

    #[test]
    fn test_16_bit_checks() {
        let mut c = candidate(7, 0x0007, 0);
        c.geometry.register_width = RegisterWidth::W16;
        let mut board = board(0xABCD_0007, 0);

        let selected = match_model(core::slice::from_ref(&c), &mut board, &MatchOptions::default());
        assert_eq!(selected.map(|c| c.model_id()), Ok(7));
    }
}
