//! Flash geometry of a board model

use alloc::vec::Vec;

use super::opcodes;
use crate::error::{Error, Result};
use crate::transport::RegisterWidth;

/// DataFlash page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSize {
    /// 264-byte pages
    P264,
    /// 528-byte pages
    P528,
    /// 1056-byte pages
    P1056,
}

impl PageSize {
    /// Parse a page size given in bytes
    pub fn from_bytes(bytes: u32) -> Result<Self> {
        match bytes {
            264 => Ok(Self::P264),
            528 => Ok(Self::P528),
            1056 => Ok(Self::P1056),
            other => Err(Error::UnsupportedPageSize(other)),
        }
    }

    /// Page size in bytes
    pub const fn bytes(self) -> usize {
        match self {
            Self::P264 => 264,
            Self::P528 => 528,
            Self::P1056 => 1056,
        }
    }

    /// Shift turning a page index into the page bits of a byte address
    pub const fn address_shift(self) -> u32 {
        match self {
            Self::P264 => 9,
            Self::P528 => 10,
            Self::P1056 => 11,
        }
    }

    /// Bytes beyond the largest power of two that fits in a page
    pub const fn spare_bytes(self) -> usize {
        match self {
            Self::P264 => 8,
            Self::P528 => 16,
            Self::P1056 => 32,
        }
    }
}

/// Kind of erase command used for one erase unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseUnit {
    /// Single page erase
    Page,
    /// 8-page block erase
    Block,
    /// Sector erase
    Sector,
}

impl EraseUnit {
    /// Opcode issuing this erase
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Page => opcodes::PAGE_ERASE,
            Self::Block => opcodes::BLOCK_ERASE,
            Self::Sector => opcodes::SECTOR_ERASE,
        }
    }
}

/// One erase command of an erase plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseOp {
    /// Erase command
    pub unit: EraseUnit,
    /// First page covered by the command
    pub page: u32,
}

/// Erase block layout of an image slot
///
/// Board families differ here even for the same logical image, so the
/// layout travels with the model instead of being fixed in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseLayout {
    /// Pages per erase unit
    pub block_pages: u32,
    /// Number of erase units in a slot
    pub block_count: u32,
}

impl EraseLayout {
    /// Create a new erase layout
    pub const fn new(block_pages: u32, block_count: u32) -> Self {
        Self {
            block_pages,
            block_count,
        }
    }

    /// Erase command matching the unit size
    pub const fn unit(&self) -> EraseUnit {
        match self.block_pages {
            1 => EraseUnit::Page,
            opcodes::BLOCK_PAGES => EraseUnit::Block,
            _ => EraseUnit::Sector,
        }
    }

    /// Number of pages covered by the whole layout, `None` past `u32::MAX`
    pub const fn coverage_pages(&self) -> Option<u32> {
        self.block_pages.checked_mul(self.block_count)
    }

    /// One past the last page of a slot starting at `base_page`
    pub fn end_page(&self, base_page: u32) -> Option<u32> {
        self.coverage_pages()?.checked_add(base_page)
    }

    /// Erase commands for a slot starting at `base_page`
    pub fn plan(&self, base_page: u32) -> Result<Vec<EraseOp>> {
        let unit = self.unit();
        (0..self.block_count)
            .map(|i| {
                i.checked_mul(self.block_pages)
                    .and_then(|offset| base_page.checked_add(offset))
                    .map(|page| EraseOp { unit, page })
                    .ok_or(Error::LayoutOverflow { base_page })
            })
            .collect()
    }
}

/// Image slot selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSlot {
    /// Standard image (slot 0)
    #[default]
    Standard,
    /// Backup image (slot 1)
    Backup,
    /// Indexed slot on multi-image boards
    Index(usize),
}

impl ImageSlot {
    /// Slot index within [`FlashGeometry::slots`]
    pub const fn index(self) -> usize {
        match self {
            Self::Standard => 0,
            Self::Backup => 1,
            Self::Index(n) => n,
        }
    }
}

impl core::fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Backup => write!(f, "backup"),
            Self::Index(n) => write!(f, "slot {}", n),
        }
    }
}

/// Flash geometry and register wiring of a board model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Page size of the flash chip
    pub page_size: PageSize,
    /// Access width of the select and data registers
    pub register_width: RegisterWidth,
    /// Register driving chip-enable
    pub select_register: u32,
    /// Register shifting one byte per access
    pub data_register: u32,
    /// Value written to the select register to enable the chip
    pub enable_level: u32,
    /// Erase block layout of one image slot
    pub erase: EraseLayout,
    /// First page of each image slot (standard, backup, ...)
    pub slots: Vec<u32>,
    /// Page holding the key and license data
    pub license_page: u32,
}

impl FlashGeometry {
    /// Page size in bytes
    pub fn page_bytes(&self) -> usize {
        self.page_size.bytes()
    }

    /// Value written to the select register to disable the chip
    pub fn disable_level(&self) -> u32 {
        if self.enable_level != 0 {
            0
        } else {
            1
        }
    }

    /// Byte address of the first byte of a page
    pub fn page_address(&self, page: u32) -> u32 {
        page << self.page_size.address_shift()
    }

    /// Offset at which a single-page (PLL) image is spliced into its page
    pub fn pll_offset(&self) -> usize {
        self.page_size.spare_bytes()
    }

    /// First page of an image slot
    pub fn slot_base(&self, slot: ImageSlot) -> Result<u32> {
        self.slots
            .get(slot.index())
            .copied()
            .ok_or(Error::NoSuchSlot(slot.index()))
    }

    /// Capacity of one image slot in bytes
    ///
    /// Saturates on layouts that [`check_page_range`](Self::check_page_range)
    /// rejects.
    pub fn slot_bytes(&self) -> usize {
        self.erase
            .coverage_pages()
            .map_or(usize::MAX, |pages| (pages as usize).saturating_mul(self.page_bytes()))
    }

    /// Check that every slot and the license page are addressable
    ///
    /// Layout and slot values come from archive headers and catalog files,
    /// so `slot + block_pages * block_count` must be checked before any
    /// page number is derived from them.
    pub fn check_page_range(&self) -> Result<()> {
        for &base_page in &self.slots {
            if self.erase.end_page(base_page).is_none() {
                return Err(Error::LayoutOverflow { base_page });
            }
        }
        if self.license_page == u32::MAX {
            return Err(Error::LayoutOverflow {
                base_page: self.license_page,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn geometry(page_size: PageSize) -> FlashGeometry {
        FlashGeometry {
            page_size,
            register_width: RegisterWidth::W32,
            select_register: 0xEF2C,
            data_register: 0xEF30,
            enable_level: 0,
            erase: EraseLayout::new(8, 4),
            slots: vec![0, 32],
            license_page: 100,
        }
    }

    #[test]
    fn test_page_size_parse() {
        assert_eq!(PageSize::from_bytes(264).unwrap(), PageSize::P264);
        assert_eq!(PageSize::from_bytes(528).unwrap(), PageSize::P528);
        assert_eq!(PageSize::from_bytes(1056).unwrap(), PageSize::P1056);
        assert_eq!(
            PageSize::from_bytes(256),
            Err(Error::UnsupportedPageSize(256))
        );
    }

    #[test]
    fn test_page_address_shift() {
        assert_eq!(geometry(PageSize::P264).page_address(3), 3 << 9);
        assert_eq!(geometry(PageSize::P528).page_address(3), 3 << 10);
        assert_eq!(geometry(PageSize::P1056).page_address(3), 3 << 11);
    }

    #[test]
    fn test_disable_level_is_opposite_polarity() {
        let mut g = geometry(PageSize::P264);
        assert_eq!(g.disable_level(), 1);
        g.enable_level = 2;
        assert_eq!(g.disable_level(), 0);
    }

    #[test]
    fn test_erase_plan_block() {
        let plan = EraseLayout::new(8, 3).plan(16).unwrap();
        assert_eq!(
            plan,
            vec![
                EraseOp { unit: EraseUnit::Block, page: 16 },
                EraseOp { unit: EraseUnit::Block, page: 24 },
                EraseOp { unit: EraseUnit::Block, page: 32 },
            ]
        );
    }

    #[test]
    fn test_erase_unit_selection() {
        assert_eq!(EraseLayout::new(1, 10).unit(), EraseUnit::Page);
        assert_eq!(EraseLayout::new(8, 10).unit(), EraseUnit::Block);
        assert_eq!(EraseLayout::new(256, 2).unit(), EraseUnit::Sector);
    }

    #[test]
    fn test_slot_base() {
        let g = geometry(PageSize::P264);
        assert_eq!(g.slot_base(ImageSlot::Standard), Ok(0));
        assert_eq!(g.slot_base(ImageSlot::Backup), Ok(32));
        assert_eq!(g.slot_base(ImageSlot::Index(2)), Err(Error::NoSuchSlot(2)));
        assert_eq!(g.slot_bytes(), 32 * 264);
    }

    #[test]
    fn test_erase_plan_past_page_range() {
        let layout = EraseLayout::new(0x1_0000, 0x1_0000);
        assert_eq!(layout.coverage_pages(), None);
        assert_eq!(layout.end_page(0), None);
        assert_eq!(layout.plan(0), Err(Error::LayoutOverflow { base_page: 0 }));

        let layout = EraseLayout::new(8, 4);
        assert_eq!(layout.end_page(u32::MAX - 32), Some(u32::MAX));
        assert_eq!(
            layout.plan(u32::MAX - 8),
            Err(Error::LayoutOverflow {
                base_page: u32::MAX - 8
            })
        );
    }

    #[test]
    fn test_check_page_range() {
        let mut g = geometry(PageSize::P264);
        assert_eq!(g.check_page_range(), Ok(()));

        g.slots.push(u32::MAX - 16);
        assert_eq!(
            g.check_page_range(),
            Err(Error::LayoutOverflow {
                base_page: u32::MAX - 16
            })
        );

        g.slots.pop();
        g.erase = EraseLayout::new(0x1_0000, 0x1_0000);
        assert_eq!(g.check_page_range(), Err(Error::LayoutOverflow { base_page: 0 }));
        assert_eq!(g.slot_bytes(), usize::MAX);

        g.erase = EraseLayout::new(8, 4);
        g.license_page = u32::MAX;
        assert!(g.check_page_range().is_err());
    }
}
