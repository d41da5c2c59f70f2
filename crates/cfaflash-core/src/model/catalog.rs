//! Model catalog with RON loading
//!
//! Type 2 segments only name their models, so the register predicates and
//! flash geometry of those models live in catalog files:
//!
//! ```ron
//! (
//!     family: "V1495",
//!     models: [
//!         (
//!             id: 7,
//!             name: "V1495",
//!             checks: [(address: 0x8100, value: 0x07)],
//!             geometry: (
//!                 page_size: 264,
//!                 register_width: 32,
//!                 select_register: 0x80C8,
//!                 data_register: 0x80CC,
//!                 erase: (block_pages: 8, block_count: 4),
//!                 slots: [0, 32],
//!                 license_page: 60,
//!             ),
//!         ),
//!     ],
//! )
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use super::types::{Candidate, ModelDescriptor, RegisterCheck};
use crate::flash::FlashGeometry;

/// A board model known to the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogModel {
    /// Family the model was declared in
    pub family: String,
    /// Model id as used in archives
    pub id: u32,
    /// Model name
    pub name: String,
    /// Register predicates identifying the model
    pub checks: Vec<RegisterCheck>,
    /// Flash geometry of the model
    pub geometry: FlashGeometry,
}

impl CatalogModel {
    /// The model as a matcher candidate with no archive segment attached
    pub fn candidate(&self) -> Candidate {
        Candidate {
            descriptor: ModelDescriptor {
                model_id: self.id,
                checks: self.checks.clone(),
            },
            name: Some(self.name.clone()),
            geometry: self.geometry.clone(),
            segment: None,
        }
    }
}

/// Runtime model catalog
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<CatalogModel>,
}

impl ModelCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// Add a model, replacing any earlier model with the same id
    pub fn insert(&mut self, model: CatalogModel) {
        match self.models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => {
                log::debug!("Model {} redefined by family {}", model.id, model.family);
                *existing = model;
            }
            None => self.models.push(model),
        }
    }

    /// All models in declaration order
    pub fn models(&self) -> &[CatalogModel] {
        &self.models
    }

    /// Number of models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Find a model by id
    pub fn find(&self, id: u32) -> Option<&CatalogModel> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Find models by name (case-insensitive partial match)
    pub fn find_by_name(&self, name: &str) -> Vec<&CatalogModel> {
        let name_lower = name.to_lowercase();
        self.models
            .iter()
            .filter(|m| m.name.to_lowercase().contains(&name_lower))
            .collect()
    }

    /// Iterate over all models
    pub fn iter(&self) -> impl Iterator<Item = &CatalogModel> {
        self.models.iter()
    }
}

#[cfg(feature = "std")]
mod load {
    use alloc::format;
    use alloc::string::String;
    use alloc::vec::Vec;
    use std::fs;
    use std::io;
    use std::path::Path;

    use super::{CatalogModel, ModelCatalog};
    use crate::flash::{EraseLayout, FlashGeometry, PageSize};
    use crate::model::RegisterCheck;
    use crate::transport::RegisterWidth;

    /// Error type for model catalog operations
    #[derive(Debug)]
    pub enum CatalogError {
        /// I/O error reading files
        Io(io::Error),
        /// RON parsing error
        Parse(ron::error::SpannedError),
        /// Validation error
        Validation(String),
    }

    impl From<io::Error> for CatalogError {
        fn from(e: io::Error) -> Self {
            CatalogError::Io(e)
        }
    }

    impl From<ron::error::SpannedError> for CatalogError {
        fn from(e: ron::error::SpannedError) -> Self {
            CatalogError::Parse(e)
        }
    }

    impl std::fmt::Display for CatalogError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                CatalogError::Io(e) => write!(f, "I/O error: {}", e),
                CatalogError::Parse(e) => write!(f, "Parse error: {}", e),
                CatalogError::Validation(msg) => write!(f, "Validation error: {}", msg),
            }
        }
    }

    impl std::error::Error for CatalogError {}

    // ========================================================================
    // RON deserialization types (intermediate format)
    // ========================================================================

    #[derive(Debug, Clone, Copy, serde::Deserialize)]
    struct CheckDef {
        address: u32,
        value: u32,
    }

    #[derive(Debug, Clone, Copy, serde::Deserialize)]
    struct EraseDef {
        #[serde(default = "default_block_pages")]
        block_pages: u32,
        block_count: u32,
    }

    fn default_block_pages() -> u32 {
        8
    }

    fn default_register_width() -> u32 {
        32
    }

    #[derive(Debug, Clone, serde::Deserialize)]
    struct GeometryDef {
        page_size: u32,
        #[serde(default = "default_register_width")]
        register_width: u32,
        select_register: u32,
        data_register: u32,
        #[serde(default)]
        enable_level: u32,
        erase: EraseDef,
        slots: Vec<u32>,
        license_page: u32,
    }

    #[derive(Debug, Clone, serde::Deserialize)]
    struct ModelDef {
        id: u32,
        name: String,
        #[serde(default)]
        checks: Vec<CheckDef>,
        geometry: GeometryDef,
    }

    #[derive(Debug, Clone, serde::Deserialize)]
    struct FamilyDef {
        family: String,
        models: Vec<ModelDef>,
    }

    fn convert(family: &str, def: ModelDef) -> Result<CatalogModel, CatalogError> {
        let invalid = |what: &str| {
            CatalogError::Validation(format!("model {} ({}): {}", def.id, def.name, what))
        };
        let g = &def.geometry;
        let page_size = PageSize::from_bytes(g.page_size)
            .map_err(|_| invalid(&format!("unsupported page size {}", g.page_size)))?;
        let register_width = RegisterWidth::from_bits(g.register_width)
            .map_err(|_| invalid(&format!("unsupported register width {}", g.register_width)))?;
        if g.erase.block_pages == 0 || g.erase.block_count == 0 {
            return Err(invalid("erase layout must cover at least one page"));
        }
        if g.slots.is_empty() {
            return Err(invalid("at least one image slot is required"));
        }
        let geometry = FlashGeometry {
            page_size,
            register_width,
            select_register: g.select_register,
            data_register: g.data_register,
            enable_level: g.enable_level,
            erase: EraseLayout::new(g.erase.block_pages, g.erase.block_count),
            slots: g.slots.clone(),
            license_page: g.license_page,
        };
        geometry
            .check_page_range()
            .map_err(|e| invalid(&format!("{}", e)))?;
        let mask = register_width.mask();
        let checks = def
            .checks
            .iter()
            .map(|c| RegisterCheck {
                address: c.address,
                expected: c.value & mask,
            })
            .collect();

        Ok(CatalogModel {
            family: family.into(),
            id: def.id,
            name: def.name,
            checks,
            geometry,
        })
    }

    impl ModelCatalog {
        /// Load model definitions from a single RON file
        pub fn load_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
            let content = fs::read_to_string(path)?;
            self.load_ron(&content)
        }

        /// Load model definitions from a RON string
        ///
        /// The whole family is validated before any model is added.
        pub fn load_ron(&mut self, content: &str) -> Result<usize, CatalogError> {
            let family_def: FamilyDef = ron::from_str(content)?;
            let family = family_def.family;
            let models = family_def
                .models
                .into_iter()
                .map(|def| convert(&family, def))
                .collect::<Result<Vec<_>, _>>()?;
            let count = models.len();

            for model in models {
                self.insert(model);
            }

            Ok(count)
        }

        /// Load all RON files from a directory
        pub fn load_dir(&mut self, dir: &Path) -> Result<usize, CatalogError> {
            let mut paths = Vec::new();
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "ron") {
                    paths.push(path);
                }
            }
            // Sorted so that redefinitions resolve the same way on every run
            paths.sort();

            let mut total = 0;
            for path in paths {
                total += self.load_file(&path)?;
            }
            Ok(total)
        }
    }
}

#[cfg(feature = "std")]
pub use load::CatalogError;
