//! Model descriptor types

use alloc::string::String;
use alloc::vec::Vec;

use super::catalog::ModelCatalog;
use crate::archive::{Archive, ArchiveSegment};
use crate::flash::FlashGeometry;

/// A register predicate: the register must read back `expected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterCheck {
    /// Register address
    pub address: u32,
    /// Expected value at the model's register width
    pub expected: u32,
}

/// Model identification as declared in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Model id
    pub model_id: u32,
    /// Predicates; all must hold (Type 2 ids carry none)
    pub checks: Vec<RegisterCheck>,
}

/// A model the matcher may select, with everything needed to flash it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Model id and predicates
    pub descriptor: ModelDescriptor,
    /// Human readable name, when known from the catalog
    pub name: Option<String>,
    /// Flash geometry used once this model is selected
    pub geometry: FlashGeometry,
    /// Archive segment holding the firmware, `None` for raw images
    pub segment: Option<usize>,
}

impl Candidate {
    /// Model id
    pub fn model_id(&self) -> u32 {
        self.descriptor.model_id
    }
}

/// Candidates of an archive in declaration order
///
/// Type 1 models use their segment's geometry; Type 2 ids are resolved
/// through the catalog and skipped when unknown.
pub fn archive_candidates(archive: &Archive, catalog: &ModelCatalog) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (index, segment) in archive.segments.iter().enumerate() {
        match segment {
            ArchiveSegment::Type1(s) => {
                for model in &s.models {
                    candidates.push(Candidate {
                        descriptor: model.clone(),
                        name: catalog.find(model.model_id).map(|m| m.name.clone()),
                        geometry: s.geometry.clone(),
                        segment: Some(index),
                    });
                }
            }
            ArchiveSegment::Type2(s) => {
                for &id in &s.model_ids {
                    match catalog.find(id) {
                        Some(model) => {
                            let mut candidate = model.candidate();
                            candidate.segment = Some(index);
                            candidates.push(candidate);
                        }
                        None => log::warn!(
                            "Segment {} lists model {} which is not in the model catalog",
                            index,
                            id
                        ),
                    }
                }
            }
        }
    }
    candidates
}

/// Every catalog model as a candidate, in catalog order
pub fn catalog_candidates(catalog: &ModelCatalog) -> Vec<Candidate> {
    catalog.iter().map(|m| m.candidate()).collect()
}
