//! Inspect command implementation

use std::path::Path;

use cfaflash_core::archive::{parse_archive, Archive, ArchiveSegment, ParseOptions};
use cfaflash_core::flash::FlashGeometry;
use cfaflash_core::model::ModelCatalog;

use super::read_input;

/// Decode `input` offline and print one block per segment
pub fn cmd_inspect(
    input: &Path,
    options: &ParseOptions,
    catalog: &ModelCatalog,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_input(input)?;
    let archive = parse_archive(&data, options)?;

    println!("Archive: {} ({} bytes)", input.display(), data.len());
    println!("Segments: {}", archive.segments.len());
    for line in describe_archive(&archive, catalog) {
        println!("{}", line);
    }
    Ok(())
}

fn describe_geometry(g: &FlashGeometry) -> String {
    format!(
        "{} byte pages, {}-bit registers (select 0x{:X}, data 0x{:X}), slots {:?}, license page {}",
        g.page_bytes(),
        g.register_width.bits(),
        g.select_register,
        g.data_register,
        g.slots,
        g.license_page
    )
}

fn model_label(id: u32, catalog: &ModelCatalog) -> String {
    match catalog.find(id) {
        Some(model) => format!("{} ({})", id, model.name),
        None => format!("{} (not in catalog)", id),
    }
}

/// Human-readable lines describing every segment of `archive`
fn describe_archive(archive: &Archive, catalog: &ModelCatalog) -> Vec<String> {
    let mut lines = Vec::new();
    for (summary, segment) in archive.summaries().iter().zip(&archive.segments) {
        lines.push(String::new());
        lines.push(summary.to_string());
        match segment {
            ArchiveSegment::Type1(s) => {
                lines.push(format!("  geometry: {}", describe_geometry(&s.geometry)));
                for model in &s.models {
                    lines.push(format!(
                        "  model {}: {} register checks",
                        model_label(model.model_id, catalog),
                        model.checks.len()
                    ));
                }
            }
            ArchiveSegment::Type2(s) => {
                for id in &s.model_ids {
                    lines.push(format!("  model {}", model_label(*id, catalog)));
                }
            }
        }
    }
    lines
}
