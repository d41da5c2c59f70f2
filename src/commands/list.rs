//! List commands implementation

use cfaflash_core::model::{CatalogModel, ModelCatalog};

/// List all compiled-in device backends
pub fn list_devices() {
    println!("Available devices:");
    println!();
    for device in cfaflash_device::available_devices() {
        println!("  {:<8} - {}", device.name, device.description);
    }
}

/// List the models of the catalog
pub fn list_models(catalog: &ModelCatalog, family_filter: Option<&str>) {
    println!("Known models:");
    println!();
    println!(
        "{:<12} {:>6} {:<20} {:>6} {:>6} {:>10}",
        "Family", "Id", "Name", "Page", "Width", "Slot size"
    );
    println!("{}", "-".repeat(66));

    for model in filter_models(catalog, family_filter) {
        println!(
            "{:<12} {:>6} {:<20} {:>6} {:>6} {:>10}",
            model.family,
            model.id,
            model.name,
            model.geometry.page_bytes(),
            model.geometry.register_width.bits(),
            format_size(model.geometry.slot_bytes())
        );
    }
}

fn filter_models<'a>(
    catalog: &'a ModelCatalog,
    family_filter: Option<&str>,
) -> Vec<&'a CatalogModel> {
    catalog
        .iter()
        .filter(|model| match family_filter {
            Some(family) => model.family.to_lowercase().contains(&family.to_lowercase()),
            None => true,
        })
        .collect()
}

fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
