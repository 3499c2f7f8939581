//! Preset listing

use ufprog_host::presets::Size;
use ufprog_host::PresetDb;

/// Print every preset, grouped
pub fn list_presets(db: &PresetDb, filter: Option<&str>) {
    println!("{:<10} {:<12} {:<28} {:>8} {:>12}", "Group", "Name", "Family", "Size", "ID");
    println!("{}", "-".repeat(74));

    for (group, preset) in db.iter() {
        if let Some(filter) = filter {
            if !preset.name.to_lowercase().contains(&filter.to_lowercase()) {
                continue;
            }
        }

        let id = match preset.id {
            Some((manufacturer, device)) => format!("{:02X} {:04X}", manufacturer, device),
            None => "-".to_string(),
        };
        println!(
            "{:<10} {:<12} {:<28} {:>8} {:>12}",
            group,
            preset.name,
            preset.family.name(),
            format_size(preset.size),
            id
        );
    }
}

fn format_size(size: Size) -> String {
    let cells = size.cells();
    if cells >= 1024 * 1024 {
        format!("{} Mi", cells / (1024 * 1024))
    } else if cells >= 1024 {
        format!("{} Ki", cells / 1024)
    } else {
        format!("{}", cells)
    }
}
