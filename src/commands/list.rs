//! List command implementation

use crate::error::Result;
use crate::registry::{list_svg_files, SvgListing};
use std::path::Path;
use tracing::debug;

/// Every `.svg` under `dir`, newest first
pub fn cmd_list(dir: &Path) -> Result<Vec<SvgListing>> {
    let listings = list_svg_files(dir)?;
    debug!(dir = %dir.display(), files = listings.len(), "Listed SVG files");
    Ok(listings)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

pub fn print_list(dir: &Path, listings: &[SvgListing]) {
    if listings.is_empty() {
        println!("No SVG files in {}", dir.display());
        return;
    }

    println!("{:<10} {:<20} {:<12} FILE", "SIZE", "MODIFIED", "OCR");
    for listing in listings {
        let ocr = match (listing.is_container, listing.ocr_status) {
            (true, Some(status)) => status.to_string(),
            _ => "-".to_string(),
        };
        let name = listing
            .path
            .strip_prefix(dir)
            .unwrap_or(&listing.path)
            .display();
        println!(
            "{:<10} {:<20} {:<12} {}",
            format_size(listing.size),
            listing.modified.format("%Y-%m-%d %H:%M"),
            ocr,
            name
        );
    }

    let containers = listings.iter().filter(|l| l.is_container).count();
    println!();
    println!(
        "{} file(s), {} veridock container(s)",
        listings.len(),
        containers
    );
}
