//! Catalog listing - `migrator catalog`.

use anyhow::Result;

use migrator::migration::catalog::{CONVERSION_TYPES, java_versions};

pub fn cmd_catalog(json: bool) -> Result<()> {
    let versions = java_versions();

    if json {
        let body = serde_json::json!({
            "java_versions": versions,
            "conversion_types": CONVERSION_TYPES,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!();
    println!("Source versions:");
    for v in &versions.source_versions {
        println!("  {:<4} {}", v.value, v.label);
    }
    println!();
    println!("Target versions:");
    for v in &versions.target_versions {
        println!("  {:<4} {}", v.value, v.label);
    }
    println!();
    println!("Conversion types:");
    for c in CONVERSION_TYPES {
        println!("  {:<20} {:<12} {}", c.id, c.category, c.description);
    }
    println!();
    Ok(())
}
