//! Dataset catalog listing.

use console::style;

use crate::config::Settings;

/// Print the configured datasets.
pub fn cmd_datasets(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", style("Configured datasets").bold());
    println!("{}", "-".repeat(48));
    for spec in &settings.datasets {
        println!(
            "{:<14} search={:?}  prefix={:?}  -> {}",
            style(&spec.key).bold(),
            spec.search_value,
            spec.code_prefix,
            spec.output_file
        );
        if spec.item_id.is_empty() {
            println!("  {:<12} item id resolved from catalog ({})", "", spec.label);
        }
    }
    Ok(())
}
