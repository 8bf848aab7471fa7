//! Run inspection commands.

use console::style;

use crate::config::Settings;
use crate::models::{DatasetStatus, RunStatus};
use crate::state::{RunSummary, StateStore};

fn styled_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("running").yellow().to_string(),
        RunStatus::Completed => style("completed").green().to_string(),
    }
}

fn styled_dataset_status(status: DatasetStatus) -> String {
    match status {
        DatasetStatus::Pending => style("pending").dim().to_string(),
        DatasetStatus::Running => style("running").yellow().to_string(),
        DatasetStatus::Completed => style("completed").green().to_string(),
        DatasetStatus::Failed => style("failed").red().to_string(),
    }
}

/// Show one run's progress, per dataset and segment.
pub fn cmd_status(settings: &Settings, run_id: Option<String>) -> anyhow::Result<()> {
    let run_id = match run_id {
        Some(id) => id,
        None => StateStore::latest_run_id(&settings.output_root)?
            .ok_or_else(|| anyhow::anyhow!("no runs under {}", settings.output_root.display()))?,
    };
    let store = StateStore::load(&settings.output_root, &run_id)?;
    let summary = RunSummary::from_state(store.state());

    println!("{}", style(format!("Run {}", summary.run_id)).bold());
    println!("{}", "-".repeat(48));
    println!("{:<16} {}", "Status:", styled_run_status(summary.status));
    println!(
        "{:<16} {}",
        "Updated:",
        summary.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{:<16} {}", "Records:", summary.total_written());
    println!("{:<16} {}", "Rotations:", summary.rotation_history.len());

    for dataset in &summary.datasets {
        println!(
            "\n{} [{}] {} record(s)",
            style(&dataset.dataset_key).bold(),
            styled_dataset_status(dataset.status),
            dataset.written
        );
        for segment in &dataset.segments {
            println!(
                "  {:<20} {:<12} page {}/{}  {} written",
                segment.segment_key,
                segment.status.as_str(),
                segment.next_page,
                segment.total_pages.unwrap_or(0),
                segment.written
            );
        }
    }

    if !summary.errors.is_empty() {
        println!("\n{}", style(format!("{} error(s):", summary.errors.len())).red());
        for entry in summary.errors.iter().rev().take(5) {
            println!(
                "  {} [{}] {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.context,
                entry.message
            );
        }
    }

    Ok(())
}

/// List runs under the output root, newest last.
pub fn cmd_runs(settings: &Settings) -> anyhow::Result<()> {
    let runs_dir = settings.output_root.join("runs");
    let mut run_ids: Vec<String> = match std::fs::read_dir(&runs_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    run_ids.sort();

    if run_ids.is_empty() {
        println!("{} No runs under {}", style("!").yellow(), runs_dir.display());
        return Ok(());
    }

    for run_id in run_ids {
        match StateStore::load(&settings.output_root, &run_id) {
            Ok(store) => {
                let state = store.state();
                let written: u64 = state.datasets.values().map(|d| d.written).sum();
                println!(
                    "{:<20} {:<12} {} record(s), updated {}",
                    style(&run_id).bold(),
                    styled_run_status(state.status),
                    written,
                    state.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            Err(err) => {
                println!("{:<20} {}", run_id, style(format!("unreadable: {err}")).red());
            }
        }
    }

    Ok(())
}
