//! Main run command implementation.

use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::harvest::{
    ClientFactory, EventSink, HarvestEvent, HarvestRunner, PortalClient, RegistryClient,
};
use crate::state::{RunSummary, StateStore};

/// Start a fresh harvesting run, or resume an interrupted one.
pub async fn cmd_run(
    settings: &Settings,
    resume: Option<String>,
    datasets: Option<String>,
    no_progress: bool,
) -> anyhow::Result<()> {
    let selected: Vec<String> = match datasets {
        Some(keys) => {
            let keys: Vec<String> = keys
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            for key in &keys {
                if settings.dataset(key).is_none() {
                    anyhow::bail!(
                        "unknown dataset {:?}; available: {}",
                        key,
                        settings.dataset_keys().join(", ")
                    );
                }
            }
            keys
        }
        None => settings.dataset_keys(),
    };

    let store = match resume.as_deref() {
        Some("latest") => {
            let run_id = StateStore::latest_run_id(&settings.output_root)?
                .ok_or_else(|| anyhow::anyhow!("no previous run to resume"))?;
            println!("{} resuming latest run {}", style("→").cyan(), style(&run_id).bold());
            StateStore::load(&settings.output_root, &run_id)?
        }
        Some(run_id) => {
            println!("{} resuming run {}", style("→").cyan(), style(run_id).bold());
            StateStore::load(&settings.output_root, run_id)?
        }
        None => StateStore::create_initial(
            &settings.output_root,
            settings.run_snapshot(&selected),
            None,
        )?,
    };
    let run_id = store.run_id().to_string();

    println!(
        "{} run {} over {} dataset(s), output under {}",
        style("→").cyan(),
        style(&run_id).bold(),
        selected.len(),
        store.paths().run_dir.display()
    );

    let settings = Arc::new(settings.clone());
    let factory_settings = settings.clone();
    let factory: ClientFactory = Box::new(move |identity| {
        PortalClient::new(&factory_settings, identity)
            .map(|client| Arc::new(client) as Arc<dyn RegistryClient>)
    });

    let (events, event_rx) = if no_progress {
        (EventSink::disabled(), None)
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx), Some(rx))
    };

    let mut runner = HarvestRunner::new(settings, store, selected, factory, events);
    let handle = tokio::spawn(async move {
        let result = runner.run().await;
        (runner, result)
    });

    if let Some(mut rx) = event_rx {
        render_progress(&mut rx).await;
    }

    let (runner, result) = handle.await?;
    match result {
        Ok(()) => {
            let summary = RunSummary::from_state(runner.store().state());
            println!(
                "{} run {} finished: {} records across {} dataset(s)",
                style("✓").green(),
                run_id,
                summary.total_written(),
                summary.datasets.len()
            );
            Ok(())
        }
        Err(err) => {
            println!(
                "{} run {} stopped: {}",
                style("✗").red(),
                run_id,
                err
            );
            println!("  resume with: regharvest run --resume {run_id}");
            Err(err.into())
        }
    }
}

/// Drain engine events into a terminal progress display.
async fn render_progress(rx: &mut mpsc::UnboundedReceiver<HarvestEvent>) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        match event {
            HarvestEvent::DatasetStarted { dataset, segments } => {
                println!(
                    "{} {} ({} segment(s))",
                    style("→").cyan(),
                    style(&dataset).bold(),
                    segments
                );
            }
            HarvestEvent::SegmentStarted {
                segment,
                next_page,
                total_pages,
                ..
            } => {
                let pb = ProgressBar::new(total_pages as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} pages {msg}")
                        .unwrap()
                        .progress_chars("#>-"),
                );
                pb.set_position(next_page.saturating_sub(1) as u64);
                pb.set_message(segment);
                bar = Some(pb);
            }
            HarvestEvent::PageCompleted { page, .. } => {
                if let Some(pb) = &bar {
                    pb.set_position(page as u64);
                }
            }
            HarvestEvent::SegmentCompleted {
                segment, written, ..
            } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                println!(
                    "  {} segment {:?} done, {} record(s)",
                    style("✓").green(),
                    segment,
                    written
                );
            }
            HarvestEvent::DatasetCompleted { dataset, written } => {
                println!(
                    "{} {} completed, {} record(s)",
                    style("✓").green(),
                    style(&dataset).bold(),
                    written
                );
            }
            HarvestEvent::IdentityRotated { label, reason } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                println!(
                    "{} identity rotated to {} ({})",
                    style("!").yellow(),
                    label,
                    reason
                );
            }
        }
    }
}
