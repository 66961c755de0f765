//! Terminal progress rendering and the end-of-run summary.

use std::io::{self, Write};

use metabase_pg_sync::{ProgressEvent, SyncOutcome};
use tokio::sync::mpsc;

const BAR_WIDTH: usize = 24;
const DIVIDER_WIDTH: usize = 48;

/// Consume progress events until the run finishes.
pub async fn render(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut total = 0usize;
    let mut finished = 0usize;

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::PhaseStarted { name } => {
                let pad = DIVIDER_WIDTH.saturating_sub(name.len() + 4);
                eprintln!("── {} {}", name, "─".repeat(pad));
            }
            ProgressEvent::TableStarted {
                table,
                index,
                total: table_count,
            } => {
                total = table_count;
                draw_bar(index, total, &table);
            }
            ProgressEvent::TableFinished { table, failed, .. } => {
                finished += 1;
                let label = if failed {
                    format!("{} (failed)", table)
                } else {
                    table
                };
                draw_bar(finished, total, &label);
                if finished == total {
                    eprintln!();
                }
            }
            ProgressEvent::RunFinished => break,
        }
    }
}

fn draw_bar(done: usize, total: usize, label: &str) {
    if total == 0 {
        return;
    }
    let filled = (BAR_WIDTH * done.min(total)) / total;
    eprint!(
        "\r[{}{}] {}/{} {:<32}",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        done,
        total,
        label
    );
    let _ = io::stderr().flush();
}

/// Print the tabular end-of-run summary.
pub fn print_summary(outcome: &SyncOutcome) {
    let heading = if outcome.dry_run {
        "Dry run complete"
    } else if outcome.succeeded() {
        "Synchronization complete"
    } else {
        "Synchronization finished with failures"
    };

    println!("\n{}", heading);
    println!("  Duration: {:.2}s", outcome.duration_seconds);
    println!(
        "  Tables: {}/{}",
        outcome.tables_success, outcome.tables_total
    );
    println!(
        "  Rows: {} inserted of {} planned",
        outcome.rows_inserted, outcome.rows_planned
    );

    if outcome.transform.total() > 0 {
        println!(
            "  Transformations: {} enum remaps, {} defaults, {} nulls, {} coercion failures",
            outcome.transform.enum_transformations,
            outcome.transform.default_substitutions,
            outcome.transform.null_substitutions,
            outcome.transform.coercion_failures
        );
    }

    for analysis in &outcome.analyses {
        match &analysis.error {
            Some(error) => println!("  {}: analysis error: {}", analysis.table, error),
            None => println!(
                "  {}: {} sampled, {} values need transformation{}",
                analysis.table,
                analysis.rows_sampled,
                analysis.transformation_needed,
                if analysis.schema_change {
                    ", has enum columns"
                } else {
                    ""
                }
            ),
        }
    }

    if !outcome.failed_tables.is_empty() {
        println!("  Failed tables:");
        for failure in &outcome.failed_tables {
            println!(
                "    {} [{}]: {}",
                failure.table,
                failure.kind.as_str(),
                failure.detail
            );
        }
    }
}
