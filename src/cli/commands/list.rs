//! List command - show stored caches

use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::StowawayResult;
use crate::store::{create_store, ObjectSummary};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub fn execute(args: ListArgs, config: &Config) -> StowawayResult<()> {
    let store = create_store(&config.store, &args.bucket)?;
    let mut objects = store.list_by_prefix(&args.prefix)?;
    // Newest first; equal timestamps keep key order
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    if objects.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No caches stored");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&objects, &store.describe()),
        OutputFormat::Json => print_json(&objects)?,
        OutputFormat::Plain => print_plain(&objects),
    }

    Ok(())
}

fn print_table(objects: &[ObjectSummary], location: &str) {
    let ctx = UiContext::detect();
    ui::section(&ctx, &format!("Caches in {}", location));

    println!(
        "{:<50} {:>10} {:<20}",
        style("KEY").bold(),
        style("SIZE").bold(),
        style("MODIFIED").bold()
    );
    println!("{}", "-".repeat(82));

    for object in objects {
        println!(
            "{:<50} {:>10} {:<20}",
            object.key,
            ui::format_bytes(object.size),
            object.last_modified.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("{} cache(s)", objects.len());
}

fn print_json(objects: &[ObjectSummary]) -> StowawayResult<()> {
    let json = serde_json::to_string_pretty(objects)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(objects: &[ObjectSummary]) {
    for object in objects {
        println!("{}", object.key);
    }
}
