use clap::Parser;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pollwatch::{
    cli::{Cli, OutputFormat},
    DirectoryEvent, DirectoryEventKind, ChangePhase, DirectoryWatcher, LocalDirectory,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = cli.resolve_config()?;
    if let Err(err) = config.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    let watch_path = cli.get_watch_path();
    tracing::info!("Starting PollWatch on: {}", watch_path.display());

    let watcher = DirectoryWatcher::new(config.watcher);
    let output = cli.output.clone();
    let no_color = cli.no_color;
    watcher.register_callback_on_file_changed(move |event| match output {
        OutputFormat::Json => print_json_event(event),
        OutputFormat::Text => print_text_event(event, no_color),
        OutputFormat::Compact => print_compact_event(event),
    });

    if matches!(cli.output, OutputFormat::Text) {
        println!("Watching: {}", watch_path.display());
        println!("Press Ctrl+C to quit");
        println!("---");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    watcher.watch(LocalDirectory::new(&watch_path));

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    watcher.stop();
    let health = watcher.health();
    tracing::info!(
        "Shut down after {} scans ({} failed)",
        health.scans,
        health.failed_scans
    );

    Ok(())
}

fn print_json_event(event: &DirectoryEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(err) => tracing::error!("Failed to serialize event: {}", err),
    }
}

fn describe_entries(event: &DirectoryEvent) -> String {
    if event.entries.is_empty() {
        format!("{} entr{}", event.count, if event.count == 1 { "y" } else { "ies" })
    } else {
        event.entries.join(", ")
    }
}

fn print_text_event(event: &DirectoryEvent, no_color: bool) {
    let time_str = chrono::DateTime::<chrono::Local>::from(event.timestamp)
        .format("%H:%M:%S")
        .to_string();

    let suffix = match event.kind {
        DirectoryEventKind::Changed { phase: ChangePhase::Started } => " (started)",
        DirectoryEventKind::Changed { phase: ChangePhase::Settled } => " (settled)",
        _ => "",
    };

    if no_color {
        println!("[{}] {} {}{}", time_str, event.label(), describe_entries(event), suffix);
    } else {
        let color = match event.kind {
            DirectoryEventKind::Created => "\x1b[32m",         // Green
            DirectoryEventKind::Changed { .. } => "\x1b[33m",  // Yellow
            DirectoryEventKind::Deleted => "\x1b[31m",         // Red
        };
        println!(
            "[{}] {}{}\x1b[0m {}{}",
            time_str,
            color,
            event.label(),
            describe_entries(event),
            suffix
        );
    }
}

fn print_compact_event(event: &DirectoryEvent) {
    let event_type = match event.kind {
        DirectoryEventKind::Created => "C",
        DirectoryEventKind::Deleted => "D",
        DirectoryEventKind::Changed { .. } => "M",
    };

    println!("{} {}", event_type, describe_entries(event));
}
