//! Line-based queue console
//!
//! Reads commands from stdin while the queue runs in the background and
//! prints every row whose status changed since the previous tick.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use ytbcore::core::config;
use ytbcore::core::setup::EnvironmentSetup;
use ytbcore::download::queue::{CancelOutcome, EntryId, EntryRef};

use crate::app::App;
use crate::commands::StatusPrinter;

const DEFAULT_FORMAT: &str = "bestvideo+bestaudio/best";

const HELP: &str = "\
Commands:
  add <URL> [FORMAT]   queue a download (default format: bestvideo+bestaudio/best)
  cancel <ID|KEY>      cancel by id (#3 or 3) or by display key
  retry <ID>           queue a finished entry again
  list                 show every entry
  clear                drop finished entries
  help                 show this text
  quit                 cancel everything and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Add { url: String, format: String },
    Cancel(EntryRef),
    Retry(EntryId),
    List,
    Clear,
    Help,
    Quit,
    Empty,
}

fn parse_id(text: &str) -> Option<EntryId> {
    text.strip_prefix('#').unwrap_or(text).parse::<u64>().ok().map(EntryId)
}

pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_lowercase().as_str() {
        "" => Ok(ReplCommand::Empty),
        "add" | "a" => {
            let mut parts = rest.split_whitespace();
            let url = parts.next().ok_or("usage: add <URL> [FORMAT]")?;
            let format = parts.next().unwrap_or(DEFAULT_FORMAT);
            Ok(ReplCommand::Add {
                url: url.to_string(),
                format: format.to_string(),
            })
        }
        "cancel" | "c" => {
            if rest.is_empty() {
                return Err("usage: cancel <ID|KEY>".to_string());
            }
            Ok(ReplCommand::Cancel(match parse_id(rest) {
                Some(id) => EntryRef::Id(id),
                None => EntryRef::Key(rest.to_string()),
            }))
        }
        "retry" | "r" => parse_id(rest)
            .map(ReplCommand::Retry)
            .ok_or_else(|| "usage: retry <ID>".to_string()),
        "list" | "ls" => Ok(ReplCommand::List),
        "clear" => Ok(ReplCommand::Clear),
        "help" | "?" => Ok(ReplCommand::Help),
        "quit" | "exit" | "q" => Ok(ReplCommand::Quit),
        other => Err(format!("unknown command `{}`, type `help`", other)),
    }
}

fn describe(outcome: &CancelOutcome) -> String {
    match outcome {
        CancelOutcome::CancelledActive { id, terminated: true } => format!("⏹️ {} stopped", id),
        CancelOutcome::CancelledActive { id, terminated: false } => {
            format!("⏹️ {} cancelled before its process started", id)
        }
        CancelOutcome::RemovedPending { id } => format!("🗑️ {} removed from the queue", id),
        CancelOutcome::RemovedFinished { id } => format!("🗑️ {} removed from the list", id),
        CancelOutcome::NotFound => "nothing matched".to_string(),
        CancelOutcome::Ambiguous(n) => format!("{} entries share that key, cancel by id instead", n),
    }
}

pub async fn run(app: App) -> Result<()> {
    let setup = EnvironmentSetup::new(app.journal.clone())?;
    if !setup.is_complete() {
        if let Err(e) = setup.run(false).await {
            log::warn!("Setup failed: {}", e);
        }
    }
    app.startup_checks().await;

    let (queue, join) = app.start_queue();
    println!("{}", HELP);
    println!("📁 Saving into {}", app.save_dir.read().display());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = StatusPrinter::default();
    let mut tick = tokio::time::interval(config::queue::poll_interval());

    loop {
        tokio::select! {
            _ = tick.tick() => {
                printer.print(&queue.snapshot().await?);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(msg) => {
                        println!("{}", msg);
                        continue;
                    }
                };
                match command {
                    ReplCommand::Empty => {}
                    ReplCommand::Add { url, format } => {
                        let id = queue.enqueue(url, format).await?;
                        println!("➕ queued {}", id);
                    }
                    ReplCommand::Cancel(target) => {
                        println!("{}", describe(&queue.cancel(target).await?));
                    }
                    ReplCommand::Retry(id) => match queue.retry(id).await? {
                        Some(new_id) => println!("🔁 {} queued again as {}", id, new_id),
                        None => println!("{} is not a finished entry", id),
                    },
                    ReplCommand::List => {
                        let snapshot = queue.snapshot().await?;
                        if snapshot.entries.is_empty() {
                            println!("(queue is empty)");
                        }
                        for entry in &snapshot.entries {
                            println!("{} {}", entry.id, entry.row());
                        }
                    }
                    ReplCommand::Clear => {
                        println!("🧹 removed {} finished entries", queue.clear_finished().await?);
                    }
                    ReplCommand::Help => println!("{}", HELP),
                    ReplCommand::Quit => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    queue.shutdown()?;
    if let Err(e) = join.await {
        log::warn!("Queue controller ended abnormally: {}", e);
    }
    Ok(())
}
