//! Line-oriented operator console over the inspection workflow.

use std::{io::Write, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    db::Verdict,
    workflow::{
        commands::{self, CommandError},
        EditableField, RecordStatus, WorkflowSnapshot,
    },
    AppState,
};

const HELP: &str = "\
commands:
  meters                  list the meter catalog
  select <meter-id>       pick the meter under inspection
  serial <value>          set the serial number
  client <value>          set the client
  capture | retry         capture and compare, or discard the held result
  decide <pass|fail>      operator verdict when the service asks for one
  resubmit                store the held record again after a failure
  master                  take a fresh master image for the selected meter
  continue                next unit: same meter and client
  submit                  finish this meter and start over
  reset                   abandon the current cycle (also Ctrl-C while comparing)
  status | history [n] | stats | quit";

#[derive(Debug, Parser)]
#[command(
    no_binary_name = true,
    disable_help_flag = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Debug, Subcommand)]
enum ConsoleCommand {
    Meters,
    Select {
        meter_id: String,
    },
    Serial {
        #[arg(allow_hyphen_values = true)]
        value: Vec<String>,
    },
    Client {
        #[arg(allow_hyphen_values = true)]
        value: Vec<String>,
    },
    #[command(alias = "retry")]
    Capture,
    Decide {
        verdict: String,
    },
    Resubmit,
    Master,
    Continue,
    Submit,
    Reset,
    Status,
    History {
        #[arg(default_value_t = 10)]
        limit: usize,
    },
    Stats,
    #[command(alias = "help")]
    Usage,
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub async fn run(state: Arc<AppState>) -> Result<()> {
    let settings = state.settings.settings();
    println!(
        "meter-inspect console (vision service {}). Type `help` for commands.",
        settings.vision.base_url
    );

    let watcher = spawn_phase_watcher(state.workflow.subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                if commands::get_workflow_state(&state).await.is_comparing {
                    commands::abandon_cycle(&state).await;
                    println!("\ncapture abandoned; its result will be ignored");
                    continue;
                }
                println!();
                break;
            }
        };

        let Some(line) = line else { break };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        match ConsoleLine::try_parse_from(words) {
            Ok(parsed) => {
                if handle(&state, parsed.command).await? == Flow::Quit {
                    break;
                }
            }
            Err(err) => println!("{err}"),
        }
    }

    watcher.abort();
    Ok(())
}

async fn handle(state: &Arc<AppState>, command: ConsoleCommand) -> Result<Flow> {
    match command {
        ConsoleCommand::Meters => match commands::list_meters(state).await {
            Ok(meters) if meters.is_empty() => {
                println!("catalog is empty; load it with `meter-inspect meters import <file>`")
            }
            Ok(meters) => {
                for meter in meters {
                    println!("  {:<12} {:<16} {}", meter.id, meter.model, meter.image);
                }
            }
            Err(err) => report(&err),
        },
        ConsoleCommand::Select { meter_id } => {
            show(commands::select_meter(state, meter_id).await)
        }
        ConsoleCommand::Serial { value } => show(
            commands::edit_field(state, EditableField::SerialNumber, value.join(" ")).await,
        ),
        ConsoleCommand::Client { value } => {
            show(commands::edit_field(state, EditableField::Client, value.join(" ")).await)
        }
        ConsoleCommand::Capture => {
            // Runs in the background so `reset` and Ctrl-C stay responsive.
            let state = Arc::clone(state);
            tokio::spawn(async move {
                show(commands::capture_or_retry(&state).await);
            });
        }
        ConsoleCommand::Decide { verdict } => match verdict.parse::<Verdict>() {
            Ok(verdict) => show(commands::submit_operator_decision(state, verdict).await),
            Err(err) => println!("{err}"),
        },
        ConsoleCommand::Resubmit => show(commands::resubmit_record(state).await),
        ConsoleCommand::Master => show(commands::recapture_master(state).await),
        ConsoleCommand::Continue => show(commands::continue_cycle(state).await),
        ConsoleCommand::Submit => show(commands::submit_new_cycle(state).await),
        ConsoleCommand::Reset => println!("{}", render(&commands::abandon_cycle(state).await)),
        ConsoleCommand::Status => {
            println!("{}", render(&commands::get_workflow_state(state).await))
        }
        ConsoleCommand::History { limit } => match commands::list_inspections(state, limit).await {
            Ok(records) => {
                for record in records {
                    println!(
                        "  {}  {:<14} {:<4} meter {:<10} {} ({})",
                        record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                        record.serial_no,
                        record.status,
                        record.meter_id,
                        record.client,
                        record.verdict_source.as_str()
                    );
                }
            }
            Err(err) => println!("error: {err}"),
        },
        ConsoleCommand::Stats => match commands::get_inspection_stats(state).await {
            Ok(stats) => println!(
                "  total {} (pass {}, fail {}); today {} (pass {}, fail {})",
                stats.total,
                stats.correct,
                stats.incorrect,
                stats.today_total,
                stats.today_correct,
                stats.today_incorrect
            ),
            Err(err) => println!("error: {err}"),
        },
        ConsoleCommand::Usage => println!("{HELP}"),
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }

    Ok(Flow::Continue)
}

fn show(result: Result<WorkflowSnapshot, CommandError>) {
    match result {
        Ok(snapshot) => println!("{}", render(&snapshot)),
        Err(err) => report(&err),
    }
}

fn report(err: &CommandError) {
    println!("error ({:?}): {}", err.kind, err.message);
}

fn spawn_phase_watcher(mut changes: watch::Receiver<WorkflowSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = changes.borrow().phase;
        while changes.changed().await.is_ok() {
            let phase = changes.borrow_and_update().phase;
            if phase != last {
                println!("  [{last} -> {phase}]");
                last = phase;
            }
        }
    })
}

fn render(snapshot: &WorkflowSnapshot) -> String {
    let dash = |value: &str| {
        if value.trim().is_empty() {
            "-".to_string()
        } else {
            value.to_string()
        }
    };

    let mut lines = vec![format!("  phase:    {}", snapshot.phase)];
    lines.push(format!(
        "  meter:    {}",
        match (&snapshot.meter_id, &snapshot.meter_model) {
            (Some(id), Some(model)) => format!("{id} ({model})"),
            _ if snapshot.master_invalidated => "- (select a meter to load a fresh master)".into(),
            _ => "-".into(),
        }
    ));
    lines.push(format!("  serial:   {}", dash(&snapshot.serial_number)));
    lines.push(format!("  client:   {}", dash(&snapshot.client)));
    if let Some(master) = &snapshot.master_image {
        lines.push(format!("  master:   {}", master.describe()));
    }
    if let Some(captured) = &snapshot.captured_image {
        lines.push(format!("  captured: {}", captured.describe()));
    }
    if let Some(diff) = &snapshot.diff_image {
        lines.push(format!("  diff:     {}", diff.describe()));
    }
    if snapshot.operator_decision_required && snapshot.verdict.is_none() {
        let hint = snapshot
            .suggested_verdict
            .map(|v| format!(" (service suggests {v})"))
            .unwrap_or_default();
        lines.push(format!("  decision: required, use `decide pass|fail`{hint}"));
    }
    if let (Some(verdict), Some(source)) = (snapshot.verdict, snapshot.verdict_source) {
        lines.push(format!("  verdict:  {} ({})", verdict, source.as_str()));
    }
    match &snapshot.record {
        Some(RecordStatus::Failed(reason)) => {
            lines.push(format!("  record:   not saved: {reason} (use `resubmit`)"))
        }
        Some(status) => lines.push(format!("  record:   {}", status.label())),
        None => {}
    }
    if snapshot.is_comparing {
        lines.push("  comparing... (`reset` or Ctrl-C abandons)".into());
    }
    lines.join("\n")
}
