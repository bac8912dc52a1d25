//! `atmlink send`: fire one stack command and report what came back.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use atmlink_core::{Client, CommandOutcome, EchoLine};

use crate::cli::{GlobalOpts, SendArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output::{self, Painter};

/// How long to keep collecting console output after the first line.
const ECHO_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct SendReport {
    command: String,
    success: Option<bool>,
    output: Vec<String>,
}

pub async fn handle(
    client: &Client,
    args: SendArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let command = args.command.join(" ");
    if command.trim().is_empty() {
        return Err(CliError::Validation {
            field: "command".into(),
            reason: "command is blank".into(),
        });
    }

    let timeout = resolved.timeout();
    client.wait_for_transport(timeout).await?;

    let store = client.store();
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<CommandOutcome>();
    let result_sub = store.last_command_result.subscribe(move |outcome, _| {
        if let Some(outcome) = outcome {
            let _ = result_tx.send(outcome.clone());
        }
    });
    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<EchoLine>();
    let echo_sub = store.echo_log.subscribe(move |lines, _| {
        if let Some(line) = lines.last() {
            let _ = echo_tx.send(line.clone());
        }
    });

    let sent = client.send_command(&command);
    tracing::info!(%command, sent, "command sent");

    let report = match (sent, args.no_wait) {
        (false, _) => Err(CliError::NotSent {
            what: format!("'{command}'"),
        }),
        (true, true) => Ok(SendReport {
            command: command.trim().to_owned(),
            success: None,
            output: Vec::new(),
        }),
        (true, false) => collect(command.trim(), timeout, &mut result_rx, &mut echo_rx).await,
    };

    result_sub.unsubscribe();
    echo_sub.unsubscribe();

    let report = report?;
    print_report(&report, global)?;
    match report.success {
        Some(false) => Err(CliError::CommandFailed {
            command: report.command,
        }),
        _ => Ok(()),
    }
}

/// Wait for the server's verdict. Console output alone counts as an
/// answer once it stops arriving.
async fn collect(
    command: &str,
    timeout: Duration,
    results: &mut mpsc::UnboundedReceiver<CommandOutcome>,
    echoes: &mut mpsc::UnboundedReceiver<EchoLine>,
) -> Result<SendReport, CliError> {
    let mut report = SendReport {
        command: command.to_owned(),
        success: None,
        output: Vec::new(),
    };
    let mut deadline = Instant::now() + timeout;

    loop {
        tokio::select! {
            Some(outcome) = results.recv() => {
                report.success = Some(outcome.success);
                return Ok(report);
            }
            Some(line) = echoes.recv() => {
                report.output.push(line.text);
                deadline = deadline.min(Instant::now() + ECHO_SETTLE);
            }
            () = tokio::time::sleep_until(deadline) => {
                if report.output.is_empty() {
                    return Err(CliError::Timeout {
                        seconds: timeout.as_secs(),
                    });
                }
                return Ok(report);
            }
        }
    }
}

fn print_report(report: &SendReport, global: &GlobalOpts) -> Result<(), CliError> {
    let painter = Painter::new(global.color);
    let out = output::render_single(
        global.output,
        report,
        |r| {
            let mut lines = r.output.clone();
            match r.success {
                Some(true) => {
                    lines.push(painter.good(&format!("Command succeeded: {}", r.command)));
                }
                Some(false) => {
                    lines.push(painter.bad(&format!("Command failed: {}", r.command)));
                }
                None if r.output.is_empty() => lines.push(format!("Sent: {}", r.command)),
                None => {}
            }
            lines.join("\n")
        },
        |r| r.output.join("\n"),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
