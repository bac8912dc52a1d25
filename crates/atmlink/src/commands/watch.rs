//! `atmlink watch`: follow a server until Ctrl-C.

use std::pin::pin;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use atmlink_core::{
    Client, ConnectionQuality, ConnectionSnapshot, EchoLine, NotificationLevel, ShapeKind,
    TransportState,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output::{self, Painter};

// ── Events ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WatchEvent<'a> {
    Status {
        message: &'a str,
        quality: ConnectionQuality,
        transport: bool,
        simulation: bool,
        receiving: bool,
    },
    Notice {
        level: NotificationLevel,
        message: &'a str,
    },
    Echo {
        text: &'a str,
        sender: Option<&'a str>,
    },
    Shapes {
        polygons: usize,
        polylines: usize,
    },
}

struct Printer {
    format: OutputFormat,
    painter: Painter,
    quiet: bool,
}

impl Printer {
    fn emit(&self, event: &WatchEvent<'_>) -> Result<(), CliError> {
        let line = match self.format {
            OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(event, true)?,
            OutputFormat::Table | OutputFormat::Plain => self.human(event),
        };
        output::print_output(&line, self.quiet);
        Ok(())
    }

    fn human(&self, event: &WatchEvent<'_>) -> String {
        let p = self.painter;
        let stamp = p.dim(&chrono::Local::now().format("%H:%M:%S").to_string());
        match event {
            WatchEvent::Status {
                quality,
                transport,
                simulation,
                receiving,
                ..
            } => {
                let snap = ConnectionSnapshot {
                    transport_connected: *transport,
                    sim_connected: *simulation,
                    receiving_data: *receiving,
                    ..ConnectionSnapshot::default()
                };
                format!("{stamp} {} [{}]", p.status(&snap), p.quality(*quality))
            }
            WatchEvent::Notice { level, message } => {
                format!("{stamp} {}: {message}", p.level(*level))
            }
            WatchEvent::Echo { text, sender } => match sender {
                Some(sender) => format!("{stamp} {} {text}", p.dim(&format!("<{sender}>"))),
                None => format!("{stamp} {text}"),
            },
            WatchEvent::Shapes {
                polygons,
                polylines,
            } => format!("{stamp} shapes: {polygons} polygons, {polylines} polylines"),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &Client,
    args: WatchArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer {
        format: global.output,
        painter: Painter::new(global.color),
        quiet: global.quiet,
    };

    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<EchoLine>();
    let echo_sub = client.store().echo_log.subscribe(move |lines, _| {
        if let Some(line) = lines.last() {
            let _ = echo_tx.send(line.clone());
        }
    });

    let result = follow(client, args, resolved, &printer, &mut echo_rx).await;
    echo_sub.unsubscribe();
    result
}

async fn follow(
    client: &Client,
    args: WatchArgs,
    resolved: &Resolved,
    printer: &Printer,
    echo_rx: &mut mpsc::UnboundedReceiver<EchoLine>,
) -> Result<(), CliError> {
    let mut connection = client.connection();
    let mut notes = client.notifications();
    let mut shapes = client.shapes();

    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut deadline = pin!(async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    });

    let mut last_status = None;
    loop {
        let snap = connection.borrow_and_update().clone();
        if snap.transport_state == TransportState::Error {
            return Err(CliError::ConnectionFailed {
                url: resolved.client.url.to_string(),
                reason: "gave up reconnecting".into(),
            });
        }
        let status = (snap.status_message(), snap.quality());
        if last_status != Some(status) {
            last_status = Some(status);
            printer.emit(&WatchEvent::Status {
                message: status.0,
                quality: status.1,
                transport: snap.transport_connected,
                simulation: snap.sim_connected,
                receiving: snap.receiving_data,
            })?;
        }

        tokio::select! {
            biased;
            res = &mut ctrl_c => {
                res?;
                tracing::debug!("interrupted");
                return Ok(());
            }
            () = &mut deadline => return Ok(()),
            changed = connection.changed() => {
                if changed.is_err() {
                    return Err(CliError::Disconnected);
                }
            }
            note = notes.recv() => match note {
                Ok(note) => printer.emit(&WatchEvent::Notice {
                    level: note.level,
                    message: &note.message,
                })?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notifications dropped");
                }
                Err(RecvError::Closed) => return Err(CliError::Disconnected),
            },
            Some(line) = echo_rx.recv() => {
                if !args.no_echo {
                    printer.emit(&WatchEvent::Echo {
                        text: &line.text,
                        sender: line.sender.as_deref(),
                    })?;
                }
            }
            Some(snapshot) = shapes.changed() => {
                let polylines = snapshot
                    .iter()
                    .filter(|s| s.kind() == ShapeKind::Polyline)
                    .count();
                printer.emit(&WatchEvent::Shapes {
                    polygons: snapshot.len() - polylines,
                    polylines,
                })?;
            }
        }
    }
}
