//! Command dispatch: bridges CLI args -> `Client` intents -> output.

pub mod config_cmd;
pub mod contexts;
pub mod send;
pub mod watch;

use std::time::Duration;

use tokio::sync::mpsc;

use atmlink_core::{Client, Field};

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a server-bound command to its handler, then disconnect.
pub async fn dispatch(
    cmd: Command,
    client: &Client,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    client.connect().await?;
    let result = match cmd {
        Command::Watch(args) => watch::handle(client, args, resolved, global).await,
        Command::Send(args) => send::handle(client, args, resolved, global).await,
        Command::Contexts(args) => contexts::handle(client, args, resolved, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "local command routed to a server connection".into(),
        )),
    };
    client.disconnect().await;
    result
}

/// Wait until `field` holds a value accepted by `done`, or time out.
pub async fn wait_for_field<T>(
    field: &Field<T>,
    timeout: Duration,
    done: impl Fn(&T) -> bool + Send,
) -> Result<T, CliError>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<T>();
    let sub = field.subscribe(move |value, _| {
        let _ = tx.send(value.clone());
    });

    let current = field.get();
    let result = if done(&current) {
        Ok(current)
    } else {
        tokio::time::timeout(timeout, async {
            while let Some(value) = rx.recv().await {
                if done(&value) {
                    return Some(value);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .ok_or(CliError::Timeout {
            seconds: timeout.as_secs(),
        })
    };
    sub.unsubscribe();
    result
}
