//! `atmlink contexts`: list, switch and add simulation contexts.

use serde::Serialize;
use tabled::Tabled;

use atmlink_core::{Client, ContextNode, ContextTopology};

use crate::cli::{ContextsArgs, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::wait_for_field;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ContextEntry {
    #[serde(flatten)]
    node: ContextNode,
    active: bool,
}

#[derive(Tabled)]
struct ContextRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "#")]
    number: u32,
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Scenario")]
    status: String,
    #[tabled(rename = "Sim time")]
    sim_time: String,
}

impl From<&ContextEntry> for ContextRow {
    fn from(e: &ContextEntry) -> Self {
        Self {
            marker: if e.active { "*" } else { "" },
            id: e.node.id.clone(),
            number: e.node.number,
            server: e.node.server_id.clone(),
            status: e.node.status.clone(),
            sim_time: e.node.sim_time.clone(),
        }
    }
}

fn entries(topology: &ContextTopology, active: Option<&str>) -> Vec<ContextEntry> {
    let mut list: Vec<ContextEntry> = topology
        .nodes
        .values()
        .map(|node| ContextEntry {
            active: active == Some(node.id.as_str()),
            node: node.clone(),
        })
        .collect();
    list.sort_by(|a, b| {
        a.node
            .number
            .cmp(&b.node.number)
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
    list
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &Client,
    args: ContextsArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = resolved.timeout();
    client.wait_for_transport(timeout).await?;
    let store = client.store();

    // The client asks for the topology on connect; wait for the answer.
    let topology = wait_for_field(&store.contexts, timeout, |t| !t.is_empty()).await?;

    if let Some(count) = args.add {
        if !client.add_contexts(count, args.server) {
            return Err(CliError::NotSent {
                what: "context request".into(),
            });
        }
        if !global.quiet {
            eprintln!("Requested {count} new context(s)");
        }
        let before = topology.len();
        let topology = wait_for_field(&store.contexts, timeout, |t| t.len() > before).await?;
        return print_contexts(&topology, store.active_context_id.get().as_deref(), global);
    }

    if let Some(id) = args.select {
        if topology.get(&id).is_none() {
            return Err(CliError::ContextNotFound { id });
        }
        if !client.set_active_context(&id) {
            return Err(CliError::NotSent {
                what: "context switch".into(),
            });
        }
        wait_for_field(&store.active_context_id, timeout, |active| {
            active.as_deref() == Some(id.as_str())
        })
        .await?;
        if !global.quiet {
            eprintln!("Active context: {id}");
        }
        return Ok(());
    }

    print_contexts(&topology, store.active_context_id.get().as_deref(), global)
}

fn print_contexts(
    topology: &ContextTopology,
    active: Option<&str>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let list = entries(topology, active);
    let out = output::render_list(
        global.output,
        &list,
        |e| ContextRow::from(e),
        |e| e.node.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn node(id: &str, number: u32) -> ContextNode {
        ContextNode {
            id: id.into(),
            number,
            server_id: "srv".into(),
            status: "init".into(),
            sim_time: "00:00:00".into(),
        }
    }

    #[test]
    fn entries_are_ordered_and_marked() {
        let topology = ContextTopology {
            nodes: BTreeMap::from([
                ("b".to_owned(), node("b", 2)),
                ("a".to_owned(), node("a", 1)),
                ("z".to_owned(), node("z", 1)),
            ]),
            servers: vec!["srv".into()],
        };

        let list = entries(&topology, Some("b"));

        let ids: Vec<&str> = list.iter().map(|e| e.node.id.as_str()).collect();
        assert_eq!(ids, ["a", "z", "b"]);
        assert!(list[2].active);
        assert_eq!(ContextRow::from(&list[2]).marker, "*");
        assert_eq!(ContextRow::from(&list[0]).marker, "");
    }
}
