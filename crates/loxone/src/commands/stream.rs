//! `loxone stream`: print state updates until interrupted.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Serialize;

use loxone_core::{Controller, DispatchedUpdate, DispatchedValue, StructureDocument};

use crate::cli::{GlobalOpts, OutputFormat, StreamArgs};
use crate::error::CliError;
use crate::output;

use super::parse_identifier;

#[derive(Debug, Serialize)]
struct StreamRecord {
    at: DateTime<Utc>,
    state: String,
    control: Option<String>,
    role: Option<String>,
    value: serde_json::Value,
}

fn json_value(value: &DispatchedValue) -> serde_json::Value {
    match value {
        DispatchedValue::Number(v) => serde_json::json!(v),
        DispatchedValue::Bool(b) => serde_json::json!(b),
        DispatchedValue::Integer(i) => serde_json::json!(i),
        DispatchedValue::Text { text, .. } => serde_json::json!(text),
        DispatchedValue::Bytes(bytes) => serde_json::json!(bytes.len()),
    }
}

fn record(update: &DispatchedUpdate, structure: Option<&StructureDocument>) -> StreamRecord {
    let control = update.control.map(|id| {
        structure
            .and_then(|s| s.control(&id))
            .map_or_else(|| id.to_string(), |c| c.name.clone())
    });
    StreamRecord {
        at: update.received_at,
        state: update.id.to_string(),
        control,
        role: update.role.clone(),
        value: json_value(&update.value),
    }
}

fn render(update: &DispatchedUpdate, structure: Option<&StructureDocument>, format: &OutputFormat) -> Result<String, CliError> {
    let record = record(update, structure);
    Ok(match format {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(&record)?,
        OutputFormat::Plain => format!("{} {}", record.state, update.value),
        OutputFormat::Table => {
            let label = match (&record.control, &record.role) {
                (Some(control), Some(role)) => format!("{control}/{role}"),
                (Some(control), None) => control.clone(),
                _ => record.state.clone(),
            };
            format!(
                "{} {label} = {}",
                record.at.to_rfc3339_opts(SecondsFormat::Millis, true),
                update.value
            )
        }
    })
}

pub async fn handle(controller: &Controller, args: &StreamArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut updates: BoxStream<'static, Arc<DispatchedUpdate>> = if args.states.is_empty() {
        controller.subscribe_all().boxed()
    } else {
        let subscriptions = args
            .states
            .iter()
            .map(|raw| parse_identifier(raw).map(|id| controller.subscribe(id)))
            .collect::<Result<Vec<_>, _>>()?;
        stream::select_all(subscriptions).boxed()
    };

    let mut seen = 0usize;
    loop {
        if args.count.is_some_and(|max| seen >= max) {
            break;
        }
        let update = tokio::select! {
            update = updates.next() => update,
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted");
                break;
            }
        };
        let Some(update) = update else { break };
        let structure = controller.structure();
        let line = render(&update, structure.as_deref(), &global.output)?;
        output::print_output(&line, global.quiet);
        seen += 1;
    }
    tracing::info!(updates = seen, "stream finished");
    Ok(())
}
