//! `loxone send`: one command to one control.

use loxone_core::{Controller, Identifier, StructureDocument};

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

use super::parse_identifier;

/// An identifier, or a name that matches exactly one control.
fn resolve_target(raw: &str, structure: Option<&StructureDocument>) -> Result<Identifier, CliError> {
    if let Ok(id) = parse_identifier(raw) {
        return Ok(id);
    }
    let Some(structure) = structure else {
        return Err(CliError::NotFound {
            resource_type: "control".into(),
            identifier: raw.into(),
            list_command: "controls".into(),
        });
    };

    let matches: Vec<_> = structure.find_by_name(raw).collect();
    if let Some(exact) = matches.iter().find(|c| c.name.eq_ignore_ascii_case(raw)) {
        return Ok(exact.id);
    }
    match matches.as_slice() {
        [] => Err(CliError::NotFound {
            resource_type: "control".into(),
            identifier: raw.into(),
            list_command: "controls".into(),
        }),
        [only] => Ok(only.id),
        many => Err(CliError::Ambiguous {
            needle: raw.into(),
            count: many.len(),
            candidates: many
                .iter()
                .map(|c| format!("{} ({})", c.name, c.id))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

pub async fn handle(controller: &Controller, args: &SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let structure = controller.structure();
    let target = resolve_target(&args.target, structure.as_deref())?;

    let response = controller.send_command(&target, &args.command).await?;
    tracing::debug!(%target, code = response.code, "command acknowledged");
    let out = output::render_single(
        &global.output,
        &response.value,
        |v| v.as_str().map_or_else(|| v.to_string(), str::to_owned),
        |v| v.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
