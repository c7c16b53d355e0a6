//! `loxone controls`: the loaded structure as a table.

use serde::Serialize;
use tabled::Tabled;

use loxone_core::{Controller, StructureDocument};

use crate::cli::{ControlsArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ControlEntry {
    id: String,
    name: String,
    #[serde(rename = "type")]
    control_type: String,
    room: Option<String>,
    category: Option<String>,
    states: Vec<String>,
    parent: Option<String>,
}

#[derive(Tabled)]
struct ControlRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    control_type: String,
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "States")]
    states: usize,
    #[tabled(rename = "ID")]
    id: String,
}

fn entries(structure: &StructureDocument, args: &ControlsArgs) -> Vec<ControlEntry> {
    let room_filter = args.room.as_deref().map(str::to_lowercase);
    let name_filter = args.filter.as_deref().map(str::to_lowercase);

    let mut entries: Vec<ControlEntry> = structure
        .controls()
        .filter(|c| {
            args.control_type
                .as_deref()
                .is_none_or(|t| c.control_type.as_str().eq_ignore_ascii_case(t))
        })
        .filter(|c| {
            name_filter
                .as_deref()
                .is_none_or(|needle| c.name.to_lowercase().contains(needle))
        })
        .filter_map(|c| {
            let room = structure.room_of(&c.id).map(|r| r.name.clone());
            if let Some(ref wanted) = room_filter {
                if room.as_deref().map(str::to_lowercase).as_deref() != Some(wanted.as_str()) {
                    return None;
                }
            }
            Some(ControlEntry {
                id: c.id.to_string(),
                name: c.name.clone(),
                control_type: c.control_type.to_string(),
                room,
                category: structure.category_of(&c.id).map(|cat| cat.name.clone()),
                states: c.states.keys().cloned().collect(),
                parent: c.parent.map(|p| p.to_string()),
            })
        })
        .collect();
    entries.sort_by(|a, b| (&a.room, &a.name).cmp(&(&b.room, &b.name)));
    entries
}

pub fn handle(controller: &Controller, args: &ControlsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let structure = controller.structure().ok_or_else(|| CliError::Protocol {
        message: "no structure loaded".into(),
    })?;
    let entries = entries(&structure, args);

    let out = output::render_list(
        &global.output,
        &entries,
        |e| ControlRow {
            name: e.name.clone(),
            control_type: e.control_type.clone(),
            room: e.room.clone().unwrap_or_default(),
            category: e.category.clone().unwrap_or_default(),
            states: e.states.len(),
            id: e.id.clone(),
        },
        |e| e.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
