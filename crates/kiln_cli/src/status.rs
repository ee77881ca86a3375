//! `kiln status`: list cache slots.

use kiln_cache::SlotInfo;

use crate::project::load_project;
use crate::{GlobalArgs, StatusArgs};

/// Runs the `kiln status` command.
pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let store = project.open_store("status", None)?;
    let slots = store.slots()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&slots)?);
    } else if slots.is_empty() {
        if !global.quiet {
            eprintln!("   No slots under {}", store.root().display());
        }
    } else {
        for slot in &slots {
            println!("{}", render_line(slot));
        }
    }
    Ok(0)
}

fn render_line(slot: &SlotInfo) -> String {
    let namespace = match slot.worker {
        Some(ref worker) => format!("{}/{worker}", slot.mode),
        None => slot.mode.to_string(),
    };
    let mut line = format!(
        "{:<11} {} gen={} [{namespace}]",
        slot.status.to_string(),
        slot.key,
        slot.generation
    );
    if let Some(ref lock) = slot.lock {
        line.push_str(&format!(" held by {}", lock.owner));
    }
    if let Some(ref reason) = slot.reason {
        line.push_str(&format!(": {reason}"));
    }
    line
}
