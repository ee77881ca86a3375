//! `kiln evict` and `kiln reset`: cache maintenance.

use std::time::Duration;

use kiln_cache::CacheError;

use crate::project::load_project;
use crate::{EvictArgs, GlobalArgs};

/// Runs the `kiln evict` command.
pub fn evict(args: &EvictArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let store = project.open_store("maintain", None)?;
    let secs = args.older_than.unwrap_or(project.config.cache.retention_secs);
    let removed = store.evict(Duration::from_secs(secs))?;
    if !global.quiet {
        eprintln!("   Evicted {removed} slot(s) older than {secs}s");
    }
    Ok(0)
}

/// Runs the `kiln reset` command. A busy store is reported with exit code 2
/// and left untouched.
pub fn reset(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let store = project.open_store("maintain", None)?;
    match store.reset() {
        Ok(removed) => {
            if !global.quiet {
                eprintln!("   Removed {removed} slot(s)");
            }
            Ok(0)
        }
        Err(e @ (CacheError::StoreBusy { .. } | CacheError::ResetInProgress { .. })) => {
            eprintln!("error: {e}");
            Ok(2)
        }
        Err(e) => Err(e.into()),
    }
}
