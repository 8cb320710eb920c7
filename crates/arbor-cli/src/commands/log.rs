//! Change log inspection

use anyhow::Result;

use arbor_core::Store;

use crate::output::{Output, OutputFormat};

/// Show the most recent change-log entries, or only those still pending
pub fn show(store: &Store, limit: usize, pending: bool, output: &Output) -> Result<()> {
    let log = store.change_log();
    let entries = if pending {
        let mut entries = log.list_pending()?;
        entries.truncate(limit);
        entries
    } else {
        log.list_recent(limit)?
    };

    output.print_log(&entries);

    if output.format == OutputFormat::Human && !entries.is_empty() {
        let counts = log.counts()?;
        println!(
            "\n{} pending, {} sent, {} failed",
            counts.pending, counts.success, counts.error
        );
    }
    Ok(())
}
