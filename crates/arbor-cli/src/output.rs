//! How commands print: tables and trees for people, JSON with `--json`,
//! bare ids (or nothing) with `--quiet`

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use arbor_core::sync::SyncReport;
use arbor_core::{Block, ChangeLogEntry, ConflictRow, Note, SyncStatus, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
    /// Ids only, for scripts
    Quiet,
}

impl OutputFormat {
    /// `--quiet` beats `--json`
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        match (json, quiet) {
            (_, true) => OutputFormat::Quiet,
            (true, false) => OutputFormat::Json,
            (false, false) => OutputFormat::Human,
        }
    }
}

pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode JSON output: {}", e),
        }
    }

    pub fn print_workspace(&self, ws: &Workspace) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", ws.id);
                println!("Name:     {}", ws.name);
                println!("Owner:    {}", ws.user_id);
                println!("Favorite: {}", if ws.is_favorite { "yes" } else { "no" });
                println!("Sync:     {}", ws.sync_status);
                println!("Created:  {}", ws.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:  {}", ws.updated_at.format("%Y-%m-%d %H:%M"));
            }
            OutputFormat::Json => self.json(ws),
            OutputFormat::Quiet => println!("{}", ws.id),
        }
    }

    pub fn print_workspaces(&self, workspaces: &[Workspace]) {
        match self.format {
            OutputFormat::Human => {
                if workspaces.is_empty() {
                    println!("No workspaces found.");
                    return;
                }
                for ws in workspaces {
                    println!(
                        "{} | {}{} | {}",
                        short_id(ws.id),
                        truncate(&ws.name, 40),
                        if ws.is_favorite { " *" } else { "" },
                        status_marker(ws.sync_status)
                    );
                }
                println!("\n{} workspace(s)", workspaces.len());
            }
            OutputFormat::Json => self.json(workspaces),
            OutputFormat::Quiet => {
                for ws in workspaces {
                    println!("{}", ws.id);
                }
            }
        }
    }

    /// Print a note with its blocks
    pub fn print_note(&self, note: &Note, blocks: &[Block]) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:        {}", note.id);
                println!("Title:     {}", note.title);
                println!("Workspace: {}", note.workspace_id);
                if let Some(parent) = note.parent_id {
                    println!("Parent:    {}", parent);
                }
                println!("Favorite:  {}", if note.is_favorite { "yes" } else { "no" });
                println!("Sync:      {}", note.sync_status);
                println!("Updated:   {}", note.updated_at.format("%Y-%m-%d %H:%M"));
                if !note.content.is_empty() {
                    println!();
                    println!("{}", note.content);
                }
                if !blocks.is_empty() {
                    println!();
                    println!("── Blocks ({}) ──", blocks.len());
                    for block in blocks {
                        println!(
                            "{:>3}. [{}] {} {}",
                            block.order_index,
                            block.block_type,
                            short_id(block.id),
                            truncate_line(&block.content, 60)
                        );
                    }
                }
            }
            OutputFormat::Json => {
                self.json(&serde_json::json!({ "note": note, "blocks": blocks }));
            }
            OutputFormat::Quiet => println!("{}", note.id),
        }
    }

    /// Print notes as an indented tree (parents before children)
    pub fn print_notes(&self, notes: &[Note]) {
        match self.format {
            OutputFormat::Human => {
                if notes.is_empty() {
                    println!("No notes found.");
                    return;
                }
                for (depth, note) in note_tree(notes) {
                    println!(
                        "{}{} {}{} {}",
                        "  ".repeat(depth),
                        short_id(note.id),
                        truncate(&note.title, 50),
                        if note.is_favorite { " *" } else { "" },
                        status_marker(note.sync_status)
                    );
                }
                println!("\n{} note(s)", notes.len());
            }
            OutputFormat::Json => self.json(notes),
            OutputFormat::Quiet => {
                for note in notes {
                    println!("{}", note.id);
                }
            }
        }
    }

    pub fn print_blocks(&self, blocks: &[Block]) {
        match self.format {
            OutputFormat::Human => {
                if blocks.is_empty() {
                    println!("No blocks in this note.");
                    return;
                }
                for block in blocks {
                    println!(
                        "{:>3}. {} [{}] {} {}",
                        block.order_index,
                        short_id(block.id),
                        block.block_type,
                        truncate_line(&block.content, 50),
                        status_marker(block.sync_status)
                    );
                }
            }
            OutputFormat::Json => self.json(blocks),
            OutputFormat::Quiet => {
                for block in blocks {
                    println!("{}", block.id);
                }
            }
        }
    }

    pub fn print_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                let elapsed = report.finished_at - report.started_at;
                if report.success {
                    println!(
                        "✓ Sync complete in {}ms: {}",
                        elapsed.num_milliseconds(),
                        report.summary()
                    );
                } else {
                    println!("✗ Sync incomplete: {}", report.summary());
                }
                for conflict in &report.conflicts {
                    println!(
                        "  conflict: {} {} ({}) {}",
                        conflict.entity_type,
                        short_id(conflict.entity_id),
                        conflict.reason.as_str(),
                        conflict.message
                    );
                }
                for error in &report.errors {
                    match error.workspace_id {
                        Some(ws) => {
                            println!("  {} {} failed: {}", error.phase, short_id(ws), error.message)
                        }
                        None => println!("  {} failed: {}", error.phase, error.message),
                    }
                }
            }
            OutputFormat::Json => self.json(report),
            OutputFormat::Quiet => {}
        }
    }

    pub fn print_conflicts(&self, conflicts: &[ConflictRow]) {
        match self.format {
            OutputFormat::Human => {
                if conflicts.is_empty() {
                    println!("No conflicts.");
                    return;
                }
                for row in conflicts {
                    println!(
                        "{} | {:<9} | {} | {}",
                        short_id(row.entity_id),
                        row.entity_type.as_str(),
                        truncate(&row.label, 40),
                        row.updated_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!("\n{} conflict(s)", conflicts.len());
                println!("Resolve with: arbor resolve <id> --keep local|remote");
            }
            OutputFormat::Json => self.json(conflicts),
            OutputFormat::Quiet => {
                for row in conflicts {
                    println!("{}", row.entity_id);
                }
            }
        }
    }

    pub fn print_log(&self, entries: &[ChangeLogEntry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("Change log is empty.");
                    return;
                }
                for entry in entries {
                    print!(
                        "{:>6} {} {:<6} {:<9} {} {}",
                        entry.id,
                        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.action.as_str(),
                        entry.entity_type.as_str(),
                        short_id(entry.entity_id),
                        entry.status
                    );
                    match entry.error {
                        Some(ref err) => println!(" ({})", err),
                        None => println!(),
                    }
                }
            }
            OutputFormat::Json => self.json(entries),
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.id);
                }
            }
        }
    }

    /// Confirmation line after a write
    pub fn success(&self, text: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", text),
            OutputFormat::Json => println!("{}", serde_json::json!({"ok": true, "message": text})),
            OutputFormat::Quiet => {}
        }
    }

    /// Prompts only make sense for a person at a terminal
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Progress and warnings; suppressed by `--quiet`
    pub fn message(&self, text: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", text),
            OutputFormat::Json => println!("{}", serde_json::json!({ "message": text })),
            OutputFormat::Quiet => {}
        }
    }
}

/// First eight characters of an id
pub fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn status_marker(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Synced => "",
        SyncStatus::Pending => "(pending)",
        SyncStatus::Conflict => "(conflict)",
    }
}

/// Depth-first order of a workspace's notes. Notes whose parent is not in
/// the slice are treated as roots.
fn note_tree(notes: &[Note]) -> Vec<(usize, &Note)> {
    let ids: std::collections::HashSet<Uuid> = notes.iter().map(|n| n.id).collect();
    let mut children: HashMap<Option<Uuid>, Vec<&Note>> = HashMap::new();
    for note in notes {
        let parent = note.parent_id.filter(|p| ids.contains(p));
        children.entry(parent).or_default().push(note);
    }

    let mut ordered = Vec::with_capacity(notes.len());
    let mut stack: Vec<(usize, &Note)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|n| (0, *n)).collect())
        .unwrap_or_default();
    while let Some((depth, note)) = stack.pop() {
        ordered.push((depth, note));
        if let Some(kids) = children.get(&Some(note.id)) {
            stack.extend(kids.iter().rev().map(|n| (depth + 1, *n)));
        }
    }
    ordered
}

/// At most `width` chars, ending in "..." when cut
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn truncate_line(text: &str, width: usize) -> String {
    truncate(text.lines().next().unwrap_or_default(), width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé title", 8), "ünïcö...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
        assert_eq!(truncate_line("", 20), "");
    }

    #[test]
    fn test_note_tree_orders_children_under_parents() {
        let ws = Uuid::new_v4();
        let root = Note::new(ws, None, "Root");
        let child = Note::new(ws, Some(root.id), "Child");
        let grandchild = Note::new(ws, Some(child.id), "Grandchild");
        let other = Note::new(ws, None, "Other");

        let notes = vec![grandchild.clone(), other.clone(), child.clone(), root.clone()];
        let tree: Vec<(usize, &str)> = note_tree(&notes)
            .into_iter()
            .map(|(d, n)| (d, n.title.as_str()))
            .collect();

        assert_eq!(tree.len(), 4);
        let pos = |title: &str| tree.iter().position(|(_, t)| *t == title).unwrap();
        assert!(pos("Root") < pos("Child"));
        assert!(pos("Child") < pos("Grandchild"));
        assert_eq!(tree[pos("Grandchild")].0, 2);
        assert_eq!(tree[pos("Other")].0, 0);
    }

    #[test]
    fn test_note_tree_keeps_orphans() {
        let ws = Uuid::new_v4();
        let orphan = Note::new(ws, Some(Uuid::new_v4()), "Orphan");
        let notes = vec![orphan];
        assert_eq!(note_tree(&notes).len(), 1);
    }
}
