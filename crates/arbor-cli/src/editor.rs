//! $EDITOR round-trips and y/N prompts

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};

#[cfg(windows)]
const FALLBACK_EDITOR: &str = "notepad";
#[cfg(not(windows))]
const FALLBACK_EDITOR: &str = "vi";

/// Hand `initial` to the user's editor and return what they saved
pub fn edit_text(initial: &str) -> Result<String> {
    let editor = editor_command();
    let scratch = ScratchFile::create(initial)?;

    // Allow things like `code --wait`
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or(FALLBACK_EDITOR);
    let status = Command::new(program)
        .args(words)
        .arg(&scratch.0)
        .status()
        .with_context(|| format!("Could not launch editor `{}`", editor))?;
    if !status.success() {
        bail!("`{}` exited with {}; nothing was changed", editor, status);
    }

    std::fs::read_to_string(&scratch.0)
        .with_context(|| format!("Could not read back {}", scratch.0.display()))
}

/// First non-blank of $VISUAL and $EDITOR, else the platform default
fn editor_command() -> String {
    ["VISUAL", "EDITOR"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_EDITOR.to_string())
}

/// Temp file removed on drop
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn create(contents: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("arbor-{}.md", std::process::id()));
        std::fs::write(&path, contents)
            .with_context(|| format!("Could not write {}", path.display()))?;
        Ok(Self(path))
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Ask a y/N question on the terminal. Non-interactive stdin counts as "no".
pub fn confirm(question: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }
    let mut stdout = io::stdout();
    write!(stdout, "{} [y/N] ", question)?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("yep"));
        assert!(!is_yes("n"));
    }

    #[test]
    fn test_scratch_file_is_removed_on_drop() {
        let scratch = ScratchFile::create("draft").unwrap();
        let path = scratch.0.clone();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "draft");
        drop(scratch);
        assert!(!path.exists());
    }
}
