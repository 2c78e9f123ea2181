//! Prompt assembly for continuation runs.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// At most this many files are included in a workspace summary.
pub const MAX_CONTEXT_FILES: usize = 20;
/// Per-file content cap, in characters.
pub const MAX_FILE_CHARS: usize = 2000;

/// One earlier user request, by conversation round.
#[derive(Debug, Clone)]
pub struct RoundEntry {
    pub round: i64,
    pub content: String,
}

/// Build the prompt for a continuation run. Carries the original
/// requirement, every earlier modification request, and the current one,
/// so the engine sees the full history even though each run is fresh.
pub fn continuation_prompt(
    original_requirement: &str,
    history: &[RoundEntry],
    current_request: &str,
    round: i64,
    workspace_path: &Path,
) -> String {
    let conversation_history = if history.is_empty() {
        "(This is the first modification request)".to_string()
    } else {
        history
            .iter()
            .map(|entry| format!("  - Round {}: {}", entry.round, entry.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are continuing work on an existing project.\n\
         \n\
         === ORIGINAL REQUIREMENT ===\n\
         {original_requirement}\n\
         \n\
         === PREVIOUS MODIFICATION REQUESTS ===\n\
         {conversation_history}\n\
         \n\
         === CURRENT REQUEST (Round {round}) ===\n\
         {current_request}\n\
         \n\
         === EXISTING PROJECT ===\n\
         Location: {}\n\
         \n\
         === INSTRUCTIONS ===\n\
         1. Analyze the existing codebase at the project location\n\
         2. Consider ALL previous modification requests in your implementation\n\
         3. Implement the CURRENT REQUEST while maintaining consistency with previous changes\n\
         4. Modify existing files when appropriate rather than creating entirely new ones\n\
         5. Maintain consistency with the existing coding style and architecture\n",
        workspace_path.display()
    )
}

/// Summarize the files in a workspace for inclusion in a prompt.
/// Bounded: the first [`MAX_CONTEXT_FILES`] files in sorted order, each
/// truncated to [`MAX_FILE_CHARS`] characters. Unreadable files and
/// hidden directories are skipped.
pub fn summarize_workspace(root: &Path) -> String {
    let mut files = Vec::new();
    collect_files(root, root, &mut files);
    files.sort();
    files.truncate(MAX_CONTEXT_FILES);

    let mut summary = String::new();
    for relative in &files {
        let Ok(content) = fs::read_to_string(root.join(relative)) else {
            continue;
        };
        let shown: String = content.chars().take(MAX_FILE_CHARS).collect();
        let marker = if content.chars().count() > MAX_FILE_CHARS {
            "\n[truncated]"
        } else {
            ""
        };
        let _ = writeln!(summary, "--- {} ---\n{shown}{marker}", relative);
    }
    summary
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().into_owned());
        }
    }
}
