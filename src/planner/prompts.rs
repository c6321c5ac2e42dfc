// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Prompt text sent to the planning model

use crate::db::FileRecord;

/// Instructions starting with this marker must place every file
pub const AUTO_ORGANIZE_MARKER: &str = "[AUTO-ORGANIZE]";

/// Files listed in a single prompt
pub const MAX_SUMMARY_FILES: usize = 300;

pub const SYSTEM_PROMPT: &str = r#"You are a file organization assistant. Propose how to organize files into folders based on user instructions.

OUTPUT FORMAT - Return ONLY this JSON structure:
{
  "folders": {
    "<folder-name>": [<file_id>, <file_id>, ...],
    ...
  }
}

CRITICAL ID RULE:
- Each file I give you has a numeric ID shown as "id:NUMBER"
- You MUST use the EXACT same number in your response
- Example: If I show "id:38 | interface.jpg", you return {"folders": {"interfaces": [38]}}
- NEVER invent IDs - only use the numbers I provide

FOLDER NAMING:
- Use lowercase, kebab-case (e.g., "interfaces", "client-invoices", "2024-receipts")
- Create the folder name the user asks for, or a descriptive name based on content
- Maximum 2 levels deep (e.g., "clients/acme" ok, "a/b/c" not ok)

FILE SELECTION:
- ONLY include files that match the user's instruction
- Leave non-matching files OUT of the response entirely
- It's OK to return empty {"folders": {}} if nothing matches
- Do NOT create "unsorted" or "other" folders unless asked

EXAMPLE:
User: "Put interface files in an interfaces folder"
Files: id:38 | interface.jpg | tags:[ui, mockup]
       id:39 | receipt.pdf | tags:[finance]
Response: {"folders": {"interfaces": [38]}}
(Note: receipt.pdf is NOT included because it doesn't match)

JSON only. No markdown. No explanation."#;

/// One line per file, truncated to `max_files`
pub fn build_file_summary(files: &[FileRecord], max_files: usize) -> String {
    let mut lines: Vec<String> = files
        .iter()
        .take(max_files)
        .map(|f| {
            let name: String = f.file_name.chars().take(50).collect();
            let label = f.label.as_deref().unwrap_or("");
            let tags = f.tags.iter().take(8).cloned().collect::<Vec<_>>().join(", ");
            let mut line = format!("id:{} | {} | label:{} | tags:[{}]", f.id, name, label, tags);
            if let Some(caption) = f.caption.as_deref().filter(|c| !c.is_empty()) {
                line.push_str(" | caption:");
                line.extend(caption.chars().take(80));
            }
            line
        })
        .collect();

    if files.len() > max_files {
        lines.push(format!("... and {} more files", files.len() - max_files));
    }
    lines.join("\n")
}

pub fn is_auto_organize(instruction: &str) -> bool {
    instruction.starts_with(AUTO_ORGANIZE_MARKER)
}

pub fn plan_message(instruction: &str, files: &[FileRecord]) -> String {
    let summary = build_file_summary(files, MAX_SUMMARY_FILES);
    let count = files.len();

    if is_auto_organize(instruction) {
        format!(
            "User instruction: \"{instruction}\"\n\n\
             Files to organize ({count} total):\n{summary}\n\n\
             CRITICAL OVERRIDE FOR AUTO-ORGANIZE:\n\
             - You MUST include EVERY file_id in your response\n\
             - Each file_id must appear in exactly ONE folder\n\
             - Do NOT skip any files\n\
             - If a file doesn't fit a category, put it in 'misc' or 'other'\n\
             - Total files in your response must equal {count}\n\n\
             Propose an organization plan. Return JSON only."
        )
    } else {
        format!(
            "User instruction: \"{instruction}\"\n\n\
             Files to organize ({count} total):\n{summary}\n\n\
             REMEMBER: Use ONLY the exact numeric IDs shown above (the number after \"id:\"). Do NOT invent IDs!\n\n\
             Propose an organization plan. Return JSON only."
        )
    }
}

pub fn refinement_message(
    instruction: &str,
    current_plan: &str,
    feedback: &str,
    files: &[FileRecord],
) -> String {
    let summary = build_file_summary(files, MAX_SUMMARY_FILES);
    format!(
        "Original instruction: \"{instruction}\"\n\n\
         Current plan:\n{current_plan}\n\n\
         User feedback: \"{feedback}\"\n\n\
         Files available ({count} total):\n{summary}\n\n\
         Based on the user feedback, provide an UPDATED organization plan.\n\
         Apply the user's requested changes to the current plan.\n\
         Return the complete updated plan as JSON only.",
        count = files.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, name: &str) -> FileRecord {
        FileRecord {
            id,
            file_path: format!("/in/{}", name),
            file_name: name.to_string(),
            file_extension: String::new(),
            file_size: 0,
            category: None,
            label: None,
            tags: Vec::new(),
            caption: None,
            content_hash: None,
            ai_source: None,
            created_date: None,
            modified_date: None,
            last_indexed_at: None,
        }
    }

    #[test]
    fn test_summary_line_format() {
        let mut f = record(38, "interface.jpg");
        f.label = Some("mockup".to_string());
        f.tags = (0..10).map(|i| format!("t{}", i)).collect();
        f.caption = Some("x".repeat(100));

        let summary = build_file_summary(&[f], 300);
        assert!(summary.starts_with("id:38 | interface.jpg | label:mockup | tags:[t0, t1,"));
        assert!(summary.contains("t7]"));
        assert!(!summary.contains("t8"));
        assert!(summary.ends_with(&format!(" | caption:{}", "x".repeat(80))));
    }

    #[test]
    fn test_summary_truncates() {
        let files: Vec<FileRecord> = (1..=5).map(|i| record(i, "a.txt")).collect();
        let summary = build_file_summary(&files, 2);
        assert_eq!(summary.lines().count(), 3);
        assert!(summary.ends_with("... and 3 more files"));
    }

    #[test]
    fn test_auto_organize_message_demands_all_files() {
        let files = vec![record(1, "a.pdf"), record(2, "b.jpg")];
        let auto = plan_message("[AUTO-ORGANIZE] by type", &files);
        assert!(auto.contains("Total files in your response must equal 2"));

        let targeted = plan_message("put pdfs in docs", &files);
        assert!(targeted.contains("Do NOT invent IDs"));
        assert!(!targeted.contains("AUTO-ORGANIZE"));
    }
}
