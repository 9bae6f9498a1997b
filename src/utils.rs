//! Shared helpers for the command-line front ends.

use std::path::Path;

use anyhow::{Context, Result};

use crate::answerer::AnswerResult;

/// Ensures the parent directory of the database file exists.
///
/// Creates the directory structure if it doesn't exist using `create_dir_all`.
///
/// # Errors
///
/// Returns an error if directory creation fails.
pub fn ensure_database_directory(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }
    Ok(())
}

/// Renders an answer for the terminal: the text, then one numbered link per line.
pub fn format_answer(result: &AnswerResult) -> String {
    let mut out = result.answer_text().trim().to_string();

    if !result.links().is_empty() {
        out.push_str("\n\nLearn more:");
        for (i, link) in result.links().iter().enumerate() {
            out.push_str(&format!("\n  [{}] {}", i + 1, link));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answerer::{AssembledContext, SORRY_NO_ANSWER};

    #[test]
    fn ensure_database_directory_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("deeper").join("documents.db");

        ensure_database_directory(&db_path).unwrap();
        assert!(db_path.parent().unwrap().is_dir());

        // Idempotent
        ensure_database_directory(&db_path).unwrap();
    }

    #[test]
    fn format_answer_lists_links() {
        let result = AnswerResult::new(
            "X is Y.\n".to_string(),
            AssembledContext {
                context: String::new(),
                citation_html: "<br>Learn more:<br>...".to_string(),
                links: vec!["u1".to_string(), "u2".to_string()],
            },
        );

        assert_eq!(
            format_answer(&result),
            "X is Y.\n\nLearn more:\n  [1] u1\n  [2] u2"
        );
    }

    #[test]
    fn format_answer_without_links_is_just_text() {
        let result = AnswerResult::new(SORRY_NO_ANSWER.to_string(), AssembledContext::default());
        assert_eq!(format_answer(&result), SORRY_NO_ANSWER);
    }
}
