//! Exact-match edit semantics with one-shot indentation normalization.

use std::fmt;

/// Dominant indentation of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndentStyle {
    Tabs,
    Spaces4,
    Unknown,
}

/// Why an edit could not be applied. These are domain errors: they reach
/// the model as tool-result error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    NotFound,
    Ambiguous { occurrences: usize },
    NoChanges,
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::NotFound => write!(f, "old_string not found in file"),
            EditError::Ambiguous { occurrences } => write!(
                f,
                "old_string appears {occurrences} times in the file; pass replace_all=true or \
                 provide more surrounding context to disambiguate"
            ),
            EditError::NoChanges => write!(f, "no changes: old_string and new_string are equal"),
        }
    }
}

/// Detect whether a file primarily indents with tabs or four spaces.
pub fn detect_indent(content: &str) -> IndentStyle {
    let mut tabs = 0usize;
    let mut spaces = 0usize;
    for line in content.lines() {
        if line.starts_with('\t') {
            tabs += 1;
        } else if line.starts_with("    ") {
            spaces += 1;
        }
    }
    if tabs == 0 && spaces == 0 {
        IndentStyle::Unknown
    } else if tabs >= spaces {
        IndentStyle::Tabs
    } else {
        IndentStyle::Spaces4
    }
}

/// Translate the leading indentation of every line in `snippet` toward the
/// file's style. One-shot and directional: spaces become tabs when the
/// file uses tabs, tabs become four spaces when the file uses spaces.
pub fn normalize_indentation(snippet: &str, target: IndentStyle) -> String {
    match target {
        IndentStyle::Unknown => snippet.to_string(),
        IndentStyle::Tabs => convert_leading(snippet, "    ", "\t"),
        IndentStyle::Spaces4 => convert_leading(snippet, "\t", "    "),
    }
}

fn convert_leading(snippet: &str, from: &str, to: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in snippet.split('\n') {
        let mut rest = line;
        let mut prefix = String::new();
        while let Some(stripped) = rest.strip_prefix(from) {
            prefix.push_str(to);
            rest = stripped;
        }
        lines.push(format!("{prefix}{rest}"));
    }
    lines.join("\n")
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

/// Outcome of a successful edit.
#[derive(Debug)]
pub struct AppliedEdit {
    pub content: String,
    pub replacements: usize,
}

/// Apply one exact-match replacement to `content`.
///
/// When `old` is not literally present, the snippet is re-tried once with
/// its indentation normalized toward the file's dominant style (`new` is
/// translated the same way so replacement output stays consistent).
pub fn apply_edit(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<AppliedEdit, EditError> {
    let (old, new) = if content.contains(old) {
        (old.to_string(), new.to_string())
    } else {
        let style = detect_indent(content);
        let normalized_old = normalize_indentation(old, style);
        if !content.contains(&normalized_old) {
            return Err(EditError::NotFound);
        }
        (normalized_old, normalize_indentation(new, style))
    };

    let occurrences = count_occurrences(content, &old);
    if occurrences > 1 && !replace_all {
        return Err(EditError::Ambiguous { occurrences });
    }

    let updated = if replace_all {
        content.replace(&old, &new)
    } else {
        content.replacen(&old, &new, 1)
    };
    if updated == content {
        return Err(EditError::NoChanges);
    }
    Ok(AppliedEdit {
        content: updated,
        replacements: if replace_all { occurrences } else { 1 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dominant_indentation() {
        assert_eq!(detect_indent("\tfoo\n\tbar\n"), IndentStyle::Tabs);
        assert_eq!(detect_indent("    foo\n    bar\n"), IndentStyle::Spaces4);
        assert_eq!(detect_indent("foo\nbar\n"), IndentStyle::Unknown);
    }

    #[test]
    fn edit_replaces_single_occurrence() {
        let applied = apply_edit("foo\nbar\n", "foo", "baz", false).expect("edit applies");
        assert_eq!(applied.content, "baz\nbar\n");
        assert_eq!(applied.replacements, 1);
    }

    #[test]
    fn ambiguous_edit_is_rejected_without_mutation() {
        let error = apply_edit("foo\nfoo\n", "foo", "bar", false).unwrap_err();
        assert_eq!(error, EditError::Ambiguous { occurrences: 2 });
    }

    #[test]
    fn replace_all_handles_every_occurrence() {
        let applied = apply_edit("foo\nfoo\n", "foo", "bar", true).expect("edit applies");
        assert_eq!(applied.content, "bar\nbar\n");
        assert_eq!(applied.replacements, 2);
    }

    #[test]
    fn space_snippet_matches_tab_file_after_normalization() {
        let content = "fn main() {\n\tprintln!(\"hi\");\n}\n";
        let applied = apply_edit(
            content,
            "    println!(\"hi\");",
            "    println!(\"bye\");",
            false,
        )
        .expect("normalized edit applies");
        assert_eq!(applied.content, "fn main() {\n\tprintln!(\"bye\");\n}\n");
    }

    #[test]
    fn tab_snippet_matches_space_file_after_normalization() {
        let content = "fn main() {\n    println!(\"hi\");\n}\n";
        let applied = apply_edit(content, "\tprintln!(\"hi\");", "\tprintln!(\"bye\");", false)
            .expect("normalized edit applies");
        assert_eq!(applied.content, "fn main() {\n    println!(\"bye\");\n}\n");
    }

    #[test]
    fn edit_round_trips() {
        let original = "alpha beta gamma";
        let forward = apply_edit(original, "beta", "delta", false).expect("forward");
        let back = apply_edit(&forward.content, "delta", "beta", false).expect("back");
        assert_eq!(back.content, original);
    }

    #[test]
    fn identity_edit_reports_no_changes() {
        let error = apply_edit("foo", "foo", "foo", false).unwrap_err();
        assert_eq!(error, EditError::NoChanges);
    }
}
