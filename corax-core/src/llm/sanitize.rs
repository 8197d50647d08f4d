//! Tool-name sanitization for wire formats restricted to
//! `[A-Za-z0-9_-]{1,128}`.
//!
//! Remote tools arrive with separators the APIs reject (`server:tool`,
//! `pkg.module.fn`). The sanitizer rewrites them deterministically and
//! keeps the inverse mapping so calls coming back from the model dispatch
//! under the original name.

use std::collections::HashMap;

const MAX_WIRE_NAME_LEN: usize = 128;

fn is_wire_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Bidirectional tool-name mapper. One instance lives per adapter; names
/// registered in the same order always map the same way.
#[derive(Debug, Default)]
pub struct ToolNameSanitizer {
    to_wire: HashMap<String, String>,
    from_wire: HashMap<String, String>,
}

impl ToolNameSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitize `name` for the wire, remembering the inverse. Calling
    /// twice with the same name returns the same result.
    pub fn sanitize(&mut self, name: &str) -> String {
        if let Some(existing) = self.to_wire.get(name) {
            return existing.clone();
        }

        let mut candidate: String = name
            .chars()
            .map(|c| if is_wire_safe(c) { c } else { '_' })
            .collect();
        if candidate.is_empty() {
            candidate = "tool".to_string();
        }
        if candidate.len() > MAX_WIRE_NAME_LEN {
            candidate.truncate(MAX_WIRE_NAME_LEN);
        }

        // Distinct originals must never share a wire name.
        if self.from_wire.contains_key(&candidate) {
            let mut index = 2usize;
            loop {
                let suffix = format!("_{index}");
                let mut disambiguated = candidate.clone();
                disambiguated.truncate(MAX_WIRE_NAME_LEN.saturating_sub(suffix.len()));
                disambiguated.push_str(&suffix);
                if !self.from_wire.contains_key(&disambiguated) {
                    candidate = disambiguated;
                    break;
                }
                index += 1;
            }
        }

        self.to_wire.insert(name.to_string(), candidate.clone());
        self.from_wire.insert(candidate.clone(), name.to_string());
        candidate
    }

    /// Map a wire name back to the original. Unknown names pass through
    /// unchanged so locally defined (already safe) tools need no entry.
    pub fn unsanitize(&self, wire_name: &str) -> String {
        self.from_wire
            .get(wire_name)
            .cloned()
            .unwrap_or_else(|| wire_name.to_string())
    }

    /// Whether a name already satisfies the wire constraints.
    pub fn is_wire_safe_name(name: &str) -> bool {
        !name.is_empty() && name.len() <= MAX_WIRE_NAME_LEN && name.chars().all(is_wire_safe)
    }
}
