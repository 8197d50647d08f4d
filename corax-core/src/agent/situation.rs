//! Per-iteration situation message construction.
//!
//! Tool descriptions must stay byte-stable for prompt caching, so all
//! dynamic context (tool state, image hints, conclude nudges) travels in
//! a single transient system message that is purged before the next call.

use crate::config::constants::VALIDATION_SUCCESS_SENTINEL;
use crate::message::Message;
use crate::tools::ToolManager;

/// Injected on the final iteration instead of everything else.
const LAST_ITERATION_NOTICE: &str = "IMPORTANT: This is the last iteration. Conclude now with \
    your final answer. Do not call any more tools.";

const IMAGE_ANALYSIS_NOTICE: &str = "The last tool result contains an image. Analyze the image \
    and answer directly; do not call further tools to inspect it.";

const VALIDATION_PASSED_NOTICE: &str = "Validation succeeded. Summarize the change and conclude.";

/// Compose the situation text for the coming iteration, `None` when there
/// is nothing to say.
pub fn build_situation(
    tools: &dyn ToolManager,
    last_message: Option<&Message>,
    current_iteration: usize,
    max_iterations: usize,
) -> Option<String> {
    if current_iteration + 1 >= max_iterations {
        return Some(LAST_ITERATION_NOTICE.to_string());
    }

    let mut parts: Vec<String> = Vec::new();

    if let Some(provider) = tools.as_state_provider()
        && let Some(state) = provider.tool_state()
        && !state.is_empty()
    {
        parts.push(state);
    }

    if let Some(message) = last_message
        && message.is_tool_result()
    {
        if message.has_images() {
            parts.push(IMAGE_ANALYSIS_NOTICE.to_string());
        }
        if let Some((result, _)) = message.tool_outcome()
            && result.contains(VALIDATION_SUCCESS_SENTINEL)
        {
            parts.push(VALIDATION_PASSED_NOTICE.to_string());
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::LocalToolManager;

    #[test]
    fn last_iteration_short_circuits() {
        let manager = LocalToolManager::new();
        let situation = build_situation(&manager, None, 9, 10).expect("notice expected");
        assert!(situation.contains("last iteration"));
    }

    #[test]
    fn quiet_iteration_yields_nothing() {
        let manager = LocalToolManager::new();
        assert!(build_situation(&manager, None, 0, 10).is_none());
    }

    #[test]
    fn image_result_adds_analysis_notice() {
        let manager = LocalToolManager::new();
        let result = Message::tool_result("c1", "caption").with_images(vec!["abcd".into()]);
        let situation =
            build_situation(&manager, Some(&result), 2, 10).expect("notice expected");
        assert!(situation.contains("Analyze the image"));
    }

    #[test]
    fn validation_sentinel_adds_conclude_hint() {
        let manager = LocalToolManager::new();
        let result = Message::tool_result("c1", "All validation checks passed for crate");
        let situation =
            build_situation(&manager, Some(&result), 2, 10).expect("notice expected");
        assert!(situation.contains("conclude"));
    }
}
