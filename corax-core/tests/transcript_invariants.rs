//! Transcript-level invariants checked over realistic message mixes.

use pretty_assertions::assert_eq;
use serde_json::Map;

use corax_core::message::{Message, MessageSource};
use corax_core::transcript::Transcript;

/// Build a mixed transcript: chatter, complete pairs, an orphan call, a
/// batch, and situation noise.
fn mixed_transcript() -> Transcript {
    let mut transcript = Transcript::new();
    transcript.append(Message::system("be helpful"));
    transcript.append(Message::user("start"));

    for index in 0..4 {
        let call = Message::tool_call(format!("tool_{index}"), Map::new());
        let result = Message::tool_result(call.id.clone(), format!("out {index}"));
        transcript.append(call);
        transcript.append(result);
        transcript.append(Message::assistant(format!("step {index}")));
    }

    // Orphan call: the turn was interrupted before its result.
    transcript.append(Message::tool_call("interrupted_tool", Map::new()));

    // A complete batch with its two results.
    let batch = Message::tool_call_batch(vec![
        corax_core::message::ToolInvocation::new("x-1".into(), "alpha".into(), Map::new()),
        corax_core::message::ToolInvocation::new("x-2".into(), "beta".into(), Map::new()),
    ]);
    transcript.append(batch);
    transcript.append(Message::tool_result("x-1", "alpha out"));
    transcript.append(Message::tool_result("x-2", "beta out"));

    transcript.append(Message::system("transient").with_source(MessageSource::Situation));
    transcript.append(Message::user("continue"));
    transcript
}

/// Pair preservation: for every k, a retained result implies its call-side
/// message is retained too, and vice versa for complete pairs.
#[test]
fn select_tail_preserves_pairs_for_every_k() {
    let transcript = mixed_transcript();
    for k in 0..=transcript.len() + 2 {
        let tail = transcript.select_tail(k);
        assert!(tail.len() <= k, "k={k} returned too many messages");

        for message in &tail {
            if message.is_tool_result() {
                assert!(
                    tail.iter().any(|candidate| candidate
                        .invocations()
                        .iter()
                        .any(|invocation| invocation.id == message.id)),
                    "k={k}: result {} kept without its call",
                    message.id
                );
            }
            if message.is_tool_call() || message.is_tool_call_batch() {
                for invocation in message.invocations() {
                    assert!(
                        tail.iter().any(|candidate| candidate.is_tool_result()
                            && candidate.id == invocation.id),
                        "k={k}: call {} kept without its result",
                        invocation.id
                    );
                }
            }
        }
    }
}

#[test]
fn orphan_halves_never_survive_selection() {
    let transcript = mixed_transcript();
    let tail = transcript.select_tail(transcript.len());
    assert!(
        tail.iter()
            .all(|message| message.invocations().iter().all(|invocation| {
                invocation.name != "interrupted_tool"
            })),
        "orphan call leaked into the tail"
    );
}

#[test]
fn cleanup_mandatory_is_idempotent_on_mixed_content() {
    let mut transcript = mixed_transcript();
    transcript.append(Message::user_with_images("look at this", vec!["imgdata".into()]));

    transcript.cleanup_mandatory();
    let first_pass = transcript.messages().to_vec();
    transcript.cleanup_mandatory();
    assert_eq!(first_pass, transcript.messages());

    assert!(
        transcript
            .messages()
            .iter()
            .all(|message| message.source != MessageSource::Situation)
    );
}

#[test]
fn ordering_is_stable_after_cleanup() {
    let mut transcript = mixed_transcript();
    let contents_before: Vec<String> = transcript
        .messages()
        .iter()
        .filter(|message| message.source != MessageSource::Situation)
        .map(|message| message.id.clone())
        .collect();
    transcript.cleanup_mandatory();
    let contents_after: Vec<String> = transcript
        .messages()
        .iter()
        .map(|message| message.id.clone())
        .collect();
    assert_eq!(contents_before, contents_after);
}
