//! System instruction composition.

use olive_core::models::{Message, ScoredResult};

use crate::provider::ChatRequest;

const CONTEXT_HEADER: &str = "\n=== Relevant local / web information: ===\n";
const CONTEXT_FOOTER: &str = "\nUse the information above when relevant.\n";

/// Build the system instruction: persona, current mood, and any retrieved
/// context as numbered `[DOC n]` blocks.
pub fn compose_system(persona: &str, mood: &str, results: &[ScoredResult]) -> String {
    let mut system = format!("{}\nYour current mood is: {}.\n", persona.trim_end(), mood);

    if results.is_empty() {
        return system;
    }

    system.push_str(CONTEXT_HEADER);
    for (idx, result) in results.iter().enumerate() {
        system.push_str(&format!("\n[DOC {}] {}\n{}\n", idx + 1, result.title, result.text));
    }
    system.push_str(CONTEXT_FOOTER);
    system
}

/// The system instruction followed by the conversation so far.
pub fn build_request(model: &str, system: String, history: &[Message]) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    ChatRequest {
        model: model.to_string(),
        messages,
    }
}
