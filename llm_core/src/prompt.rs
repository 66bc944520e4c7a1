//! Prompt assembly. Replies are spoken, so every system prompt asks for
//! flowing paragraphs instead of lists or markup.

use crate::chat::ChatMessage;
use crate::search::SearchResult;
use crate::session::GenerationSession;

pub const CONVERSATION_PROMPT: &str = "You are a helpful voice assistant. Be accurate and conversational.

IMPORTANT: Format ALL responses as continuous flowing paragraphs. Never use bullet points, lists, numbered steps or markdown. Write everything as connected sentences, as if speaking to someone in conversation.

Be concise for simple queries, detailed for complex ones. Always maintain context from the previous conversation.";

pub const SEARCH_PROMPT: &str = "You are a helpful voice assistant. Use the provided search results to answer accurately.

IMPORTANT: Format your response as continuous flowing paragraphs. Never use bullet points, lists, or numbered steps. Write everything as connected sentences for smooth, natural speech.";

pub const SEARCH_FAILED_NOTE: &str = "Search failed. Answer based on your knowledge.";

/// Turns of context kept next to search results.
const SEARCH_CONTEXT_TURNS: usize = 5;
const MAX_CITATIONS: usize = 3;

/// System prompt followed by the whole history (which already ends with the
/// current user turn).
pub fn conversation_messages(session: &GenerationSession) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(CONVERSATION_PROMPT)];
    messages.extend(session.messages(None));
    messages
}

pub fn search_grounded_messages(
    session: &GenerationSession,
    query: &str,
    result: &SearchResult,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SEARCH_PROMPT)];
    messages.extend(session.messages(Some(SEARCH_CONTEXT_TURNS)));

    let sources = result
        .citations
        .iter()
        .take(MAX_CITATIONS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    messages.push(ChatMessage::user(format!(
        "Search results for \"{query}\":\n\n{}\n\nSources: {sources}\n\nBased on this information, provide a helpful answer.",
        result.answer
    )));
    messages
}

/// Plain history plus a note that enrichment was attempted and failed.
pub fn search_failed_messages(session: &GenerationSession) -> Vec<ChatMessage> {
    let mut messages = session.messages(None);
    messages.push(ChatMessage::system(SEARCH_FAILED_NOTE));
    messages
}
