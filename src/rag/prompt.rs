//! Grounded prompt assembly.
//!
//! Passages are numbered `[DOC 1]`, `[DOC 2]`, … in rank order. The labels
//! map back to record ids through [`GroundedPrompt::citations`].
use serde::{Deserialize, Serialize};

use super::retriever::RetrievalResult;

const SYSTEM_PROMPT: &str = "You are an assistant that answers only from the excerpts provided. \
Cite the excerpts you rely on by their label (format [DOC x]). \
If the excerpts do not contain the answer, say so. Answer concisely.";

/// Placeholder context when retrieval returned nothing.
const NO_CONTEXT: &str = "(no excerpts found)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// `[DOC label]` → record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub label: usize,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    pub messages: Vec<ChatMessage>,
    pub citations: Vec<Citation>,
}

impl GroundedPrompt {
    /// Record ids in citation order.
    pub fn sources(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.id.clone()).collect()
    }

    /// Record id behind `[DOC label]`.
    pub fn resolve(&self, label: usize) -> Option<&str> {
        self.citations
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.id.as_str())
    }
}

/// Numbered context block, passages separated by a blank line.
pub fn build_context(result: &RetrievalResult) -> String {
    result
        .passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[DOC {}]\n{}", i + 1, p.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System and user messages for the completion service.
pub fn build_messages(question: &str, result: &RetrievalResult) -> GroundedPrompt {
    let context = if result.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        build_context(result)
    };
    let user = format!(
        "Context:\n{context}\n\nQuestion: {}\nAnswer with your sources as [DOC x].",
        question.trim()
    );

    let citations = result
        .passages
        .iter()
        .enumerate()
        .map(|(i, p)| Citation {
            label: i + 1,
            id: p.id.clone(),
        })
        .collect();

    GroundedPrompt {
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
        citations,
    }
}
