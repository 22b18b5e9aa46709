//! Online path: retrieval, context assembly and answering.
pub mod completion;
pub mod prompt;
pub mod retriever;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RagError, Result};
use completion::CompletionService;
use retriever::Retriever;

/// A grounded answer with the ids of the passages it was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Retrieve → assemble → complete.
#[derive(Clone)]
pub struct RagService {
    retriever: Retriever,
    completion: Arc<dyn CompletionService>,
}

impl RagService {
    pub fn new(retriever: Retriever, completion: Arc<dyn CompletionService>) -> Self {
        Self {
            retriever,
            completion,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `question` from the top passages.
    ///
    /// An empty retrieval is not an error; the model then gets a prompt
    /// without excerpts.
    pub fn ask(&self, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyInput);
        }

        let result = self.retriever.retrieve_default(question)?;
        let prompt = prompt::build_messages(question, &result);
        info!(
            "Asking {} with {} passages",
            self.completion.model(),
            result.len()
        );
        let answer = self.completion.complete(&prompt.messages)?;

        Ok(Answer {
            answer: answer.trim().to_string(),
            sources: prompt.sources(),
        })
    }
}
