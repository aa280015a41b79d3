//! Grounded answer synthesis.

use std::sync::Arc;
use tracing::warn;

use crate::intent::Intent;
use crate::llm::LanguageModel;
use crate::query::StructuredContext;

/// Shown to the user when the model cannot produce an answer.
pub const ANSWER_FAILURE_MESSAGE: &str =
    "Sorry, I could not generate an answer right now. Please try again later.";

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Ask the model for an answer grounded in `context`.
    ///
    /// Returns the raw model text, or `None` when the call failed.
    pub async fn synthesize(
        &self,
        question: &str,
        intent: Intent,
        context: &StructuredContext,
    ) -> Option<String> {
        let prompt = build_answer_prompt(question, intent, context);
        match self.model.complete(&prompt).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!(error = %e, model = self.model.model_name(), "answer synthesis failed");
                None
            }
        }
    }
}

pub fn build_answer_prompt(question: &str, intent: Intent, context: &StructuredContext) -> String {
    format!(
        "You are a university tutor.\n\n\
         Answer using this structure:\n{structure}\n\n\
         ONLY use the context below. If the context does not contain the answer, \
         say that the uploaded materials do not cover it.\n\n\
         Context:\n{context}\n\n\
         Question: {question}",
        structure = intent.answer_structure(),
        context = context.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledModel;

    fn context() -> StructuredContext {
        StructuredContext {
            concepts: vec!["Algorithms".into(), "CS101".into()],
            relationships: vec!["Algorithms used_in CS101".into()],
            documents: vec!["CS101 teaches Algorithms.".into()],
        }
    }

    #[test]
    fn test_prompt_is_grounded_and_framed() {
        let prompt = build_answer_prompt("What does CS101 teach?", Intent::Comparison, &context());
        assert!(prompt.contains("ONLY use the context below"));
        assert!(prompt.contains("Algorithms used_in CS101"));
        assert!(prompt.contains("Similarities"));
        assert!(prompt.ends_with("Question: What does CS101 teach?"));
    }

    #[tokio::test]
    async fn test_model_failure_yields_none() {
        let synth = AnswerSynthesizer::new(Arc::new(DisabledModel));
        assert!(synth
            .synthesize("q", Intent::ConceptExplanation, &context())
            .await
            .is_none());
    }
}
