//! Question intent and focal concept.
//!
//! Both are asked of the language model first and fall back to keyword
//! heuristics when the model fails or answers with something unusable. The
//! intent only shapes how the answer is framed; the focal concept seeds the
//! graph neighborhood lookup.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use crate::llm::LanguageModel;

/// Longest focal concept accepted from the model.
const MAX_CONCEPT_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FrameworkOverview,
    ConceptExplanation,
    Comparison,
    StepByStep,
    ExampleCase,
    EthicalReasoning,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::FrameworkOverview,
        Intent::ConceptExplanation,
        Intent::Comparison,
        Intent::StepByStep,
        Intent::ExampleCase,
        Intent::EthicalReasoning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FrameworkOverview => "framework_overview",
            Intent::ConceptExplanation => "concept_explanation",
            Intent::Comparison => "comparison",
            Intent::StepByStep => "step_by_step",
            Intent::ExampleCase => "example_case",
            Intent::EthicalReasoning => "ethical_reasoning",
        }
    }

    /// Parse a model reply. Accepts the bare label with surrounding quotes,
    /// punctuation, or a short lead-in, as long as exactly one label appears.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .to_lowercase()
            .replace(['-', ' '], "_");

        if let Some(exact) = Self::ALL.into_iter().find(|i| i.as_str() == cleaned) {
            return Some(exact);
        }

        let mut found = Self::ALL.into_iter().filter(|i| cleaned.contains(i.as_str()));
        match (found.next(), found.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Keyword classification used when the model is unavailable.
    pub fn heuristic(question: &str) -> Self {
        let q = question.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| q.contains(w));

        if has(&["compare", "comparison", "difference", "differ", " vs", "versus", "contrast"]) {
            Intent::Comparison
        } else if has(&["ethic", "moral", "should", "fair", "responsib"]) {
            Intent::EthicalReasoning
        } else if has(&["step", "how to", "how do", "procedure", "process"]) {
            Intent::StepByStep
        } else if has(&["example", "case study", "instance of"]) {
            Intent::ExampleCase
        } else if has(&["framework", "model", "components", "overview", "structure"]) {
            Intent::FrameworkOverview
        } else {
            Intent::ConceptExplanation
        }
    }

    /// Answer layout requested from the model for this intent.
    pub fn answer_structure(&self) -> &'static str {
        match self {
            Intent::FrameworkOverview => {
                "1. Definition\n2. Objectives\n3. Components / Tools\n4. Integration Levels\n5. Benefits\n6. Example"
            }
            Intent::ConceptExplanation => "1. Definition\n2. Key Points\n3. Example",
            Intent::Comparison => "1. Items Compared\n2. Similarities\n3. Differences\n4. Summary",
            Intent::StepByStep => "1. Goal\n2. Steps in Order\n3. Common Pitfalls",
            Intent::ExampleCase => "1. The Example\n2. Concepts It Illustrates\n3. Lessons",
            Intent::EthicalReasoning => {
                "1. The Issue\n2. Stakeholders\n3. Considerations\n4. Balanced Conclusion"
            }
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn build_intent_prompt(question: &str) -> String {
    let labels = Intent::ALL
        .iter()
        .map(|i| format!("- {}", i.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Classify the academic intent of this question.\n\n\
         Choose ONE:\n{labels}\n\n\
         Question:\n\"{question}\"\n\n\
         Return ONLY the label."
    )
}

pub async fn classify_intent(model: &dyn LanguageModel, question: &str) -> Intent {
    match model.complete(&build_intent_prompt(question)).await {
        Ok(reply) => Intent::parse(&reply).unwrap_or_else(|| {
            debug!(reply = %reply, "unrecognized intent label, using heuristic");
            Intent::heuristic(question)
        }),
        Err(e) => {
            warn!(error = %e, "intent classification failed, using heuristic");
            Intent::heuristic(question)
        }
    }
}

pub fn build_concept_prompt(question: &str) -> String {
    format!(
        "Extract the main academic concept from this question.\n\
         Return ONLY the concept name.\n\n\
         Question: {question}"
    )
}

pub async fn extract_focal_concept(model: &dyn LanguageModel, question: &str) -> String {
    match model.complete(&build_concept_prompt(question)).await {
        Ok(reply) => clean_concept(&reply).unwrap_or_else(|| {
            debug!(reply = %reply, "unusable focal concept, using heuristic");
            heuristic_focal_concept(question)
        }),
        Err(e) => {
            warn!(error = %e, "focal concept extraction failed, using heuristic");
            heuristic_focal_concept(question)
        }
    }
}

/// First line of the reply, without labels, quotes or trailing punctuation.
fn clean_concept(reply: &str) -> Option<String> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = match line.split_once(':') {
        Some((label, rest)) if label.trim().eq_ignore_ascii_case("concept") => rest.trim(),
        _ => line,
    };
    let concept = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '.' | '?' | '!'))
        .trim();

    if concept.is_empty() || concept.chars().count() > MAX_CONCEPT_CHARS {
        return None;
    }
    Some(concept.to_string())
}

const QUESTION_STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "can", "define", "describe", "did", "do", "does",
    "explain", "for", "give", "how", "i", "in", "is", "it", "me", "mean", "of", "on", "please",
    "tell", "the", "to", "what", "whats", "when", "where", "which", "who", "why", "with", "you",
];

/// Content words of the question, preferring a run of name-like tokens
/// (containing digits, ALL CAPS, or capitalized mid-sentence).
pub fn heuristic_focal_concept(question: &str) -> String {
    let tokens: Vec<&str> = question
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .collect();

    let content: Vec<(usize, &str)> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !QUESTION_STOPWORDS.contains(&t.to_lowercase().as_str()))
        .map(|(i, t)| (i, *t))
        .collect();

    if content.is_empty() {
        return question.trim().to_string();
    }

    let name_like = |index: usize, token: &str| {
        token.chars().any(|c| c.is_ascii_digit())
            || (token.len() > 1 && token.chars().all(|c| !c.is_lowercase()))
            || (index > 0 && token.chars().next().is_some_and(char::is_uppercase))
    };

    let mut run: Vec<&str> = Vec::new();
    let mut last_index = None;
    for &(index, token) in &content {
        if name_like(index, token) {
            match last_index {
                Some(prev) if prev + 1 != index => break,
                _ => {}
            }
            run.push(token);
            last_index = Some(index);
        } else if !run.is_empty() {
            break;
        }
    }

    if !run.is_empty() {
        return run.join(" ");
    }

    content
        .iter()
        .take(4)
        .map(|(_, t)| *t)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DisabledModel, LlmError};
    use async_trait::async_trait;

    struct Reply(&'static str);

    #[async_trait]
    impl LanguageModel for Reply {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
        fn model_name(&self) -> &str {
            "reply"
        }
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(Intent::parse("comparison"), Some(Intent::Comparison));
        assert_eq!(Intent::parse(" \"Step_By_Step\". "), Some(Intent::StepByStep));
        assert_eq!(Intent::parse("step by step"), Some(Intent::StepByStep));
        assert_eq!(
            Intent::parse("The intent is: example_case"),
            Some(Intent::ExampleCase)
        );
        assert_eq!(Intent::parse("comparison or example_case"), None);
        assert_eq!(Intent::parse("banana"), None);
    }

    #[test]
    fn test_heuristic_intent() {
        assert_eq!(Intent::heuristic("Compare SWOT and PESTLE"), Intent::Comparison);
        assert_eq!(Intent::heuristic("How do I run a survey?"), Intent::StepByStep);
        assert_eq!(Intent::heuristic("Give an example of branding"), Intent::ExampleCase);
        assert_eq!(Intent::heuristic("Is it ethical to track users?"), Intent::EthicalReasoning);
        assert_eq!(Intent::heuristic("What is the promotion mix framework?"), Intent::FrameworkOverview);
        assert_eq!(Intent::heuristic("What does CS101 teach?"), Intent::ConceptExplanation);
    }

    #[test]
    fn test_heuristic_focal_concept() {
        assert_eq!(heuristic_focal_concept("What does CS101 teach?"), "CS101");
        assert_eq!(heuristic_focal_concept("Explain the promotion mix"), "promotion mix");
        assert_eq!(
            heuristic_focal_concept("What is Integrated Marketing Communications?"),
            "Integrated Marketing Communications"
        );
        assert_eq!(heuristic_focal_concept("what is it?"), "what is it?");
    }

    #[test]
    fn test_clean_concept() {
        assert_eq!(clean_concept("\"Algorithms\".\n"), Some("Algorithms".into()));
        assert_eq!(clean_concept("Concept: Promotion Mix"), Some("Promotion Mix".into()));
        assert_eq!(clean_concept("   \n  "), None);
        assert_eq!(clean_concept(&"x".repeat(200)), None);
    }

    #[tokio::test]
    async fn test_model_answers_are_used() {
        assert_eq!(
            classify_intent(&Reply("comparison"), "What does CS101 teach?").await,
            Intent::Comparison
        );
        assert_eq!(
            extract_focal_concept(&Reply("Algorithms"), "What does CS101 teach?").await,
            "Algorithms"
        );
    }

    #[tokio::test]
    async fn test_fallbacks_when_model_fails() {
        assert_eq!(
            classify_intent(&DisabledModel, "Compare A and B").await,
            Intent::Comparison
        );
        assert_eq!(
            classify_intent(&Reply("no idea"), "What does CS101 teach?").await,
            Intent::ConceptExplanation
        );
        assert_eq!(
            extract_focal_concept(&DisabledModel, "What does CS101 teach?").await,
            "CS101"
        );
    }
}
