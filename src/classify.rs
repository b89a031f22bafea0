//! Intent classification: small talk or a question needing documents.
//!
//! [`RuleClassifier`] is a pure function of the query text (EN/RU lexicon).
//! [`ModelClassifier`] asks the generator once with a fixed instruction and
//! falls back to the rules on any failure or unparseable reply. Neither
//! touches the vector index.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::generation::{GenerationParams, Generator};
use crate::prompts;

/// Query route. Each variant carries its own system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Conversational,
    Domain,
}

impl Intent {
    pub fn system_instruction(&self) -> &'static str {
        match self {
            Intent::Conversational => prompts::CONVERSATIONAL_SYSTEM,
            Intent::Domain => prompts::GROUNDED_SYSTEM,
        }
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &str) -> Intent;
}

/// Whole-message small talk.
const SMALL_TALK: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "thanks",
    "thank you",
    "thx",
    "bye",
    "goodbye",
    "see you",
    "how are you",
    "who are you",
    "what are you",
    "what can you do",
    "help",
    "ok",
    "okay",
    "right",
    "fine",
    "great",
    "got it",
    "i m fine",
    "im fine",
    "привет",
    "здравствуйте",
    "здравствуй",
    "добрый день",
    "добрый вечер",
    "доброе утро",
    "спасибо",
    "благодарю",
    "пока",
    "до свидания",
    "как дела",
    "кто ты",
    "что ты умеешь",
    "помощь",
    "хорошо",
    "понятно",
    "правильно",
];

/// Stems that make a message a domain question even after a greeting.
/// Each must be long enough not to prefix everyday words ("fine",
/// "right", "правильно").
const DOMAIN_STEMS: &[&str] = &[
    "law", "legal", "article", "contract", "penalt", "court", "claim", "liabil", "clause",
    "statut", "section", "rights", "obligat", "agreement", "lawsuit", "damage", "deadline",
    "regulat", "document", "закон", "стать", "договор", "суд", "штраф", "неусто", "иск",
    "права", "правов", "обязат", "претенз", "кодекс", "ответствен", "документ", "срок",
];

/// Extra words allowed after a greeting before the message counts as a question.
const MAX_TRAILING_WORDS: usize = 3;

fn normalize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Lexicon classifier. Anything it does not recognise as small talk is a
/// domain question.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn classify_text(query: &str) -> Intent {
        let words = normalize(query);
        if words.is_empty() {
            return Intent::Conversational;
        }
        if words
            .iter()
            .any(|w| DOMAIN_STEMS.iter().any(|stem| w.starts_with(stem)))
        {
            return Intent::Domain;
        }

        for phrase in SMALL_TALK {
            let phrase_words: Vec<&str> = phrase.split(' ').collect();
            if words.len() < phrase_words.len() {
                continue;
            }
            let matches = words
                .iter()
                .zip(phrase_words.iter())
                .all(|(w, p)| w == p);
            if matches && words.len() - phrase_words.len() <= MAX_TRAILING_WORDS {
                return Intent::Conversational;
            }
        }
        Intent::Domain
    }
}

#[async_trait]
impl IntentClassifier for RuleClassifier {
    async fn classify(&self, query: &str) -> Intent {
        RuleClassifier::classify_text(query)
    }
}

/// Asks the generator; falls back to [`RuleClassifier`].
pub struct ModelClassifier {
    generator: Arc<dyn Generator>,
}

impl ModelClassifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        ModelClassifier { generator }
    }

    fn parse(reply: &str) -> Option<Intent> {
        let reply = reply.trim().to_uppercase();
        if reply.starts_with("CONVERSATIONAL") {
            Some(Intent::Conversational)
        } else if reply.starts_with("DOMAIN") {
            Some(Intent::Domain)
        } else {
            None
        }
    }
}

#[async_trait]
impl IntentClassifier for ModelClassifier {
    async fn classify(&self, query: &str) -> Intent {
        let params = GenerationParams {
            temperature: 0.0,
            max_tokens: 5,
        };
        match self
            .generator
            .generate(prompts::CLASSIFIER_SYSTEM, query, params)
            .await
        {
            Ok(reply) => Self::parse(&reply).unwrap_or_else(|| {
                tracing::debug!(reply = %reply, "unparseable classifier reply, using rules");
                RuleClassifier::classify_text(query)
            }),
            Err(err) => {
                tracing::warn!(error = %err, "classifier call failed, using rules");
                RuleClassifier::classify_text(query)
            }
        }
    }
}
