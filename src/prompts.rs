//! System instructions and fixed user-facing texts.

/// Small talk: no documents are attached to these turns.
pub const CONVERSATIONAL_SYSTEM: &str = "\
You are a polite assistant for a legal document archive. The user is making \
small talk (a greeting, thanks, or a question about what you can do). Reply \
briefly and naturally in the user's language. Do not state any legal facts, \
do not cite documents, and invite the user to ask a question about their \
documents or to request a draft.";

/// Grounded Q&A: answers must come from the numbered sources only.
pub const GROUNDED_SYSTEM: &str = "\
You are a legal research assistant. Answer the question using ONLY the \
numbered sources provided in the context. Every factual statement must be \
followed by the marker of the source it comes from, written exactly as \
[Source N]. Do not use outside knowledge, do not guess, and do not \
extrapolate beyond the text of the sources. If the sources do not contain \
the answer, reply with exactly this sentence and nothing else: The provided \
documents do not answer the question. Otherwise answer in the language of \
the question.";

/// The reply [`GROUNDED_SYSTEM`] asks for when the sources do not cover the
/// question.
pub const GROUNDED_REFUSAL: &str = "The provided documents do not answer the question.";

/// Drafting: compose a document, reusing facts from the sources when given.
pub const DRAFT_SYSTEM: &str = "\
You are a legal drafting assistant. Compose the requested document in \
Markdown. Start with a single top-level heading (`# Title`). Use a formal \
register and the structure customary for the document type: parties, \
preamble, numbered sections, date and signature blocks. Use placeholders in \
square brackets for unknown details, e.g. [Full name]. When numbered sources \
are provided, take names, dates, amounts and legal references only from them \
and mark each such fact with [Source N]. Never invent statutes or article \
numbers. Write in the language of the request.";

/// Intent routing when `generation.classifier = "model"`.
pub const CLASSIFIER_SYSTEM: &str = "\
Classify the user's message. Reply with exactly one word: CONVERSATIONAL if \
it is a greeting, thanks, farewell, or a question about the assistant itself; \
DOMAIN if it asks about law, documents, contracts, rights, obligations, or \
anything that needs facts from documents.";

/// Returned when a domain question finds no evidence above the threshold.
pub const INSUFFICIENT_EVIDENCE_MESSAGE: &str = "\
I could not find relevant information in the uploaded documents to answer \
this question. Try rephrasing it, or upload documents that cover this topic.";

/// Appended to every drafted document.
pub const DRAFT_DISCLAIMER: &str = "\n\n---\n\n\
> **IMPORTANT:** This document was generated automatically and is provided \
FOR REFERENCE ONLY. Have it reviewed by a qualified lawyer before use. The \
authors accept no liability for consequences of its use.\n";

/// Recognised document types: (type, request keywords).
pub const DOCUMENT_TYPES: &[(&str, &[&str])] = &[
    ("power of attorney", &["power of attorney", "доверенност"]),
    ("statement of claim", &["statement of claim", "lawsuit", "исков", "иск "]),
    ("pre-trial claim", &["pre-trial claim", "claim letter", "претензи"]),
    ("complaint", &["complaint", "жалоб"]),
    ("contract", &["contract", "договор"]),
    ("agreement", &["agreement", "соглашени"]),
    ("notice", &["notice", "notification", "уведомлени"]),
    ("application", &["application", "заявлени"]),
    ("letter", &["letter", "письм"]),
    ("act", &["act of acceptance", " акт"]),
];

/// User turn for grounded Q&A.
pub fn grounded_user_prompt(context: &str, question: &str) -> String {
    format!(
        "Context:\n\n{}\n\nQuestion: {}\n\nAnswer with [Source N] markers:",
        context, question
    )
}

/// User turn for drafting.
pub fn draft_user_prompt(
    request: &str,
    document_type: Option<&str>,
    user_context: Option<&str>,
    sources: Option<&str>,
) -> String {
    let mut prompt = format!("Request: {}\n", request);
    if let Some(kind) = document_type {
        prompt.push_str(&format!("Document type: {}\n", kind));
    }
    if let Some(extra) = user_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("\nDetails from the user:\n{}\n", extra.trim()));
    }
    match sources {
        Some(sources) => prompt.push_str(&format!("\nSources:\n\n{}\n", sources)),
        None => prompt.push_str("\nNo sources are available; use placeholders for facts.\n"),
    }
    prompt.push_str("\nDraft the document in Markdown:");
    prompt
}
