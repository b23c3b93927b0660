//! LLM summarization backends for chat digests.

pub mod prompt;
pub mod summarizer;

pub use summarizer::{OpenAiSummarizer, Summarizer, SummarizerError, SummaryOutcome};
