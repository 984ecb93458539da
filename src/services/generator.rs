use crate::config::GenerationConfig;
use crate::models::{BankConfig, GenerationRequest, LoadedChapter, QuestionBank, QuestionSpec};
use crate::services::llm::CompletionClient;
use crate::services::prompt::{PromptBuilder, PromptChapter};
use crate::services::rate_limit::RateLimiter;
use crate::services::store::ChapterStore;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Rough model-token count: about three tokens per four words.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 / 0.75) as usize
}

/// A chapter that produced no segment for a bank. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterIssue {
    #[error("bank {bank}: '{chapter}' is too large ({tokens} tokens, limit {limit}), skipped")]
    Oversized {
        bank: usize,
        chapter: String,
        tokens: usize,
        limit: usize,
    },
    #[error("bank {bank}: generation failed for '{chapter}': {message}")]
    CallFailed {
        bank: usize,
        chapter: String,
        message: String,
    },
    #[error("part {part}/{parts} of '{chapter}' failed: {message}")]
    ChunkFailed {
        chapter: String,
        part: usize,
        parts: usize,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub banks: Vec<QuestionBank>,
    pub issues: Vec<ChapterIssue>,
}

struct SelectedChapter {
    chapter: LoadedChapter,
    questions: QuestionSpec,
}

impl SelectedChapter {
    fn prompt_chapter(&self) -> PromptChapter<'_> {
        PromptChapter {
            name: &self.chapter.name,
            content: &self.chapter.content,
            questions: self.questions,
        }
    }
}

/// Everything one generation request needs: the validated request, the
/// chapter text loaded once up front, and the banks produced so far.
pub struct GenerationSession {
    request: GenerationRequest,
    chapters: Vec<SelectedChapter>,
    banks: Vec<QuestionBank>,
    issues: Vec<ChapterIssue>,
}

impl GenerationSession {
    pub fn open(store: &ChapterStore, request: GenerationRequest, max_banks: usize) -> Result<Self> {
        request.validate(max_banks)?;
        let keys = request
            .chapters
            .iter()
            .map(|selection| selection.key.clone())
            .collect::<Vec<_>>();
        let loaded = store.load(&keys)?;
        Ok(Self::with_chapters(request, loaded))
    }

    fn with_chapters(request: GenerationRequest, loaded: Vec<LoadedChapter>) -> Self {
        let chapters = request
            .chapters
            .iter()
            .zip(loaded)
            .map(|(selection, chapter)| SelectedChapter {
                chapter,
                questions: selection.questions,
            })
            .collect();
        Self {
            request,
            chapters,
            banks: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn into_result(self) -> GenerationResult {
        GenerationResult {
            banks: self.banks,
            issues: self.issues,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkedOutput {
    pub text: String,
    pub chunks: usize,
    pub issues: Vec<ChapterIssue>,
}

pub struct QuestionBankGenerator {
    client: Arc<dyn CompletionClient>,
    limiter: Arc<dyn RateLimiter>,
    token_ceiling: usize,
    words_per_chunk: usize,
}

impl QuestionBankGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        limiter: Arc<dyn RateLimiter>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            token_ceiling: config.token_ceiling,
            words_per_chunk: config.words_per_chunk.max(1),
        }
    }

    /// Produces one bank per configured bank, sequentially. Oversized chapters
    /// and failed calls are recorded as issues and skipped.
    pub async fn generate(&self, mut session: GenerationSession) -> GenerationResult {
        let banks = session.request.banks.clone();
        for (index, bank) in banks.iter().enumerate() {
            let number = index + 1;
            info!(bank = number, difficulty = %bank.difficulty, "generating question bank");
            let text = self
                .generate_bank(number, bank, &session.chapters, &mut session.issues)
                .await;
            session.banks.push(QuestionBank {
                number,
                difficulty: bank.difficulty,
                text,
            });
        }
        info!(
            banks = session.banks.len(),
            issues = session.issues.len(),
            "generation finished"
        );
        session.into_result()
    }

    async fn generate_bank(
        &self,
        number: usize,
        bank: &BankConfig,
        chapters: &[SelectedChapter],
        issues: &mut Vec<ChapterIssue>,
    ) -> String {
        let builder = PromptBuilder::new(bank.difficulty, &bank.domains);
        let mut text = String::new();

        for selected in chapters {
            let name = &selected.chapter.name;
            if selected.questions.is_empty() {
                debug!(bank = number, chapter = %name, "no questions requested, skipping");
                continue;
            }

            let tokens = estimate_tokens(&selected.chapter.content);
            if tokens > self.token_ceiling {
                let issue = ChapterIssue::Oversized {
                    bank: number,
                    chapter: name.clone(),
                    tokens,
                    limit: self.token_ceiling,
                };
                warn!("{issue}");
                issues.push(issue);
                continue;
            }

            let prompt = builder.build(&[selected.prompt_chapter()]);
            match self.call(&prompt).await {
                Ok(output) => {
                    info!(bank = number, chapter = %name, "chapter questions generated");
                    push_segment(&mut text, name, &output);
                }
                Err(message) => {
                    let issue = ChapterIssue::CallFailed {
                        bank: number,
                        chapter: name.clone(),
                        message,
                    };
                    error!("{issue}");
                    issues.push(issue);
                }
            }
        }
        text
    }

    /// Splits an oversized chapter into word chunks and issues one call per
    /// chunk. Failed chunks are recorded and skipped.
    pub async fn generate_chunked(
        &self,
        chapter: &LoadedChapter,
        questions: QuestionSpec,
        bank: &BankConfig,
    ) -> ChunkedOutput {
        let builder = PromptBuilder::new(bank.difficulty, &bank.domains);
        let words = chapter.content.split_whitespace().collect::<Vec<_>>();
        let chunks = words.chunks(self.words_per_chunk).collect::<Vec<_>>();
        let total = chunks.len();
        let mut output = ChunkedOutput {
            text: String::new(),
            chunks: total,
            issues: Vec::new(),
        };
        if questions.is_empty() {
            return output;
        }

        info!(chapter = %chapter.name, chunks = total, "generating chunked question bank");
        for (index, chunk) in chunks.iter().enumerate() {
            let label = format!("{} (part {}/{})", chapter.name, index + 1, total);
            let content = chunk.join(" ");
            let prompt = builder.build(&[PromptChapter {
                name: &label,
                content: &content,
                questions,
            }]);
            match self.call(&prompt).await {
                Ok(text) => push_segment(&mut output.text, &label, &text),
                Err(message) => {
                    let issue = ChapterIssue::ChunkFailed {
                        chapter: chapter.name.clone(),
                        part: index + 1,
                        parts: total,
                        message,
                    };
                    error!("{issue}");
                    output.issues.push(issue);
                }
            }
        }
        output
    }

    async fn call(&self, prompt: &str) -> Result<String, String> {
        self.limiter.acquire().await;
        self.client
            .complete(prompt)
            .await
            .map_err(|error| error.to_string())
    }
}

fn push_segment(text: &mut String, name: &str, output: &str) {
    text.push_str("## ");
    text.push_str(name);
    text.push_str("\n\n");
    text.push_str(output.trim());
    text.push_str("\n\n");
}
