use crate::config::AppConfig;
use crate::models::ChapterEntry;
use crate::services::chapterizer::segment_pages;
use crate::services::extractor::PageExtractor;
use crate::services::generator::QuestionBankGenerator;
use crate::services::llm::{LLMClient, LlmError};
use crate::services::rate_limit::{RateLimiter, TokenBucket, Unlimited};
use crate::services::store::{self, ChapterStore};
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub page_count: usize,
    pub pagewise_path: PathBuf,
    pub chapters: Vec<ChapterEntry>,
}

/// PDF to pagewise JSON to chapter records, replacing whatever the store held.
pub fn ingest_pdf(
    extractor: &PageExtractor,
    chapter_store: &ChapterStore,
    pagewise_dir: &Path,
    pdf_path: &Path,
) -> Result<IngestSummary> {
    let pages = extractor.extract(pdf_path)?;
    let pagewise_path = store::pagewise_path(pagewise_dir, pdf_path);
    store::write_pagewise(&pagewise_path, &pages)?;

    let chapters = segment_pages(&pages);
    chapter_store.replace_all(&chapters)?;
    info!(
        pdf = %pdf_path.display(),
        pages = pages.len(),
        chapters = chapters.len(),
        "ingest complete"
    );

    Ok(IngestSummary {
        page_count: pages.len(),
        pagewise_path,
        chapters: chapter_store.entries()?,
    })
}

/// Fails when no API key is configured. `requests_per_period = 0` turns
/// pacing off.
pub fn build_generator(config: &AppConfig) -> Result<QuestionBankGenerator, LlmError> {
    let client = LLMClient::new(&config.llm)?;
    info!(model = client.model(), "LLM client ready");
    let limiter: Arc<dyn RateLimiter> = if config.generation.requests_per_period == 0 {
        info!("request pacing disabled");
        Arc::new(Unlimited)
    } else {
        Arc::new(TokenBucket::new(
            config.generation.requests_per_period,
            config.generation.period(),
        ))
    };
    Ok(QuestionBankGenerator::new(
        Arc::new(client),
        limiter,
        &config.generation,
    ))
}
