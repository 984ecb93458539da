use crate::cli::{ChunkedArgs, ExtractArgs, GenerateArgs, IngestArgs, QuestionArgs, SegmentArgs};
use crate::config::AppConfig;
use crate::models::{
    BankConfig, ChapterSelection, Difficulty, GenerationRequest, QuestionBank, QuestionSpec,
};
use crate::server::{self, AppState};
use crate::services::chapterizer::segment_pages;
use crate::services::extractor::PageExtractor;
use crate::services::generator::GenerationSession;
use crate::services::pipeline;
use crate::services::store::{self, ChapterStore};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn extract(config: &AppConfig, args: ExtractArgs) -> Result<()> {
    let extractor = PageExtractor::new(&config.ocr);
    let pages = extractor.extract(&args.pdf)?;
    let out = args
        .out
        .unwrap_or_else(|| store::pagewise_path(&config.storage.pagewise_dir, &args.pdf));
    store::write_pagewise(&out, &pages)?;
    for (index, page) in pages.iter().enumerate() {
        println!(
            "Page {}: detected page number = {}",
            index + 1,
            page.page_number.map_or_else(|| "-".to_string(), |n| n.to_string())
        );
    }
    println!("Pages saved to {}", out.display());
    Ok(())
}

pub fn segment(config: &AppConfig, args: SegmentArgs) -> Result<()> {
    let pages = store::read_pagewise(&args.pagewise)?;
    let chapters = segment_pages(&pages);
    let chapter_store = ChapterStore::new(&config.storage.chapters_dir);
    chapter_store.replace_all(&chapters)?;
    print_chapters(&chapter_store)
}

pub fn ingest(config: &AppConfig, args: IngestArgs) -> Result<()> {
    let chapter_store = ChapterStore::new(&config.storage.chapters_dir);
    let summary = pipeline::ingest_pdf(
        &PageExtractor::new(&config.ocr),
        &chapter_store,
        &config.storage.pagewise_dir,
        &args.pdf,
    )?;
    println!(
        "{} pages, {} chapters (pagewise content in {})",
        summary.page_count,
        summary.chapters.len(),
        summary.pagewise_path.display()
    );
    print_chapters(&chapter_store)
}

pub fn chapters(config: &AppConfig) -> Result<()> {
    print_chapters(&ChapterStore::new(&config.storage.chapters_dir))
}

fn print_chapters(chapter_store: &ChapterStore) -> Result<()> {
    let entries = chapter_store.entries()?;
    if entries.is_empty() {
        println!(
            "No chapters in {}. Extract chapters from a PDF first.",
            chapter_store.root().display()
        );
    }
    for entry in entries {
        println!("{}\t{}", entry.key, entry.name);
    }
    Ok(())
}

pub async fn generate(config: &AppConfig, args: GenerateArgs) -> Result<()> {
    let chapter_store = ChapterStore::new(&config.storage.chapters_dir);
    let keys = if args.chapters.is_empty() {
        chapter_store.list()?
    } else {
        args.chapters
    };
    let request = GenerationRequest {
        chapters: keys
            .into_iter()
            .map(|key| ChapterSelection {
                key,
                questions: question_spec(&args.questions),
            })
            .collect(),
        banks: bank_configs(&args.difficulties, args.banks, &args.questions)?,
    };

    let generator = pipeline::build_generator(config)?;
    let session = GenerationSession::open(&chapter_store, request, config.generation.max_banks)?;
    let result = generator.generate(session).await;

    for issue in &result.issues {
        warn!("{issue}");
    }
    for bank in &result.banks {
        let path = write_bank(&args.out_dir, bank)?;
        println!("Question bank {} ({}) written to {}", bank.number, bank.difficulty, path.display());
    }
    Ok(())
}

pub async fn chunked(config: &AppConfig, args: ChunkedArgs) -> Result<()> {
    let chapter_store = ChapterStore::new(&config.storage.chapters_dir);
    let chapter = chapter_store
        .load(std::slice::from_ref(&args.chapter))?
        .into_iter()
        .next()
        .context("chapter not found")?;
    let spec = question_spec(&args.questions);
    if spec.is_empty() {
        bail!("request at least one question");
    }
    let bank = BankConfig {
        difficulty: args.difficulty,
        domains: args.questions.domains.clone(),
    };

    let generator = pipeline::build_generator(config)?;
    let output = generator.generate_chunked(&chapter, spec, &bank).await;
    for issue in &output.issues {
        warn!("{issue}");
    }

    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(format!("{}_questions.txt", chapter.key)));
    fs::write(&out, &output.text).with_context(|| format!("failed to write {}", out.display()))?;
    info!(chunks = output.chunks, path = %out.display(), "chunked questions written");
    println!("{} chunks, questions written to {}", output.chunks, out.display());
    Ok(())
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let generator = match pipeline::build_generator(&config) {
        Ok(generator) => Some(generator),
        Err(error) => {
            warn!(error = %error, "question generation disabled");
            None
        }
    };
    server::serve(AppState::new(config, generator)).await
}

fn question_spec(args: &QuestionArgs) -> QuestionSpec {
    QuestionSpec::new(args.mcq, args.true_false, args.short_answer)
}

/// A single difficulty applies to every bank; otherwise one per bank.
fn bank_configs(
    difficulties: &[Difficulty],
    banks: usize,
    questions: &QuestionArgs,
) -> Result<Vec<BankConfig>> {
    let per_bank = match difficulties {
        [single] => vec![*single; banks],
        many if many.len() == banks => many.to_vec(),
        many => bail!(
            "got {} difficulties for {} question banks; pass one, or one per bank",
            many.len(),
            banks
        ),
    };
    Ok(per_bank
        .into_iter()
        .map(|difficulty| BankConfig {
            difficulty,
            domains: questions.domains.clone(),
        })
        .collect())
}

fn write_bank(out_dir: &Path, bank: &QuestionBank) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(bank.file_name());
    fs::write(&path, &bank.text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
