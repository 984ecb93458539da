use crate::models::{CognitiveDomain, Difficulty};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "qbank",
    version,
    about = "Turn a scanned textbook into chapter-wise question banks"
)]
pub struct Cli {
    /// Configuration file (defaults to ./qbank.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// OCR a PDF into pagewise JSON
    Extract(ExtractArgs),
    /// Split pagewise JSON into chapter records
    Segment(SegmentArgs),
    /// Extract and segment in one go
    Ingest(IngestArgs),
    /// List stored chapters
    Chapters,
    /// Generate question banks for stored chapters
    Generate(GenerateArgs),
    /// Generate questions for one chapter in word-sized chunks
    Chunked(ChunkedArgs),
    /// Run the HTTP service
    Serve,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    pub pdf: PathBuf,

    /// Output file (defaults to <pagewise_dir>/<stem>_pagewise_content.json)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SegmentArgs {
    pub pagewise: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    pub pdf: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct QuestionArgs {
    #[arg(long, default_value_t = 5)]
    pub mcq: u32,

    #[arg(long, default_value_t = 3)]
    pub true_false: u32,

    #[arg(long, default_value_t = 2)]
    pub short_answer: u32,

    /// Cognitive domains to draw from (all when omitted)
    #[arg(long = "domain", value_enum)]
    pub domains: Vec<CognitiveDomain>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Chapter keys such as chapter_1 (all stored chapters when omitted)
    #[arg(long = "chapter")]
    pub chapters: Vec<String>,

    #[command(flatten)]
    pub questions: QuestionArgs,

    /// One difficulty for every bank, or one per bank
    #[arg(long = "difficulty", value_enum, default_values_t = [Difficulty::Medium])]
    pub difficulties: Vec<Difficulty>,

    #[arg(long, default_value_t = 1)]
    pub banks: usize,

    #[arg(long, default_value = "question_banks")]
    pub out_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ChunkedArgs {
    #[arg(long)]
    pub chapter: String,

    #[command(flatten)]
    pub questions: QuestionArgs,

    #[arg(long, value_enum, default_value_t = Difficulty::Medium)]
    pub difficulty: Difficulty,

    /// Output file (defaults to <chapter>_questions.txt)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_accepts_repeated_flags() {
        let cli = Cli::try_parse_from([
            "qbank",
            "generate",
            "--chapter",
            "chapter_1",
            "--chapter",
            "chapter_3",
            "--mcq",
            "2",
            "--difficulty",
            "easy",
            "--difficulty",
            "hard",
            "--domain",
            "analysis",
            "--banks",
            "2",
        ])
        .unwrap();

        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.chapters, vec!["chapter_1", "chapter_3"]);
        assert_eq!(args.questions.mcq, 2);
        assert_eq!(args.questions.true_false, 3);
        assert_eq!(args.difficulties, vec![Difficulty::Easy, Difficulty::Hard]);
        assert_eq!(args.questions.domains, vec![CognitiveDomain::Analysis]);
        assert_eq!(args.banks, 2);
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["qbank", "chapters", "--config", "custom.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Commands::Chapters));
    }
}
