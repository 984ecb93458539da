use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_name: String,
    pub pages: Vec<Page>,
}

/// Page contents joined by a blank line, in page order.
pub fn join_pages(pages: &[Page]) -> String {
    pages
        .iter()
        .map(|page| page.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A stored chapter as handed to prompt building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedChapter {
    pub key: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterEntry {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpec {
    #[serde(default)]
    pub mcq: u32,
    #[serde(default)]
    pub true_false: u32,
    #[serde(default)]
    pub short_answer: u32,
}

impl QuestionSpec {
    pub fn new(mcq: u32, true_false: u32, short_answer: u32) -> Self {
        Self {
            mcq,
            true_false,
            short_answer,
        }
    }

    pub fn total(&self) -> u32 {
        self.mcq
            .saturating_add(self.true_false)
            .saturating_add(self.short_answer)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum CognitiveDomain {
    Knowledge,
    Comprehension,
    Application,
    Analysis,
    Evaluation,
}

impl CognitiveDomain {
    pub const ALL: [CognitiveDomain; 5] = [
        CognitiveDomain::Knowledge,
        CognitiveDomain::Comprehension,
        CognitiveDomain::Application,
        CognitiveDomain::Analysis,
        CognitiveDomain::Evaluation,
    ];
}

impl fmt::Display for CognitiveDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CognitiveDomain::Knowledge => "Knowledge",
            CognitiveDomain::Comprehension => "Comprehension",
            CognitiveDomain::Application => "Application",
            CognitiveDomain::Analysis => "Analysis",
            CognitiveDomain::Evaluation => "Evaluation",
        };
        f.write_str(label)
    }
}

/// Difficulty and domain configuration of one question bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankConfig {
    pub difficulty: Difficulty,
    #[serde(default)]
    pub domains: Vec<CognitiveDomain>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSelection {
    pub key: String,
    pub questions: QuestionSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub chapters: Vec<ChapterSelection>,
    pub banks: Vec<BankConfig>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("select at least one chapter")]
    NoChapters,
    #[error("request at least one question")]
    NoQuestions,
    #[error("request at least one question bank")]
    NoBanks,
    #[error("at most {max} question banks can be generated at once, got {requested}")]
    TooManyBanks { requested: usize, max: usize },
}

impl GenerationRequest {
    /// `count` banks sharing one difficulty and domain set.
    pub fn uniform(
        chapters: Vec<ChapterSelection>,
        difficulty: Difficulty,
        domains: Vec<CognitiveDomain>,
        count: usize,
    ) -> Self {
        let bank = BankConfig {
            difficulty,
            domains,
        };
        Self {
            chapters,
            banks: vec![bank; count],
        }
    }

    pub fn validate(&self, max_banks: usize) -> Result<(), RequestError> {
        if self.chapters.is_empty() {
            return Err(RequestError::NoChapters);
        }
        if self.chapters.iter().all(|c| c.questions.is_empty()) {
            return Err(RequestError::NoQuestions);
        }
        if self.banks.is_empty() {
            return Err(RequestError::NoBanks);
        }
        if self.banks.len() > max_banks {
            return Err(RequestError::TooManyBanks {
                requested: self.banks.len(),
                max: max_banks,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionBank {
    pub number: usize,
    pub difficulty: Difficulty,
    pub text: String,
}

impl QuestionBank {
    pub fn file_name(&self) -> String {
        format!("question_bank_{}.txt", self.number)
    }
}
