use crate::models::{CognitiveDomain, Difficulty, QuestionSpec};
use std::fmt::Write;

/// One chapter's text and requested question counts.
#[derive(Debug, Clone, Copy)]
pub struct PromptChapter<'a> {
    pub name: &'a str,
    pub content: &'a str,
    pub questions: QuestionSpec,
}

pub struct PromptBuilder {
    difficulty: Difficulty,
    domains: Vec<CognitiveDomain>,
}

impl PromptBuilder {
    /// An empty domain list means every cognitive domain is allowed.
    pub fn new(difficulty: Difficulty, domains: &[CognitiveDomain]) -> Self {
        let domains = if domains.is_empty() {
            CognitiveDomain::ALL.to_vec()
        } else {
            domains.to_vec()
        };
        Self {
            difficulty,
            domains,
        }
    }

    /// Chapters with no requested questions are left out entirely.
    pub fn build(&self, chapters: &[PromptChapter<'_>]) -> String {
        let included = chapters
            .iter()
            .filter(|chapter| !chapter.questions.is_empty())
            .collect::<Vec<_>>();
        let domains = self
            .domains
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Generate a question bank from the following book content. Difficulty: {}.",
            self.difficulty
        );
        prompt.push('\n');

        prompt.push_str("Requested questions per chapter:\n");
        for chapter in &included {
            let spec = chapter.questions;
            let _ = writeln!(prompt, "Chapter: {}", chapter.name);
            let _ = writeln!(prompt, "MCQ: {}", spec.mcq);
            let _ = writeln!(prompt, "True/False: {}", spec.true_false);
            let _ = writeln!(prompt, "Short Answer: {}", spec.short_answer);
            prompt.push('\n');
        }

        prompt.push_str("Content:\n");
        for chapter in &included {
            let _ = writeln!(prompt, "=== Begin chapter: {} ===", chapter.name);
            prompt.push_str(chapter.content.trim_end());
            prompt.push('\n');
            let _ = writeln!(prompt, "=== End chapter: {} ===", chapter.name);
            prompt.push('\n');
        }

        prompt.push_str(
            "Format the output as:\n\
             MCQ:\nQ1. ...\nA. ...\nB. ...\nC. ...\nD. ...\nAnswer: ...\nDomain: ...\n\n\
             True/False:\nQ1. ... (True/False)\nAnswer: ...\nDomain: ...\n\n\
             Short Answer:\nQ1. ...\nAnswer: ...\nDomain: ...\n\n",
        );
        prompt.push_str(
            "Number the questions within each section starting from Q1 and omit a section \
             when no questions of that type are requested.\n",
        );
        let _ = writeln!(
            prompt,
            "Tag every question with one cognitive domain, chosen at random and independently \
             for each question from: {domains}."
        );
        prompt.push_str(
            "Do not generate more questions of any type than requested for each chapter.\n",
        );
        prompt
    }
}
