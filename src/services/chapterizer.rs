use crate::models::{Chapter, Page};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

/// `1 — Introduction`, `2 - Methods`: chapter number, dash, title.
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s*[—-]\s*([^\n]+)").expect("heading pattern compiles")
});

/// The last number of the page text, usually the printed page number.
static TRAILING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*\z").expect("trailing number pattern compiles"));

/// Lines at the top of a page searched by the heading strategy.
const HEADING_WINDOW: usize = 5;

pub trait SegmentationStrategy {
    fn name(&self) -> &'static str;

    fn segment(&self, pages: &[Page]) -> Vec<Chapter>;
}

/// Closes a chapter whenever the printed page number resets to `1`. The
/// digits are compared as text, so a trailing `01` is not a reset.
///
/// Headings found anywhere on a page only update the pending title; the title
/// is applied when the next chapter is closed.
pub struct ResetBased;

/// Closes a chapter whenever a heading appears in the first lines of a page.
pub struct HeadingBased;

impl SegmentationStrategy for ResetBased {
    fn name(&self) -> &'static str {
        "page-number-reset"
    }

    fn segment(&self, pages: &[Page]) -> Vec<Chapter> {
        let mut acc = ChapterAccumulator::default();
        for page in pages {
            let digits = trailing_digits(&page.content);
            if digits == Some("1") && acc.has_pages() {
                acc.close();
            }
            if let Some(title) = heading_title(&page.content) {
                acc.title = Some(title);
            }
            acc.push(digits.and_then(|d| d.parse().ok()), &page.content);
        }
        acc.finish()
    }
}

impl SegmentationStrategy for HeadingBased {
    fn name(&self) -> &'static str {
        "heading"
    }

    fn segment(&self, pages: &[Page]) -> Vec<Chapter> {
        let mut acc = ChapterAccumulator::default();
        for page in pages {
            let head = page
                .content
                .lines()
                .take(HEADING_WINDOW)
                .collect::<Vec<_>>()
                .join("\n");
            if let Some(title) = heading_title(&head) {
                if acc.has_pages() {
                    acc.close();
                }
                acc.title = Some(title);
            }
            let page_number = trailing_digits(&page.content).and_then(|d| d.parse().ok());
            acc.push(page_number, &page.content);
        }
        acc.finish()
    }
}

/// Runs the reset strategy and falls back to headings when it finds at most
/// one chapter.
pub fn segment_pages(pages: &[Page]) -> Vec<Chapter> {
    let primary = ResetBased;
    let chapters = primary.segment(pages);
    if chapters.len() > 1 {
        info!(strategy = primary.name(), chapters = chapters.len(), "segmented pages");
        return chapters;
    }

    let fallback = HeadingBased;
    debug!(
        strategy = fallback.name(),
        "page numbers never reset, falling back"
    );
    let chapters = fallback.segment(pages);
    info!(strategy = fallback.name(), chapters = chapters.len(), "segmented pages");
    chapters
}

fn heading_title(text: &str) -> Option<String> {
    let captures = HEADING.captures(text)?;
    let number = captures.get(1)?.as_str();
    let title = captures.get(2)?.as_str().trim();
    if title.is_empty() {
        return None;
    }
    Some(format!("{number}: {title}"))
}

fn trailing_digits(text: &str) -> Option<&str> {
    TRAILING_NUMBER
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|digits| digits.as_str())
}

/// Pending chapter state shared by both strategies. The title survives a
/// close, so a chapter without its own heading inherits the last one seen.
#[derive(Default)]
struct ChapterAccumulator {
    chapters: Vec<Chapter>,
    pages: Vec<Page>,
    title: Option<String>,
}

impl ChapterAccumulator {
    fn has_pages(&self) -> bool {
        !self.pages.is_empty()
    }

    fn push(&mut self, page_number: Option<u32>, content: &str) {
        self.pages.push(Page {
            page_number,
            content: content.to_string(),
        });
    }

    fn close(&mut self) {
        let chapter_name = self
            .title
            .clone()
            .unwrap_or_else(|| format!("Chapter {}", self.chapters.len() + 1));
        self.chapters.push(Chapter {
            chapter_name,
            pages: std::mem::take(&mut self.pages),
        });
    }

    fn finish(mut self) -> Vec<Chapter> {
        if self.has_pages() {
            self.close();
        }
        self.chapters
    }
}
