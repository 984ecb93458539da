pub mod chapterizer;
pub mod extractor;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod store;
