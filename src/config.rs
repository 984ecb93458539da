use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "qbank.toml";

const SYSTEM_PROMPT: &str = "You are an instructor that generates question banks from the provided book content (from a PDF). \
You take user input such as cognitive domains, difficulty levels, type of questions, and chapter selection. \
Generate questions and answers based on these inputs, ensuring each question is relevant to the specified chapter and domain.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
    pub storage: StorageConfig,
    pub generation: GenerationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub language: String,
    pub dpi: u32,
    /// Renderer executable, looked up on `PATH` unless absolute.
    pub pdftoppm: PathBuf,
    pub tesseract: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: 200,
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub chapters_dir: PathBuf,
    pub pagewise_dir: PathBuf,
    pub uploads_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chapters_dir: PathBuf::from("chapters"),
            pagewise_dir: PathBuf::from("uploaded_data"),
            uploads_dir: PathBuf::from("uploads"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub token_ceiling: usize,
    pub max_banks: usize,
    pub words_per_chunk: usize,
    pub requests_per_period: u32,
    pub period_secs: u64,
}

impl GenerationConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            token_ceiling: 25_000,
            max_banks: 20,
            words_per_chunk: 3_000,
            requests_per_period: 1,
            period_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Generation results kept for download; the oldest is dropped first.
    pub retained_results: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            retained_results: 32,
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file, then `OPENAI_*` variables, then `QBANK_*`
    /// variables (`__` separates nested keys, e.g. `QBANK_LLM__MODEL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::figment(path)
            .extract()
            .with_context(|| format!("invalid configuration (file {})", path.display()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(
                Env::raw()
                    .only(&["OPENAI_API_KEY", "OPENAI_MODEL", "OPENAI_API_BASE"])
                    .map(|key| {
                        let key = key.as_str();
                        if key.eq_ignore_ascii_case("OPENAI_API_KEY") {
                            "llm.api_key".into()
                        } else if key.eq_ignore_ascii_case("OPENAI_MODEL") {
                            "llm.model".into()
                        } else {
                            "llm.api_base".into()
                        }
                    }),
            )
            .merge(Env::prefixed("QBANK_").split("__"))
    }
}
