use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::docx::styles::StyleAttr;
use crate::protect::{StripStrictness, DEFAULT_DELIMITERS};

pub const CONFIG_FILENAME: &str = "tagsafe-translator.toml";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default)]
    pub cleanup: CleanupSection,
    #[serde(default)]
    pub protection: ProtectionSection,
}

/// One MT backend endpoint. `strategy` picks how paragraphs are carved into
/// backend requests for this engine ("segments" or "chunks").
#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_source_lang() -> String {
    "en-US".to_string()
}

fn default_target_lang() -> String {
    "es-ES".to_string()
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CleanupSection {
    /// Merge whitespace-only runs into the preceding run regardless of style.
    #[serde(default)]
    pub merge_whitespace_only: bool,

    /// Tracked attribute keys (`font_name`, `bold`, ...). Empty selects the
    /// built-in full set.
    #[serde(default)]
    pub tracked_attributes: Vec<String>,
}

impl CleanupSection {
    pub fn tracked_attrs(&self) -> anyhow::Result<Vec<StyleAttr>> {
        if self.tracked_attributes.is_empty() {
            return Ok(StyleAttr::ALL.to_vec());
        }
        self.tracked_attributes
            .iter()
            .map(|key| {
                StyleAttr::from_key(key)
                    .ok_or_else(|| anyhow!("unknown tracked attribute: {key}"))
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProtectionSection {
    /// Delimiter characters for spacing repair, as one string. Unset uses
    /// space plus common sentence punctuation.
    #[serde(default)]
    pub delimiters: Option<String>,

    /// Strip anchor tags the way the legacy pipeline did (bare closers at
    /// the start and openers at the end always go). Off = conservative.
    #[serde(default)]
    pub strict_anchor_strip: bool,
}

impl ProtectionSection {
    pub fn delimiter_chars(&self) -> Vec<char> {
        match self.delimiters.as_deref() {
            Some(s) if !s.is_empty() => s.chars().collect(),
            _ => DEFAULT_DELIMITERS.to_vec(),
        }
    }

    pub fn strictness(&self) -> StripStrictness {
        if self.strict_anchor_strip {
            StripStrictness::Standard
        } else {
            StripStrictness::Conservative
        }
    }
}

impl AppConfig {
    /// Engine by name, or the first configured one.
    pub fn engine(&self, name: Option<&str>) -> anyhow::Result<&EngineConfig> {
        match name {
            Some(n) => self
                .engines
                .iter()
                .find(|e| e.name == n)
                .ok_or_else(|| anyhow!("engine not configured: {n}")),
            None => self
                .engines
                .first()
                .ok_or_else(|| anyhow!("no engines configured")),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

pub fn find_default_config(workdir: &Path) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILENAME, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, CONFIG_FILENAME, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, CONFIG_FILENAME, 10) {
                return Some(p);
            }
        }
    }
    None
}

fn find_file_upwards(start: &Path, filename: &str, max_depth: usize) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    for _ in 0..max_depth {
        let d = dir?;
        let cand = d.join(filename);
        if cand.is_file() {
            return Some(cand);
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }
    None
}

const DEFAULT_CONFIG: &str = r#"# tagsafe-translator configuration

[[engines]]
name = "default"
base_url = "http://127.0.0.1:8000"
source_lang = "en-US"
target_lang = "es-ES"
# "segments" sends whole paragraphs (tags tokenized); "chunks" translates
# run-by-run so the backend never sees markup.
strategy = "segments"

[cleanup]
# Fold whitespace-only runs into their left neighbor regardless of style.
merge_whitespace_only = false
# Uncomment to track fewer attributes when deciding run identity.
# tracked_attributes = ["font_name", "font_size", "bold", "italic"]

[protection]
# Characters counting as delimiters when repairing spacing around tags.
# delimiters = " .,;:?!"
# Legacy behavior: always strip anchor closers/openers at segment edges.
strict_anchor_strip = false
"#;

/// Write the default config template, refusing to overwrite unless forced.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(CONFIG_FILENAME);
    if path.exists() && !force {
        return Err(anyhow!("config already exists: {} (use --force)", path.display()));
    }
    std::fs::write(&path, DEFAULT_CONFIG)
        .with_context(|| format!("write config: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_parses() {
        let cfg: AppConfig = toml::from_str(DEFAULT_CONFIG).expect("parse default config");
        assert_eq!(cfg.engines.len(), 1);
        let engine = cfg.engine(None).expect("first engine");
        assert_eq!(engine.name, "default");
        assert_eq!(engine.strategy.as_deref(), Some("segments"));
        assert!(!cfg.cleanup.merge_whitespace_only);
        assert_eq!(cfg.protection.strictness(), StripStrictness::Conservative);
    }

    #[test]
    fn engine_lookup_by_name() {
        let cfg: AppConfig = toml::from_str(
            r#"
[[engines]]
name = "a"
base_url = "http://a:8000"

[[engines]]
name = "b"
base_url = "http://b:8000"
target_lang = "fr-FR"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.engine(Some("b")).expect("b").target_lang, "fr-FR");
        assert_eq!(cfg.engine(None).expect("first").name, "a");
        assert!(cfg.engine(Some("missing")).is_err());
    }

    #[test]
    fn tracked_attribute_keys_are_validated() {
        let section = CleanupSection {
            merge_whitespace_only: false,
            tracked_attributes: vec!["bold".to_string(), "font_name".to_string()],
        };
        let attrs = section.tracked_attrs().expect("attrs");
        assert_eq!(attrs, vec![StyleAttr::Bold, StyleAttr::FontName]);

        let bad = CleanupSection {
            merge_whitespace_only: false,
            tracked_attributes: vec!["boldness".to_string()],
        };
        assert!(bad.tracked_attrs().is_err());
    }
}
