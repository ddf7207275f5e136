use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Visibility tier of a pushed dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Findability {
    Published,
    #[default]
    Unlisted,
    Private,
}

impl Findability {
    /// Interpret user input. `public` and `publish` are accepted as legacy
    /// spellings of `published`; anything unknown becomes `unlisted`.
    pub fn normalize(raw: &str) -> Self {
        static LEGACY: OnceLock<Regex> = OnceLock::new();
        let legacy = LEGACY.get_or_init(|| Regex::new(r"\bpublic\b|\bpublish\b").expect("valid regex"));
        let value = legacy.replace_all(raw.trim(), "published");
        match value.as_ref() {
            "published" => Findability::Published,
            "unlisted" => Findability::Unlisted,
            "private" => Findability::Private,
            other => {
                warn!(
                    findability = other,
                    "Findability option is unknown (should be one of: 'published', 'unlisted', 'private'), using 'unlisted'"
                );
                Findability::Unlisted
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Findability::Published => "published",
            Findability::Unlisted => "unlisted",
            Findability::Private => "private",
        }
    }
}

/// Extra artifacts requested from the processing pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub zip: bool,
    #[serde(default)]
    pub sqlite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipParameters {
    #[serde(rename = "out-file")]
    pub out_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Output {
    Zip { parameters: ZipParameters },
    Sqlite,
}

impl OutputsConfig {
    pub fn outputs(&self) -> Vec<Output> {
        let mut outputs = Vec::new();
        if self.zip {
            outputs.push(Output::Zip {
                parameters: ZipParameters {
                    out_file: "dataset.zip".to_string(),
                },
            });
        }
        if self.sqlite {
            outputs.push(Output::Sqlite);
        }
        outputs
    }
}

/// Caller-supplied options of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub findability: Findability,
    /// Recurrence such as `every 1d`.
    pub schedule: Option<String>,
    /// Raw sheet selector for spreadsheet resources (`all`, `1,Sheet2`, ...).
    pub sheets: Option<String>,
    pub outputs: OutputsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_become_published() {
        assert_eq!(Findability::normalize("public"), Findability::Published);
        assert_eq!(Findability::normalize("publish"), Findability::Published);
        assert_eq!(Findability::normalize("published"), Findability::Published);
    }

    #[test]
    fn unknown_findability_is_unlisted() {
        assert_eq!(Findability::normalize("everyone"), Findability::Unlisted);
        assert_eq!(Findability::normalize("publicity"), Findability::Unlisted);
        assert_eq!(Findability::normalize("private"), Findability::Private);
    }

    #[test]
    fn outputs_wire_shape() {
        let outputs = OutputsConfig { zip: true, sqlite: true }.outputs();
        assert_eq!(
            serde_json::to_value(outputs).unwrap(),
            serde_json::json!([
                {"kind": "zip", "parameters": {"out-file": "dataset.zip"}},
                {"kind": "sqlite"}
            ])
        );
        assert!(OutputsConfig::default().outputs().is_empty());
    }
}
