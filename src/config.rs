//! Limits and allow-lists for KYC submissions
//!
//! Every field has a default, so a partial JSON file only needs to name the
//! values it overrides.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "KYC_CONFIG";

const MIB: u64 = 1024 * 1024;

/// Constraints applied to every uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConstraints {
    /// Largest accepted upload in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_document_mime_types")]
    pub document_mime_types: Vec<String>,

    #[serde(default = "default_document_extensions")]
    pub document_extensions: Vec<String>,

    /// `type/*` entries match any subtype
    #[serde(default = "default_selfie_mime_types")]
    pub selfie_mime_types: Vec<String>,

    #[serde(default = "default_selfie_extensions")]
    pub selfie_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycConfig {
    #[serde(default)]
    pub files: FileConstraints,

    #[serde(default = "default_min_age_years")]
    pub min_age_years: u32,

    #[serde(default = "default_max_age_years")]
    pub max_age_years: u32,

    #[serde(default = "default_name_min_len")]
    pub name_min_len: usize,

    #[serde(default = "default_address_min_len")]
    pub address_min_len: usize,

    #[serde(default = "default_address_max_len")]
    pub address_max_len: usize,

    /// Identity documents accepted per submission
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    /// Upper bound on request ids in one bulk review
    #[serde(default = "default_max_bulk_batch")]
    pub max_bulk_batch: usize,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_max_file_size() -> u64 {
    5 * MIB
}

fn default_document_mime_types() -> Vec<String> {
    strings(&["image/jpeg", "image/png", "image/jpg", "application/pdf"])
}

fn default_document_extensions() -> Vec<String> {
    strings(&["jpg", "jpeg", "png", "pdf"])
}

fn default_selfie_mime_types() -> Vec<String> {
    strings(&["image/*"])
}

fn default_selfie_extensions() -> Vec<String> {
    strings(&["jpg", "jpeg", "png", "webp", "heic"])
}

fn default_min_age_years() -> u32 {
    18
}

fn default_max_age_years() -> u32 {
    120
}

fn default_name_min_len() -> usize {
    2
}

fn default_address_min_len() -> usize {
    10
}

fn default_address_max_len() -> usize {
    500
}

fn default_max_documents() -> usize {
    3
}

fn default_max_bulk_batch() -> usize {
    50
}

impl Default for FileConstraints {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            document_mime_types: default_document_mime_types(),
            document_extensions: default_document_extensions(),
            selfie_mime_types: default_selfie_mime_types(),
            selfie_extensions: default_selfie_extensions(),
        }
    }
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            files: FileConstraints::default(),
            min_age_years: default_min_age_years(),
            max_age_years: default_max_age_years(),
            name_min_len: default_name_min_len(),
            address_min_len: default_address_min_len(),
            address_max_len: default_address_max_len(),
            max_documents: default_max_documents(),
            max_bulk_batch: default_max_bulk_batch(),
        }
    }
}

impl KycConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Reads the file named by `KYC_CONFIG`, or falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}
