//! Per-file upload constraints
//!
//! Size, MIME type and extension are checked independently. A file whose
//! declared MIME type is allowed but whose extension is not (or the reverse)
//! fails, so both have to agree with the allow-lists.

use super::config::FileConstraints;
use super::draft::FileUpload;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Document,
    Selfie,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Document => f.write_str("document"),
            FileRole::Selfie => f.write_str("selfie"),
        }
    }
}

/// Outcome of checking one file. Never an error: an invalid file is a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileValidation {
    pub errors: Vec<String>,
}

impl FileValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_file(
    file: &FileUpload,
    role: FileRole,
    constraints: &FileConstraints,
) -> FileValidation {
    let mut errors = Vec::new();

    if file.size() == 0 {
        errors.push("File is empty".to_string());
    } else if file.size() > constraints.max_file_size {
        errors.push(format!(
            "File size must not exceed {}",
            format_size(constraints.max_file_size)
        ));
    }

    let (mime_types, extensions) = match role {
        FileRole::Document => (
            &constraints.document_mime_types,
            &constraints.document_extensions,
        ),
        FileRole::Selfie => (&constraints.selfie_mime_types, &constraints.selfie_extensions),
    };

    if !mime_allowed(&file.mime_type, mime_types) {
        errors.push(format!(
            "File type {} is not allowed for a {role}",
            file.mime_type.trim()
        ));
    }

    match file.extension() {
        Some(ext) if extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) => {}
        Some(ext) => errors.push(format!("File extension .{ext} is not allowed for a {role}")),
        None => errors.push("File name has no extension".to_string()),
    }

    FileValidation { errors }
}

// `type/*` matches every subtype; parameters after `;` are ignored.
fn mime_allowed(mime: &str, allowed: &[String]) -> bool {
    let mime = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime.is_empty() {
        return false;
    }

    allowed.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_suffix("/*") {
            Some(major) => mime
                .split_once('/')
                .is_some_and(|(m, sub)| m == major && !sub.is_empty()),
            None => pattern == mime,
        }
    })
}

fn format_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else {
        format!("{bytes} bytes")
    }
}
