//! Whole-submission validation
//!
//! Every rule runs on every call. The caller gets the complete set of field
//! errors in one pass rather than the first failure.

use super::config::KycConfig;
use super::draft::{KycDraft, ValidatedSubmission};
use super::file_validator::{FileRole, validate_file};
use super::request::BirthDate;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Keys used in [`ValidationErrors`].
pub mod fields {
    pub const FULL_NAME: &str = "full_name";
    pub const DATE_OF_BIRTH: &str = "date_of_birth";
    pub const COUNTRY: &str = "country_of_residence";
    pub const ADDRESS: &str = "residential_address";
    pub const DOCUMENTS: &str = "documents";
    pub const DOCUMENT_TYPES: &str = "document_types";
    pub const SELFIE: &str = "selfie";
    pub const ADMIN_NOTES: &str = "admin_notes";
}

/// Field name to message. Empty means the draft is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionValidator {
    config: Arc<KycConfig>,
}

impl SubmissionValidator {
    pub fn new(config: Arc<KycConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KycConfig {
        &self.config
    }

    /// Validates `draft` as of `now`.
    pub fn validate(&self, draft: &KycDraft, now: DateTime<Utc>) -> ValidationErrors {
        self.inspect(draft, now).0
    }

    /// Validates the draft and, when it is clean, pairs each document with
    /// its declared type.
    pub fn validate_and_finalise(
        &self,
        mut draft: KycDraft,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSubmission, ValidationErrors> {
        let (errors, date_of_birth) = self.inspect(&draft, now);
        let selfie = draft.selfies.pop();

        match (date_of_birth, selfie) {
            (Some(date_of_birth), Some(selfie)) if errors.is_empty() => Ok(ValidatedSubmission {
                full_name: draft.full_name.unwrap_or_default().trim().to_string(),
                date_of_birth,
                country_of_residence: draft
                    .country_of_residence
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_uppercase(),
                residential_address: draft
                    .residential_address
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                documents: draft.document_types.into_iter().zip(draft.documents).collect(),
                selfie,
            }),
            _ => Err(errors),
        }
    }

    fn inspect(&self, draft: &KycDraft, now: DateTime<Utc>) -> (ValidationErrors, Option<BirthDate>) {
        let mut errors = ValidationErrors::new();

        self.check_name(draft, &mut errors);
        let date_of_birth = self.check_date_of_birth(draft, now, &mut errors);
        self.check_country(draft, &mut errors);
        self.check_address(draft, &mut errors);
        self.check_documents(draft, &mut errors);
        self.check_document_types(draft, &mut errors);
        self.check_selfie(draft, &mut errors);

        (errors, date_of_birth)
    }

    fn check_name(&self, draft: &KycDraft, errors: &mut ValidationErrors) {
        let name = draft.full_name.as_deref().unwrap_or_default().trim();
        let min = self.config.name_min_len;

        if name.is_empty() {
            errors.insert(fields::FULL_NAME, "Full name is required");
        } else if name.chars().count() < min {
            errors.insert(
                fields::FULL_NAME,
                format!("Full name must be at least {min} characters"),
            );
        } else if !name
            .chars()
            .all(|c| c.is_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.'))
        {
            errors.insert(
                fields::FULL_NAME,
                "Full name may only contain letters, spaces, hyphens, apostrophes and periods",
            );
        }
    }

    fn check_date_of_birth(
        &self,
        draft: &KycDraft,
        now: DateTime<Utc>,
        errors: &mut ValidationErrors,
    ) -> Option<BirthDate> {
        let raw = draft.date_of_birth.as_deref().unwrap_or_default().trim();
        if raw.is_empty() {
            errors.insert(fields::DATE_OF_BIRTH, "Date of birth is required");
            return None;
        }
        let Some(date) = BirthDate::parse(raw) else {
            errors.insert(
                fields::DATE_OF_BIRTH,
                "Date of birth must be a valid date (YYYY-MM-DD)",
            );
            return None;
        };

        let age = date.age_years(now);
        let (min, max) = (self.config.min_age_years, self.config.max_age_years);
        if age < i64::from(min) {
            errors.insert(
                fields::DATE_OF_BIRTH,
                format!("Must be at least {min} years old"),
            );
        } else if age > i64::from(max) {
            errors.insert(
                fields::DATE_OF_BIRTH,
                format!("Age must not exceed {max} years"),
            );
        }
        Some(date)
    }

    fn check_country(&self, draft: &KycDraft, errors: &mut ValidationErrors) {
        let code = draft.country_of_residence.as_deref().unwrap_or_default().trim();

        if code.is_empty() {
            errors.insert(fields::COUNTRY, "Country of residence is required");
        } else if code.chars().count() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.insert(
                fields::COUNTRY,
                "Country must be a 2-letter ISO 3166-1 code",
            );
        }
    }

    fn check_address(&self, draft: &KycDraft, errors: &mut ValidationErrors) {
        let address = draft.residential_address.as_deref().unwrap_or_default().trim();
        let len = address.chars().count();
        let (min, max) = (self.config.address_min_len, self.config.address_max_len);

        if len == 0 {
            errors.insert(fields::ADDRESS, "Residential address is required");
        } else if len < min {
            errors.insert(
                fields::ADDRESS,
                format!("Residential address must be at least {min} characters"),
            );
        } else if len > max {
            errors.insert(
                fields::ADDRESS,
                format!("Residential address must not exceed {max} characters"),
            );
        }
    }

    fn check_documents(&self, draft: &KycDraft, errors: &mut ValidationErrors) {
        let count = draft.documents.len();
        let max = self.config.max_documents;

        if count == 0 {
            errors.insert(fields::DOCUMENTS, "At least one document is required");
            return;
        }
        if count > max {
            errors.insert(
                fields::DOCUMENTS,
                format!("No more than {max} documents may be uploaded"),
            );
            return;
        }

        let failures: Vec<String> = draft
            .documents
            .iter()
            .enumerate()
            .filter_map(|(i, file)| {
                let result = validate_file(file, FileRole::Document, &self.config.files);
                (!result.is_valid()).then(|| {
                    format!(
                        "Document {} ({}): {}",
                        i + 1,
                        file.file_name,
                        result.errors.join(", ")
                    )
                })
            })
            .collect();

        if !failures.is_empty() {
            errors.insert(fields::DOCUMENTS, failures.join("; "));
        }
    }

    fn check_document_types(&self, draft: &KycDraft, errors: &mut ValidationErrors) {
        let (types, files) = (draft.document_types.len(), draft.documents.len());
        if types != files {
            errors.insert(
                fields::DOCUMENT_TYPES,
                format!(
                    "Select exactly one document type per uploaded document ({types} types for {files} documents)"
                ),
            );
        }
    }

    fn check_selfie(&self, draft: &KycDraft, errors: &mut ValidationErrors) {
        match draft.selfies.as_slice() {
            [] => errors.insert(fields::SELFIE, "A selfie is required"),
            [selfie] => {
                let result = validate_file(selfie, FileRole::Selfie, &self.config.files);
                if !result.is_valid() {
                    errors.insert(fields::SELFIE, format!("Selfie: {}", result.errors.join(", ")));
                }
            }
            _ => errors.insert(fields::SELFIE, "Exactly one selfie must be provided"),
        }
    }
}
