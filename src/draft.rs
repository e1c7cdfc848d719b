//! Raw submission input, as it arrives from the user
use super::request::{BirthDate, DocumentType};

/// An uploaded file before it reaches file storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        }
    }
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
    /// Lower-cased text after the last `.` of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

// Used for constructing drafts. Document files and their declared types
// arrive as two separate lists from the form and are only paired once the
// draft passes validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KycDraft {
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub country_of_residence: Option<String>,
    pub residential_address: Option<String>,
    pub document_types: Vec<DocumentType>,
    pub documents: Vec<FileUpload>,
    pub selfies: Vec<FileUpload>,
}

impl KycDraft {
    /// Construct a new, empty draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_full_name(mut self, name: &str) -> Self {
        self.full_name = Some(name.to_string());
        self
    }
    pub fn set_date_of_birth(mut self, date: &str) -> Self {
        self.date_of_birth = Some(date.to_string());
        self
    }
    pub fn set_country(mut self, code: &str) -> Self {
        self.country_of_residence = Some(code.to_string());
        self
    }
    pub fn set_address(mut self, address: &str) -> Self {
        self.residential_address = Some(address.to_string());
        self
    }
    /// Adds a document together with its declared type.
    pub fn add_document(mut self, document_type: DocumentType, file: FileUpload) -> Self {
        self.document_types.push(document_type);
        self.documents.push(file);
        self
    }
    pub fn add_document_type(mut self, document_type: DocumentType) -> Self {
        self.document_types.push(document_type);
        self
    }
    pub fn add_document_file(mut self, file: FileUpload) -> Self {
        self.documents.push(file);
        self
    }
    /// Replaces any selfie already attached.
    pub fn set_selfie(mut self, file: FileUpload) -> Self {
        self.selfies = vec![file];
        self
    }
    pub fn add_selfie(mut self, file: FileUpload) -> Self {
        self.selfies.push(file);
        self
    }
}

/// A draft that passed validation, with documents paired to their types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSubmission {
    pub full_name: String,
    pub date_of_birth: BirthDate,
    pub country_of_residence: String,
    pub residential_address: String,
    pub documents: Vec<(DocumentType, FileUpload)>,
    pub selfie: FileUpload,
}
