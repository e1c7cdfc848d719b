//! Storage for uploaded identity documents and selfies
use super::draft::FileUpload;
use super::error::StoreError;
use super::request::FileRef;
use super::utils::new_file_id;

/// Name of the sled tree holding raw file contents.
pub const FILES_TREE: &str = "kyc_files";

pub trait FileStorage: Send + Sync {
    fn store(&self, file: &FileUpload) -> Result<FileRef, StoreError>;
    /// Returns the contents after checking them against the recorded digest.
    fn retrieve(&self, file: &FileRef) -> Result<Vec<u8>, StoreError>;
    /// Deleting a file that is already gone is not an error.
    fn delete(&self, file: &FileRef) -> Result<(), StoreError>;
}

pub struct SledFileStorage {
    tree: sled::Tree,
}

impl SledFileStorage {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree(FILES_TREE)?,
        })
    }
}

impl FileStorage for SledFileStorage {
    fn store(&self, file: &FileUpload) -> Result<FileRef, StoreError> {
        let id = new_file_id().map_err(|e| StoreError::Identifier(e.to_string()))?;
        let digest = sha256::digest(&file.bytes);

        self.tree.insert(id.as_bytes(), file.bytes.as_slice())?;

        Ok(FileRef {
            id,
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.trim().to_ascii_lowercase(),
            size: file.size(),
            digest,
        })
    }

    fn retrieve(&self, file: &FileRef) -> Result<Vec<u8>, StoreError> {
        let bytes = self
            .tree
            .get(file.id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(file.id.clone()))?
            .to_vec();

        if sha256::digest(&bytes) != file.digest {
            return Err(StoreError::DigestMismatch(file.id.clone()));
        }
        Ok(bytes)
    }

    fn delete(&self, file: &FileRef) -> Result<(), StoreError> {
        self.tree.remove(file.id.as_bytes())?;
        Ok(())
    }
}
