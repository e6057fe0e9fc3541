use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::codec::{Codec, CodecError};
use crate::parse::{self, ParseError, Row};

/// Stored previews hold at most this many rows.
pub const PREVIEW_ROWS: usize = 10;

const DOCUMENTS_DIR: &str = "documents";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("document not found")]
    NotFound,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted form of one uploaded spreadsheet
///
/// Metadata fields are plaintext; `columns` and `preview` are codec
/// envelopes and only ever decrypted on the way out.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub columns: String,
    pub preview: String,
}

/// Decrypted document shape returned to callers
///
/// The response to an uploader or reader is never encrypted; only the
/// stored copy is.
#[derive(Debug, Serialize, Clone)]
pub struct DocumentView {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub columns: Vec<String>,
    pub preview: Vec<Row>,
}

/// File-backed document store
///
/// One JSON file per document under `<root>/documents/`. A single document
/// create/read/delete is atomic at the file level; there are no
/// cross-document transactions.
pub struct DocumentStore {
    root: PathBuf,
    codec: Codec,
}

impl DocumentStore {
    /// Open (and create if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, codec: Codec) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_dir_all(root.join(DOCUMENTS_DIR))?;
        Ok(DocumentStore { root, codec })
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.root.join(DOCUMENTS_DIR).join(format!("{id}.json"))
    }

    /// Ingest an uploaded file
    ///
    /// Parses the upload, derives the header list and a preview of at most
    /// ten rows, encrypts both, and persists a new document. The returned
    /// view carries the plaintext columns and preview for the uploader.
    ///
    /// # Arguments
    /// * `filename` - Original upload filename
    /// * `bytes` - Raw file contents
    /// * `user` - Owning user id
    /// * `project` - Owning project, if the upload happened inside one
    ///
    /// # Returns
    /// * `Result<DocumentView, StoreError>` - The plaintext summary or an error
    pub fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        user: &str,
        project: Option<String>,
    ) -> Result<DocumentView, StoreError> {
        let sheet = parse::parse_upload(filename, bytes)?;
        if sheet.columns.is_empty() || sheet.rows.is_empty() {
            return Err(StoreError::Validation(
                "uploaded file has no data; the first row must be a header row followed by at least one data row".to_string(),
            ));
        }

        let preview: Vec<Row> = sheet.rows.iter().take(PREVIEW_ROWS).cloned().collect();

        let doc = StoredDocument {
            id: Uuid::new_v4().to_string(),
            user_id: user.to_string(),
            project_id: project,
            filename: filename.to_string(),
            upload_date: Utc::now(),
            columns: self.codec.encrypt(&sheet.columns)?,
            preview: self.codec.encrypt(&preview)?,
        };
        self.save(&doc)?;

        Ok(DocumentView {
            id: doc.id,
            user_id: doc.user_id,
            project_id: doc.project_id,
            filename: doc.filename,
            upload_date: doc.upload_date,
            columns: sheet.columns,
            preview,
        })
    }

    /// Most recent uploads for one user, newest first, decrypted.
    pub fn list_recent(&self, user: &str, limit: usize) -> Result<Vec<DocumentView>, StoreError> {
        let mut docs = self.load_for_user(user)?;
        docs.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        docs.truncate(limit);
        Ok(docs.iter().map(|d| self.view(d)).collect())
    }

    /// Documents belonging to a project, decrypted
    ///
    /// Project listings aggregate uploads from many users and must tolerate
    /// partially-corrupt entries: any document whose decrypted columns come
    /// back empty is filtered out rather than shown broken.
    pub fn list_by_project(&self, project: &str) -> Result<Vec<DocumentView>, StoreError> {
        let views = self
            .load_all()?
            .iter()
            .filter(|d| d.project_id.as_deref() == Some(project))
            .map(|d| self.view(d))
            .filter(|v| !v.columns.is_empty())
            .collect();
        Ok(views)
    }

    /// Fetch one document owned by `user`
    ///
    /// A document owned by someone else looks identical to a missing one.
    pub fn get(&self, id: &str, user: &str) -> Result<DocumentView, StoreError> {
        let doc = self.load(id)?.ok_or(StoreError::NotFound)?;
        if doc.user_id != user {
            return Err(StoreError::NotFound);
        }
        Ok(self.view(&doc))
    }

    /// Delete one document owned by `user`; same not-found rule as [`Self::get`].
    pub fn delete(&self, id: &str, user: &str) -> Result<(), StoreError> {
        let doc = self.load(id)?.ok_or(StoreError::NotFound)?;
        if doc.user_id != user {
            return Err(StoreError::NotFound);
        }
        match fs::remove_file(self.document_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cascade delete of every document in a project, used when the project
    /// itself is removed.
    pub fn delete_by_project(&self, project: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for doc in self.load_all()? {
            if doc.project_id.as_deref() == Some(project) {
                match fs::remove_file(self.document_path(&doc.id)) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }

    /// All stored documents. Unreadable or unparseable files are skipped.
    pub fn load_all(&self) -> Result<Vec<StoredDocument>, StoreError> {
        let mut docs = Vec::new();
        for entry in fs::read_dir(self.root.join(DOCUMENTS_DIR))?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let data = match fs::read_to_string(&path) {
                Ok(data) => data,
                Err(_) => continue,
            };
            match serde_json::from_str::<StoredDocument>(&data) {
                Ok(doc) => docs.push(doc),
                Err(_) => continue,
            }
        }
        Ok(docs)
    }

    /// All stored documents owned by one user.
    pub fn load_for_user(&self, user: &str) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|d| d.user_id == user)
            .collect())
    }

    fn load(&self, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let path = self.document_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, doc: &StoredDocument) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc)?;
        fs::write(self.document_path(&doc.id), json)?;
        Ok(())
    }

    // Decryption goes through the fail-soft boundary: a corrupted document
    // surfaces as empty columns/preview, never as an error.
    fn view(&self, doc: &StoredDocument) -> DocumentView {
        DocumentView {
            id: doc.id.clone(),
            user_id: doc.user_id.clone(),
            project_id: doc.project_id.clone(),
            filename: doc.filename.clone(),
            upload_date: doc.upload_date,
            columns: self.codec.decrypt_or_empty(Some(&doc.columns)),
            preview: self.codec.decrypt_or_empty(Some(&doc.preview)),
        }
    }
}
