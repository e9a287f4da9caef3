use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SpreadsheetError, StorageError};
use crate::spreadsheet::Workbook;

/// Metadata for one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Prefix for in-flight temporary files; hidden from listings.
const TEMP_PREFIX: &str = ".tmp-";

/// Writes `content` to `dst` through a sibling temp file and a rename, so
/// readers never observe a half-written file.
fn write_atomic(dst: &Path, content: &[u8]) -> Result<(), StorageError> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let file_name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = dir.join(format!(
        "{}{}-{}",
        TEMP_PREFIX,
        uuid::Uuid::new_v4().simple(),
        file_name
    ));

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(content)?;
        file.sync_all()
    };

    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(StorageError::WriteFile {
            path: dst.to_path_buf(),
            source: e,
        });
    }

    std::fs::rename(&tmp, dst).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StorageError::MoveFile {
            from: tmp.clone(),
            to: dst.to_path_buf(),
            source: e,
        }
    })
}

/// Durable storage for uploaded source workbooks and generated outputs,
/// addressed by bare file name.
pub struct FileStore {
    uploads_directory: PathBuf,
    outputs_directory: PathBuf,
    work_directory: PathBuf,
    accepted_extensions: Vec<String>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(
        uploads_directory: P,
        outputs_directory: P,
        work_directory: P,
        accepted_extensions: &[String],
    ) -> Result<Self, StorageError> {
        let store = Self {
            uploads_directory: uploads_directory.as_ref().to_path_buf(),
            outputs_directory: outputs_directory.as_ref().to_path_buf(),
            work_directory: work_directory.as_ref().to_path_buf(),
            accepted_extensions: accepted_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
        };

        store.ensure_directory(&store.uploads_directory)?;
        store.ensure_directory(&store.outputs_directory)?;
        store.ensure_directory(&store.work_directory)?;

        Ok(store)
    }

    pub fn uploads_directory(&self) -> &Path {
        &self.uploads_directory
    }

    pub fn outputs_directory(&self) -> &Path {
        &self.outputs_directory
    }

    pub fn work_directory(&self) -> &Path {
        &self.work_directory
    }

    /// Saves an uploaded workbook, replacing any file of the same name.
    pub fn save(&self, name: &str, content: &[u8]) -> Result<FileInfo, StorageError> {
        self.validate_name(name)?;
        self.check_extension(name)?;

        let path = self.uploads_directory.join(name);
        write_atomic(&path, content)?;
        file_info(&path)
    }

    /// Saves a generated output file, replacing any file of the same name.
    pub fn save_output(&self, name: &str, content: &[u8]) -> Result<FileInfo, StorageError> {
        self.validate_name(name)?;

        let path = self.outputs_directory.join(name);
        write_atomic(&path, content)?;
        file_info(&path)
    }

    pub fn list_uploaded(&self) -> Result<Vec<FileInfo>, StorageError> {
        list_directory(&self.uploads_directory)
    }

    pub fn list_output(&self) -> Result<Vec<FileInfo>, StorageError> {
        list_directory(&self.outputs_directory)
    }

    pub fn uploaded_exists(&self, name: &str) -> bool {
        self.validate_name(name).is_ok() && self.uploads_directory.join(name).is_file()
    }

    /// Resolves the on-disk path of an existing upload.
    pub fn uploaded_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        self.existing_path(&self.uploads_directory, name)
    }

    /// Resolves the on-disk path of an existing output.
    pub fn output_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        self.existing_path(&self.outputs_directory, name)
    }

    /// Opens an uploaded workbook only to enumerate its sheet names.
    pub fn read_sheet_names(&self, name: &str) -> Result<Vec<String>, SpreadsheetError> {
        let path = self.uploads_directory.join(name);
        if self.validate_name(name).is_err() || !path.is_file() {
            return Err(SpreadsheetError::Open {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such upload"),
            });
        }
        let workbook = Workbook::open(&path)?;
        Ok(workbook.sheet_names().to_vec())
    }

    pub fn delete_uploaded(&self, name: &str) -> Result<(), StorageError> {
        let path = self.existing_path(&self.uploads_directory, name)?;
        remove(&path)
    }

    pub fn delete_output(&self, name: &str) -> Result<(), StorageError> {
        let path = self.existing_path(&self.outputs_directory, name)?;
        remove(&path)
    }

    fn existing_path(&self, directory: &Path, name: &str) -> Result<PathBuf, StorageError> {
        self.validate_name(name)
            .map_err(|_| StorageError::NotFound(name.to_string()))?;
        let path = directory.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StorageError::NotFound(name.to_string()))
        }
    }

    /// Rejects anything that is not a plain file name inside the store.
    fn validate_name(&self, name: &str) -> Result<(), StorageError> {
        let invalid = |reason: &str| StorageError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(invalid("name must not contain path components"));
        }
        if name.starts_with(TEMP_PREFIX) {
            return Err(invalid("name uses a reserved prefix"));
        }
        Ok(())
    }

    fn check_extension(&self, name: &str) -> Result<(), StorageError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if self.accepted_extensions.iter().any(|e| *e == extension) {
            Ok(())
        } else {
            Err(StorageError::InvalidName {
                name: name.to_string(),
                reason: format!(
                    "unsupported file type, expected one of: {}",
                    self.accepted_extensions.join(", ")
                ),
            })
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

fn remove(path: &Path) -> Result<(), StorageError> {
    std::fs::remove_file(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )
        } else {
            StorageError::DeleteFile {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

fn file_info(path: &Path) -> Result<FileInfo, StorageError> {
    let metadata = std::fs::metadata(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(FileInfo {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size: metadata.len(),
        modified,
    })
}

fn list_directory(directory: &Path) -> Result<Vec<FileInfo>, StorageError> {
    let entries = std::fs::read_dir(directory).map_err(|e| StorageError::ReadFile {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry in {}: {}", directory.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() {
            continue;
        }
        match file_info(&path) {
            Ok(info) => files.push(info),
            // Deleted between read_dir and stat.
            Err(e) => log::debug!("Skipping {}: {}", path.display(), e),
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
