//! Document registry
//!
//! Maps known containers to their OCR state. It is rebuilt from disk on
//! every tick by reading container headers (bodies are skipped), so it is
//! never authoritative: the container files are. A JSON snapshot can be
//! written for `status` and for humans.

use crate::container::{read_header, SectionKind};
use crate::error::Result;
use crate::fsutil::{write_atomic, ContainerLock};
use crate::models::OcrStatus;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Registry value for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub path: PathBuf,
    pub ocr_status: OcrStatus,
    pub ocr_attempts: u32,
    /// blake3 of the embedded original, from the section descriptor
    pub original_digest: Option<String>,
    pub last_checked: DateTime<Utc>,
}

/// Count of containers per OCR status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub built_at: DateTime<Utc>,
    pub entries: BTreeMap<PathBuf, RegistryEntry>,
}

/// Files directly inside `dir` whose extension matches (case-insensitive).
/// Hidden files, including in-flight temp files, are skipped.
pub fn list_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .hidden(true)
        .git_ignore(false)
        .git_exclude(false)
        .git_global(false)
        .ignore(false)
        .parents(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(e) if e.file_type().map(|t| t.is_file()).unwrap_or(false) => {
                let matches = e
                    .path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .map(|x| x.eq_ignore_ascii_case(extension))
                    .unwrap_or(false);
                if matches {
                    files.push(e.path().to_path_buf());
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable entry in {}: {}", dir.display(), e),
        }
    }
    files
}

/// Whether the OCR pass should pick up a container in this state
pub fn is_ocr_candidate(status: OcrStatus, attempts: u32, max_attempts: u32, lock_held: bool) -> bool {
    match status {
        OcrStatus::Pending => true,
        OcrStatus::Failed => attempts < max_attempts,
        // a crashed OCR job leaves in_progress behind with no live lock
        OcrStatus::InProgress => !lock_held,
        OcrStatus::Completed => false,
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            built_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Rebuild from the `.svg` files of every watched directory
    pub fn scan(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::new();
        for dir in dirs {
            if !dir.is_dir() {
                debug!("Watch directory {} does not exist", dir.display());
                continue;
            }
            for path in list_files(dir, "svg") {
                registry.observe(&path);
            }
        }
        registry
    }

    /// Read one container header into the registry. Returns false for files
    /// that are not veridock containers.
    pub fn observe(&mut self, path: &Path) -> bool {
        match read_header(path) {
            Ok(decoded) => {
                let entry = RegistryEntry {
                    path: path.to_path_buf(),
                    ocr_status: decoded.header.ocr_status,
                    ocr_attempts: decoded.header.ocr_attempts,
                    original_digest: decoded
                        .descriptor(SectionKind::Original)
                        .map(|d| d.digest.clone()),
                    last_checked: Utc::now(),
                };
                self.entries.insert(path.to_path_buf(), entry);
                true
            }
            Err(e) => {
                debug!(path = %path.display(), "Not a container: {}", e);
                false
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&RegistryEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Container already holding an original with this digest
    pub fn find_by_digest(&self, digest: &str) -> Option<&RegistryEntry> {
        self.entries
            .values()
            .find(|e| e.original_digest.as_deref() == Some(digest))
    }

    /// Containers the OCR pass should process, in path order
    pub fn ocr_backlog(&self, max_attempts: u32) -> Vec<&RegistryEntry> {
        self.entries
            .values()
            .filter(|e| {
                let lock_held =
                    e.ocr_status == OcrStatus::InProgress && ContainerLock::is_held(&e.path);
                is_ocr_candidate(e.ocr_status, e.ocr_attempts, max_attempts, lock_held)
            })
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.entries.values() {
            match entry.ocr_status {
                OcrStatus::Pending => counts.pending += 1,
                OcrStatus::InProgress => counts.in_progress += 1,
                OcrStatus::Completed => counts.completed += 1,
                OcrStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Write the snapshot atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// One `.svg` file as shown by `list`
#[derive(Debug, Clone, Serialize)]
pub struct SvgListing {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_container: bool,
    pub ocr_status: Option<OcrStatus>,
}

/// Every `.svg` file in `dir`, newest first
pub fn list_svg_files(dir: &Path) -> Result<Vec<SvgListing>> {
    if !dir.is_dir() {
        return Err(crate::error::Error::InvalidPath(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut listings = Vec::new();
    for path in list_files(dir, "svg") {
        let meta = std::fs::metadata(&path)?;
        let modified: DateTime<Utc> = meta.modified()?.into();
        let header = read_header(&path).ok();
        listings.push(SvgListing {
            size: meta.len(),
            modified,
            is_container: header.is_some(),
            ocr_status: header.map(|h| h.header.ocr_status),
            path,
        });
    }
    listings.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::sample_container;
    use crate::container::set_ocr_status;
    use tempfile::TempDir;

    #[test]
    fn test_ocr_candidates() {
        assert!(is_ocr_candidate(OcrStatus::Pending, 0, 3, false));
        assert!(is_ocr_candidate(OcrStatus::Failed, 2, 3, false));
        assert!(!is_ocr_candidate(OcrStatus::Failed, 3, 3, false));
        assert!(is_ocr_candidate(OcrStatus::InProgress, 0, 3, false));
        assert!(!is_ocr_candidate(OcrStatus::InProgress, 0, 3, true));
        assert!(!is_ocr_candidate(OcrStatus::Completed, 0, 3, false));
    }

    #[test]
    fn test_scan_reads_headers_and_skips_others() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        std::fs::write(dir.join("a.svg"), sample_container(1)).unwrap();
        let failed = set_ocr_status(&sample_container(2), OcrStatus::Failed).unwrap();
        std::fs::write(dir.join("b.SVG"), failed).unwrap();
        std::fs::write(dir.join("logo.svg"), "<svg></svg>\n").unwrap();
        std::fs::write(dir.join(".veridock-x.tmp"), sample_container(1)).unwrap();
        std::fs::write(dir.join("notes.txt"), "hi").unwrap();

        let registry = Registry::scan(&[dir.clone(), dir.join("missing")]);
        assert_eq!(registry.len(), 2);
        let b = registry.get(&dir.join("b.SVG")).unwrap();
        assert_eq!(b.ocr_status, OcrStatus::Failed);
        assert_eq!(b.ocr_attempts, 1);

        let counts = registry.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(registry.ocr_backlog(3).len(), 2);
        assert_eq!(registry.ocr_backlog(1).len(), 1);

        let digest = crate::container::digest(crate::container::testing::SAMPLE_PDF);
        assert!(registry.find_by_digest(&digest).is_some());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.svg"), sample_container(1)).unwrap();
        let registry = Registry::scan(&[tmp.path().to_path_buf()]);

        let snapshot = tmp.path().join("state").join("registry.json");
        registry.save(&snapshot).unwrap();
        let loaded = Registry::load(&snapshot).unwrap();
        assert_eq!(loaded.entries, registry.entries);
    }

    #[test]
    fn test_list_svg_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("doc.svg"), sample_container(1)).unwrap();
        std::fs::write(tmp.path().join("plain.svg"), "<svg></svg>\n").unwrap();

        let listings = list_svg_files(tmp.path()).unwrap();
        assert_eq!(listings.len(), 2);
        let doc = listings.iter().find(|l| l.path.ends_with("doc.svg")).unwrap();
        assert!(doc.is_container);
        assert_eq!(doc.ocr_status, Some(OcrStatus::Pending));
        let plain = listings.iter().find(|l| l.path.ends_with("plain.svg")).unwrap();
        assert!(!plain.is_container);

        assert!(list_svg_files(&tmp.path().join("nope")).is_err());
    }
}
