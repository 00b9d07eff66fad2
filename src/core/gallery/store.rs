//! The gallery store: memory and disk kept in step.

use super::naming::{is_recognized_image, parse_capture_file_name};
use super::{CaptureId, CaptureRecord, LoadReport};
use crate::core::frame::Frame;
use crate::error::{GalleryError, PersistenceError};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Default)]
struct GalleryInner {
    records: Vec<CaptureRecord>,
    /// Ids whose files are being written right now
    reserved: HashSet<CaptureId>,
}

impl GalleryInner {
    fn contains(&self, id: &CaptureId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }

    /// Highest id recorded or being written; records are kept sorted
    fn newest(&self) -> Option<CaptureId> {
        self.records.last().map(|r| r.id).into_iter().chain(self.reserved.iter().copied()).max()
    }
}

/// Owner of every capture record
#[derive(Debug)]
pub struct GalleryStore {
    directory: PathBuf,
    jpeg_quality: u8,
    inner: Mutex<GalleryInner>,
}

impl GalleryStore {
    /// Open a gallery rooted at `directory`, creating it if needed.
    ///
    /// The store starts empty; call [`GalleryStore::load_existing`] to pick up
    /// captures from earlier sessions.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| PersistenceError::DirectoryUnavailable {
            path: directory.clone(),
            source,
        })?;

        Ok(Self {
            directory,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            inner: Mutex::new(GalleryInner::default()),
        })
    }

    /// Set the JPEG quality (1-100) used for new captures
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write `frame` as a new capture taken at `now`.
    ///
    /// On any failure no record is added. An id that is already in the
    /// gallery, being written, or present on disk yields
    /// `PersistenceError::IdCollision`. Records only ever grow in id order, so
    /// an id older than the newest one (the wall clock stepped back) yields
    /// `PersistenceError::OutOfOrder`.
    pub fn persist(&self, frame: &Frame, now: DateTime<Local>) -> Result<CaptureRecord, PersistenceError> {
        let id = CaptureId::from_datetime(&now);
        self.reserve(id)?;

        let written = self.write_capture(id, frame);

        let mut inner = self.lock();
        inner.reserved.remove(&id);
        let path = written?;

        let record = CaptureRecord {
            id,
            path,
            created_at: now,
        };
        inner.records.push(record.clone());
        drop(inner);

        info!(id = %id, path = %record.path.display(), "capture saved");
        Ok(record)
    }

    /// Snapshot of every record in capture order
    pub fn list(&self) -> Vec<CaptureRecord> {
        self.lock().records.clone()
    }

    pub fn get(&self, id: &CaptureId) -> Option<CaptureRecord> {
        self.lock().records.iter().find(|r| &r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a capture from memory and disk.
    ///
    /// A file that is already gone is fine. An unknown id is
    /// `GalleryError::NotFound`. If the file exists but cannot be removed the
    /// record is put back and the error returned.
    pub fn delete(&self, id: &CaptureId) -> Result<CaptureRecord, GalleryError> {
        let (index, record) = {
            let mut inner = self.lock();
            let index = inner
                .records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| GalleryError::NotFound { id: id.to_string() })?;
            (index, inner.records.remove(index))
        };

        match fs::remove_file(&record.path) {
            Ok(()) => {
                info!(id = %id, "capture deleted");
                Ok(record)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(id = %id, "capture file was already gone");
                Ok(record)
            }
            Err(source) => {
                let path = record.path.clone();
                let mut inner = self.lock();
                let index = index.min(inner.records.len());
                inner.records.insert(index, record);
                Err(GalleryError::RemoveFailed { path, source })
            }
        }
    }

    /// Rebuild records from the capture directory.
    ///
    /// Image files whose names do not parse, or that repeat an id already
    /// seen, are skipped and reported. Non-image files are ignored.
    pub fn load_existing(&self) -> Result<LoadReport, GalleryError> {
        fs::create_dir_all(&self.directory).map_err(|e| GalleryError::ReadDirectory {
            path: self.directory.clone(),
            reason: e.to_string(),
        })?;

        let mut paths = Vec::new();
        let mut report = LoadReport::default();
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_recognized_image(entry.path()) => {
                    paths.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "unreadable gallery entry");
                    if let Some(path) = e.path() {
                        report.skipped.push(path.to_path_buf());
                    }
                }
            }
        }
        paths.sort();

        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for path in paths {
            let parsed = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_capture_file_name)
                .and_then(|id| id.local_datetime().map(|created_at| (id, created_at)));

            match parsed {
                Some((id, created_at)) if seen.insert(id) => found.push(CaptureRecord { id, path, created_at }),
                Some((id, _)) => {
                    warn!(id = %id, path = %path.display(), "duplicate capture id on disk, skipped");
                    report.skipped.push(path);
                }
                None => {
                    warn!(path = %path.display(), "unrecognised capture file name, skipped");
                    report.skipped.push(path);
                }
            }
        }

        let mut inner = self.lock();
        for record in found {
            if !inner.contains(&record.id) {
                inner.records.push(record);
                report.loaded += 1;
            }
        }
        inner.records.sort_by_key(|r| r.id);
        drop(inner);

        info!(loaded = report.loaded, skipped = report.skipped.len(), "gallery loaded");
        Ok(report)
    }

    fn reserve(&self, id: CaptureId) -> Result<(), PersistenceError> {
        let mut inner = self.lock();
        if inner.contains(&id) || inner.reserved.contains(&id) {
            warn!(id = %id, "capture id already taken");
            return Err(PersistenceError::IdCollision { id: id.to_string() });
        }
        if let Some(newest) = inner.newest().filter(|newest| id < *newest) {
            warn!(id = %id, newest = %newest, "capture id older than the newest capture");
            return Err(PersistenceError::OutOfOrder {
                id: id.to_string(),
                newest: newest.to_string(),
            });
        }
        inner.reserved.insert(id);
        Ok(())
    }

    fn write_capture(&self, id: CaptureId, frame: &Frame) -> Result<PathBuf, PersistenceError> {
        let path = self.directory.join(id.file_name());
        let bytes = encode_jpeg(frame, self.jpeg_quality).map_err(|e| PersistenceError::Encode {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        let unavailable = |source| PersistenceError::DirectoryUnavailable {
            path: self.directory.clone(),
            source,
        };
        fs::create_dir_all(&self.directory).map_err(unavailable)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".capture-")
            .suffix(".part")
            .tempfile_in(&self.directory)
            .map_err(unavailable)?;

        staged.write_all(&bytes).map_err(|source| PersistenceError::Write {
            path: staged.path().to_path_buf(),
            source,
        })?;

        staged.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                PersistenceError::IdCollision { id: id.to_string() }
            } else {
                PersistenceError::Write {
                    path: path.clone(),
                    source: e.error,
                }
            }
        })?;

        Ok(path)
    }

    fn lock(&self) -> MutexGuard<'_, GalleryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> image::ImageResult<Vec<u8>> {
    if frame.is_empty() {
        return Err(image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        )));
    }
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    frame.as_image().write_with_encoder(encoder)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn frame() -> Frame {
        Frame::filled(32, 24, [200, 120, 40])
    }

    #[test]
    fn persist_writes_file_and_record() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();

        let record = gallery.persist(&frame(), t(0)).unwrap();

        assert_eq!(record.id.to_string(), "20240501_120000");
        assert_eq!(record.path, dir.path().join("face_20240501_120000.jpg"));
        assert!(record.path.exists());
        assert_eq!(gallery.list(), vec![record]);
    }

    #[test]
    fn persisted_file_is_a_jpeg() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        let record = gallery.persist(&frame(), t(0)).unwrap();

        let decoded = image::open(&record.path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn same_second_is_a_collision() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();

        gallery.persist(&frame(), t(0)).unwrap();
        let again = gallery.persist(&frame(), t(0) + chrono::Duration::milliseconds(400));

        assert!(matches!(again, Err(PersistenceError::IdCollision { .. })));
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("face_20240501_120000.jpg");
        fs::write(&target, b"older capture").unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();

        let result = gallery.persist(&frame(), t(0));

        assert!(matches!(result, Err(PersistenceError::IdCollision { .. })));
        assert_eq!(fs::read(&target).unwrap(), b"older capture");
        assert!(gallery.is_empty());
    }

    #[test]
    fn encode_failure_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();

        let result = gallery.persist(&Frame::filled(0, 0, [0, 0, 0]), t(0));

        assert!(matches!(result, Err(PersistenceError::Encode { .. })));
        assert!(gallery.is_empty());
        // the id is free again
        assert!(gallery.persist(&frame(), t(0)).is_ok());
    }

    #[test]
    fn no_partial_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        gallery.persist(&frame(), t(0)).unwrap();
        let _ = gallery.persist(&frame(), t(0));

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["face_20240501_120000.jpg".to_string()]);
    }

    #[test]
    fn delete_removes_record_and_file() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        let record = gallery.persist(&frame(), t(0)).unwrap();

        gallery.delete(&record.id).unwrap();

        assert!(gallery.is_empty());
        assert!(!record.path.exists());
        assert!(matches!(gallery.delete(&record.id), Err(GalleryError::NotFound { .. })));
    }

    #[test]
    fn delete_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        let record = gallery.persist(&frame(), t(0)).unwrap();
        fs::remove_file(&record.path).unwrap();

        assert!(gallery.delete(&record.id).is_ok());
        assert!(gallery.is_empty());
    }

    #[test]
    fn load_existing_round_trips_ids() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        for secs in [0, 3, 7] {
            gallery.persist(&frame(), t(secs)).unwrap();
        }
        let original: Vec<_> = gallery.list().into_iter().map(|r| r.id).collect();

        let fresh = GalleryStore::open(dir.path()).unwrap();
        let report = fresh.load_existing().unwrap();

        assert_eq!(report.loaded, 3);
        assert!(report.skipped.is_empty());
        let reloaded: Vec<_> = fresh.list().into_iter().map(|r| r.id).collect();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn clock_stepping_back_is_rejected() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        gallery.persist(&frame(), t(10)).unwrap();

        let result = gallery.persist(&frame(), t(5));

        assert!(matches!(result, Err(PersistenceError::OutOfOrder { .. })));
        assert!(!dir.path().join("face_20240501_120005.jpg").exists());
        let ids: Vec<String> = gallery.list().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["20240501_120010".to_string()]);
    }

    #[test]
    fn list_stays_in_id_order_and_matches_reload() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        for secs in [0, 10, 5, 20, 15, 30] {
            let _ = gallery.persist(&frame(), t(secs));
        }
        let ids: Vec<_> = gallery.list().into_iter().map(|r| r.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(ids.len(), 4);

        let fresh = GalleryStore::open(dir.path()).unwrap();
        fresh.load_existing().unwrap();
        let reloaded: Vec<_> = fresh.list().into_iter().map(|r| r.id).collect();
        assert_eq!(reloaded, ids);
    }

    #[test]
    fn older_id_is_allowed_once_newer_capture_is_deleted() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        gallery.persist(&frame(), t(0)).unwrap();
        let newest = gallery.persist(&frame(), t(10)).unwrap();
        gallery.delete(&newest.id).unwrap();

        assert!(gallery.persist(&frame(), t(5)).is_ok());
        assert_eq!(gallery.len(), 2);
    }

    #[test]
    fn load_existing_skips_unparseable_names() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("holiday.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("face_20240501_120000.png"), b"x").unwrap();
        fs::write(dir.path().join("face_20240501_120000.jpg"), b"x").unwrap();

        let gallery = GalleryStore::open(dir.path()).unwrap();
        let report = gallery.load_existing().unwrap();

        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.contains(&dir.path().join("holiday.jpg")));
        assert_eq!(gallery.list()[0].path, dir.path().join("face_20240501_120000.jpg"));
    }

    #[test]
    fn load_existing_does_not_duplicate_known_records() {
        let dir = TempDir::new().unwrap();
        let gallery = GalleryStore::open(dir.path()).unwrap();
        gallery.persist(&frame(), t(0)).unwrap();

        let report = gallery.load_existing().unwrap();

        assert_eq!(report.loaded, 0);
        assert_eq!(gallery.len(), 1);
    }
}
