//! Keyed Chain Store
//!
//! Append-only JSONL writer for signed records. Thread-safe: the head
//! pointer, the rotation check and the file write all happen under one
//! lock, so no two records can share a `prev`.
//!
//! Records that were digested but could not reach the disk stay in an
//! in-memory backlog and are written (in order) before anything newer.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::constants::{HEAD_PREFIX_LEN, ROTATED_SUFFIX};
use crate::logic::config::ChainConfig;
use crate::logic::error::{GuardError, GuardResult};
use crate::logic::events::{EventBus, GuardEvent};
use super::digest::ChainSigner;
use super::record::{ChainLink, ChainRecord, ContinuationPayload, RecordKind, TerminalPayload};
use super::verify::archive_files;

/// Pause between rotation attempts after a failed one
const ROTATION_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// STATE
// ============================================================================

struct StoreInner {
    file: Option<File>,
    size: u64,
    head: Option<String>,
    backlog: VecDeque<String>,
    rotation_backoff_until: Option<Instant>,
}

// ============================================================================
// STORE
// ============================================================================

pub struct ChainStore {
    path: PathBuf,
    max_bytes: u64,
    fsync: bool,
    backlog_max: usize,
    signer: ChainSigner,
    inner: Mutex<StoreInner>,
    events: Option<Arc<EventBus>>,
    appended: AtomicU64,
    write_failures: AtomicU64,
    rotations: AtomicU64,
}

impl ChainStore {
    /// Open (or create) the active chain file and recover its head
    pub fn open(config: &ChainConfig) -> GuardResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = open_append(&config.path)?;
        let size = trim_torn_tail(&mut file, &config.path)?;
        let head = recover_head(&config.path)?;

        if let Some(h) = &head {
            log::info!("Chain resumed at {:?}, head {}", config.path, prefix(h));
        } else {
            log::info!("Chain started at {:?}", config.path);
        }

        Ok(Self {
            path: config.path.clone(),
            max_bytes: config.max_bytes,
            fsync: config.fsync,
            backlog_max: config.backlog_max,
            signer: ChainSigner::new(config.key.clone(), config.key_id.clone()),
            inner: Mutex::new(StoreInner {
                file: Some(file),
                size,
                head,
                backlog: VecDeque::new(),
                rotation_backoff_until: None,
            }),
            events: None,
            appended: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
        })
    }

    /// Route rotation / write-failure notices to an event bus
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Append one record and return its position in the chain.
    ///
    /// `Err` means nothing was digested. `Ok` with `persisted == false`
    /// means the record is chained but still waiting in the backlog.
    pub fn append<P: Serialize>(&self, kind: RecordKind, payload: &P) -> GuardResult<ChainLink> {
        let value = serde_json::to_value(payload)?;
        let mut inner = self.inner.lock();

        self.drain_backlog(&mut inner);
        if inner.backlog.len() >= self.backlog_max {
            return Err(GuardError::BacklogFull(inner.backlog.len()));
        }

        if self.rotation_due(&inner) {
            if let Err(e) = self.rotate(&mut inner) {
                log::error!("Chain rotation failed: {}", e);
                inner.rotation_backoff_until = Some(Instant::now() + ROTATION_BACKOFF);
                self.emit(GuardEvent::ChainWriteFailed { error: format!("rotation: {}", e) });
            }
        }

        self.append_locked(&mut inner, kind, value)
    }

    /// Retry writing the backlog. `true` when nothing is left.
    pub fn flush(&self) -> bool {
        let mut inner = self.inner.lock();
        self.drain_backlog(&mut inner)
    }

    pub fn head(&self) -> Option<String> {
        self.inner.lock().head.clone()
    }

    /// First characters of the head digest ("" before the first record)
    pub fn head_prefix(&self) -> String {
        self.head().map(|h| prefix(&h).to_string()).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_id(&self) -> &str {
        self.signer.key_id()
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }

    /// Bytes in the active file
    pub fn file_size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Records appended by this process
    pub fn records_appended(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::SeqCst)
    }

    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Drop the open handle; the next write reopens the path
    #[cfg(test)]
    pub(crate) fn close_file(&self) {
        self.inner.lock().file = None;
    }

    // ------------------------------------------------------------------------
    // Internals (caller holds the lock)
    // ------------------------------------------------------------------------

    fn append_locked(&self, inner: &mut StoreInner, kind: RecordKind, value: Value) -> GuardResult<ChainLink> {
        let payload = self.signer.stamp(value);
        let prev = inner.head.clone();
        let digest = self.signer.digest(prev.as_deref(), &payload)?;

        let line = ChainRecord {
            kind,
            digest: digest.clone(),
            prev: prev.clone(),
            payload,
        }
        .to_line()?;

        inner.head = Some(digest.clone());
        inner.backlog.push_back(line);
        self.appended.fetch_add(1, Ordering::SeqCst);

        let persisted = self.drain_backlog(inner);
        Ok(ChainLink { digest, prev, persisted })
    }

    fn drain_backlog(&self, inner: &mut StoreInner) -> bool {
        while let Some(line) = inner.backlog.front().cloned() {
            match self.write_line(inner, &line) {
                Ok(written) => {
                    inner.size += written;
                    inner.backlog.pop_front();
                }
                Err(e) => {
                    self.write_failures.fetch_add(1, Ordering::SeqCst);
                    // Reopen on the next attempt
                    inner.file = None;
                    log::error!(
                        "Chain write failed ({} record(s) waiting): {}",
                        inner.backlog.len(),
                        e
                    );
                    self.emit(GuardEvent::ChainWriteFailed { error: e.to_string() });
                    return false;
                }
            }
        }
        true
    }

    /// Write one line. A failed write is cut back to the previous length so
    /// no fragment sits in front of the retried record.
    fn write_line(&self, inner: &mut StoreInner, line: &str) -> io::Result<u64> {
        if inner.file.is_none() {
            let mut file = open_append(&self.path)?;
            inner.size = trim_torn_tail(&mut file, &self.path)?;
            inner.file = Some(file);
        }
        let start = inner.size;
        let file = inner
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "chain file not open"))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let written = file.write_all(&buf).and_then(|_| file.flush());
        if let Err(e) = written {
            if let Err(trunc) = file.set_len(start) {
                log::error!("Cannot cut partial chain write at {} bytes: {}", start, trunc);
            }
            return Err(e);
        }

        if self.fsync {
            file.sync_data()?;
        }
        Ok(buf.len() as u64)
    }

    fn rotation_due(&self, inner: &StoreInner) -> bool {
        if inner.size <= self.max_bytes || !inner.backlog.is_empty() {
            return false;
        }
        match inner.rotation_backoff_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// terminal -> rename -> fresh file -> continuation, all under the lock
    fn rotate(&self, inner: &mut StoreInner) -> GuardResult<()> {
        let pre_head = inner.head.clone();

        let terminal = TerminalPayload {
            reason: "max_size".to_string(),
            head: pre_head.clone(),
            file_bytes: inner.size,
            max_bytes: self.max_bytes,
            closed_at: Utc::now(),
        };
        let terminal_link = self.append_locked(inner, RecordKind::Terminal, serde_json::to_value(&terminal)?)?;
        if !terminal_link.persisted {
            return Err(GuardError::ChainIo(io::Error::new(
                io::ErrorKind::Other,
                "terminal record not persisted",
            )));
        }

        // Close before renaming
        inner.file = None;
        let archived = archive_path(&self.path);
        fs::rename(&self.path, &archived)?;
        inner.size = 0;
        inner.rotation_backoff_until = None;
        self.rotations.fetch_add(1, Ordering::SeqCst);

        let archived_name = archived
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let continuation = ContinuationPayload {
            continued_from: pre_head.clone(),
            terminal_digest: terminal_link.digest,
            archived: archived_name.clone(),
            opened_at: Utc::now(),
        };
        self.append_locked(inner, RecordKind::Continuation, serde_json::to_value(&continuation)?)?;

        log::info!("Rotated chain: {:?} -> {}", self.path, archived_name);
        self.emit(GuardEvent::ChainRotated {
            archived: archived_name,
            continued_from: pre_head.unwrap_or_default(),
        });
        Ok(())
    }

    fn emit(&self, event: GuardEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).create(true).append(true).open(path)
}

/// Cut a last line that never got its newline (interrupted write or crash).
/// Returns the file length afterwards.
fn trim_torn_tail(file: &mut File, path: &Path) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut buf = [0u8; 4096];
    let mut end = len;
    loop {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if end == len && chunk.last() == Some(&b'\n') {
            return Ok(len);
        }
        let keep = match chunk.iter().rposition(|b| *b == b'\n') {
            Some(pos) => start + pos as u64 + 1,
            None if start == 0 => 0,
            None => {
                end = start;
                continue;
            }
        };

        file.set_len(keep)?;
        log::warn!("Dropped {} byte(s) of torn record at the end of {:?}", len - keep, path);
        return Ok(keep);
    }
}

fn prefix(digest: &str) -> &str {
    digest.get(..HEAD_PREFIX_LEN).unwrap_or(digest)
}

/// `<active>.<timestamp>.rotated`; the timestamp sorts lexicographically
fn archive_path(active: &Path) -> PathBuf {
    let name = active
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "chain.jsonl".to_string());

    loop {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let candidate = active.with_file_name(format!("{}.{}.{}", name, stamp, ROTATED_SUFFIX));
        if !candidate.exists() {
            return candidate;
        }
        std::thread::sleep(Duration::from_micros(10));
    }
}

/// Head digest to resume from: last record of the active file, or of the
/// newest archive when the active file is empty or missing
pub fn recover_head(active: &Path) -> io::Result<Option<String>> {
    if let Some(digest) = last_digest(active)? {
        return Ok(Some(digest));
    }
    for archive in archive_files(active)?.iter().rev() {
        if let Some(digest) = last_digest(archive)? {
            return Ok(Some(digest));
        }
    }
    Ok(None)
}

fn last_digest(path: &Path) -> io::Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .find_map(|l| ChainRecord::from_line(l).ok())
        .map(|r| r.digest))
}
