//! Chain Verifier
//!
//! Stateless replay of a chain across its archives and the active file.
//! Fails closed at the first bad record and never repairs anything.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::constants::ROTATED_SUFFIX;
use super::digest::{constant_time_eq, Keyring};
use super::record::{ChainRecord, ContinuationPayload, RecordKind, TerminalPayload};

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    BadJson { error: String },
    WrongPrev { expected: Option<String>, found: Option<String> },
    WrongDigest,
    UnknownKey { key_id: String },
    /// Continuation not preceded by a matching terminal record
    BrokenRotation { detail: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::BadJson { error } => write!(f, "bad JSON: {}", error),
            FailureReason::WrongPrev { expected, found } => write!(
                f,
                "wrong prev (expected {}, found {})",
                expected.as_deref().unwrap_or("null"),
                found.as_deref().unwrap_or("null")
            ),
            FailureReason::WrongDigest => write!(f, "wrong digest"),
            FailureReason::UnknownKey { key_id } => write!(f, "unknown key id '{}'", key_id),
            FailureReason::BrokenRotation { detail } => write!(f, "broken rotation: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyFailure {
    /// Zero-based index in the logical (rotation-spanning) sequence
    pub index: usize,
    pub file: PathBuf,
    /// One-based line in `file`
    pub line: usize,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainVerification {
    pub intact: bool,
    /// Records that verified before the first failure (all of them when intact)
    pub records: usize,
    pub files: Vec<PathBuf>,
    pub failure: Option<VerifyFailure>,
}

impl ChainVerification {
    /// `(ok, count)` on success, `(false, failing index)` otherwise
    pub fn as_tuple(&self) -> (bool, usize) {
        match &self.failure {
            Some(f) => (false, f.index),
            None => (true, self.records),
        }
    }
}

// ============================================================================
// FILE DISCOVERY
// ============================================================================

/// `<active>.<timestamp>.rotated` files next to `active`, oldest first
pub fn archive_files(active: &Path) -> io::Result<Vec<PathBuf>> {
    let name = match active.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => return Ok(Vec::new()),
    };
    let dir = match active.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let prefix = format!("{}.", name);
    let suffix = format!(".{}", ROTATED_SUFFIX);

    let mut archives: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let file_name = entry.file_name().to_string_lossy().to_string();
            file_name.starts_with(&prefix) && file_name.ends_with(&suffix)
        })
        .map(|entry| entry.path())
        .collect();

    archives.sort();
    Ok(archives)
}

/// Archives in rotation order, then the active file (if present)
pub fn chain_files(active: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = archive_files(active)?;
    if active.exists() {
        files.push(active.to_path_buf());
    }
    Ok(files)
}

/// Parsed records of every chain file, in order. Stops at the first
/// unparsable line.
pub fn read_chain(active: &Path) -> io::Result<Vec<ChainRecord>> {
    let mut records = Vec::new();
    for file in chain_files(active)? {
        let content = fs::read_to_string(&file)?;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match ChainRecord::from_line(line) {
                Ok(r) => records.push(r),
                Err(_) => return Ok(records),
            }
        }
    }
    Ok(records)
}

// ============================================================================
// VERIFY
// ============================================================================

/// Replay the chain rooted at `active`. `Err` only for I/O problems;
/// integrity problems are reported in the returned value.
pub fn verify_chain(active: &Path, keyring: &Keyring) -> io::Result<ChainVerification> {
    let files = chain_files(active)?;

    let mut index = 0usize;
    let mut expected_prev: Option<String> = None;
    let mut last_terminal: Option<(String, Option<String>)> = None;

    for file in &files {
        let content = fs::read_to_string(file)?;

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fail = |reason: FailureReason| VerifyFailure {
                index,
                file: file.clone(),
                line: line_no + 1,
                reason,
            };

            let record = match ChainRecord::from_line(line) {
                Ok(r) => r,
                Err(e) => {
                    return Ok(failed(files.clone(), index, fail(FailureReason::BadJson { error: e.to_string() })));
                }
            };

            if record.prev != expected_prev {
                let reason = FailureReason::WrongPrev {
                    expected: expected_prev.clone(),
                    found: record.prev.clone(),
                };
                return Ok(failed(files.clone(), index, fail(reason)));
            }

            let matches = keyring
                .digest_for(record.prev.as_deref(), &record.payload)
                .map(|recomputed| constant_time_eq(&recomputed, &record.digest))
                .unwrap_or(false);
            if !matches {
                let reason = match keyring.unknown_key_id(&record.payload) {
                    Some(id) => FailureReason::UnknownKey { key_id: id.to_string() },
                    None => FailureReason::WrongDigest,
                };
                return Ok(failed(files.clone(), index, fail(reason)));
            }

            if let Err(detail) = check_rotation(&record, last_terminal.as_ref()) {
                return Ok(failed(files.clone(), index, fail(FailureReason::BrokenRotation { detail })));
            }

            last_terminal = match record.kind {
                RecordKind::Terminal => {
                    let head = record
                        .payload_as::<TerminalPayload>()
                        .ok()
                        .and_then(|t| t.head);
                    Some((record.digest.clone(), head))
                }
                _ => None,
            };

            expected_prev = Some(record.digest);
            index += 1;
        }
    }

    Ok(ChainVerification {
        intact: true,
        records: index,
        files,
        failure: None,
    })
}

fn failed(files: Vec<PathBuf>, records: usize, failure: VerifyFailure) -> ChainVerification {
    ChainVerification {
        intact: false,
        records,
        files,
        failure: Some(failure),
    }
}

/// A continuation must directly follow its terminal and carry the
/// terminal's head as `continued_from`
fn check_rotation(record: &ChainRecord, last_terminal: Option<&(String, Option<String>)>) -> Result<(), String> {
    if record.kind != RecordKind::Continuation {
        return Ok(());
    }
    let (terminal_digest, terminal_head) = last_terminal
        .ok_or_else(|| "continuation without preceding terminal".to_string())?;

    let continuation: ContinuationPayload = record
        .payload_as()
        .map_err(|e| format!("bad continuation payload: {}", e))?;

    if &continuation.terminal_digest != terminal_digest {
        return Err("continuation names a different terminal".to_string());
    }
    if &continuation.continued_from != terminal_head {
        return Err("continued_from differs from terminal head".to_string());
    }
    Ok(())
}
