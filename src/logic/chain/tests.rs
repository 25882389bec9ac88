use super::*;
use crate::logic::config::{ChainConfig, SigningKey};
use crate::logic::error::GuardError;
use serde_json::json;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::OpenOptions;
use std::io::Write;
use std::thread;
use tempfile::tempdir;

fn config(path: &Path) -> ChainConfig {
    ChainConfig {
        path: path.to_path_buf(),
        ..ChainConfig::default()
    }
}

fn keyring(cfg: &ChainConfig) -> Keyring {
    Keyring::from_config(cfg)
}

fn append_n(store: &ChainStore, n: usize) {
    for i in 0..n {
        store
            .append(RecordKind::Event, &json!({"n": i, "note": "synthetic"}))
            .unwrap();
    }
}

#[test]
fn test_genesis_and_linking() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();

    let first = store.append(RecordKind::Event, &json!({"n": 0})).unwrap();
    let second = store.append(RecordKind::Event, &json!({"n": 1})).unwrap();

    assert!(first.prev.is_none());
    assert!(first.persisted);
    assert_eq!(second.prev.as_deref(), Some(first.digest.as_str()));
    assert_eq!(store.head(), Some(second.digest.clone()));
    assert_eq!(store.head_prefix(), &second.digest[..16]);

    let records = read_chain(&cfg.path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload["schema_version"], "v1");
    assert_eq!(records[0].payload["hmac"]["key_id"], "dev");
}

#[test]
fn test_concurrent_writers_never_fork() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = Arc::new(ChainStore::open(&cfg).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    store
                        .append(RecordKind::Event, &json!({"thread": t, "n": i}))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let records = read_chain(&cfg.path).unwrap();
    assert_eq!(records.len(), 400);

    let prevs: HashSet<_> = records.iter().map(|r| r.prev.clone()).collect();
    assert_eq!(prevs.len(), 400, "two records share a prev");

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 400));
}

#[test]
fn test_tampered_payload_fails_at_exact_index() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 10);
    drop(store);

    let content = fs::read_to_string(&cfg.path).unwrap();
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    lines[5] = lines[5].replace("\"note\":\"synthetic\"", "\"note\":\"edited\"");
    fs::write(&cfg.path, lines.join("\n") + "\n").unwrap();

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert!(!result.intact);
    assert_eq!(result.as_tuple(), (false, 5));

    let failure = result.failure.unwrap();
    assert_eq!(failure.reason, FailureReason::WrongDigest);
    assert_eq!(failure.line, 6);
}

#[test]
fn test_deleted_record_fails_on_prev() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 6);
    drop(store);

    let content = fs::read_to_string(&cfg.path).unwrap();
    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 3)
        .map(|(_, l)| l)
        .collect();
    fs::write(&cfg.path, kept.join("\n") + "\n").unwrap();

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (false, 3));
    assert!(matches!(
        result.failure.unwrap().reason,
        FailureReason::WrongPrev { .. }
    ));
}

#[test]
fn test_garbage_line_is_bad_json() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 2);
    drop(store);

    let mut content = fs::read_to_string(&cfg.path).unwrap();
    content.push_str("{not json\n");
    fs::write(&cfg.path, content).unwrap();

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (false, 2));
    assert!(matches!(
        result.failure.unwrap().reason,
        FailureReason::BadJson { .. }
    ));
}

#[test]
fn test_wrong_key_fails_at_first_record() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 3);

    let other = Keyring::new("dev", SigningKey::new(b"some-other-key".to_vec()));
    let result = verify_chain(&cfg.path, &other).unwrap();
    assert_eq!(result.as_tuple(), (false, 0));
}

#[test]
fn test_rotation_writes_terminal_and_continuation() {
    let dir = tempdir().unwrap();
    let cfg = ChainConfig {
        max_bytes: 2_000,
        ..config(&dir.path().join("chain.jsonl"))
    };
    let events = Arc::new(crate::logic::events::EventBus::new());
    let memory = Arc::new(crate::logic::events::MemorySubscriber::new());
    events.subscribe(memory.clone());
    let store = ChainStore::open(&cfg).unwrap().with_events(events);

    let mut appended = 0;
    while store.rotations() == 0 && appended < 1_000 {
        store
            .append(RecordKind::Event, &json!({"n": appended, "note": "synthetic"}))
            .unwrap();
        appended += 1;
    }
    assert_eq!(store.rotations(), 1);
    assert_eq!(memory.count("chain_rotated"), 1);

    let archives = archive_files(&cfg.path).unwrap();
    assert_eq!(archives.len(), 1);
    let archive_name = archives[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(archive_name.starts_with("chain.jsonl."));
    assert!(archive_name.ends_with(".rotated"));

    let records = read_chain(&cfg.path).unwrap();
    let terminals: Vec<_> = records.iter().filter(|r| r.kind == RecordKind::Terminal).collect();
    let continuations: Vec<_> = records.iter().filter(|r| r.kind == RecordKind::Continuation).collect();
    assert_eq!(terminals.len(), 1);
    assert_eq!(continuations.len(), 1);

    let terminal: TerminalPayload = terminals[0].payload_as().unwrap();
    let continuation: ContinuationPayload = continuations[0].payload_as().unwrap();
    assert_eq!(continuation.continued_from, terminal.head);
    assert_eq!(continuation.terminal_digest, terminals[0].digest);
    assert_eq!(continuations[0].prev.as_deref(), Some(terminals[0].digest.as_str()));
    assert_eq!(continuation.archived, archive_name);

    // Terminal closes the archive; continuation opens the active file
    let archived = read_chain_file(&archives[0]);
    assert_eq!(archived.last().unwrap().kind, RecordKind::Terminal);
    let active = read_chain_file(&cfg.path);
    assert_eq!(active[0].kind, RecordKind::Continuation);

    // Event records + terminal + continuation
    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, appended + 2));
    assert_eq!(result.files.len(), 2);
}

#[test]
fn test_forged_continuation_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 2);

    // Correctly signed, but no terminal precedes it
    store
        .append(
            RecordKind::Continuation,
            &ContinuationPayload {
                continued_from: store.head(),
                terminal_digest: "0".repeat(64),
                archived: "nowhere".into(),
                opened_at: chrono::Utc::now(),
            },
        )
        .unwrap();

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (false, 2));
    assert!(matches!(
        result.failure.unwrap().reason,
        FailureReason::BrokenRotation { .. }
    ));
}

#[test]
fn test_restart_continues_same_chain() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));

    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 3);
    let head = store.head();
    drop(store);

    let reopened = ChainStore::open(&cfg).unwrap();
    assert_eq!(reopened.head(), head);
    let link = reopened.append(RecordKind::Event, &json!({"after": "restart"})).unwrap();
    assert_eq!(link.prev, head);

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 4));
}

#[test]
fn test_head_recovered_from_newest_archive() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));

    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 3);
    let head = store.head();
    drop(store);

    fs::rename(
        &cfg.path,
        dir.path().join("chain.jsonl.20260101T000000.000000Z.rotated"),
    )
    .unwrap();
    fs::write(&cfg.path, "").unwrap();

    assert_eq!(recover_head(&cfg.path).unwrap(), head);

    let reopened = ChainStore::open(&cfg).unwrap();
    reopened.append(RecordKind::Event, &json!({"n": 3})).unwrap();
    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 4));
}

#[test]
fn test_keyring_verifies_across_key_rotation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chain.jsonl");

    let old_cfg = ChainConfig {
        key: SigningKey::new(b"old-signing-key-0001".to_vec()),
        key_id: "k1".into(),
        ..config(&path)
    };
    let store = ChainStore::open(&old_cfg).unwrap();
    append_n(&store, 2);
    drop(store);

    let mut new_cfg = ChainConfig {
        key: SigningKey::new(b"new-signing-key-0002".to_vec()),
        key_id: "k2".into(),
        ..config(&path)
    };
    let store = ChainStore::open(&new_cfg).unwrap();
    append_n(&store, 2);
    drop(store);

    // Without the old key the first record cannot be checked
    let result = verify_chain(&path, &Keyring::from_config(&new_cfg)).unwrap();
    assert_eq!(result.as_tuple(), (false, 0));
    assert_eq!(
        result.failure.unwrap().reason,
        FailureReason::UnknownKey { key_id: "k1".into() }
    );

    new_cfg
        .keyring
        .insert("k1".into(), SigningKey::new(b"old-signing-key-0001".to_vec()));
    let result = verify_chain(&path, &Keyring::from_config(&new_cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 4));
}

#[test]
fn test_write_failure_keeps_backlog_until_disk_returns() {
    let dir = tempdir().unwrap();
    let cfg = ChainConfig {
        backlog_max: 2,
        ..config(&dir.path().join("chain.jsonl"))
    };
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 2);

    // Make the active path unwritable: a directory stands in its place
    let aside = dir.path().join("chain.hold");
    fs::rename(&cfg.path, &aside).unwrap();
    fs::create_dir(&cfg.path).unwrap();
    store.close_file();

    let a = store.append(RecordKind::Event, &json!({"n": "a"})).unwrap();
    assert!(!a.persisted);
    let b = store.append(RecordKind::Event, &json!({"n": "b"})).unwrap();
    assert!(!b.persisted);
    assert_eq!(b.prev.as_deref(), Some(a.digest.as_str()));
    assert_eq!(store.backlog_len(), 2);
    assert!(store.write_failures() >= 2);

    let appended = store.records_appended();
    let refused = store.append(RecordKind::Event, &json!({"n": "c"}));
    assert!(matches!(refused, Err(GuardError::BacklogFull(2))));
    assert_eq!(store.records_appended(), appended);
    assert_eq!(store.head(), Some(b.digest.clone()));

    fs::remove_dir(&cfg.path).unwrap();
    fs::rename(&aside, &cfg.path).unwrap();

    assert!(store.flush());
    assert_eq!(store.backlog_len(), 0);

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 4));
}

/// Scores and signals shaped like classifier output
fn float_payload(rng: &mut StdRng) -> serde_json::Value {
    let x: f64 = rng.gen_range(-6.0..6.0);
    json!({
        "score": 1.0 / (1.0 + (-x).exp()),
        "signals": [rng.gen::<f64>(), rng.gen::<f64>() * 1.7, rng.gen_range(0.2..1.0)],
        "temperature": rng.gen_range(-1.0..1.0),
    })
}

#[test]
fn test_float_payloads_verify_after_reparse() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..2_000 {
        store.append(RecordKind::Event, &float_payload(&mut rng)).unwrap();
    }

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 2_000));
}

#[test]
fn test_concurrent_writers_across_rotations() {
    let dir = tempdir().unwrap();
    let cfg = ChainConfig {
        max_bytes: 4_000,
        ..config(&dir.path().join("chain.jsonl"))
    };
    let store = Arc::new(ChainStore::open(&cfg).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                for _ in 0..100 {
                    store.append(RecordKind::Event, &float_payload(&mut rng)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let rotations = store.rotations();
    assert!(rotations >= 1);

    let records = read_chain(&cfg.path).unwrap();
    let events = records.iter().filter(|r| r.kind == RecordKind::Event).count();
    assert_eq!(events, 400);
    assert_eq!(records.len() as u64, 400 + 2 * rotations);

    let digests: HashSet<_> = records.iter().map(|r| r.digest.clone()).collect();
    assert_eq!(digests.len(), records.len());

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, records.len()));
    assert_eq!(result.files.len() as u64, rotations + 1);
}

#[test]
fn test_torn_write_is_cut_before_next_record() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let store = ChainStore::open(&cfg).unwrap();
    append_n(&store, 3);

    // An interrupted write left half a record without its newline
    store.close_file();
    let mut file = OpenOptions::new().append(true).open(&cfg.path).unwrap();
    file.write_all(br#"{"kind":"event","digest":"ab"#).unwrap();
    drop(file);

    let link = store.append(RecordKind::Event, &json!({"n": "after"})).unwrap();
    assert!(link.persisted);
    assert_eq!(store.file_size(), fs::metadata(&cfg.path).unwrap().len());

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 4));
}

#[test]
fn test_torn_tail_is_cut_on_restart() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir.path().join("chain.jsonl"));
    let head = {
        let store = ChainStore::open(&cfg).unwrap();
        append_n(&store, 2);
        store.head()
    };

    let mut file = OpenOptions::new().append(true).open(&cfg.path).unwrap();
    file.write_all(br#"{"kind":"ev"#).unwrap();
    drop(file);

    let store = ChainStore::open(&cfg).unwrap();
    assert_eq!(store.head(), head);
    store.append(RecordKind::Event, &json!({"n": 2})).unwrap();

    let result = verify_chain(&cfg.path, &keyring(&cfg)).unwrap();
    assert_eq!(result.as_tuple(), (true, 3));
}

#[test]
fn test_missing_chain_verifies_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.jsonl");
    let result = verify_chain(&path, &keyring(&config(&path))).unwrap();
    assert_eq!(result.as_tuple(), (true, 0));
    assert!(result.files.is_empty());
}

fn read_chain_file(path: &Path) -> Vec<ChainRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| ChainRecord::from_line(l).unwrap())
        .collect()
}
