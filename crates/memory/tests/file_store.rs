use codemend_fingerprint::{FileEntry, ProjectFingerprint};
use codemend_memory::{FileMemoryStore, MemoryError, MemoryRecord, MemoryStore, HISTORY_LIMIT};
use codemend_protocol::{AnalysisReport, FixResult, ProjectId, ReportMeta};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

fn report_for(id: &ProjectId, at: u64) -> AnalysisReport {
    AnalysisReport::new(
        ReportMeta {
            project_id: id.clone(),
            project_root: "/work/demo".to_string(),
            generated_at_unix_ms: at,
            files_analyzed: 3,
            files_skipped: 0,
            partial: false,
        },
        Vec::new(),
        Vec::new(),
    )
}

fn fingerprint(sha: &str) -> ProjectFingerprint {
    let mut fp = ProjectFingerprint::default();
    fp.files.insert(
        "app.py".to_string(),
        FileEntry::Hashed {
            sha256: sha.to_string(),
            size: 10,
            mtime_ms: 0,
        },
    );
    fp
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileMemoryStore::new(temp.path());
    let id = ProjectId::from_raw("demo-1");

    let err = store.load(&id).await.unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));
    assert!(store.load_optional(&id).await.expect("optional").is_none());
    assert!(store.latest_report(&id).await.expect("latest").is_none());
}

#[tokio::test]
async fn record_and_report_survive_a_new_store_instance() {
    let temp = TempDir::new().expect("tempdir");
    let id = ProjectId::from_raw("demo-1");
    let report = report_for(&id, 1_000);
    {
        let store = FileMemoryStore::new(temp.path());
        store.save_report(&report).await.expect("save report");
        let mut record = MemoryRecord::new(id.clone(), "/work/demo");
        record.link_report(&report, fingerprint("abc"));
        store.save(&record).await.expect("save record");
    }

    let store = FileMemoryStore::new(temp.path());
    let loaded = store.load(&id).await.expect("load");
    assert_eq!(loaded.fingerprint, fingerprint("abc"));
    let latest = store.latest_report(&id).await.expect("latest").expect("some");
    assert_eq!(latest, report);
}

#[tokio::test]
async fn reports_are_immutable() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileMemoryStore::new(temp.path());
    let id = ProjectId::from_raw("demo-1");
    let report = report_for(&id, 1_000);

    store.save_report(&report).await.expect("first save");
    let err = store.save_report(&report).await.unwrap_err();
    assert!(matches!(err, MemoryError::Persistence(_)));
}

#[tokio::test]
async fn failed_save_keeps_the_previous_record() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileMemoryStore::new(temp.path());
    let id = ProjectId::from_raw("demo-1");
    let mut record = MemoryRecord::new(id.clone(), "/work/demo");
    record.fingerprint = fingerprint("v1");
    store.save(&record).await.expect("first save");

    // The temp file cannot be created while a directory sits at its path.
    let tmp = temp.path().join("records").join("demo-1.json.tmp");
    std::fs::create_dir_all(tmp.join("blocker")).expect("blocker dir");

    record.fingerprint = fingerprint("v2");
    let err = store.save(&record).await.unwrap_err();
    assert!(matches!(err, MemoryError::Persistence(_)), "got {err:?}");

    let loaded = store.load(&id).await.expect("load after failed save");
    assert_eq!(loaded.fingerprint, fingerprint("v1"));
}

#[tokio::test]
async fn list_is_most_recent_first() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileMemoryStore::new(temp.path());
    for name in ["alpha-1", "beta-2", "gamma-3"] {
        let id = ProjectId::from_raw(name);
        let mut record = MemoryRecord::new(id.clone(), format!("/work/{name}"));
        record.link_report(&report_for(&id, 1_000), fingerprint(name));
        store.save(&record).await.expect("save");
    }
    let beta = ProjectId::from_raw("beta-2");
    store
        .update(
            &beta,
            Box::new(|current: Option<MemoryRecord>| {
                let mut record = current.expect("beta exists");
                record.record_fixes([FixResult::rejected("i", "app.py", "h", None, "no change")]);
                record
            }),
        )
        .await
        .expect("update");

    let summaries = store.list().await.expect("list");
    let ids: Vec<&str> = summaries.iter().map(|s| s.project_id.as_str()).collect();
    assert_eq!(ids[0], "beta-2");
    assert_eq!(ids.len(), 3);
    assert_eq!(summaries[0].fix_attempts, 1);
}

#[tokio::test]
async fn concurrent_updates_do_not_lose_fix_attempts() {
    let temp = TempDir::new().expect("tempdir");
    let store = Arc::new(FileMemoryStore::new(temp.path()));
    let id = ProjectId::from_raw("demo-1");
    store
        .save(&MemoryRecord::new(id.clone(), "/work/demo"))
        .await
        .expect("seed");

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store
                .update(
                    &id,
                    Box::new(move |current: Option<MemoryRecord>| {
                        let mut record = current.expect("seeded");
                        record.record_fixes([FixResult::rejected(
                            format!("issue-{n}"),
                            "app.py",
                            "h",
                            None,
                            "rejected",
                        )]);
                        record
                    }),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("update");
    }

    let record = store.load(&id).await.expect("load");
    assert_eq!(record.fix_attempts.len(), 8);
}

#[tokio::test]
async fn reports_outside_history_are_pruned() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileMemoryStore::new(temp.path());
    let id = ProjectId::from_raw("demo-1");
    let mut record = MemoryRecord::new(id.clone(), "/work/demo");
    let mut first_id = None;

    for n in 0..(HISTORY_LIMIT as u64 + 2) {
        let report = report_for(&id, 1_000 + n);
        first_id.get_or_insert_with(|| report.report_id.clone());
        store.save_report(&report).await.expect("save report");
        record.link_report(&report, fingerprint("abc"));
        store.save(&record).await.expect("save record");
    }

    let first_id = first_id.expect("at least one report");
    let err = store.load_report(&id, &first_id).await.unwrap_err();
    assert!(err.is_not_found());
    let newest = record.history[0].report_id.clone();
    assert!(store.load_report(&id, &newest).await.is_ok());
}
