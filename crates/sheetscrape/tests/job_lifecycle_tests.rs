//! End-to-end job runs: creation, validation, completion and failure.

mod common;

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use common::harness::{
    read_output, wait_for_status, wait_until, FailingExtractor, GateExtractor,
    PanickingExtractor, SlowExtractor,
};
use common::{long_workbook, raw_workbook, report_expected_output, report_workbook, TestHarness};
use sheetscrape::{JobError, JobEvent, JobStatus};

#[test]
fn test_report_selected_sheets_complete() {
    let harness = TestHarness::new();
    let manager = harness.open();
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let id = manager.create_job("report.xlsx", &[0, 2]).unwrap();
    let job = wait_for_status(&manager, &id, JobStatus::Completed);

    assert_eq!(job.progress.sheets_processed, 2);
    assert_eq!(job.progress.rows_processed, 7);
    assert_eq!(job.progress.emails_found, 6);
    assert!(job.error.is_none());

    let output = job.output_filename.clone().expect("completed job has an output");
    assert!(output.starts_with("report_emails_"));
    assert!(output.ends_with(".xlsx"));
    assert_eq!(read_output(&manager, &output), report_expected_output());

    assert_eq!(
        harness.status_trail(&id),
        vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
    );
}

#[test]
fn test_created_job_is_pending_while_workers_are_busy() {
    let mut harness = TestHarness::new();
    harness.config.worker_count = 1;
    let gate = Arc::new(GateExtractor::new());
    let manager = harness.open_with(gate.clone());
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let first = manager.create_job("report.xlsx", &[0]).unwrap();
    gate.wait_entered();

    let second = manager.create_job("report.xlsx", &[1]).unwrap();
    let job = manager.get_job(&second).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.selected_sheets, vec![1]);
    assert_eq!(job.source_filename, "report.xlsx");

    gate.open();
    wait_for_status(&manager, &first, JobStatus::Completed);
    wait_for_status(&manager, &second, JobStatus::Completed);
}

#[test]
fn test_out_of_range_sheet_is_rejected_without_a_record() {
    let harness = TestHarness::new();
    let manager = harness.open();
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let err = manager.create_job("report.xlsx", &[0, 5]).unwrap_err();
    assert!(matches!(err, JobError::InvalidInput(_)), "got {:?}", err);
    assert!(manager.list_jobs().is_empty());
    assert!(harness
        .events
        .events()
        .iter()
        .all(|e| !matches!(e, JobEvent::JobCreated(_))));
}

#[test]
fn test_create_job_validation() {
    let harness = TestHarness::new();
    let manager = harness.open();
    harness.upload(&manager, "report.xlsx", &report_workbook());

    assert!(matches!(
        manager.create_job("missing.xlsx", &[0]),
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        manager.create_job("report.xlsx", &[]),
        Err(JobError::InvalidInput(_))
    ));
    assert!(matches!(
        manager.create_job("report.xlsx", &[1, 1]),
        Err(JobError::InvalidInput(_))
    ));

    manager.upload_file("broken.xlsx", b"not a zip archive").unwrap();
    assert!(matches!(
        manager.create_job("broken.xlsx", &[0]),
        Err(JobError::Corrupt(_))
    ));

    assert!(manager.list_jobs().is_empty());
}

#[test]
fn test_upload_rejects_unaccepted_names() {
    let harness = TestHarness::new();
    let manager = harness.open();

    for name in ["notes.txt", "../escape.xlsx", "", ".tmp-upload.xlsx"] {
        let err = manager.upload_file(name, b"x").unwrap_err();
        assert!(
            matches!(err, JobError::InvalidInput(_)),
            "{:?} gave {:?}",
            name,
            err
        );
    }
    assert!(manager.list_uploaded().unwrap().is_empty());
}

#[test]
fn test_extraction_failure_fails_the_job() {
    let harness = TestHarness::new();
    let manager = harness.open_with(Arc::new(FailingExtractor::new(2, 1)));
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let id = manager.create_job("report.xlsx", &[0, 2]).unwrap();
    let job = wait_for_status(&manager, &id, JobStatus::Failed);

    let error = job.error.expect("failed job carries a diagnostic");
    assert!(error.contains("Vendors"), "{}", error);
    assert!(error.contains("cell value could not be decoded"), "{}", error);
    assert!(job.output_filename.is_none());
    assert_eq!(job.progress.sheets_processed, 1);
    assert!(manager.list_output().unwrap().is_empty());
}

#[test]
fn test_hostile_sheet_xml_fails_the_job() {
    let cases = [
        (
            "wide.xlsx",
            r#"<worksheet><sheetData><row r="1"><c r="ZZZZZZZZZZZZZZZZ1" t="inlineStr"><is><t>x@example.com</t></is></c></row></sheetData></worksheet>"#,
            "bad cell reference",
        ),
        (
            "past_xfd.xlsx",
            r#"<worksheet><sheetData><row r="1"><c r="XFE1"><v>1</v></c></row></sheetData></worksheet>"#,
            "bad cell reference",
        ),
        (
            "tall.xlsx",
            r#"<worksheet><sheetData><row r="99999999999"><c r="A1"><v>1</v></c></row></sheetData></worksheet>"#,
            "out of range",
        ),
        (
            "broken.xlsx",
            r#"<worksheet><sheetData><row><c><v>1</c></row>"#,
            "Malformed workbook XML",
        ),
    ];

    let harness = TestHarness::new();
    let manager = harness.open();
    for (name, sheet_xml, expected) in cases {
        manager.upload_file(name, &raw_workbook(sheet_xml)).unwrap();
        let id = manager.create_job(name, &[0]).unwrap();
        let job = wait_for_status(&manager, &id, JobStatus::Failed);

        let error = job.error.expect("failed job carries a diagnostic");
        assert!(error.contains("Corrupt spreadsheet"), "{}: {}", name, error);
        assert!(error.contains(expected), "{}: {}", name, error);
        assert!(job.output_filename.is_none());
        manager.delete_job(&id).unwrap();
    }
    assert!(manager.list_output().unwrap().is_empty());
}

#[test]
fn test_truncated_upload_mid_run_fails_the_job() {
    let harness = TestHarness::new();
    let gate = Arc::new(GateExtractor::new());
    let manager = harness.open_with(gate.clone());
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let id = manager.create_job("report.xlsx", &[0, 2]).unwrap();
    gate.wait_entered();

    // Cut the archive under the open workbook; later sheets can no longer be read.
    let path = harness.config.uploads_dir().join("report.xlsx");
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(30).unwrap();
    drop(file);
    gate.open();

    let job = wait_for_status(&manager, &id, JobStatus::Failed);
    let error = job.error.expect("failed job carries a diagnostic");
    assert!(error.contains("Corrupt spreadsheet"), "{}", error);
    assert!(job.output_filename.is_none());
    manager.delete_job(&id).unwrap();
}

#[test]
fn test_panicking_extractor_fails_the_job_and_keeps_the_worker() {
    let mut harness = TestHarness::new();
    harness.config.worker_count = 1;
    let manager = harness.open_with(Arc::new(PanickingExtractor::new(0, 1)));
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let id = manager.create_job("report.xlsx", &[0, 2]).unwrap();
    let job = wait_for_status(&manager, &id, JobStatus::Failed);

    let error = job.error.expect("failed job carries a diagnostic");
    assert!(error.contains("worker panicked"), "{}", error);
    assert!(error.contains("extractor tripped over row 1"), "{}", error);
    assert!(job.output_filename.is_none());
    manager.delete_job(&id).unwrap();

    // The only worker is still serving the queue.
    let next = manager.create_job("report.xlsx", &[2]).unwrap();
    let job = wait_for_status(&manager, &next, JobStatus::Completed);
    assert!(job.output_filename.is_some());
}

#[test]
fn test_deleting_the_upload_mid_run_fails_the_job() {
    let harness = TestHarness::new();
    let manager = harness.open_with(Arc::new(SlowExtractor::new(Duration::from_millis(5))));
    harness.upload(&manager, "long.xlsx", &long_workbook(200));

    let id = manager.create_job("long.xlsx", &[0, 1]).unwrap();
    wait_until(&manager, &id, "first rows", |r| r.progress.rows_processed >= 3);

    manager.delete_uploaded("long.xlsx").unwrap();
    let job = wait_for_status(&manager, &id, JobStatus::Failed);
    assert!(job.error.unwrap().contains("long.xlsx"));
    assert!(job.output_filename.is_none());
}

#[test]
fn test_jobs_are_listed_in_creation_order() {
    let harness = TestHarness::new();
    let manager = harness.open();
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let ids: Vec<String> = (0..3)
        .map(|i| manager.create_job("report.xlsx", &[i]).unwrap())
        .collect();
    let listed: Vec<String> = manager.list_jobs().into_iter().map(|j| j.id).collect();
    assert_eq!(listed, ids);

    for id in &ids {
        wait_for_status(&manager, id, JobStatus::Completed);
    }
    assert!(manager.active_jobs().is_empty());
}

#[test]
fn test_concurrent_creation_yields_distinct_jobs() {
    let harness = TestHarness::new();
    let manager = Arc::new(harness.open());
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.create_job("report.xlsx", &[0]).unwrap())
        })
        .collect();
    let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let seqs: Vec<u64> = manager.list_jobs().iter().map(|j| j.seq).collect();
    assert_eq!(seqs.len(), 8);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    for id in &ids {
        wait_for_status(&manager, id, JobStatus::Completed);
    }
}

#[test]
fn test_file_facade_and_stats() {
    let harness = TestHarness::new();
    let manager = harness.open();
    assert!(manager.health().is_healthy());

    harness.upload(&manager, "report.xlsx", &report_workbook());
    assert_eq!(
        manager.sheet_names("report.xlsx").unwrap(),
        vec!["Contacts", "Notes", "Vendors"]
    );
    let uploaded = manager.list_uploaded().unwrap();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].name, "report.xlsx");

    let id = manager.create_job("report.xlsx", &[1]).unwrap();
    let job = wait_for_status(&manager, &id, JobStatus::Completed);
    let output = job.output_filename.unwrap();

    let stats = manager.stats().unwrap();
    assert_eq!(stats.uploaded_files, 1);
    assert_eq!(stats.output_files, 1);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.active_jobs, 0);
    assert_eq!(stats.total_jobs, 1);

    manager.delete_output(&output).unwrap();
    assert!(matches!(
        manager.delete_output(&output),
        Err(JobError::NotFound(_))
    ));
    manager.delete_uploaded("report.xlsx").unwrap();

    let kinds: Vec<&str> = harness.events.events().iter().map(|e| e.kind()).collect();
    assert!(kinds.contains(&"file_uploaded"));
    assert!(kinds.contains(&"output_deleted"));
    assert!(kinds.contains(&"file_deleted"));
    assert_eq!(manager.stats().unwrap().uploaded_files, 0);
}

#[test]
fn test_subscribers_receive_job_events() {
    let harness = TestHarness::new();
    let manager = harness.open();
    let mut rx = manager.subscribe();
    harness.upload(&manager, "report.xlsx", &report_workbook());

    let id = manager.create_job("report.xlsx", &[0]).unwrap();
    wait_for_status(&manager, &id, JobStatus::Completed);

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(kinds.first(), Some(&"file_uploaded"));
    assert!(kinds.contains(&"job_created"));
    assert_eq!(kinds.last(), Some(&"job_status_changed"));
}
