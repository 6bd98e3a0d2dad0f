//! End-to-end behaviour of `ImportPipeline::submit` and the background run.

mod common;

use common::{assert_job_consistent, doc_bytes, docx_bytes, pdf_bytes, ArchiveBuilder, TestHarness};

use storyport::broadcast::ImportPhase;
use storyport::job::JobMetadata;
use storyport::{ContentStore, ImportError, JobStatus, NewContentRecord};

const OWNER: i64 = 42;

#[test]
fn test_mixed_archive_isolates_corrupt_document() {
    let harness = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .text("a.txt", "Hello")
        .file("b.docx", b"this is not a zip file".to_vec())
        .file("c.pdf", pdf_bytes(&["World"]))
        .build();

    let job = harness.import(OWNER, &archive);

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_documents, 3);
    assert_eq!(job.processed_documents, 3);
    assert_eq!(job.successful_imports, 2);
    assert_eq!(job.failed_imports, 1);
    assert_eq!(job.errors.len(), 1);
    assert!(job.errors[0].starts_with("Document 'b.docx': "), "{:?}", job.errors);
    assert!(job.error_message.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_job_consistent(&job);

    let records = harness.records(OWNER);
    assert_eq!(records.len(), 2);
    let a = records.iter().find(|r| r.title == "a").expect("record for a.txt");
    assert_eq!(a.body, "Hello");
    assert_eq!(a.status, "draft");
    assert_eq!(a.import_job_id, Some(job.id));
    let c = records.iter().find(|r| r.title == "c").expect("record for c.pdf");
    assert!(c.body.contains("World"), "{:?}", c.body);
}

#[test]
fn test_all_formats_and_nested_entries() {
    let harness = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .dir("drafts/")
        .text("drafts/my_first-story.txt", "It was a dark and stormy night.")
        .file("drafts/word.docx", docx_bytes(&["First paragraph", "Second paragraph"]))
        .file("legacy.doc", doc_bytes("Once upon a time\r"))
        .file("cover.png", vec![0x89, b'P', b'N', b'G'])
        .text("notes.rtf", "{\\rtf1 skipped}")
        .build();

    let job = harness.import(OWNER, &archive);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_documents, 3, "unsupported entries are not counted");
    assert_eq!(job.successful_imports, 3, "{:?}", job.errors);

    let records = harness.records(OWNER);
    let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
    assert!(titles.contains(&"my first story"), "{:?}", titles);
    assert!(titles.contains(&"word"));
    assert!(titles.contains(&"legacy"));

    let word = records.iter().find(|r| r.title == "word").unwrap();
    assert_eq!(word.body, "First paragraph\nSecond paragraph");
    let legacy = records.iter().find(|r| r.title == "legacy").unwrap();
    assert_eq!(legacy.body, "Once upon a time");
    let story = records.iter().find(|r| r.title == "my first story").unwrap();
    assert_eq!(story.slug, "my-first-story");
    assert_eq!(story.read_time_minutes, 1);
}

#[test]
fn test_blank_document_counts_as_failure() {
    let harness = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .text("empty.txt", "   \n\n  ")
        .text("full.txt", "Some words")
        .build();

    let job = harness.import(OWNER, &archive);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.successful_imports, 1);
    assert_eq!(
        job.errors,
        vec!["Document 'empty.txt': Document is empty or could not extract content".to_string()]
    );
}

#[test]
fn test_archive_without_supported_entries_creates_no_job() {
    let harness = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .dir("images/")
        .file("images/a.png", vec![1, 2, 3])
        .build();

    let result = harness.pipeline().submit(&archive, OWNER, "stories.zip");
    match result {
        Err(ImportError::EmptyArchive { supported }) => {
            assert_eq!(supported, ".doc, .docx, .pdf, .txt");
        }
        other => panic!("expected EmptyArchive, got {:?}", other),
    }
    assert!(harness.pipeline().history(OWNER).unwrap().is_empty());
}

#[test]
fn test_invalid_uploads_are_rejected_synchronously() {
    let harness = TestHarness::with_config(|config| config.max_archive_bytes = 512);
    let pipeline = harness.pipeline();
    let valid = ArchiveBuilder::new().text("a.txt", "Hello").build();

    assert!(matches!(
        pipeline.submit(&[], OWNER, "stories.zip"),
        Err(ImportError::Validation(_))
    ));
    assert!(matches!(
        pipeline.submit(&valid, OWNER, "stories.rar"),
        Err(ImportError::Validation(_))
    ));
    assert!(matches!(
        pipeline.submit(b"PK garbage", OWNER, "stories.zip"),
        Err(ImportError::Validation(_))
    ));
    assert!(matches!(
        pipeline.submit(&vec![0u8; 1024], OWNER, "stories.zip"),
        Err(ImportError::Validation(_))
    ));

    assert!(pipeline.history(OWNER).unwrap().is_empty());
}

#[test]
fn test_oversized_entry_is_rejected() {
    let harness = TestHarness::with_config(|config| config.max_entry_bytes = 16);
    let archive = ArchiveBuilder::new()
        .text("long.txt", "This story is far longer than sixteen bytes.")
        .build();

    assert!(matches!(
        harness.pipeline().submit(&archive, OWNER, "stories.zip"),
        Err(ImportError::Validation(_))
    ));
}

#[test]
fn test_second_active_job_is_rejected() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline();

    // An active job that no worker will pick up.
    let active = pipeline
        .tracker()
        .submit(
            OWNER,
            1,
            &JobMetadata {
                uploaded_filename: "first.zip".to_string(),
                file_size: 10,
            },
        )
        .unwrap();

    let archive = ArchiveBuilder::new().text("a.txt", "Hello").build();
    match pipeline.submit(&archive, OWNER, "second.zip") {
        Err(ImportError::Concurrency { owner_id, job_id }) => {
            assert_eq!(owner_id, OWNER);
            assert_eq!(job_id, active.id);
        }
        other => panic!("expected Concurrency, got {:?}", other),
    }
    assert_eq!(pipeline.history(OWNER).unwrap().len(), 1);

    // Other owners are unaffected.
    let other = harness.import(OWNER + 1, &archive);
    assert_eq!(other.status, JobStatus::Completed);
}

#[test]
fn test_owner_can_import_again_after_completion() {
    let harness = TestHarness::new();
    let first = harness.import(OWNER, &ArchiveBuilder::new().text("one.txt", "One").build());
    let second = harness.import(OWNER, &ArchiveBuilder::new().text("two.txt", "Two").build());

    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);

    let history = harness.pipeline().history(OWNER).unwrap();
    let ids: Vec<_> = history.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    for job in &history {
        assert_job_consistent(job);
    }
}

#[test]
fn test_duplicate_titles_get_distinct_names() {
    let harness = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .text("story.txt", "First telling")
        .text("other/story.txt", "Second telling")
        .build();

    let job = harness.import(OWNER, &archive);
    assert_eq!(job.successful_imports, 2, "{:?}", job.errors);

    let records = harness.records(OWNER);
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].title, records[1].title);
    assert!(records.iter().any(|r| r.title == "story"));
    assert!(records
        .iter()
        .any(|r| r.title.starts_with("story (Imported ") && r.title.ends_with(')')));
}

#[test]
fn test_existing_title_from_earlier_content() {
    let harness = TestHarness::new();
    harness
        .store()
        .create(&NewContentRecord::draft(
            OWNER,
            "chapter one".to_string(),
            "Hand written".to_string(),
            None,
            chrono::Utc::now(),
        ))
        .unwrap();

    let archive = ArchiveBuilder::new().text("chapter_one.txt", "Imported").build();
    let job = harness.import(OWNER, &archive);
    assert_eq!(job.successful_imports, 1);

    let imported = harness
        .records(OWNER)
        .into_iter()
        .find(|r| r.import_job_id == Some(job.id))
        .unwrap();
    assert!(imported.title.starts_with("chapter one (Imported "), "{}", imported.title);
}

#[test]
fn test_status_views() {
    let harness = TestHarness::new();
    let archive = ArchiveBuilder::new()
        .text("a.txt", "A")
        .text("b.txt", "B")
        .build();
    let job = harness.import(OWNER, &archive);

    let view = harness.pipeline().status(job.id).unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress_percent, 100.0);
    assert_eq!(view.total_documents, 2);
    assert_eq!(view.uploaded_filename, "stories.zip");

    assert!(harness.pipeline().status_for_owner(job.id, OWNER).is_ok());
    assert!(matches!(
        harness.pipeline().status_for_owner(job.id, OWNER + 1),
        Err(ImportError::NotFound(_))
    ));
    assert!(matches!(
        harness.pipeline().status(job.id + 1000),
        Err(ImportError::NotFound(_))
    ));
}

#[test]
fn test_checkpoints_with_many_documents() {
    let harness = TestHarness::with_config(|config| config.checkpoint_interval = 3);
    let mut builder = ArchiveBuilder::new();
    for i in 0..10 {
        builder = builder.text(&format!("story-{:02}.txt", i), &format!("Story number {}", i));
    }

    let job = harness.import(OWNER, &builder.build());
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_documents, 10);
    assert_eq!(job.successful_imports, 10);
    assert_eq!(harness.records(OWNER).len(), 10);
}

#[test]
fn test_progress_events_follow_the_job() {
    let harness = TestHarness::with_config(|config| config.checkpoint_interval = 1);
    let mut events = harness.pipeline().subscribe();
    let archive = ArchiveBuilder::new()
        .text("a.txt", "Hello")
        .file("b.docx", b"broken".to_vec())
        .build();

    let job = harness
        .pipeline()
        .submit(&archive, OWNER, "stories.zip")
        .unwrap();

    let mut phases = Vec::new();
    loop {
        let event = events.blocking_recv().expect("event stream ended early");
        assert_eq!(event.job_id, job.id);
        phases.push(event.phase);
        if event.is_final() {
            break;
        }
    }

    assert_eq!(
        phases,
        vec![
            ImportPhase::Queued,
            ImportPhase::Started,
            ImportPhase::DocumentImported,
            ImportPhase::Checkpoint,
            ImportPhase::DocumentFailed,
            ImportPhase::Finished,
        ]
    );
}
