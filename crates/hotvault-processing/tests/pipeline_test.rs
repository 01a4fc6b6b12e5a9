mod helpers;

use bytes::Bytes;
use helpers::*;
use hotvault_core::models::{JobErrorKind, UploadStage};
use hotvault_core::{AppError, RecordIdFallback};
use hotvault_db::PieceStore;
use hotvault_processing::pipeline::{PENDING_PROVISIONING_MESSAGE, PROGRESS_PUBLISHED};
use hotvault_processing::{JobRegistry, StagedFile};

#[tokio::test]
async fn direct_upload_completes_and_records_piece() {
    let h = Harness::new().provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "notes/report.txt", Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Complete);
    assert_eq!(job.progress, 100);
    assert_eq!(job.filename, "report.txt");
    assert_eq!(job.cid.as_deref(), Some(UPLOADED_CID));
    assert_eq!(job.proof_set_id.as_deref(), Some(REMOTE_PROOF_SET));
    assert_eq!(job.record_id.as_deref(), Some(LISTED_ROOT_ID));
    assert!(!job.degraded);
    assert!(job.error.is_none());

    assert_eq!(h.runner.prepared_files(), vec![b"hello world".to_vec()]);
    let bind = h.runner.last_call("add-roots").unwrap();
    assert_eq!(
        &bind.args[5..],
        &["--proof-set-id", REMOTE_PROOF_SET, "--root", UPLOADED_CID]
    );

    let pieces = h.store.list_pieces(OWNER).await.unwrap();
    assert_eq!(pieces.len(), 1);
    assert_eq!(pieces[0].cid, UPLOADED_CID);
    assert_eq!(pieces[0].root_id, LISTED_ROOT_ID);
    assert_eq!(pieces[0].size, 11);

    let staged = h.staging.path().join("direct").join(job_id.to_string());
    for _ in 0..100 {
        if !staged.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(!staged.exists());
}

#[tokio::test]
async fn service_secret_is_created_once() {
    let h = Harness::new().provisioned().await;

    for name in ["a.bin", "b.bin"] {
        let job_id = h
            .pipeline
            .submit(OWNER, name, Bytes::from_static(b"data"))
            .await
            .unwrap();
        h.wait_for_terminal(job_id).await;
    }

    assert_eq!(h.runner.calls_to("create-service-secret"), 1);
    assert_eq!(h.runner.calls_to("prepare-piece"), 2);
}

#[tokio::test]
async fn unprovisioned_proof_set_halts_in_pending() {
    let h = Harness::new();
    h.store.insert_proof_set(OWNER, "").await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Pending);
    assert_eq!(job.progress, PROGRESS_PUBLISHED);
    assert_eq!(job.message, PENDING_PROVISIONING_MESSAGE);
    assert!(job.error.is_none());
    assert_eq!(h.runner.calls_to("add-roots"), 0);
    assert_eq!(h.runner.calls_to("get-proof-set"), 0);
}

#[tokio::test]
async fn missing_proof_set_is_an_error() {
    let h = Harness::new();

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Error);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::NotFound);
    assert_eq!(job.cid.as_deref(), Some(UPLOADED_CID));
}

#[tokio::test]
async fn transient_bind_failure_is_retried() {
    let runner = ScriptedRunner::happy_path();
    runner.queue(
        "add-roots",
        [Reply::fail("Error: status code 503"), Reply::Timeout],
    );
    let h = Harness::with_runner(runner).provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Complete);
    assert_eq!(h.runner.calls_to("add-roots"), 3);
}

#[tokio::test]
async fn unrecognized_bind_failure_is_not_retried() {
    let runner = ScriptedRunner::happy_path();
    runner.on("add-roots", Reply::fail("Error: invalid root CID format"));
    let h = Harness::with_runner(runner).provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::ToolFailure);
    assert!(error.message.contains("invalid root CID format"));
    assert_eq!(h.runner.calls_to("add-roots"), 1);
}

#[tokio::test]
async fn bind_timeouts_exhaust_attempts() {
    let runner = ScriptedRunner::happy_path();
    runner.on("add-roots", Reply::Timeout);
    let h = Harness::with_runner(runner).provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Error);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Timeout);
    assert_eq!(h.runner.calls_to("add-roots"), BIND_ATTEMPTS as usize);
}

#[tokio::test]
async fn unindexed_root_falls_back_in_degraded_mode() {
    let runner = ScriptedRunner::happy_path();
    runner.on("get-proof-set", Reply::ok("Proof Set ID: 12\nRoots:\n"));
    let h = Harness::with_runner(runner).provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Complete);
    assert_eq!(job.record_id.as_deref(), Some("1"));
    assert!(job.degraded);
    assert_eq!(h.runner.calls_to("get-proof-set"), CONFIRM_ATTEMPTS as usize);
    assert_eq!(h.store.list_pieces(OWNER).await.unwrap()[0].root_id, "1");
}

#[tokio::test]
async fn unindexed_root_fails_when_fallback_disabled() {
    let runner = ScriptedRunner::happy_path();
    runner.on("get-proof-set", Reply::ok("Proof Set ID: 12\nRoots:\n"));
    let h = Harness::build(runner, false, |config| {
        config.record_id_fallback = RecordIdFallback::Fail;
    })
    .provisioned()
    .await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Error);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Confirmation);
    assert!(h.store.list_pieces(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn recording_failure_is_distinct_from_publication_failure() {
    let h = Harness::build(ScriptedRunner::happy_path(), true, |_| {})
        .provisioned()
        .await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.stage, UploadStage::Error);
    assert_eq!(job.cid.as_deref(), Some(UPLOADED_CID));
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Persistence);
    assert!(error.message.contains("was published to proof set 12"));
}

#[tokio::test]
async fn prepare_timeout_is_reported_as_timeout() {
    let runner = ScriptedRunner::happy_path();
    runner.on("prepare-piece", Reply::Timeout);
    let h = Harness::with_runner(runner).provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::Timeout);
    assert!(error.message.contains("timed out"));
    assert_eq!(h.runner.calls_to("upload-file"), 0);
}

#[tokio::test]
async fn upload_without_output_is_a_parse_failure() {
    let runner = ScriptedRunner::happy_path();
    runner.on("upload-file", Reply::ok("\n\n"));
    let h = Harness::with_runner(runner).provisioned().await;

    let job_id = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"data"))
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.error.unwrap().kind, JobErrorKind::ParseFailure);
    assert_eq!(h.runner.calls_to("add-roots"), 0);
}

#[tokio::test]
async fn staged_size_mismatch_fails_before_tool_runs() {
    let h = Harness::new().provisioned().await;
    let path = h.staging.path().join("short.bin");
    std::fs::write(&path, b"abc").unwrap();
    let job_id = h.pipeline.register_job(OWNER, "short.bin", 10).await;

    let stage = h
        .pipeline
        .run(StagedFile {
            job_id,
            owner_id: OWNER,
            path,
            filename: "short.bin".to_string(),
            size: 10,
        })
        .await;

    assert_eq!(stage, UploadStage::Error);
    let job = h.registry.get(job_id).await.unwrap();
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Staging);
    assert_eq!(h.runner.calls_to("prepare-piece"), 0);
}

#[tokio::test]
async fn submit_validates_before_registering() {
    let h = Harness::build(ScriptedRunner::happy_path(), false, |config| {
        config.max_upload_size_bytes = 4;
    });

    let empty = h.pipeline.submit(OWNER, "a.bin", Bytes::new()).await;
    assert!(matches!(empty, Err(AppError::InvalidInput(_))));

    let large = h
        .pipeline
        .submit(OWNER, "a.bin", Bytes::from_static(b"12345"))
        .await;
    assert!(matches!(large, Err(AppError::PayloadTooLarge(_))));

    let nameless = h
        .pipeline
        .submit(OWNER, "dir/", Bytes::from_static(b"1"))
        .await;
    assert!(matches!(nameless, Err(AppError::InvalidInput(_))));

    assert!(h.registry.is_empty().await);
}

#[tokio::test]
async fn job_status_checks_ownership() {
    let h = Harness::new();
    let job_id = h.pipeline.register_job(OWNER, "a.bin", 4).await;

    let status = h.pipeline.job_status(job_id, OWNER).await.unwrap();
    assert_eq!(status.stage, UploadStage::Uploading);

    assert!(matches!(
        h.pipeline.job_status(job_id, OTHER_OWNER).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        h.pipeline.job_status(uuid::Uuid::new_v4(), OWNER).await,
        Err(AppError::NotFound(_))
    ));
}
