mod helpers;

use bytes::Bytes;
use futures::StreamExt;
use helpers::*;
use hotvault_core::models::{NewPiece, Piece};
use hotvault_core::AppError;
use hotvault_db::PieceStore;

const PIECE_SERVICE_URL: &str = "https://old.example.com";

async fn seed_piece(h: &Harness, cid: &str, root_id: &str) -> Piece {
    let proof_set = h.store.find_proof_set(OWNER).await.unwrap().unwrap();
    h.store
        .create_piece(NewPiece {
            owner_id: OWNER,
            cid: cid.to_string(),
            filename: "report.pdf".to_string(),
            size: DOWNLOADED_CONTENT.len() as i64,
            service_name: "legacy".to_string(),
            service_url: PIECE_SERVICE_URL.to_string(),
            proof_set_id: proof_set.id,
            root_id: root_id.to_string(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn pieces_are_listed_newest_first_and_scoped_to_owner() {
    let h = Harness::new().provisioned().await;
    let older = seed_piece(&h, "bagaA:bagaB", "3").await;
    let newer = seed_piece(&h, UPLOADED_CID, "5").await;

    let listed: Vec<i64> = h.pieces.list(OWNER).await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(listed, vec![newer.id, older.id]);
    assert!(h.pieces.list(OTHER_OWNER).await.unwrap().is_empty());

    assert_eq!(h.pieces.get(OWNER, older.id).await.unwrap(), older);
    assert!(matches!(
        h.pieces.get(OTHER_OWNER, older.id).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(h.pieces.get_by_cid(OWNER, UPLOADED_CID).await.unwrap().id, newer.id);
    assert!(matches!(
        h.pieces.get_by_cid(OTHER_OWNER, UPLOADED_CID).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn removing_a_root_calls_the_tool_then_deletes_the_piece() {
    let h = Harness::new().provisioned().await;
    h.runner.on("remove-roots", Reply::ok("Roots removed\n"));
    let piece = seed_piece(&h, UPLOADED_CID, LISTED_ROOT_ID).await;

    let removal = h.pieces.remove_root(OWNER, piece.id).await.unwrap();
    assert_eq!(removal.piece_id, piece.id);
    assert_eq!(removal.proof_set_id, REMOTE_PROOF_SET);
    assert_eq!(removal.root_id, LISTED_ROOT_ID);
    assert_eq!(removal.output, "Roots removed");

    let call = h.runner.last_call("remove-roots").unwrap();
    assert_eq!(
        call.args,
        vec![
            "remove-roots",
            "--service-url",
            PIECE_SERVICE_URL,
            "--service-name",
            "legacy",
            "--proof-set-id",
            REMOTE_PROOF_SET,
            "--root-id",
            LISTED_ROOT_ID,
        ]
    );
    assert!(h.store.list_pieces(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn non_numeric_root_id_is_rejected_before_the_tool_runs() {
    let h = Harness::new().provisioned().await;
    let piece = seed_piece(&h, UPLOADED_CID, "unknown").await;

    let err = h.pieces.remove_root(OWNER, piece.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(h.runner.calls_to("remove-roots"), 0);
    assert_eq!(h.store.list_pieces(OWNER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn removal_waits_for_an_unconfirmed_proof_set() {
    let h = Harness::new();
    h.store.insert_proof_set(OWNER, "").await;
    let piece = seed_piece(&h, UPLOADED_CID, LISTED_ROOT_ID).await;

    let err = h.pieces.remove_root(OWNER, piece.id).await.unwrap_err();
    assert!(matches!(err, AppError::PendingProvisioning(_)));
    assert_eq!(h.runner.calls_to("remove-roots"), 0);

    assert!(matches!(
        h.pieces.provisioned_proof_set(OTHER_OWNER).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn tool_failure_keeps_the_piece_record() {
    let h = Harness::new().provisioned().await;
    h.runner
        .on("remove-roots", Reply::fail("Error: root not found in proof set"));
    let piece = seed_piece(&h, UPLOADED_CID, LISTED_ROOT_ID).await;

    let err = h.pieces.remove_root(OWNER, piece.id).await.unwrap_err();
    assert!(matches!(err, AppError::ToolFailure { .. }));
    assert_eq!(h.store.list_pieces(OWNER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_delete_after_removal_is_a_persistence_error() {
    let h = Harness::build(ScriptedRunner::happy_path(), true, |_| {})
        .provisioned()
        .await;
    let piece = seed_piece(&h, UPLOADED_CID, LISTED_ROOT_ID).await;

    let err = h.pieces.remove_root(OWNER, piece.id).await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    assert_eq!(h.runner.calls_to("remove-roots"), 1);
}

#[tokio::test]
async fn download_fetches_the_base_cid_and_cleans_up() {
    let h = Harness::new().provisioned().await;
    let piece = seed_piece(&h, UPLOADED_CID, LISTED_ROOT_ID).await;

    let download = h.pieces.download(OWNER, UPLOADED_CID).await.unwrap();
    assert_eq!(download.piece.id, piece.id);
    assert_eq!(download.filename, "report.pdf");
    assert_eq!(download.size, DOWNLOADED_CONTENT.len() as u64);
    assert_eq!(h.runner.chunk_lists(), vec!["bagaUPLOADED".to_string()]);

    let call = h.runner.last_call("download-file").unwrap();
    assert_eq!(call.args[1..3], ["--service-url", PIECE_SERVICE_URL]);

    let chunks: Vec<Bytes> = download
        .into_stream()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(chunks.concat(), DOWNLOADED_CONTENT);

    let downloads = h.staging.path().join("downloads");
    assert_eq!(std::fs::read_dir(downloads).unwrap().count(), 0);
}

#[tokio::test]
async fn download_of_someone_elses_piece_is_not_found() {
    let h = Harness::new().provisioned().await;
    seed_piece(&h, UPLOADED_CID, LISTED_ROOT_ID).await;

    let err = h.pieces.download(OTHER_OWNER, UPLOADED_CID).await.err().unwrap();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.runner.calls_to("download-file"), 0);
}
