#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use hotvault_api::setup::{routes::setup_routes, services::initialize_services};
use hotvault_api::state::AppState;
use hotvault_core::models::{NewPiece, Piece};
use hotvault_core::{Config, SystemClock};
use hotvault_db::{InMemoryPieceStore, PieceStore};
use hotvault_pdp::{ToolCommand, ToolError, ToolOutput, ToolRunner};
use serde_json::Value;
use tempfile::TempDir;

pub const OWNER: i64 = 7;
pub const OTHER_OWNER: i64 = 8;
pub const UPLOADED_CID: &str = "bagaUPLOADED:bagaSUB";
pub const DOWNLOADED_CONTENT: &[u8] = b"bytes fetched from the service";

/// Answers every `pdptool` subcommand with canned stdout.
#[derive(Default)]
pub struct CannedRunner {
    replies: HashMap<&'static str, String>,
    calls: Mutex<Vec<String>>,
}

impl CannedRunner {
    pub fn publishing() -> Self {
        let mut replies = HashMap::new();
        replies.insert("upload-file", format!("{}\n", UPLOADED_CID));
        replies.insert(
            "get-proof-set",
            "Roots:\n  Root ID: 5\n  Root CID: bagaUPLOADED\n".to_string(),
        );
        replies.insert(
            "create-proof-set",
            format!("Location: /pdp/proof-sets/created/0x{}\n", "cd".repeat(32)),
        );
        replies.insert(
            "get-proof-set-create-status",
            "Transaction Status: pending\n".to_string(),
        );
        replies.insert("remove-roots", "Roots removed\n".to_string());
        Self {
            replies,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_to(&self, subcommand: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == subcommand)
            .count()
    }
}

#[async_trait]
impl ToolRunner for CannedRunner {
    async fn run(
        &self,
        command: &ToolCommand,
        _timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let operation = command.operation().to_string();
        self.calls.lock().unwrap().push(operation.clone());
        if operation == "download-file" {
            if let Some(position) = command.args.iter().position(|a| a == "--output-file") {
                std::fs::write(&command.args[position + 1], DOWNLOADED_CONTENT).unwrap();
            }
        }
        Ok(ToolOutput {
            stdout: self.replies.get(operation.as_str()).cloned().unwrap_or_default(),
            stderr: String::new(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryPieceStore>,
    pub runner: Arc<CannedRunner>,
    pub staging: TempDir,
    pub tool_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let staging = tempfile::tempdir().unwrap();
        let tool_dir = tempfile::tempdir().unwrap();

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert(
            "PDPTOOL_PATH",
            tool_dir.path().join("pdptool").display().to_string(),
        );
        vars.insert("SERVICE_URL", "https://pdp.example.com".to_string());
        vars.insert("SERVICE_NAME", "hotvault".to_string());
        vars.insert("RECORD_KEEPER", "0xRecordKeeper".to_string());
        vars.insert("STAGING_DIR", staging.path().display().to_string());
        vars.insert("MAX_UPLOAD_SIZE_MB", "1".to_string());
        vars.insert("MAX_CHUNK_SIZE_MB", "1".to_string());
        for zero in [
            "PRE_BIND_DELAY_MS",
            "BIND_INTERVAL_SECS",
            "BIND_MAX_INTERVAL_SECS",
            "CONFIRM_INTERVAL_SECS",
            "CONFIRM_MAX_INTERVAL_SECS",
        ] {
            vars.insert(zero, "0".to_string());
        }
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

        let store = Arc::new(InMemoryPieceStore::new());
        let runner = Arc::new(CannedRunner::publishing());
        let state = initialize_services(
            &config,
            store.clone(),
            runner.clone(),
            Arc::new(SystemClock),
        );
        let router = setup_routes(&config, state.clone());

        Self {
            router,
            state,
            store,
            runner,
            staging,
            tool_dir,
        }
    }

    pub async fn provisioned(self) -> Self {
        self.store.insert_proof_set(OWNER, "12").await;
        self
    }

    /// Record a published piece for [`OWNER`] under the provisioned proof set.
    pub async fn seed_piece(&self, filename: &str) -> Piece {
        let proof_set = self.store.find_proof_set(OWNER).await.unwrap().unwrap();
        self.store
            .create_piece(NewPiece {
                owner_id: OWNER,
                cid: UPLOADED_CID.to_string(),
                filename: filename.to_string(),
                size: DOWNLOADED_CONTENT.len() as i64,
                service_name: "hotvault".to_string(),
                service_url: "https://pdp.example.com".to_string(),
                proof_set_id: proof_set.id,
                root_id: "5".to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send and decode the JSON body.
    pub async fn send_json(&self, request: Request<Body>) -> (u16, Value) {
        let response = self.send(request).await;
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

pub fn as_user(builder: axum::http::request::Builder, user_id: i64) -> axum::http::request::Builder {
    builder.header(hotvault_api::auth::USER_ID_HEADER, user_id.to_string())
}

pub fn json_request(method: &str, uri: &str, user_id: i64, body: Value) -> Request<Body> {
    as_user(Request::builder().method(method).uri(uri), user_id)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str, user_id: i64) -> Request<Body> {
    as_user(Request::builder().uri(uri), user_id)
        .body(Body::empty())
        .unwrap()
}

pub fn multipart_upload(user_id: i64, filename: &str, data: &[u8]) -> Request<Body> {
    let boundary = "hotvault-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    as_user(
        Request::builder().method("POST").uri("/api/v1/upload"),
        user_id,
    )
    .header(
        "content-type",
        format!("multipart/form-data; boundary={boundary}"),
    )
    .body(Body::from(body))
    .unwrap()
}
