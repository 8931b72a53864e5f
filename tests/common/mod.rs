// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Stub analysis service for integration tests.
//!
//! Serves `/upload`, `/process/<id>` and `/health` the way the real service
//! does, with scriptable failures.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};

pub const SERVICE_DOCUMENT_ID: &str = "a1b2c3d4";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Status returned by `/upload`. Anything but 200 sends an error body.
    pub upload_status: u16,
    /// Status returned by `/process/<id>`.
    pub process_status: u16,
    /// Number of "processing" answers before `process_body` is served.
    pub pending_polls: usize,
    pub process_body: Value,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            upload_status: 200,
            process_status: 200,
            pending_polls: 1,
            process_body: reference_process_body(),
        }
    }
}

/// Completed analysis with ELA 85 (one region), OCR 75 and METADATA 95.
pub fn reference_process_body() -> Value {
    json!({
        "status": "completed",
        "document_id": SERVICE_DOCUMENT_ID,
        "overall_confidence": 84.5,
        "verdict": "HIGHLY_SUSPICIOUS",
        "signals": {
            "ela": {
                "name": "Error Level Analysis",
                "confidence": 85,
                "summary": "Compression inconsistency around the amount field",
                "status": "completed",
                "findings": [],
                "regions": [{"bbox": [100, 150, 200, 80], "confidence": 90}],
            },
            "ocr": {
                "name": "Text Inconsistency",
                "confidence": 75,
                "summary": "Font size varies within one line",
                "status": "completed",
                "findings": [
                    {"confidence": 70, "description": "Font size mismatch", "bbox": [120, 160, 60, 20]},
                ],
            },
            "metadata": {
                "name": "Metadata Forensics",
                "confidence": 95,
                "summary": "Saved by an image editor after creation",
                "status": "completed",
                "findings": [
                    {"confidence": 95, "description": "Modification date is after creation date", "type": "date_anomaly"},
                ],
            },
        },
    })
}

/// The body the service returns with a 200 when its own pipeline failed.
pub fn service_error_body() -> Value {
    let failed = json!({"status": "error", "confidence": 0, "summary": "Analysis failed"});
    json!({
        "document_id": SERVICE_DOCUMENT_ID,
        "error": true,
        "error_message": "cannot identify image file",
        "overall_confidence": 0,
        "uncertainty": 100,
        "verdict": "PROCESSING_ERROR",
        "processing_time": 0,
        "signals": {"ela": failed.clone(), "ocr": failed.clone(), "metadata": failed},
        "combined_findings": [],
        "recommendations": ["Processing failed. Please try again or upload a different document."],
        "reports": {},
    })
}

struct StubState {
    config: StubConfig,
    polls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct StubService {
    pub addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubService {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }
}

/// Bind the stub on an ephemeral port and serve it in the background.
pub async fn spawn(config: StubConfig) -> StubService {
    let state = Arc::new(StubState {
        config,
        polls: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
    });

    let svc_state = Arc::clone(&state);
    let make_svc = make_service_fn(move |_| {
        let state = Arc::clone(&svc_state);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(req, Arc::clone(&state))))
        }
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server.await;
    });

    StubService { addr, state }
}

fn json_response(status: u16, body: Value) -> Response<Body> {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn handle(req: Request<Body>, state: Arc<StubState>) -> Result<Response<Body>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = hyper::body::to_bytes(body).await.map(|b| b.to_vec()).unwrap_or_default();
    let path = parts.uri.path().to_string();
    state.requests.lock().unwrap().push(RecordedRequest {
        method: parts.method.clone(),
        path: path.clone(),
        content_type: parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    let config = &state.config;
    let process_path = format!("/process/{}", SERVICE_DOCUMENT_ID);
    let response = match (parts.method, path.as_str()) {
        (Method::POST, "/upload") if config.upload_status != 200 => json_response(
            config.upload_status,
            json!({"error": "Processing failed: converter unavailable"}),
        ),
        (Method::POST, "/upload") => json_response(
            200,
            json!({
                "status": "uploaded",
                "message": "Document uploaded successfully",
                "document_id": SERVICE_DOCUMENT_ID,
                "file_info": {
                    "filename": "invoice.png",
                    "type": "image/png",
                    "is_pdf": false,
                    "processing_path": format!("temp/{}_invoice.png", SERVICE_DOCUMENT_ID),
                },
                "processing_time": 0.12,
                "next_step": "process",
                "process_endpoint": process_path,
            }),
        ),
        (Method::GET, p) if p == process_path => {
            let n = state.polls.fetch_add(1, Ordering::SeqCst);
            if config.process_status != 200 {
                json_response(config.process_status, json!({"error": "internal"}))
            } else if n < config.pending_polls {
                json_response(
                    200,
                    json!({
                        "status": "processing",
                        "document_id": SERVICE_DOCUMENT_ID,
                        "signals": ["ELA", "OCR", "Metadata"],
                        "estimated_time": "Under 20 seconds",
                    }),
                )
            } else {
                json_response(200, config.process_body.clone())
            }
        }
        (Method::GET, "/health") => json_response(
            200,
            json!({"status": "healthy", "service": "Document Forgery Detector", "version": "1.0.0"}),
        ),
        _ => json_response(404, json!({"error": "not found"})),
    };
    Ok(response)
}
