#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

/// Readiness flag shared with the accept loop.
#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	match req.uri().path() {
		"/healthz" => Ok(plain(StatusCode::OK, Bytes::from_static(b"ok"))),
		"/readyz" => {
			if state.is_ready() {
				Ok(plain(StatusCode::OK, Bytes::from_static(b"ready")))
			} else {
				Ok(plain(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready")))
			}
		}
		_ => Ok(plain(StatusCode::NOT_FOUND, Bytes::new())),
	}
}

fn plain(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
	let mut res = Response::new(Full::new(body));
	*res.status_mut() = status;
	res
}
