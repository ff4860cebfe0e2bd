//! In-process Crypto service for integration tests

#![allow(dead_code)]

use idps_client::generated::crypto_server::{Crypto, CryptoServer};
use idps_client::{DecryptedText, EncryptedText, TrackableDecryptedRequest, TrackableEncryptedRequest};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tokio_stream::StreamExt;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};

/// Job id that makes the service answer `UNAVAILABLE`
pub const UNAVAILABLE_JOB: &str = "job-unavailable";

/// Payload that makes the service stall for a second
pub const SLOW_PAYLOAD: &str = "slow";

/// Payload that keeps the call open briefly so overlapping calls show up
pub const HOLD_PAYLOAD: &str = "hold";

/// Reversible stand-in for real encryption
pub fn seal(plain: &str) -> String {
    format!("enc:{}", plain.chars().rev().collect::<String>())
}

#[derive(Default, Clone)]
pub struct MockCrypto {
    pub jobs: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Counts a call as in flight until dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockCrypto {
    fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(&self.in_flight))
    }

    fn record(&self, job_id: &str) -> Result<(), Status> {
        if job_id.is_empty() {
            return Err(Status::invalid_argument("job_id is required"));
        }
        if job_id == UNAVAILABLE_JOB {
            return Err(Status::unavailable("backend unavailable"));
        }
        self.jobs.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

#[tonic::async_trait]
impl Crypto for MockCrypto {
    async fn encrypt_data(
        &self,
        request: Request<TrackableDecryptedRequest>,
    ) -> Result<Response<EncryptedText>, Status> {
        let _in_flight = self.enter();
        let req = request.into_inner();
        self.record(&req.job_id)?;
        let data = req
            .data
            .ok_or_else(|| Status::invalid_argument("data is required"))?;

        match data.text_data.as_str() {
            SLOW_PAYLOAD => sleep(Duration::from_secs(1)).await,
            HOLD_PAYLOAD => sleep(Duration::from_millis(50)).await,
            _ => {}
        }

        Ok(Response::new(EncryptedText {
            encrypted_data: seal(&data.text_data),
        }))
    }

    async fn decrypt_data(
        &self,
        request: Request<TrackableEncryptedRequest>,
    ) -> Result<Response<DecryptedText>, Status> {
        let req = request.into_inner();
        self.record(&req.job_id)?;
        let data = req
            .data
            .ok_or_else(|| Status::invalid_argument("data is required"))?;

        let reversed = data
            .encrypted_data
            .strip_prefix("enc:")
            .ok_or_else(|| Status::invalid_argument("ciphertext not produced by this service"))?;

        Ok(Response::new(DecryptedText {
            text_data: reversed.chars().rev().collect(),
        }))
    }
}

/// Running test server
pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub service: MockCrypto,
    accepted: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Number of TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait until the accept count settles on `expected`
    pub async fn wait_for_accepted(&self, expected: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.accepted() < expected && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        // Give any stray reconnect a moment to show up
        sleep(Duration::from_millis(50)).await;
        self.accepted()
    }

    /// Most calls the service has seen running at once
    pub fn peak_in_flight(&self) -> usize {
        self.service.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<String> {
        self.service.jobs.lock().unwrap().clone()
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Start a plaintext server on an ephemeral port
pub async fn start_server() -> TestServer {
    spawn_server(None).await
}

/// Start a TLS server presenting the `localhost` fixture certificate
pub async fn start_tls_server() -> TestServer {
    let cert = std::fs::read(fixture("server.pem")).unwrap();
    let key = std::fs::read(fixture("server.key")).unwrap();
    let tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
    spawn_server(Some(tls)).await
}

async fn spawn_server(tls: Option<ServerTlsConfig>) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener).map(move |conn| {
        counter.fetch_add(1, Ordering::SeqCst);
        conn
    });

    let service = MockCrypto::default();
    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder.tls_config(tls).unwrap();
    }
    let router = builder.add_service(CryptoServer::new(service.clone()));

    let handle = tokio::spawn(async move {
        router.serve_with_incoming(incoming).await.unwrap();
    });

    // Give server time to start
    sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        service,
        accepted,
        _handle: handle,
    }
}
