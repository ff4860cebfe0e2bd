//! Encrypt/decrypt wrappers over the generated Crypto stub
//!
//! Each call forwards a job id and one text payload, logs how long the round
//! trip took and turns a failed status into [`Error::Rpc`].
//!
//! # Usage
//!
//! ```ignore
//! use idps_client::{ClientConfig, IdpsClient};
//!
//! let client = IdpsClient::connect(&ClientConfig::from_env()).await?;
//! let sealed = client.encrypt("job-17", "4111 1111 1111 1111").await?;
//! let plain = client.decrypt("job-17", &sealed.encrypted_data).await?;
//! ```

use crate::config::ClientConfig;
use crate::connection::{new_crypto_client, ChannelFactory};
use crate::generated::crypto_client::CryptoClient;
use crate::generated::{
    DecryptedText, EncryptedText, TrackableDecryptedRequest, TrackableEncryptedRequest,
};
use crate::pool::Pool;
use crate::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tonic::transport::Channel;
use tonic::{Code, Request, Response, Status};
use tracing::{info, warn};

/// Pool of channels to the IDPS endpoint
pub type ChannelPool = Pool<ChannelFactory>;

#[derive(Debug, Clone)]
enum Transport {
    Channel(Channel),
    Pool(ChannelPool),
}

/// Client for the IDPS encryption service
///
/// Cheap to clone; clones share the channel or pool.
#[derive(Debug, Clone)]
pub struct IdpsClient {
    transport: Transport,
    request_timeout: Option<Duration>,
}

impl IdpsClient {
    /// Wrap an existing channel
    pub fn new(channel: Channel) -> Self {
        Self {
            transport: Transport::Channel(channel),
            request_timeout: None,
        }
    }

    /// Take a connection from `pool` for every call
    pub fn with_pool(pool: ChannelPool) -> Self {
        Self {
            transport: Transport::Pool(pool),
            request_timeout: None,
        }
    }

    /// Dial the configured endpoint over a single channel
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let factory = ChannelFactory::new(config)?;
        Ok(Self::new(factory.connect().await?))
    }

    /// Dial the configured endpoint through a connection pool
    pub async fn connect_pooled(config: &ClientConfig) -> Result<Self> {
        let factory = ChannelFactory::new(config)?;
        let pool = Pool::new(factory, config.pool.clone()).await?;
        Ok(Self::with_pool(pool))
    }

    /// Deadline sent with every call as the gRPC timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Pool backing this client, if any
    pub fn pool(&self) -> Option<&ChannelPool> {
        match &self.transport {
            Transport::Pool(pool) => Some(pool),
            Transport::Channel(_) => None,
        }
    }

    /// Encrypt `data` on behalf of `job_id`
    pub async fn encrypt(&self, job_id: &str, data: &str) -> Result<EncryptedText> {
        let request = TrackableDecryptedRequest {
            job_id: job_id.to_string(),
            data: Some(DecryptedText {
                text_data: data.to_string(),
            }),
        };
        self.call("Encrypt", job_id, request, |mut stub, req| async move {
            stub.encrypt_data(req).await
        })
        .await
    }

    /// Decrypt `data` on behalf of `job_id`
    pub async fn decrypt(&self, job_id: &str, data: &str) -> Result<DecryptedText> {
        let request = TrackableEncryptedRequest {
            job_id: job_id.to_string(),
            data: Some(EncryptedText {
                encrypted_data: data.to_string(),
            }),
        };
        self.call("Decrypt", job_id, request, |mut stub, req| async move {
            stub.decrypt_data(req).await
        })
        .await
    }

    async fn call<Req, Resp, F, Fut>(
        &self,
        operation: &'static str,
        job_id: &str,
        message: Req,
        invoke: F,
    ) -> Result<Resp>
    where
        F: FnOnce(CryptoClient<Channel>, Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Resp>, Status>>,
    {
        let _timer = CallTimer::start(operation, job_id);

        let mut request = Request::new(message);
        if let Some(timeout) = self.request_timeout {
            request.set_timeout(timeout);
        }

        let result = match &self.transport {
            Transport::Channel(channel) => invoke(new_crypto_client(channel.clone()), request).await,
            Transport::Pool(pool) => {
                let mut conn = pool.acquire().await?;
                let result = invoke(new_crypto_client((*conn).clone()), request).await;
                if let Err(ref status) = result {
                    if is_connection_failure(status) {
                        conn.mark_unhealthy();
                    }
                }
                result
            }
        };

        result.map(Response::into_inner).map_err(|status| {
            warn!(
                operation,
                job_id,
                code = ?status.code(),
                status_message = status.message(),
                "Failed to {} data for [JobID={}]",
                operation,
                job_id
            );
            Error::Rpc {
                operation,
                job_id: job_id.to_string(),
                status,
            }
        })
    }
}

/// Statuses that suggest the channel itself is broken
fn is_connection_failure(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable | Code::Unknown | Code::Internal | Code::DeadlineExceeded
    )
}

/// Logs the elapsed time of a call when dropped
struct CallTimer<'a> {
    operation: &'static str,
    job_id: &'a str,
    start: Instant,
}

impl<'a> CallTimer<'a> {
    fn start(operation: &'static str, job_id: &'a str) -> Self {
        Self {
            operation,
            job_id,
            start: Instant::now(),
        }
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        info!(
            operation = self.operation,
            job_id = self.job_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "{} took {:?}",
            self.operation,
            elapsed
        );
    }
}
