//! gRPC client for the IDPS encryption service
//!
//! Dials a TLS-secured endpoint, wraps the generated `Crypto` stub and exposes
//! [`IdpsClient::encrypt`] / [`IdpsClient::decrypt`], each of which forwards a
//! job id and a text payload and logs the round-trip time.
//!
//! Connections can be shared through a bounded [`Pool`] that replaces idle,
//! expired and unhealthy channels.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;

/// Types generated from `protos/crypto.proto`
pub mod generated {
    #![allow(clippy::all)]
    tonic::include_proto!("crypto");
}

pub use client::{ChannelPool, IdpsClient};
pub use config::{ClientConfig, ConfigError, TlsConfig};
pub use connection::{new_crypto_client, ChannelFactory};
pub use error::{Error, Result};
pub use generated::{
    DecryptedText, EncryptedText, TrackableDecryptedRequest, TrackableEncryptedRequest,
};
pub use pool::{Factory, Pool, PoolConfig, PooledConnection};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Honors `RUST_LOG` (default `info`). Does nothing if a subscriber is
/// already installed.
pub fn init_tracing(json_logging: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
