//! Channel construction for the IDPS service
//!
//! Turns a [`ClientConfig`] into tonic channels: resolves the URI scheme,
//! loads the CA certificate for TLS and applies connect/request timeouts.

use crate::config::ClientConfig;
use crate::generated::crypto_client::CryptoClient;
use crate::pool::Factory;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

/// Build a typed stub over an existing channel
///
/// # Example
///
/// ```
/// use idps_client::{new_crypto_client, ChannelFactory, ClientConfig, TlsConfig};
///
/// # tokio_test::block_on(async {
/// let config = ClientConfig {
///     endpoint: "127.0.0.1:50051".to_string(),
///     tls: TlsConfig { enabled: false, ..TlsConfig::default() },
///     ..ClientConfig::default()
/// };
/// let factory = ChannelFactory::new(&config).unwrap();
/// let _stub = new_crypto_client(factory.connect_lazy());
/// # });
/// ```
pub fn new_crypto_client(channel: Channel) -> CryptoClient<Channel> {
    CryptoClient::new(channel)
}

/// Opens channels to a single configured endpoint
///
/// TLS material is read once at construction; every channel produced shares
/// the same endpoint settings.
#[derive(Debug, Clone)]
pub struct ChannelFactory {
    uri: String,
    endpoint: Endpoint,
}

impl ChannelFactory {
    /// Prepare an endpoint from configuration
    ///
    /// # Errors
    ///
    /// * `Error::InvalidConfig` - empty endpoint, malformed URI, or a scheme
    ///   that contradicts the TLS setting
    /// * `Error::Tls` - CA certificate missing or not PEM
    ///
    /// Pool settings are not checked here; [`Pool::new`](crate::Pool::new)
    /// rejects a zero capacity.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate_endpoint()?;

        let uri = normalize_uri(config.endpoint.trim(), config.tls.enabled)?;
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| Error::InvalidConfig(format!("Invalid endpoint '{}': {}", uri, e)))?;

        if let Some(timeout) = config.connect_timeout() {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = config.request_timeout() {
            endpoint = endpoint.timeout(timeout);
        }

        if config.tls.enabled {
            let ca_path = config.tls.resolved_ca_cert_path()?;
            let mut tls = ClientTlsConfig::new().ca_certificate(load_ca_certificate(&ca_path)?);
            if let Some(ref domain) = config.tls.domain_name {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::Tls(format!("Failed to apply TLS config: {}", e)))?;
            debug!(ca_cert = %ca_path.display(), "Loaded CA certificate");
        }

        Ok(Self { uri, endpoint })
    }

    /// Endpoint URI including scheme
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Dial now and wait for the connection
    pub async fn connect(&self) -> Result<Channel> {
        info!(endpoint = %self.uri, "Connecting to IDPS");
        self.endpoint.connect().await.map_err(|e| Error::Connect {
            endpoint: self.uri.clone(),
            message: error_chain(&e),
        })
    }

    /// Channel that dials on first use
    pub fn connect_lazy(&self) -> Channel {
        debug!(endpoint = %self.uri, "Creating lazy IDPS channel");
        self.endpoint.connect_lazy()
    }
}

#[async_trait]
impl Factory for ChannelFactory {
    type Connection = Channel;

    async fn create(&self) -> Result<Channel> {
        self.connect().await
    }
}

/// Add or check the URI scheme against the TLS setting
fn normalize_uri(endpoint: &str, tls: bool) -> Result<String> {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        if !tls {
            return Err(Error::InvalidConfig(format!(
                "Endpoint '{}' uses https:// but TLS is disabled",
                endpoint
            )));
        }
        return Ok(format!("https://{}", rest));
    }
    if let Some(rest) = endpoint.strip_prefix("http://") {
        if tls {
            return Err(Error::InvalidConfig(format!(
                "Endpoint '{}' uses http:// but TLS is enabled",
                endpoint
            )));
        }
        return Ok(format!("http://{}", rest));
    }
    if endpoint.contains("://") {
        return Err(Error::InvalidConfig(format!(
            "Unsupported scheme in endpoint '{}'",
            endpoint
        )));
    }

    let scheme = if tls { "https" } else { "http" };
    Ok(format!("{}://{}", scheme, endpoint))
}

fn load_ca_certificate(path: &Path) -> Result<Certificate> {
    let pem = std::fs::read(path).map_err(|e| {
        Error::Tls(format!(
            "Failed to read CA certificate '{}': {}",
            path.display(),
            e
        ))
    })?;

    if !String::from_utf8_lossy(&pem).contains("-----BEGIN CERTIFICATE-----") {
        return Err(Error::Tls(format!(
            "'{}' does not contain a PEM certificate",
            path.display()
        )));
    }

    Ok(Certificate::from_pem(pem))
}

/// Flatten an error and its sources into one line
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
