//! IDPS command-line client
//!
//! Encrypts or decrypts a single payload against the IDPS service and prints
//! the result to stdout.
//!
//! # Usage
//!
//! ```bash
//! # Encrypt using ../keys/cert.pem and the endpoint from IDPS_ENDPOINT
//! idps-cli encrypt --job-id job-17 --data "4111 1111 1111 1111"
//!
//! # Decrypt against an explicit endpoint and CA certificate
//! idps-cli --endpoint idps.internal:443 --ca-cert /etc/idps/cert.pem \
//!     decrypt --job-id job-17 --data "<ciphertext>"
//!
//! # Local plaintext server
//! idps-cli --endpoint 127.0.0.1:50051 --plaintext encrypt --job-id dev --data hello
//! ```
//!
//! Settings not given on the command line come from `--config` (TOML) or the
//! `IDPS_*` environment variables; see `ClientConfig`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idps_client::{init_tracing, ClientConfig, IdpsClient};
use std::path::PathBuf;
use tracing::info;

/// Command-line client for the IDPS encryption service
#[derive(Parser)]
#[command(name = "idps-cli")]
#[command(author, version)]
#[command(about = "Encrypt and decrypt payloads with the IDPS service")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "IDPS_CONFIG")]
    config: Option<PathBuf>,

    /// Service endpoint (host:port or URI)
    #[arg(long)]
    endpoint: Option<String>,

    /// CA certificate used to verify the server
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Server name to verify instead of the endpoint host
    #[arg(long)]
    domain: Option<String>,

    /// Connect without TLS
    #[arg(long)]
    plaintext: bool,

    /// Per-request deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a plaintext payload
    Encrypt {
        /// Job the payload belongs to
        #[arg(long)]
        job_id: String,

        /// Plaintext to encrypt
        #[arg(long)]
        data: String,
    },

    /// Decrypt a ciphertext payload
    Decrypt {
        /// Job the payload belongs to
        #[arg(long)]
        job_id: String,

        /// Ciphertext to decrypt
        #[arg(long)]
        data: String,
    },
}

impl Args {
    /// Layer command-line overrides on top of file/env configuration
    ///
    /// A config file named with `--config` or `IDPS_CONFIG` must exist.
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match self.config {
            Some(ref path) => ClientConfig::from_file(path).with_context(|| {
                format!("Failed to load configuration from {}", path.display())
            })?,
            None => ClientConfig::from_env(),
        };

        if let Some(ref endpoint) = self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(ref path) = self.ca_cert {
            config.tls.ca_cert_path = Some(path.clone());
        }
        if let Some(ref domain) = self.domain {
            config.tls.domain_name = Some(domain.clone());
        }
        if self.plaintext {
            config.tls.enabled = false;
        }
        if let Some(ms) = self.timeout_ms {
            config.request_timeout_ms = ms;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.client_config()?;

    init_tracing(config.json_logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.endpoint,
        tls = config.tls.enabled,
        "IDPS client starting"
    );

    let client = IdpsClient::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.endpoint))?;

    match args.command {
        Command::Encrypt { job_id, data } => {
            let encrypted = client.encrypt(&job_id, &data).await?;
            println!("{}", encrypted.encrypted_data);
        }
        Command::Decrypt { job_id, data } => {
            let decrypted = client.decrypt(&job_id, &data).await?;
            println!("{}", decrypted.text_data);
        }
    }

    Ok(())
}
