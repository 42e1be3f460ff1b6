//! Smart plug communication.
//!
//! Kasa plugs (HS100/HS110/KP115) accept JSON commands on TCP port 9999. Each
//! frame is a 4-byte big-endian length followed by the payload obfuscated
//! with an XOR autokey cipher seeded with 171.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::DeviceConfig;

/// Command requesting system info and realtime energy meter data.
pub const METER_INFO_COMMAND: &str =
    r#"{"system":{"get_sysinfo":{}},"emeter":{"get_realtime":{},"get_vgain_igain":{}}}"#;

/// Initial key of the Kasa autokey cipher.
const INITIAL_KEY: u8 = 171;

/// Largest response frame accepted from a device.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Error type for device fetches.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Device did not answer within {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of raw telemetry text for a device address.
pub trait DeviceClient: Send + Sync {
    /// Fetch the raw telemetry payload from the device at `address`.
    fn fetch_telemetry(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<String, FetchError>> + Send;
}

impl<T: DeviceClient> DeviceClient for Arc<T> {
    fn fetch_telemetry(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<String, FetchError>> + Send {
        (**self).fetch_telemetry(address)
    }
}

/// Encrypt a command into a length-prefixed frame.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(plain.len() + 4);
    frame.extend_from_slice(&(plain.len() as u32).to_be_bytes());

    let mut key = INITIAL_KEY;
    for &byte in plain {
        key ^= byte;
        frame.push(key);
    }
    frame
}

/// Decrypt a frame body (without the length prefix).
pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

/// Client for the Kasa local TCP protocol.
#[derive(Debug, Clone)]
pub struct KasaClient {
    port: u16,
    timeout: Duration,
}

impl KasaClient {
    /// Create a client connecting to `port` with the given I/O timeout.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Create a client from the device configuration.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.port, Duration::from_millis(config.timeout_ms))
    }

    /// Send a command and return the decrypted response.
    pub async fn query(&self, address: &str, command: &str) -> Result<String, FetchError> {
        tokio::time::timeout(self.timeout, self.exchange(address, command))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    async fn exchange(&self, address: &str, command: &str) -> Result<String, FetchError> {
        let endpoint = format!("{}:{}", address, self.port);
        let mut stream =
            TcpStream::connect(&endpoint)
                .await
                .map_err(|source| FetchError::Connect {
                    address: endpoint.clone(),
                    source,
                })?;

        trace!(endpoint = %endpoint, "Connected to device");

        stream.write_all(&encrypt(command.as_bytes())).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FetchError::InvalidResponse(format!(
                "frame length {} exceeds {}",
                len, MAX_FRAME_LEN
            )));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        debug!(endpoint = %endpoint, bytes = len, "Received device response");

        String::from_utf8(decrypt(&body))
            .map_err(|e| FetchError::InvalidResponse(format!("not UTF-8: {}", e)))
    }
}

impl DeviceClient for KasaClient {
    async fn fetch_telemetry(&self, address: &str) -> Result<String, FetchError> {
        self.query(address, METER_INFO_COMMAND).await
    }
}
