//! Node control through lnd's REST gateway.
//!
//! Wallet-unlocker calls (`/v1/state`, `/v1/genseed`, `/v1/initwallet`) are
//! unauthenticated. Every other call carries the node's admin macaroon,
//! hex-encoded, in the `Grpc-Metadata-macaroon` header. The macaroon is read
//! on every call because lnd only writes it once the wallet exists.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{ControlError, NodeConnector, NodeControl, NodeReadiness};
use crate::registry::NodeIdentity;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct StateResponse {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct GenSeedResponse {
    cipher_seed_mnemonic: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GetInfoResponse {
    identity_pubkey: String,
}

#[derive(Debug, Deserialize)]
struct NewAddressResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    payment_error: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// REST client for a single lnd node
pub struct RestNode {
    base_url: String,
    credential: PathBuf,
    tls_cert: PathBuf,
    tls_verify: bool,
    http: OnceCell<reqwest::Client>,
}

impl RestNode {
    pub fn new(node: &NodeIdentity, tls_verify: bool) -> Self {
        Self {
            base_url: format!("https://{}", node.rest_address),
            credential: node.credential.clone(),
            tls_cert: node.tls_cert.clone(),
            tls_verify,
            http: OnceCell::new(),
        }
    }

    /// Builds the HTTP client on first use, once lnd has written its TLS certificate
    async fn client(&self) -> Result<&reqwest::Client, ControlError> {
        self.http
            .get_or_try_init(|| async {
                let mut builder = reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .danger_accept_invalid_certs(!self.tls_verify);

                if self.tls_verify {
                    let pem = tokio::fs::read(&self.tls_cert).await.map_err(|source| {
                        ControlError::Credential {
                            path: self.tls_cert.display().to_string(),
                            source,
                        }
                    })?;
                    let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ControlError::Request {
                        endpoint: self.base_url.clone(),
                        message: e.to_string(),
                    })?;
                    builder = builder.add_root_certificate(cert);
                }

                builder.build().map_err(|e| ControlError::Request {
                    endpoint: self.base_url.clone(),
                    message: e.to_string(),
                })
            })
            .await
    }

    async fn macaroon(&self) -> Result<String, ControlError> {
        let bytes = tokio::fs::read(&self.credential)
            .await
            .map_err(|source| ControlError::Credential {
                path: self.credential.display().to_string(),
                source,
            })?;
        Ok(hex::encode(bytes))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
        authenticated: bool,
    ) -> Result<T, ControlError> {
        let endpoint = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, endpoint);

        let mut request = self.client().await?.request(method, &endpoint);
        if authenticated {
            request = request.header(MACAROON_HEADER, self.macaroon().await?);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| ControlError::Request {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ControlError::Request {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or_default();
            let message = if message.is_empty() { text } else { message };
            return Err(ControlError::Request {
                endpoint,
                message: format!("{}: {}", status, message),
            });
        }

        serde_json::from_str(&text).map_err(|e| ControlError::Decode(format!("{}: {}", endpoint, e)))
    }
}

#[async_trait]
impl NodeControl for RestNode {
    async fn readiness(&self) -> NodeReadiness {
        match self
            .request::<StateResponse>(reqwest::Method::GET, "/v1/state", None, false)
            .await
        {
            Ok(response) => readiness_from_state(&response.state),
            Err(_) => NodeReadiness::Down,
        }
    }

    async fn get_identity(&self) -> Result<String, ControlError> {
        let info: GetInfoResponse = self
            .request(reqwest::Method::GET, "/v1/getinfo", None, true)
            .await?;
        Ok(info.identity_pubkey)
    }

    async fn generate_seed(&self) -> Result<Vec<String>, ControlError> {
        let seed: GenSeedResponse = self
            .request(reqwest::Method::GET, "/v1/genseed", None, false)
            .await?;
        if seed.cipher_seed_mnemonic.is_empty() {
            return Err(ControlError::Decode("empty seed mnemonic".to_string()));
        }
        Ok(seed.cipher_seed_mnemonic)
    }

    async fn create_wallet(&self, seed: &[String], passphrase: &str) -> Result<(), ControlError> {
        let body = json!({
            "wallet_password": BASE64.encode(passphrase.as_bytes()),
            "cipher_seed_mnemonic": seed,
        });
        let _: serde_json::Value = self
            .request(reqwest::Method::POST, "/v1/initwallet", Some(body), false)
            .await?;
        Ok(())
    }

    async fn new_deposit_address(&self) -> Result<String, ControlError> {
        let response: NewAddressResponse = self
            .request(
                reqwest::Method::GET,
                "/v1/newaddress?type=NESTED_PUBKEY_HASH",
                None,
                true,
            )
            .await?;
        Ok(response.address)
    }

    async fn connect_to_peer(&self, identity: &str, address: &str) -> Result<(), ControlError> {
        let body = json!({
            "addr": { "pubkey": identity, "host": address },
            "perm": false,
        });
        let _: serde_json::Value = self
            .request(reqwest::Method::POST, "/v1/peers", Some(body), true)
            .await?;
        Ok(())
    }

    async fn open_channel(&self, peer_identity: &str, amount: u64) -> Result<(), ControlError> {
        let body = json!({
            "node_pubkey_string": peer_identity,
            "local_funding_amount": amount.to_string(),
        });
        let _: serde_json::Value = self
            .request(reqwest::Method::POST, "/v1/channels", Some(body), true)
            .await?;
        Ok(())
    }

    async fn create_invoice(&self, amount: u64, memo: &str) -> Result<String, ControlError> {
        let body = json!({ "value": amount.to_string(), "memo": memo });
        let response: AddInvoiceResponse = self
            .request(reqwest::Method::POST, "/v1/invoices", Some(body), true)
            .await?;
        Ok(response.payment_request)
    }

    async fn settle(&self, payment_request: &str) -> Result<(), ControlError> {
        let body = json!({ "payment_request": payment_request });
        let response: SendResponse = self
            .request(reqwest::Method::POST, "/v1/channels/transactions", Some(body), true)
            .await?;
        if !response.payment_error.is_empty() {
            return Err(ControlError::Rejected(response.payment_error));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControlError> {
        let _: serde_json::Value = self
            .request(reqwest::Method::POST, "/v1/stop", Some(json!({})), true)
            .await?;
        Ok(())
    }
}

/// Maps lnd's wallet state names onto [`NodeReadiness`]
fn readiness_from_state(state: &str) -> NodeReadiness {
    match state {
        "RPC_ACTIVE" | "SERVER_ACTIVE" => NodeReadiness::Active,
        "NON_EXISTING" | "LOCKED" | "UNLOCKED" | "WAITING_TO_START" => NodeReadiness::AwaitingWallet,
        // Older lnd versions omit the zero-valued NON_EXISTING state entirely
        "" => NodeReadiness::AwaitingWallet,
        _ => NodeReadiness::Down,
    }
}

/// Hands out [`RestNode`] clients
#[derive(Debug, Clone, Default)]
pub struct RestConnector {
    pub tls_verify: bool,
}

impl NodeConnector for RestConnector {
    fn connect(&self, node: &NodeIdentity) -> Arc<dyn NodeControl> {
        Arc::new(RestNode::new(node, self.tls_verify))
    }
}
