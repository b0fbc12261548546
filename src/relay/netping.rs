//! NetPing-style HTTP relay (`relay.cgi`).
//!
//! The relay's web interface answers `GET /relay.cgi?r<N>` with the outlet
//! state and `GET /relay.cgi?r<N>=<0|1>` by switching it. Every reply that
//! was accepted contains `ok`, e.g. `relay_result('ok', 1, 1)`. Requests use
//! HTTP basic auth.

use std::time::Duration;

use base64::Engine;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::AUTHORIZATION;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use super::PowerRelay;
use crate::config::RelayConfig;
use crate::error::RelayError;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Outlet queried by [`PowerRelay::check`].
const CHECK_OUTLET: u8 = 1;

/// HTTP client for one relay.
pub struct NetPingRelay {
    client: Client<HttpConnector, Empty<Bytes>>,
    address: String,
    authorization: String,
}

impl NetPingRelay {
    pub fn new(config: &RelayConfig) -> Self {
        let credentials = format!("{}:{}", config.username, config.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            address: config.address.clone(),
            authorization: format!("Basic {encoded}"),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Issue one `relay.cgi` request and return the body once it reports `ok`.
    async fn request(&self, query: &str) -> Result<String, RelayError> {
        let uri_text = relay_uri(&self.address, query);
        let uri: Uri = uri_text.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            RelayError::Request {
                uri: uri_text.clone(),
                reason: e.to_string(),
            }
        })?;
        let req = Request::get(uri)
            .header(AUTHORIZATION, &self.authorization)
            .body(Empty::<Bytes>::new())
            .map_err(|e| RelayError::Request {
                uri: uri_text.clone(),
                reason: e.to_string(),
            })?;

        let exchange = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| RelayError::Request {
                    uri: uri_text.clone(),
                    reason: e.to_string(),
                })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(RelayError::Status {
                    status: status.as_u16(),
                });
            }
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| RelayError::Request {
                    uri: uri_text.clone(),
                    reason: e.to_string(),
                })?
                .to_bytes();
            Ok::<_, RelayError>(String::from_utf8_lossy(&body).into_owned())
        };

        let body = tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| RelayError::Timeout(uri_text.clone()))??;
        debug!("Relay: {uri_text} -> {}", body.trim());

        if is_ok_reply(&body) {
            Ok(body)
        } else {
            Err(RelayError::Response(body.trim().to_string()))
        }
    }
}

impl PowerRelay for NetPingRelay {
    async fn check(&mut self) -> Result<(), RelayError> {
        self.request(&format!("r{CHECK_OUTLET}")).await.map(|_| ())
    }

    async fn pulse(&mut self, outlet: u8, width: Duration) -> Result<(), RelayError> {
        self.request(&format!("r{outlet}=0")).await?;
        tokio::time::sleep(width).await;
        Ok(())
    }

    async fn turn_on(&mut self, outlet: u8) -> Result<(), RelayError> {
        self.request(&format!("r{outlet}=1")).await.map(|_| ())
    }
}

fn relay_uri(address: &str, query: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") {
        format!("{address}/relay.cgi?{query}")
    } else {
        format!("http://{address}/relay.cgi?{query}")
    }
}

fn is_ok_reply(body: &str) -> bool {
    body.contains("'ok'") || body.trim().eq_ignore_ascii_case("ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_uri_bare_host() {
        assert_eq!(
            relay_uri("10.0.0.56", "r2=1"),
            "http://10.0.0.56/relay.cgi?r2=1"
        );
    }

    #[test]
    fn test_relay_uri_with_scheme() {
        assert_eq!(
            relay_uri("http://10.0.0.56:8080/", "r1"),
            "http://10.0.0.56:8080/relay.cgi?r1"
        );
    }

    #[test]
    fn test_is_ok_reply() {
        assert!(is_ok_reply("relay_result('ok', 1, 1);"));
        assert!(is_ok_reply("OK\n"));
        assert!(!is_ok_reply("relay_result('error');"));
        assert!(!is_ok_reply("<html>401 Unauthorized</html>"));
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let relay = NetPingRelay::new(&RelayConfig {
            address: "10.0.0.56".to_string(),
            outlet: 2,
            username: "visor".to_string(),
            password: "ping".to_string(),
        });
        assert_eq!(relay.authorization, "Basic dmlzb3I6cGluZw==");
        assert_eq!(relay.address(), "10.0.0.56");
    }
}
