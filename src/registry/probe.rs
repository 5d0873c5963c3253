//! Liveness probes for registered services, per spec §4.2/§5.
//!
//! Grounded on `examples/saorsa-labs-fae/src/fae_llm/providers/local_probe.rs`'s
//! `ProbeStatus`/model-listing shape, adapted to the Ollama-style
//! `GET /api/tags` contract from spec §6.

use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::Capability;

/// Generic probe: open a TCP connection to `host:port` with a hard
/// timeout, per spec §4.2/§5. Success means reachable, nothing more.
pub async fn tcp_probe(endpoint: &str, timeout_secs: u64) -> bool {
    let addr = match host_port(endpoint) {
        Some(a) => a,
        None => return false,
    };
    match timeout(Duration::from_secs(timeout_secs), TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("tcp probe to {addr} failed: {e}");
            false
        }
        Err(_) => {
            debug!("tcp probe to {addr} timed out after {timeout_secs}s");
            false
        }
    }
}

/// STT/TTS capability probe: a 200-OK on the endpoint's base URL, in
/// addition to TCP reachability, per spec §4.2.
pub async fn http_ok_probe(client: &reqwest::Client, endpoint: &str, timeout_secs: u64) -> bool {
    let request = client.get(endpoint).timeout(Duration::from_secs(timeout_secs));
    match request.send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!("http probe to {endpoint} failed: {e}");
            false
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

/// LLM capability probe: the requested model appears in `GET /api/tags`'s
/// model list, per spec §4.2/§6.
pub async fn llm_model_probe(
    client: &reqwest::Client,
    endpoint: &str,
    model: &str,
    timeout_secs: u64,
) -> bool {
    let url = format!("{}/api/tags", endpoint.trim_end_matches('/'));
    let request = client.get(&url).timeout(Duration::from_secs(timeout_secs));
    let response = match request.send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            debug!("model list probe to {url} returned {}", r.status());
            return false;
        }
        Err(e) => {
            debug!("model list probe to {url} failed: {e}");
            return false;
        }
    };
    match response.json::<TagsResponse>().await {
        Ok(tags) => tags.models.iter().any(|m| m.name == model),
        Err(e) => {
            debug!("model list probe to {url}: bad response body: {e}");
            false
        }
    }
}

/// Dispatch the right probe for a capability. Adapters that are always
/// treated as available (e.g. a locally bundled wake word model) skip the
/// network round trip.
pub async fn probe_capability(
    client: &reqwest::Client,
    capability: Capability,
    endpoint: Option<&str>,
    model: Option<&str>,
    timeout_secs: u64,
) -> bool {
    let Some(endpoint) = endpoint else {
        return matches!(capability, Capability::WakeWord);
    };
    if !tcp_probe(endpoint, timeout_secs).await {
        return false;
    }
    match capability {
        Capability::Stt | Capability::Tts => {
            http_ok_probe(client, endpoint, timeout_secs).await
        }
        Capability::Llm => match model {
            Some(m) => llm_model_probe(client, endpoint, m, timeout_secs).await,
            None => true,
        },
        Capability::WakeWord => true,
    }
}

/// Extract `host:port` from a URL-shaped or bare `host:port` endpoint
/// string for the TCP reachability check.
fn host_port(endpoint: &str) -> Option<String> {
    if let Ok(url) = url::Url::parse(endpoint) {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        return Some(format!("{host}:{port}"));
    }
    if endpoint.contains(':') {
        return Some(endpoint.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_parses_http_url() {
        assert_eq!(
            host_port("http://localhost:8080/v1"),
            Some("localhost:8080".to_string())
        );
    }

    #[test]
    fn host_port_parses_https_default_port() {
        assert_eq!(
            host_port("https://example.com/v1"),
            Some("example.com:443".to_string())
        );
    }

    #[test]
    fn host_port_passes_through_bare_host_port() {
        assert_eq!(host_port("127.0.0.1:9000"), Some("127.0.0.1:9000".to_string()));
    }

    #[tokio::test]
    async fn tcp_probe_fails_for_unreachable_port() {
        let ok = tcp_probe("127.0.0.1:1", 1).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn wakeword_probe_is_always_available_without_endpoint() {
        let client = reqwest::Client::new();
        let ok = probe_capability(&client, Capability::WakeWord, None, None, 1).await;
        assert!(ok);
    }
}
