// src/notify.rs

//! Webhook notification of drift reports.
//!
//! Posts the drift change-set JSON verbatim to a configured endpoint.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::info;

/// Timeout for webhook deliveries (10 seconds).
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client wrapper for webhook posts.
pub struct Notifier {
    client: Client,
    url: String,
}

impl Notifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Webhook(format!("failed to create HTTP client: {}", e)))?;
        Ok(Notifier { client, url: url.to_string() })
    }

    /// Deliver a JSON payload; non-2xx responses are errors.
    pub fn post(&self, payload: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .map_err(|e| Error::Webhook(format!("delivery to {} failed: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Webhook(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }
        info!("Posted drift report to {}", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one request on a local port with the given status line.
    fn serve_once(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Drain the full request (headers plus content-length body)
            // before answering, so the client never sees a closed pipe.
            let mut buf = [0u8; 8192];
            let mut seen: Vec<u8> = Vec::new();
            loop {
                let header_end = seen.windows(4).position(|w| w == b"\r\n\r\n");
                if let Some(end) = header_end {
                    let headers = String::from_utf8_lossy(&seen[..end]).to_lowercase();
                    let body_len = headers
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if seen.len() >= end + 4 + body_len {
                        break;
                    }
                }
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            let _ = stream.write_all(response.as_bytes());
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_post_succeeds_on_2xx() {
        let url = serve_once("200 OK");
        let notifier = Notifier::new(&url).unwrap();
        assert!(notifier.post(&json!({ "has_drift": true })).is_ok());
    }

    #[test]
    fn test_non_2xx_is_an_error() {
        let url = serve_once("500 Internal Server Error");
        let notifier = Notifier::new(&url).unwrap();
        match notifier.post(&json!({ "has_drift": true })) {
            Err(Error::Webhook(message)) => assert!(message.contains("500")),
            other => panic!("expected webhook error, got {:?}", other),
        }
    }

    #[test]
    fn test_unreachable_endpoint_is_an_error() {
        // Bind then drop to get a port with nothing listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let notifier = Notifier::new(&url).unwrap();
        assert!(matches!(
            notifier.post(&json!({})),
            Err(Error::Webhook(_))
        ));
    }
}
