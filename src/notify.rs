// Outbound activity notifications
// POSTs each result as JSON to a configured endpoint. One attempt per result, no retries.

use std::time::Duration;

use chrono::Local;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationResult;
use crate::engine::NotificationSink;
use crate::error::{MonitorError, Result};

/// Body of a notification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityNotification {
    /// Unix seconds
    pub timestamp: i64,
    pub date_time: String,
    pub activity: String,
    pub confidence: f64,
    pub source: String,
    pub metadata: serde_json::Value,
}

impl ActivityNotification {
    pub fn from_result(result: &ClassificationResult) -> Self {
        Self {
            timestamp: result.timestamp.timestamp(),
            date_time: result
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            activity: result.activity.as_str().to_string(),
            confidence: result.confidence(),
            source: result.source.as_str().to_string(),
            metadata: result.metadata(),
        }
    }
}

/// Client for the notification endpoint.
pub struct HttpNotifier {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            // Ensure url doesn't have trailing slash
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send(&self, notification: &ActivityNotification) -> Result<()> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::NotificationRejected(format!(
                "{} returned {}",
                self.url, status
            )));
        }

        log::debug!("Notified {} of '{}'", self.url, notification.activity);
        Ok(())
    }

    /// Query the endpoint's status resource.
    pub fn status(&self) -> Result<serde_json::Value> {
        let url = format!("{}/status", self.url);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(MonitorError::NotificationRejected(format!(
                "Status request failed with status: {}",
                response.status()
            )));
        }

        let status = response.json()?;
        Ok(status)
    }
}

impl NotificationSink for HttpNotifier {
    fn notify(&self, result: &ClassificationResult) -> Result<()> {
        self.send(&ActivityNotification::from_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::rules;
    use crate::features::FeatureVector;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Serve one request with the given status line and body; returns the raw request.
    fn one_shot_server(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            tx.send(String::from_utf8_lossy(&raw).to_string()).unwrap();
        });

        (url, rx)
    }

    fn sample_result() -> ClassificationResult {
        rules::classify(&FeatureVector {
            motion_ratio: 0.8,
            ..FeatureVector::default()
        })
    }

    #[test]
    fn test_notification_payload() {
        let result = sample_result();
        let payload = ActivityNotification::from_result(&result);
        assert_eq!(payload.activity, "busy");
        assert_eq!(payload.source, "rule");
        assert_eq!(payload.timestamp, result.timestamp.timestamp());
        assert!(payload.metadata["features"]["motion_ratio"].as_f64().is_some());
    }

    #[test]
    fn test_posts_json_with_bearer_token() {
        let (url, requests) = one_shot_server("200 OK", "{}");
        let notifier = HttpNotifier::new(&format!("{}/", url), Some("secret".into()), Duration::from_secs(5)).unwrap();
        notifier.notify(&sample_result()).unwrap();

        let request = requests.recv().unwrap();
        assert!(request.starts_with("POST / HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("\"activity\":\"busy\""));
    }

    #[test]
    fn test_non_success_status_is_error() {
        let (url, _requests) = one_shot_server("503 Service Unavailable", "");
        let notifier = HttpNotifier::new(&url, None, Duration::from_secs(5)).unwrap();
        let err = notifier.notify(&sample_result()).unwrap_err();
        assert!(matches!(err, MonitorError::NotificationRejected(_)));
    }

    #[test]
    fn test_status_endpoint() {
        let (url, requests) = one_shot_server("200 OK", "{\"status\":\"ok\"}");
        let notifier = HttpNotifier::new(&url, None, Duration::from_secs(5)).unwrap();
        let status = notifier.status().unwrap();
        assert_eq!(status["status"], "ok");
        assert!(requests.recv().unwrap().starts_with("GET /status HTTP/1.1"));
    }

    #[test]
    fn test_unreachable_endpoint_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let notifier = HttpNotifier::new(&url, None, Duration::from_secs(2)).unwrap();
        assert!(matches!(notifier.notify(&sample_result()), Err(MonitorError::Http(_))));
    }
}
