use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 10;
const BASE_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub user_agent: Option<String>,
}

/// Outcome of a single website request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered; `body` is only filled for GET requests, whatever
    /// the status.
    Response { status: u16, body: Option<String> },
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Response { status, .. } if (200..300).contains(status))
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Response { body, .. } => body.as_deref(),
            ProbeOutcome::Failed(_) => None,
        }
    }
}

/// HTTP client for website checks: redirects followed, certificate
/// verification disabled, fixed timeout.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    max_retries: u32,
}

impl Prober {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(true);
        if let Some(ua) = &config.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    pub async fn head(&self, url: &str) -> ProbeOutcome {
        self.request(Method::HEAD, url).await
    }

    pub async fn get(&self, url: &str) -> ProbeOutcome {
        self.request(Method::GET, url).await
    }

    async fn request(&self, method: Method, url: &str) -> ProbeOutcome {
        for attempt in 0..=self.max_retries {
            let outcome = self.send_once(method.clone(), url).await;
            let (outcome, transient) = match outcome {
                Ok(pair) => pair,
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect();
                    (ProbeOutcome::Failed(e.to_string()), transient)
                }
            };

            if !transient || attempt == self.max_retries {
                return outcome;
            }

            let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
            warn!(
                "Transient failure on {} (attempt {}/{}), retrying in {:.1}s",
                url,
                attempt + 1,
                self.max_retries,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
        }
        unreachable!("retry loop always returns")
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
    ) -> Result<(ProbeOutcome, bool), reqwest::Error> {
        let read_body = method == Method::GET;
        let response = self.client.request(method, url).send().await?;
        let status = response.status();
        let transient = is_transient(status);
        let body = if read_body {
            Some(response.text().await?)
        } else {
            None
        };
        debug!(url, status = status.as_u16(), "probed");
        Ok((
            ProbeOutcome::Response {
                status: status.as_u16(),
                body,
            },
            transient,
        ))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}


#[cfg(test)]
mod tests {
    use super::*;

    fn prober(max_retries: u32) -> Prober {
        Prober::new(&ProbeConfig {
            timeout: Duration::from_secs(5),
            max_retries,
            user_agent: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn head_success() {
        let url = test_server::serve("200 OK", "hello").await;
        let outcome = prober(0).head(&url).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.body(), None);
    }

    #[tokio::test]
    async fn get_reads_body_of_any_status() {
        let url = test_server::serve("404 Not Found", "<p>site by Inovaki</p>").await;
        let outcome = prober(0).get(&url).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.body(), Some("<p>site by Inovaki</p>"));
    }

    #[tokio::test]
    async fn server_error_is_retried_then_reported() {
        let url = test_server::serve("503 Service Unavailable", "busy").await;
        let outcome = prober(1).head(&url).await;
        assert_eq!(outcome, ProbeOutcome::Response { status: 503, body: None });

        let outcome = prober(1).get(&url).await;
        assert_eq!(outcome.body(), Some("busy"));
    }

    #[tokio::test]
    async fn connection_refused_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = prober(0).head(&format!("http://{}/", addr)).await;
        assert!(matches!(outcome, ProbeOutcome::Failed(_)));
        assert!(!outcome.is_success());
    }
}
