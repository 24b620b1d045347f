use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::GeofabrikError;

/// Browser-like identity sent with every request; the server rejects some bare clients.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

pub trait PageSource: Send + Sync {
    fn fetch_page(&self, url: &str) -> Result<String, GeofabrikError>;
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), GeofabrikError>;
}

#[derive(Clone)]
pub struct GeofabrikHttpClient {
    client: Client,
}

impl GeofabrikHttpClient {
    pub fn new() -> Result<Self, GeofabrikError> {
        Self::with_settings(DEFAULT_USER_AGENT, Duration::from_secs(60))
    }

    pub fn with_settings(user_agent: &str, timeout: Duration) -> Result<Self, GeofabrikError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(|err| GeofabrikError::Http {
                url: String::new(),
                message: format!("invalid user agent: {err}"),
            })?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.5"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| GeofabrikError::http("", err))?;
        Ok(Self { client })
    }

    fn handle_status(
        url: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, GeofabrikError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .map(|text| text.chars().take(200).collect())
            .unwrap_or_else(|_| "request failed".to_string());
        Err(GeofabrikError::HttpStatus {
            url: url.to_string(),
            status,
            message,
        })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, GeofabrikError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(url, status, delay, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(url, error = %err, delay, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(GeofabrikError::http(url, err));
                }
            }
        }
    }
}

impl PageSource for GeofabrikHttpClient {
    fn fetch_page(&self, url: &str) -> Result<String, GeofabrikError> {
        let response = self.send_with_retries(url)?;
        let response = Self::handle_status(url, response)?;
        response.text().map_err(|err| GeofabrikError::http(url, err))
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), GeofabrikError> {
        let response = self.send_with_retries(url)?;
        let mut response = Self::handle_status(url, response)?;
        let mut file = File::create(destination).map_err(GeofabrikError::fs)?;
        std::io::copy(&mut response, &mut file).map_err(|err| GeofabrikError::http(url, err))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
