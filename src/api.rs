use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

pub const THREAD_ENDPOINT: &str = "api/thread";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Why a thread fetch produced no payload. The watcher treats every
/// variant the same way.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(StatusCode),
    #[error("malformed thread payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid thread url: {0}")]
    Url(#[from] url::ParseError),
    #[error("fetch worker went away")]
    Disconnected,
}

pub type FetchResult = std::result::Result<RemoteThread, FetchError>;

pub trait ThreadSource: Send + Sync {
    fn fetch_thread(&self, board: &str, thread_refno: u64) -> FetchResult;
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        }

        let mut base_url = Url::parse(config.base_url.trim())
            .with_context(|| format!("api: parse base url {:?}", config.base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("api: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn thread_url(&self, board: &str, thread_refno: u64) -> std::result::Result<Url, FetchError> {
        Ok(self
            .base_url
            .join(&format!("{THREAD_ENDPOINT}/{board}/{thread_refno}"))?)
    }
}

impl ThreadSource for Client {
    fn fetch_thread(&self, board: &str, thread_refno: u64) -> FetchResult {
        let url = self.thread_url(board, thread_refno)?;
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.text()?;
        parse_thread(&body)
    }
}

pub fn parse_thread(body: &str) -> FetchResult {
    let envelope: ThreadEnvelope = serde_json::from_str(body)?;
    Ok(envelope.thread)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadEnvelope {
    pub thread: RemoteThread,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteThread {
    #[serde(default)]
    pub refno: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub posts: Vec<RemotePost>,
}

/// One post record as served by the thread endpoint. Identity fields are
/// optional here so a single bad record does not sink the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePost {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub refno: Option<u64>,
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mod_code: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<RemoteFile>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub thumbnail_location: String,
    #[serde(default)]
    pub thumbnail_width: u32,
    #[serde(default)]
    pub thumbnail_height: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub name: String,
}

/// Starts a thread fetch and hands back the channel its single result
/// arrives on.
pub trait Fetcher {
    fn start(&self, board: &str, thread_refno: u64) -> Receiver<FetchResult>;
}

/// Runs each fetch on its own worker thread so the UI loop never blocks.
pub struct BackgroundFetcher {
    source: Arc<dyn ThreadSource>,
}

impl BackgroundFetcher {
    pub fn new(source: Arc<dyn ThreadSource>) -> Self {
        Self { source }
    }
}

impl Fetcher for BackgroundFetcher {
    fn start(&self, board: &str, thread_refno: u64) -> Receiver<FetchResult> {
        let (tx, rx) = bounded(1);
        let source = self.source.clone();
        let board = board.to_string();
        thread::spawn(move || {
            let result = source.fetch_thread(&board, thread_refno);
            let _ = tx.send(result);
        });
        rx
    }
}

/// Runs the fetch on the calling thread; the result is already waiting in
/// the channel when `start` returns.
pub struct InlineFetcher {
    source: Arc<dyn ThreadSource>,
}

impl InlineFetcher {
    pub fn new(source: Arc<dyn ThreadSource>) -> Self {
        Self { source }
    }
}

impl Fetcher for InlineFetcher {
    fn start(&self, board: &str, thread_refno: u64) -> Receiver<FetchResult> {
        let (tx, rx) = bounded(1);
        let _ = tx.send(self.source.fetch_thread(board, thread_refno));
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thread_with_optional_fields() {
        let body = r#"{
            "thread": {
                "refno": 7,
                "lastModified": 1700000000000,
                "locked": true,
                "posts": [
                    {"id": 1, "refno": 1, "date": 1700000000000, "html": "hi", "subject": "topic"},
                    {"id": 2, "refno": 2, "date": 1700000001000, "name": null,
                     "files": [{"location": "/media/a.png", "thumbnailLocation": "/media/a_t.png",
                                "thumbnailWidth": 120, "thumbnailHeight": 80,
                                "width": 1200, "height": 800, "size": 34567, "name": "a.png"}]}
                ]
            }
        }"#;
        let thread = parse_thread(body).unwrap();
        assert_eq!(thread.refno, Some(7));
        assert!(thread.locked);
        assert!(!thread.sticky);
        assert_eq!(thread.posts.len(), 2);
        assert_eq!(thread.posts[0].subject.as_deref(), Some("topic"));
        assert_eq!(thread.posts[1].name, None);
        let files = thread.posts[1].files.as_ref().unwrap();
        assert_eq!(files[0].thumbnail_width, 120);
        assert_eq!(files[0].size, 34567);
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        let err = parse_thread("{\"thread\": [").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn thread_url_joins_board_and_refno() {
        let client = Client::new(ClientConfig {
            base_url: "http://localhost:5000/chan".into(),
            user_agent: "thread-watch/test".into(),
            timeout: None,
            http_client: None,
        })
        .unwrap();
        let url = client.thread_url("g", 42).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/chan/api/thread/g/42");
    }

    #[test]
    fn empty_user_agent_is_rejected() {
        let result = Client::new(ClientConfig {
            base_url: "http://localhost:5000".into(),
            ..ClientConfig::default()
        });
        assert!(result.is_err());
    }
}
