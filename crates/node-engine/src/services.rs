//! AI service clients
//!
//! Nodes reach language models, speech recognition and a Python
//! interpreter through [`CompletionService`], [`TranscriptionService`] and
//! [`CodeService`]. The shipped clients talk HTTP to locally running
//! servers:
//! - [`HttpCompletionService`]: OpenAI-compatible `/v1/chat/completions`
//! - [`HttpTranscriptionService`]: whisper.cpp server `/load` + `/inference`
//! - [`HttpCodeService`]: JSON `{code, attrs}` posted to the server root
//!
//! All keep a [`ResponseCache`] keyed by a blake3 hash of the request, so
//! re-running a pass with unchanged inputs doesn't hit the server again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{NodeEngineError, Result};

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe WAV `audio` with the named model
    async fn transcribe(&self, audio: &[u8], model: &str) -> Result<String>;
}

/// What a code run left behind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeReply {
    /// Variables by name after the run
    #[serde(alias = "Attrs")]
    pub attrs: serde_json::Map<String, serde_json::Value>,
    /// Error raised by the code, empty on success
    #[serde(alias = "Err")]
    pub err: String,
}

#[async_trait]
pub trait CodeService: Send + Sync {
    /// Run `code` with `attrs` bound as variables
    async fn run(&self, code: &str, attrs: &serde_json::Map<String, serde_json::Value>) -> Result<CodeReply>;
}

/// Responses keyed by content hash, optionally persisted as JSON
#[derive(Debug, Default)]
pub struct ResponseCache {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, String>>,
}

impl ResponseCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by `<dir>/<name>.json`, loaded if it exists
    pub async fn open(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.json", name));
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable cache {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// blake3 hex digest over all parts
    pub fn key(parts: &[&[u8]]) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub async fn insert(&self, key: String, value: String) -> Result<()> {
        let json = {
            let mut entries = self.entries.lock();
            entries.insert(key, value);
            match &self.path {
                Some(_) => serde_json::to_string(&*entries)?,
                None => return Ok(()),
            }
        };
        if let Some(path) = &self.path {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(path, json).await?;
        }
        Ok(())
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NodeEngineError::failed(format!(
        "statusCode: {} {}",
        status.as_u16(),
        body.trim()
    )))
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

/// Chat completion over an OpenAI-compatible server
pub struct HttpCompletionService {
    client: reqwest::Client,
    url: String,
    model: String,
    system: String,
    cache: ResponseCache,
}

impl HttpCompletionService {
    pub fn new(url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.to_string(),
            model: model.to_string(),
            system: "You are a helpful assistant.".to_string(),
            cache: ResponseCache::in_memory(),
        })
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = system.to_string();
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let key = ResponseCache::key(&[
            self.model.as_bytes(),
            self.system.as_bytes(),
            prompt.as_bytes(),
        ]);
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("Completion cache hit");
            return Ok(hit);
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
        };
        let response = self
            .client
            .post(endpoint(&self.url, "v1/chat/completions"))
            .json(&request)
            .send()
            .await?;
        let reply: ChatResponse = check_status(response).await?.json().await?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| NodeEngineError::failed("completion returned no choices"))?;

        self.cache.insert(key, text.clone()).await?;
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionReply {
    text: String,
}

/// Speech to text over a whisper.cpp server
pub struct HttpTranscriptionService {
    client: reqwest::Client,
    url: String,
    models_dir: String,
    loaded: tokio::sync::Mutex<String>,
    cache: ResponseCache,
}

impl HttpTranscriptionService {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.to_string(),
            models_dir: "models".to_string(),
            loaded: tokio::sync::Mutex::new(String::new()),
            cache: ResponseCache::in_memory(),
        })
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    async fn load_model(&self, model: &str) -> Result<()> {
        let form = reqwest::multipart::Form::new()
            .text("model", format!("{}/{}.bin", self.models_dir, model));
        let response = self
            .client
            .post(endpoint(&self.url, "load"))
            .multipart(form)
            .send()
            .await?;
        check_status(response).await?;
        log::info!("Whisper model '{}' loaded", model);
        Ok(())
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn transcribe(&self, audio: &[u8], model: &str) -> Result<String> {
        let key = ResponseCache::key(&[model.as_bytes(), audio]);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        // one request at a time, the server holds a single model
        let mut loaded = self.loaded.lock().await;
        if *loaded != model {
            self.load_model(model).await?;
            *loaded = model.to_string();
        }

        let file = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("response_format", "json")
            .text("temperature", "0");
        let response = self
            .client
            .post(endpoint(&self.url, "inference"))
            .multipart(form)
            .send()
            .await?;
        let reply: TranscriptionReply = check_status(response).await?.json().await?;
        drop(loaded);

        self.cache.insert(key, reply.text.clone()).await?;
        Ok(reply.text)
    }
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
    attrs: &'a serde_json::Map<String, serde_json::Value>,
}

/// Python over the code server
pub struct HttpCodeService {
    client: reqwest::Client,
    url: String,
    cache: ResponseCache,
}

impl HttpCodeService {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.to_string(),
            cache: ResponseCache::in_memory(),
        })
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }
}

#[async_trait]
impl CodeService for HttpCodeService {
    async fn run(&self, code: &str, attrs: &serde_json::Map<String, serde_json::Value>) -> Result<CodeReply> {
        let request = CodeRequest { code, attrs };
        let body = serde_json::to_vec(&request)?;
        let key = ResponseCache::key(&[body.as_slice()]);
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("Code cache hit");
            return Ok(serde_json::from_str(&hit)?);
        }

        let response = self
            .client
            .post(endpoint(&self.url, ""))
            .json(&request)
            .send()
            .await?;
        let text = check_status(response).await?.text().await?;
        let reply: CodeReply = serde_json::from_str(&text)?;

        self.cache.insert(key, text).await?;
        Ok(reply)
    }
}
