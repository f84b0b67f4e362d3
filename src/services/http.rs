//! HTTP clients for the speech synthesis and image generation services
//!
//! Both services speak JSON with camelCase fields. Generated media is either
//! returned as a URL (downloaded into the run directory) or as a path already
//! visible on the local filesystem.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    AudioFile, ImageGenResult, ImageGenerator, ImageRequest, SceneProgress, SpeechSynthesizer,
    SynthesisRequest, SynthesisResult,
};
use crate::config::ServiceSettings;
use crate::error::ServiceError;
use crate::retry::{self, RetryPolicy};

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireScene<'a> {
    index: usize,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSynthesisRequest<'a> {
    scenes: Vec<WireScene<'a>>,
    voice_id: &'a str,
    speed: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAudioFile {
    file_name: String,
    audio_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSynthesisResponse {
    ok: bool,
    #[serde(default)]
    audio_files: Vec<WireAudioFile>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireImageRequest<'a> {
    prompt: &'a str,
    style: &'a str,
    width: u32,
    height: u32,
    aspect_ratio: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireImageResponse {
    ok: bool,
    #[serde(default)]
    images: Vec<String>,
    provider: Option<String>,
    error: Option<String>,
}

fn rejected(error: Option<String>) -> ServiceError {
    ServiceError::Rejected(error.unwrap_or_else(|| "no error message".to_string()))
}

/// Replies that carry their own success flag
trait Envelope {
    /// The service-reported failure, if `ok` is false
    fn failure(&self) -> Option<ServiceError>;
}

impl Envelope for WireSynthesisResponse {
    fn failure(&self) -> Option<ServiceError> {
        (!self.ok).then(|| rejected(self.error.clone()))
    }
}

impl Envelope for WireImageResponse {
    fn failure(&self) -> Option<ServiceError> {
        (!self.ok).then(|| rejected(self.error.clone()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct JsonService {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl JsonService {
    fn new(endpoint: &str, settings: &ServiceSettings, retry: RetryPolicy) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .use_rustls_tls()
            .gzip(true)
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: settings.api_key(),
            retry,
        })
    }

    /// One POST; a reply with `ok = false` is returned as an error
    async fn post_once<B, R>(&self, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Envelope,
    {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let reply: R = response.json().await?;
        match reply.failure() {
            Some(err) => Err(err),
            None => Ok(reply),
        }
    }

    /// POST with the configured retry policy
    async fn post<B, R>(&self, operation: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Envelope,
    {
        let ctx = self.retry.context(operation);
        retry::execute(&ctx, |_| self.post_once(body)).await
    }

    /// Stream `location` into `dest`, or verify it when it is already local
    async fn fetch_to(&self, location: &str, dest: &Path) -> Result<u64, ServiceError> {
        if let Some(local) = local_path(location) {
            return copy_local(&local, dest).await;
        }

        let ctx = self.retry.context(format!("download {location}"));
        retry::execute(&ctx, |_| download(&self.client, location, dest)).await
    }
}

/// Path for locations that are not fetched over HTTP
fn local_path(location: &str) -> Option<PathBuf> {
    match url::Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => None,
        // Bare paths, including Windows drive letters parsed as schemes
        _ => Some(PathBuf::from(location)),
    }
}

async fn copy_local(src: &Path, dest: &Path) -> Result<u64, ServiceError> {
    if src == dest {
        return Ok(tokio::fs::metadata(src).await?.len());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(tokio::fs::copy(src, dest).await?)
}

async fn download(client: &Client, url: &str, dest: &Path) -> Result<u64, ServiceError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ServiceError::Http {
            status: status.as_u16(),
            message: format!("download of {url} failed"),
        });
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Only complete downloads ever appear at `dest`
    let partial = partial_path(dest);
    let written = match write_body(response, &partial).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };
    tokio::fs::rename(&partial, dest).await?;

    debug!("Downloaded {} bytes to {:?}", written, dest);
    Ok(written)
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64, ServiceError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPEECH SYNTHESIS
// ═══════════════════════════════════════════════════════════════════════════════

/// Batch text-to-speech over HTTP
#[derive(Debug, Clone)]
pub struct HttpSpeechSynthesizer {
    service: JsonService,
}

impl HttpSpeechSynthesizer {
    pub fn new(settings: &ServiceSettings, retry: RetryPolicy) -> Result<Self, ServiceError> {
        Ok(Self {
            service: JsonService::new(&settings.synthesis_url, settings, retry)?,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
        progress: SceneProgress,
    ) -> Result<SynthesisResult, ServiceError> {
        let body = WireSynthesisRequest {
            scenes: request
                .scenes
                .iter()
                .map(|s| WireScene {
                    index: s.index,
                    text: &s.text,
                })
                .collect(),
            voice_id: &request.voice_id,
            speed: request.speed,
        };

        info!(
            "Synthesizing {} scenes with voice {}",
            request.scenes.len(),
            request.voice_id
        );
        let response: WireSynthesisResponse = self.service.post("synthesize", &body).await?;

        let mut audio_files = Vec::with_capacity(response.audio_files.len());
        for (i, file) in response.audio_files.into_iter().enumerate() {
            // Only the final component is trusted
            let file_name = Path::new(&file.file_name)
                .file_name()
                .map_or_else(|| format!("scene_{i:03}.mp3"), |n| n.to_string_lossy().to_string());
            let dest = request.output_dir.join(&file_name);
            // A failed download leaves the slot in place; the audio stage reports it.
            if let Err(e) = self.service.fetch_to(&file.audio_url, &dest).await {
                warn!("Could not fetch {}: {}", file_name, e);
            }
            audio_files.push(AudioFile {
                file_name,
                path: dest,
            });
            progress(i + 1);
        }

        Ok(SynthesisResult { audio_files })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IMAGE GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Prompt-to-image over HTTP
///
/// Retries are left to the caller: the image stage applies its own schedule
/// per scene.
#[derive(Debug, Clone)]
pub struct HttpImageGenerator {
    service: JsonService,
    provider: String,
}

impl HttpImageGenerator {
    pub fn new(settings: &ServiceSettings, retry: RetryPolicy) -> Result<Self, ServiceError> {
        let provider = url::Url::parse(&settings.image_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        Ok(Self {
            service: JsonService::new(&settings.image_url, settings, retry)?,
            provider,
        })
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(&self, request: &ImageRequest) -> Result<ImageGenResult, ServiceError> {
        let body = WireImageRequest {
            prompt: &request.prompt,
            style: &request.style,
            width: request.width,
            height: request.height,
            aspect_ratio: &request.aspect_ratio,
        };

        let response: WireImageResponse = self.service.post_once(&body).await?;
        if response.images.is_empty() {
            return Err(ServiceError::Rejected("no images returned".to_string()));
        }

        Ok(ImageGenResult {
            images: response.images,
            provider: response.provider.unwrap_or_else(|| self.provider.clone()),
        })
    }

    async fn download(&self, location: &str, dest: &Path) -> Result<u64, ServiceError> {
        self.service.fetch_to(location, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{Classify, ErrorClass};
    use crate::scene::Scene;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn synthesis_request_is_camel_case() {
        let scenes = [Scene::new(0, "Hello there.")];
        let body = WireSynthesisRequest {
            scenes: scenes
                .iter()
                .map(|s| WireScene {
                    index: s.index,
                    text: &s.text,
                })
                .collect(),
            voice_id: "alto",
            speed: 1.25,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["voiceId"], "alto");
        assert_eq!(json["scenes"][0]["text"], "Hello there.");
        assert!((json["speed"].as_f64().unwrap() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn synthesis_response_parses_descriptors() {
        let json = r#"{"ok":true,"audioFiles":[{"fileName":"scene_000.mp3","audioUrl":"https://tts.example.com/a.mp3"}]}"#;
        let response: WireSynthesisResponse = serde_json::from_str(json).unwrap();
        assert!(response.ok);
        assert_eq!(response.audio_files[0].file_name, "scene_000.mp3");
        assert!(response.error.is_none());
    }

    #[test]
    fn failed_image_response_carries_error() {
        let json = r#"{"ok":false,"error":"model overloaded"}"#;
        let response: WireImageResponse = serde_json::from_str(json).unwrap();
        assert!(!response.ok);
        assert!(response.images.is_empty());
        let err = rejected(response.error);
        assert_eq!(err.to_string(), "service rejected request: model overloaded");
    }

    #[test]
    fn image_request_uses_aspect_ratio_key() {
        let body = WireImageRequest {
            prompt: "a lighthouse",
            style: "watercolor",
            width: 1080,
            height: 1920,
            aspect_ratio: "9:16",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["aspectRatio"], "9:16");
    }

    #[test]
    fn local_locations_are_not_downloaded() {
        assert_eq!(local_path("/tmp/a.png"), Some(PathBuf::from("/tmp/a.png")));
        assert_eq!(local_path("file:///tmp/a.png"), Some(PathBuf::from("/tmp/a.png")));
        assert_eq!(local_path("https://cdn.example.com/a.png"), None);
    }

    #[tokio::test]
    async fn local_copy_lands_at_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        tokio::fs::write(&src, b"png-bytes").await.unwrap();
        let dest = dir.path().join("images").join("scene_000.png");

        let written = copy_local(&src, &dest).await.unwrap();
        assert_eq!(written, 9);
        assert!(dest.exists());
    }

    // ─── Local stub server ───────────────────────────────────────────────────

    /// Answers each connection with the next canned reply, then closes it.
    /// Returns the base URL and a connection counter.
    async fn serve(replies: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for reply in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn reply(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Promises far more bytes than it sends
    fn truncated() -> String {
        "HTTP/1.1 200 OK\r\ncontent-length: 100000\r\nconnection: close\r\n\r\npartial-bytes".to_string()
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            overload_delay_ms: 1,
        }
    }

    fn service(url: &str, policy: RetryPolicy) -> JsonService {
        JsonService::new(url, &ServiceSettings::default(), policy).unwrap()
    }

    // ─── Retry behavior over the wire ────────────────────────────────────────

    #[tokio::test]
    async fn overloaded_reply_is_retried() {
        let (url, hits) = serve(vec![
            reply(r#"{"ok":false,"error":"Model overloaded"}"#),
            reply(r#"{"ok":true,"audioFiles":[]}"#),
        ])
        .await;

        // No configured retries: the overload ceiling alone allows the second call
        let response: WireSynthesisResponse = service(&url, fast_policy(0))
            .post("synthesize", &serde_json::json!({ "scenes": [] }))
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_reply_is_not_retried() {
        let (url, hits) = serve(vec![
            reply(r#"{"ok":false,"error":"unknown voice"}"#),
            reply(r#"{"ok":true,"audioFiles":[]}"#),
        ])
        .await;

        let err = service(&url, fast_policy(3))
            .post::<_, WireSynthesisResponse>("synthesize", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.classify(), ErrorClass::Fatal);
        assert_eq!(err.to_string(), "service rejected request: unknown voice");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overloaded_image_reply_classifies_as_overload() {
        let (url, hits) = serve(vec![reply(r#"{"ok":false,"error":"Model overloaded"}"#)]).await;
        let settings = ServiceSettings {
            image_url: url,
            ..Default::default()
        };
        let generator = HttpImageGenerator::new(&settings, fast_policy(0)).unwrap();
        let request = ImageRequest {
            prompt: "a lighthouse".to_string(),
            style: "ink".to_string(),
            width: 64,
            height: 64,
            aspect_ratio: "1:1".to_string(),
        };

        let err = generator.generate(&request).await.unwrap_err();
        assert_eq!(err.classify(), ErrorClass::Overloaded);
        // The image stage owns retries for this client
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn truncated_reply_is_retried_as_transport_failure() {
        let (url, hits) = serve(vec![
            truncated(),
            reply(r#"{"ok":true,"audioFiles":[]}"#),
        ])
        .await;

        let response: WireSynthesisResponse = service(&url, fast_policy(1))
            .post("synthesize", &serde_json::json!({}))
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn complete_but_malformed_json_is_fatal() {
        let (url, hits) = serve(vec![reply("not json at all"), reply("{}")]).await;

        let err = service(&url, fast_policy(3))
            .post::<_, WireSynthesisResponse>("synthesize", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.classify(), ErrorClass::Fatal);
        assert!(err.to_string().contains("undecodable response"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn truncated_download_leaves_no_file() {
        let (url, _) = serve(vec![truncated()]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio").join("scene_000.mp3");

        let err = service(&url, fast_policy(0))
            .fetch_to(&format!("{url}/a.mp3"), &dest)
            .await
            .unwrap_err();

        assert_eq!(err.classify(), ErrorClass::Retryable);
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn download_recovers_after_truncation() {
        let body = "complete-audio";
        let (url, hits) = serve(vec![truncated(), reply(body)]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("scene_001.mp3");

        let written = service(&url, fast_policy(1))
            .fetch_to(&format!("{url}/b.mp3"), &dest)
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), body);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn partial_file_sits_next_to_destination() {
        assert_eq!(
            partial_path(Path::new("/run/audio/scene_000.mp3")),
            PathBuf::from("/run/audio/scene_000.mp3.part")
        );
    }

    #[test]
    fn provider_defaults_to_endpoint_host() {
        let settings = ServiceSettings {
            image_url: "https://images.example.com/v1/generate".to_string(),
            ..Default::default()
        };
        let generator = HttpImageGenerator::new(&settings, RetryPolicy::default()).unwrap();
        assert_eq!(generator.provider(), "images.example.com");
    }
}
