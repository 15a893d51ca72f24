//! TheRARBG IMDb detail client.
//!
//! Looks items up through `imdb-detail/<id>/?format=json`. The site answers
//! unknown ids with a redirect to its homepage, so redirects are not
//! followed and a redirect to `/` means "nothing listed".

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use reqwest::{header, redirect, Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{
    map_quality, map_video_codec, ContentDirectory, DirectoryError, DirectoryResult,
    DiscoveredSource,
};

pub const THERARBG_PROVIDER: &str = "therarbg";

static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(2160p|1440p|1080p|720p|480p)\b").unwrap());
static CODEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(x264|x265|h\.?264|h\.?265|hevc|av1|xvid)\b").unwrap());
static TEN_BIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b10[ .-]?bit\b").unwrap());
static IMDB_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/title/(tt\d{7,8})").unwrap());
static IMDB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(tt)?(\d{7,8})$").unwrap());

/// TheRARBG directory client.
pub struct TheRarbgDirectory {
    client: Client,
    base_url: String,
}

impl TheRarbgDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Accept `tt0111161`, `0111161` or an IMDb title URL.
pub fn normalize_imdb_id(raw: &str) -> Option<String> {
    let cleaned = raw.trim();
    if let Some(caps) = IMDB_ID_RE.captures(cleaned) {
        return Some(format!("tt{}", &caps[2]));
    }
    IMDB_URL_RE.captures(cleaned).map(|caps| caps[1].to_string())
}

#[async_trait]
impl ContentDirectory for TheRarbgDirectory {
    fn name(&self) -> &str {
        THERARBG_PROVIDER
    }

    async fn search(&self, external_id: &str) -> Result<DirectoryResult, DirectoryError> {
        let Some(imdb_id) = normalize_imdb_id(external_id) else {
            return Err(DirectoryError::Parse(format!("Invalid IMDb id: {}", external_id)));
        };
        let url = format!("{}/imdb-detail/{}/", self.base_url, imdb_id);

        debug!(external_id = %imdb_id, "TheRARBG detail lookup");

        let response = self
            .client
            .get(&url)
            .query(&[("format", "json")])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DirectoryError::RateLimited);
        }
        if status.is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if location == "/" {
                return Ok(DirectoryResult::default());
            }
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                message: format!("Unexpected redirect to {}", location),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"));
        if is_html {
            return Err(DirectoryError::Parse(
                "Received an HTML page instead of JSON".to_string(),
            ));
        }

        let body: DetailResponse = response.json().await.map_err(|e| {
            DirectoryError::Parse(format!("Failed to parse detail response: {}", e))
        })?;

        Ok(body.into_result())
    }
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(default)]
    imdb: Option<serde_json::Value>,
    #[serde(default)]
    trb_posts: Option<Vec<DetailPost>>,
}

#[derive(Debug, Deserialize)]
struct DetailPost {
    #[serde(default)]
    name: String,
    info_hash: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    seeders: u32,
    #[serde(default)]
    leechers: u32,
    #[serde(default)]
    trackers: Vec<TrackerInfo>,
}

#[derive(Debug, Deserialize)]
struct TrackerInfo {
    tracker: String,
    #[serde(default)]
    scrape_error: Option<String>,
}

impl DetailResponse {
    fn into_result(self) -> DirectoryResult {
        let (Some(_), Some(posts)) = (self.imdb, self.trb_posts) else {
            return DirectoryResult::default();
        };

        let sources = posts
            .into_iter()
            .filter(|post| !post.info_hash.is_empty())
            .map(DetailPost::into_source)
            .collect();

        DirectoryResult {
            sources,
            trailer_ref: None,
            provider: Some(THERARBG_PROVIDER.to_string()),
        }
    }
}

impl DetailPost {
    fn into_source(self) -> DiscoveredSource {
        let resolution = RESOLUTION_RE
            .captures(&self.name)
            .map(|caps| caps[1].to_ascii_lowercase());
        let quality = resolution.as_deref().and_then(map_quality);
        let bit_depth = if TEN_BIT_RE.is_match(&self.name) { "10" } else { "8" };
        let video_codec = CODEC_RE.captures(&self.name).and_then(|caps| {
            let codec = caps[1].to_ascii_lowercase();
            let codec = match codec.as_str() {
                "h264" => "h.264",
                "h265" => "h.265",
                other => other,
            };
            map_video_codec(codec, bit_depth)
        });

        // Trackers that failed their last scrape are left out.
        let trackers = self
            .trackers
            .into_iter()
            .filter(|t| t.scrape_error.is_none())
            .map(|t| t.tracker)
            .collect();

        DiscoveredSource {
            hash: self.info_hash.to_ascii_lowercase(),
            quality,
            resolution,
            size_bytes: self.size,
            video_codec,
            source_type: release_type(&self.name).to_string(),
            broadcasters: self.seeders,
            watchers: self.leechers,
            provider_url: None,
            trackers,
        }
    }
}

/// Release type from a scene-style name; empty when it cannot be told.
fn release_type(name: &str) -> &'static str {
    let name = name.to_ascii_lowercase();
    if name.contains("bluray") || name.contains("bdrip") || name.contains("brrip") {
        "bluray"
    } else if name.contains("web-dl") || name.contains("webrip") || name.contains(".web.") {
        "web"
    } else if name.contains("hdtv") {
        "hdtv"
    } else if name.contains("dvdrip") {
        "dvd"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const DETAIL_RESPONSE: &str = r#"{
        "imdb": {"imdb_id": "tt1727587", "name": "Sintel", "runtime": "15"},
        "trb_posts": [
            {
                "name": "Sintel.2010.1080p.BluRay.x265.10bit",
                "info_hash": "CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC",
                "size": 2147483648,
                "seeders": 31,
                "leechers": 4,
                "type": "movie",
                "trackers": [
                    {"tracker": "udp://good.tracker:1337/announce", "seeders": 30, "leechers": 4, "completed": 9, "scrape_error": null},
                    {"tracker": "udp://dead.tracker:80/announce", "seeders": 0, "leechers": 0, "completed": 0, "scrape_error": "Failed to scrape"},
                    {"tracker": "udp://other.tracker:6969/announce", "seeders": 1, "leechers": 0, "completed": 2}
                ]
            },
            {
                "name": "Sintel 2010 Remux",
                "info_hash": "",
                "seeders": 1,
                "leechers": 0,
                "trackers": []
            }
        ]
    }"#;

    /// Serve one canned HTTP response and return the base URL plus the
    /// request line the client sent.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{}", addr), handle)
    }

    fn json_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[test]
    fn test_normalize_imdb_id() {
        assert_eq!(normalize_imdb_id("tt0111161").as_deref(), Some("tt0111161"));
        assert_eq!(normalize_imdb_id(" 0111161 ").as_deref(), Some("tt0111161"));
        assert_eq!(normalize_imdb_id("12345678").as_deref(), Some("tt12345678"));
        assert_eq!(
            normalize_imdb_id("https://www.imdb.com/title/tt0111161/").as_deref(),
            Some("tt0111161")
        );
        assert_eq!(normalize_imdb_id("invalid"), None);
    }

    #[test]
    fn test_detail_mapping_keeps_healthy_trackers() {
        let body: DetailResponse = serde_json::from_str(DETAIL_RESPONSE).unwrap();
        let result = body.into_result();

        assert_eq!(result.provider.as_deref(), Some("therarbg"));
        assert_eq!(result.sources.len(), 1);

        let source = &result.sources[0];
        assert_eq!(source.hash, "c".repeat(40));
        assert_eq!(source.resolution.as_deref(), Some("1080p"));
        assert_eq!(source.quality.as_deref(), Some("FHD"));
        assert_eq!(source.video_codec.as_deref(), Some("x265_10bit"));
        assert_eq!(source.source_type, "bluray");
        assert_eq!(source.size_bytes, Some(2_147_483_648));
        assert_eq!((source.broadcasters, source.watchers), (31, 4));
        assert_eq!(
            source.trackers,
            vec![
                "udp://good.tracker:1337/announce".to_string(),
                "udp://other.tracker:6969/announce".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_posts_is_empty() {
        let body: DetailResponse = serde_json::from_str(r#"{"imdb": null}"#).unwrap();
        assert_eq!(body.into_result(), DirectoryResult::default());
    }

    #[test]
    fn test_release_type() {
        assert_eq!(release_type("Movie.2020.1080p.WEB-DL.x264"), "web");
        assert_eq!(release_type("Movie.2020.720p.BRRip"), "bluray");
        assert_eq!(release_type("Movie 2020"), "");
    }

    #[tokio::test]
    async fn test_search_over_http() {
        let (base, request) = serve_once(json_response(DETAIL_RESPONSE)).await;
        let directory = TheRarbgDirectory::new(base, Duration::from_secs(5)).unwrap();

        let result = directory.search("1727587").await.unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].trackers.len(), 2);
        assert_eq!(
            request.await.unwrap(),
            "GET /imdb-detail/tt1727587/?format=json HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_redirect_home_means_not_listed() {
        let (base, _) = serve_once(
            "HTTP/1.1 302 Found\r\nLocation: /\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        )
        .await;
        let directory = TheRarbgDirectory::new(base, Duration::from_secs(5)).unwrap();

        let result = directory.search("tt0000001").await.unwrap();
        assert!(result.sources.is_empty());
    }

    #[tokio::test]
    async fn test_html_page_is_parse_error() {
        let body = "<html>nothing here</html>";
        let (base, _) = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;
        let directory = TheRarbgDirectory::new(base, Duration::from_secs(5)).unwrap();

        let err = directory.search("tt0000002").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Parse(_)));
    }
}
