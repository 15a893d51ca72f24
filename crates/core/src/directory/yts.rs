//! YTS list API client.
//!
//! Looks movies up by IMDb id through `list_movies.json?query_term=` and
//! takes the first match.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{ContentDirectory, DirectoryError, DirectoryResult, DiscoveredSource};

pub const YTS_PROVIDER: &str = "yts";

/// YTS directory client.
pub struct YtsDirectory {
    client: Client,
    base_url: String,
}

impl YtsDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentDirectory for YtsDirectory {
    fn name(&self) -> &str {
        YTS_PROVIDER
    }

    async fn search(&self, external_id: &str) -> Result<DirectoryResult, DirectoryError> {
        let url = format!("{}/list_movies.json", self.base_url);

        debug!(external_id = %external_id, "YTS movie lookup");

        let response = self
            .client
            .get(&url)
            .query(&[("query_term", external_id), ("page", "1"), ("limit", "20")])
            .send()
            .await?;

        let status = response.status();
        if status == 429 {
            return Err(DirectoryError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: YtsListResponse = response.json().await.map_err(|e| {
            DirectoryError::Parse(format!("Failed to parse movie list response: {}", e))
        })?;

        if body.status != "ok" {
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                message: body.status_message,
            });
        }

        Ok(body.into_result())
    }
}

#[derive(Debug, Deserialize)]
struct YtsListResponse {
    status: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    data: YtsListData,
}

#[derive(Debug, Default, Deserialize)]
struct YtsListData {
    #[serde(default)]
    movie_count: u32,
    #[serde(default)]
    movies: Vec<YtsMovie>,
}

#[derive(Debug, Deserialize)]
struct YtsMovie {
    #[serde(default)]
    yt_trailer_code: String,
    #[serde(default)]
    torrents: Vec<YtsTorrent>,
}

#[derive(Debug, Deserialize)]
struct YtsTorrent {
    url: Option<String>,
    hash: String,
    #[serde(default)]
    quality: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    video_codec: String,
    #[serde(default)]
    bit_depth: String,
    #[serde(default)]
    seeds: u32,
    #[serde(default)]
    peers: u32,
    size_bytes: Option<u64>,
}

impl YtsListResponse {
    fn into_result(self) -> DirectoryResult {
        if self.data.movie_count == 0 {
            return DirectoryResult::default();
        }
        let Some(movie) = self.data.movies.into_iter().next() else {
            return DirectoryResult::default();
        };

        let trailer_ref = Some(movie.yt_trailer_code).filter(|code| !code.is_empty());
        let sources = movie
            .torrents
            .into_iter()
            .filter(|t| !t.hash.is_empty())
            .map(|t| {
                let resolution = Some(t.quality.to_ascii_lowercase())
                    .filter(|q| q.ends_with('p'));
                DiscoveredSource {
                    hash: t.hash.to_ascii_lowercase(),
                    quality: map_quality(&t.quality),
                    resolution,
                    size_bytes: t.size_bytes,
                    video_codec: map_video_codec(&t.video_codec, &t.bit_depth),
                    source_type: t.kind.to_ascii_lowercase(),
                    broadcasters: t.seeds,
                    watchers: t.peers,
                    provider_url: t.url.filter(|u| !u.is_empty()),
                    trackers: Vec::new(),
                }
            })
            .collect();

        DirectoryResult {
            sources,
            trailer_ref,
            provider: Some(YTS_PROVIDER.to_string()),
        }
    }
}

/// Normalise a YTS quality label (`720p`, `2160p`, `3D`, ...).
pub fn map_quality(quality: &str) -> Option<String> {
    let label = match quality.trim().to_ascii_lowercase().as_str() {
        "3d" | "1080p" | "fhd" => "FHD",
        "2160p" | "4k" => "4K",
        "1440p" | "2k" => "2K",
        "720p" | "hd" => "HD",
        "480p" | "sd" => "SD",
        _ => return None,
    };
    Some(label.to_string())
}

/// Normalise a codec name, taking the bit depth into account where it
/// distinguishes variants.
pub fn map_video_codec(codec: &str, bit_depth: &str) -> Option<String> {
    let ten_bit = bit_depth.trim().parse::<u32>().ok() == Some(10);
    let codec = match codec.trim().to_ascii_lowercase().as_str() {
        "x264" | "h.264" => "x264",
        "x265" | "h.265" | "hevc" if ten_bit => "x265_10bit",
        "x265" | "h.265" | "hevc" => "x265",
        "av1" if ten_bit => "av1_10bit",
        "av1" => "av1",
        "xvid" => "xvid",
        "vp9" => "vp9",
        "mpeg-2" | "mpeg2" => "mpeg2",
        "divx" | "mpeg-4" | "mpeg4" => "mpeg4",
        _ => return None,
    };
    Some(codec.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const LIST_RESPONSE: &str = r#"{
        "status": "ok",
        "status_message": "Query was successful",
        "data": {
            "movie_count": 1,
            "movies": [{
                "id": 1,
                "title_long": "Sintel (2010)",
                "runtime": 15,
                "yt_trailer_code": "eRsGyueVLvQ",
                "torrents": [
                    {
                        "url": "https://yts.example/torrent/download/AAAA",
                        "hash": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                        "quality": "1080p",
                        "type": "web",
                        "video_codec": "x265",
                        "bit_depth": "10",
                        "seeds": 42,
                        "peers": 7,
                        "size_bytes": 1073741824
                    },
                    {
                        "url": "",
                        "hash": "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
                        "quality": "3D",
                        "type": "BluRay",
                        "video_codec": "x264",
                        "bit_depth": "8",
                        "seeds": 0,
                        "peers": 0
                    }
                ]
            }]
        }
    }"#;

    #[test]
    fn test_map_quality() {
        assert_eq!(map_quality("720p").as_deref(), Some("HD"));
        assert_eq!(map_quality("2160p").as_deref(), Some("4K"));
        assert_eq!(map_quality("3D").as_deref(), Some("FHD"));
        assert_eq!(map_quality("weird"), None);
    }

    #[test]
    fn test_map_video_codec() {
        assert_eq!(map_video_codec("x264", "8").as_deref(), Some("x264"));
        assert_eq!(map_video_codec("HEVC", "10").as_deref(), Some("x265_10bit"));
        assert_eq!(map_video_codec("x265", "8").as_deref(), Some("x265"));
        assert_eq!(map_video_codec("AV1", "").as_deref(), Some("av1"));
        assert_eq!(map_video_codec("unknown", "8"), None);
    }

    #[test]
    fn test_list_response_mapping() {
        let body: YtsListResponse = serde_json::from_str(LIST_RESPONSE).unwrap();
        let result = body.into_result();

        assert_eq!(result.trailer_ref.as_deref(), Some("eRsGyueVLvQ"));
        assert_eq!(result.provider.as_deref(), Some("yts"));
        assert_eq!(result.sources.len(), 2);

        let first = &result.sources[0];
        assert_eq!(first.hash, "a".repeat(40));
        assert_eq!(first.quality.as_deref(), Some("FHD"));
        assert_eq!(first.resolution.as_deref(), Some("1080p"));
        assert_eq!(first.source_type, "web");
        assert_eq!(first.video_codec.as_deref(), Some("x265_10bit"));
        assert_eq!(first.broadcasters, 42);
        assert_eq!(first.watchers, 7);
        assert_eq!(first.size_bytes, Some(1_073_741_824));
        assert!(first.provider_url.is_some());

        let second = &result.sources[1];
        assert_eq!(second.source_type, "bluray");
        assert_eq!(second.resolution, None);
        assert_eq!(second.provider_url, None);
        assert_eq!(second.size_bytes, None);
    }

    #[test]
    fn test_no_movies() {
        let body: YtsListResponse = serde_json::from_str(
            r#"{"status":"ok","status_message":"","data":{"movie_count":0}}"#,
        )
        .unwrap();
        assert_eq!(body.into_result(), DirectoryResult::default());
    }

    #[tokio::test]
    async fn test_search_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(request.starts_with("GET /api/v2/list_movies.json?query_term=tt1727587"));

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                LIST_RESPONSE.len(),
                LIST_RESPONSE
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        let directory = YtsDirectory::new(
            format!("http://{}/api/v2/", addr),
            Duration::from_secs(5),
        )
        .unwrap();
        let result = directory.search("tt1727587").await.unwrap();
        assert_eq!(result.sources.len(), 2);
        assert_eq!(directory.name(), "yts");
    }
}
