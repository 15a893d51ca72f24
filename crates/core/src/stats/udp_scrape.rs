//! UDP tracker scrape (BEP 15).
//!
//! Each tracker is asked in turn; the first one that answers wins.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::magnet::redact_hash;

use super::{SwarmCounts, SwarmStatsError, SwarmStatsQuery};

const PROTOCOL_ID: u64 = 0x0417_2710_1980;
const ACTION_CONNECT: u32 = 0;
const ACTION_SCRAPE: u32 = 2;
const ACTION_ERROR: u32 = 3;

/// Scrapes swarm counts from UDP trackers.
pub struct UdpTrackerScraper {
    trackers: Vec<String>,
    timeout: Duration,
}

impl UdpTrackerScraper {
    /// `trackers` may be full announce URLs; non-UDP entries are ignored.
    pub fn new(trackers: &[String], timeout: Duration) -> Self {
        let trackers = trackers
            .iter()
            .filter_map(|t| tracker_address(t))
            .collect();
        Self { trackers, timeout }
    }

    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    async fn scrape(&self, tracker: &str, info_hash: &[u8; 20]) -> Result<SwarmCounts, SwarmStatsError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(tracker).await?;

        let transaction_id: u32 = rand::random();
        let mut request = Vec::with_capacity(16);
        request.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        request.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        request.extend_from_slice(&transaction_id.to_be_bytes());
        socket.send(&request).await?;

        let mut buf = [0u8; 512];
        let len = self.receive(&socket, &mut buf).await?;
        let connection_id = parse_connect_response(&buf[..len], transaction_id)?;

        let transaction_id: u32 = rand::random();
        let mut request = Vec::with_capacity(36);
        request.extend_from_slice(&connection_id.to_be_bytes());
        request.extend_from_slice(&ACTION_SCRAPE.to_be_bytes());
        request.extend_from_slice(&transaction_id.to_be_bytes());
        request.extend_from_slice(info_hash);
        socket.send(&request).await?;

        let len = self.receive(&socket, &mut buf).await?;
        parse_scrape_response(&buf[..len], transaction_id)
    }

    async fn receive(&self, socket: &UdpSocket, buf: &mut [u8]) -> Result<usize, SwarmStatsError> {
        match timeout(self.timeout, socket.recv(buf)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SwarmStatsError::Timeout),
        }
    }
}

#[async_trait]
impl SwarmStatsQuery for UdpTrackerScraper {
    async fn query(&self, hash: &str) -> Result<SwarmCounts, SwarmStatsError> {
        let info_hash = decode_info_hash(hash)?;
        if self.trackers.is_empty() {
            return Err(SwarmStatsError::NoTrackers);
        }

        let mut last_error = SwarmStatsError::NoTrackers;
        for tracker in &self.trackers {
            match self.scrape(tracker, &info_hash).await {
                Ok(counts) => return Ok(counts),
                Err(e) => {
                    debug!(tracker = %tracker, hash = %redact_hash(hash), error = %e, "Scrape failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// `udp://host:port/announce` -> `host:port`.
fn tracker_address(url: &str) -> Option<String> {
    let rest = url.trim().strip_prefix("udp://")?;
    let address = rest.split('/').next()?;
    if address.is_empty() || !address.contains(':') {
        return None;
    }
    Some(address.to_string())
}

fn decode_info_hash(hash: &str) -> Result<[u8; 20], SwarmStatsError> {
    let hash = hash.trim();
    if hash.len() != 40 || !hash.is_ascii() {
        return Err(SwarmStatsError::InvalidHash(hash.to_string()));
    }

    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hash[i * 2..i * 2 + 2], 16)
            .map_err(|_| SwarmStatsError::InvalidHash(hash.to_string()))?;
    }
    Ok(out)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn check_header(buf: &[u8], action: u32, transaction_id: u32) -> Result<(), SwarmStatsError> {
    if buf.len() < 8 {
        return Err(SwarmStatsError::Tracker("short response".to_string()));
    }
    if read_u32(buf, 4) != transaction_id {
        return Err(SwarmStatsError::Tracker("transaction id mismatch".to_string()));
    }
    match read_u32(buf, 0) {
        a if a == action => Ok(()),
        ACTION_ERROR => Err(SwarmStatsError::Tracker(
            String::from_utf8_lossy(&buf[8..]).into_owned(),
        )),
        other => Err(SwarmStatsError::Tracker(format!("unexpected action {}", other))),
    }
}

fn parse_connect_response(buf: &[u8], transaction_id: u32) -> Result<u64, SwarmStatsError> {
    check_header(buf, ACTION_CONNECT, transaction_id)?;
    if buf.len() < 16 {
        return Err(SwarmStatsError::Tracker("short connect response".to_string()));
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&buf[8..16]);
    Ok(u64::from_be_bytes(id))
}

fn parse_scrape_response(buf: &[u8], transaction_id: u32) -> Result<SwarmCounts, SwarmStatsError> {
    check_header(buf, ACTION_SCRAPE, transaction_id)?;
    if buf.len() < 20 {
        return Err(SwarmStatsError::Tracker("short scrape response".to_string()));
    }
    // seeders, completed, leechers
    Ok(SwarmCounts {
        broadcasters: read_u32(buf, 8),
        watchers: read_u32(buf, 16),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    /// Minimal tracker answering one connect and one scrape.
    async fn fake_tracker(seeders: u32, leechers: u32) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];

            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 16);
            let tid = read_u32(&buf, 12);
            let mut reply = Vec::new();
            reply.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
            reply.extend_from_slice(&tid.to_be_bytes());
            reply.extend_from_slice(&42u64.to_be_bytes());
            socket.send_to(&reply, peer).await.unwrap();

            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 36);
            assert_eq!(u64::from_be_bytes(buf[0..8].try_into().unwrap()), 42);
            let tid = read_u32(&buf, 12);
            let mut reply = Vec::new();
            reply.extend_from_slice(&ACTION_SCRAPE.to_be_bytes());
            reply.extend_from_slice(&tid.to_be_bytes());
            reply.extend_from_slice(&seeders.to_be_bytes());
            reply.extend_from_slice(&100u32.to_be_bytes());
            reply.extend_from_slice(&leechers.to_be_bytes());
            socket.send_to(&reply, peer).await.unwrap();
        });
        format!("udp://{}/announce", addr)
    }

    #[test]
    fn test_tracker_address() {
        assert_eq!(
            tracker_address("udp://tracker.example.org:1337/announce").as_deref(),
            Some("tracker.example.org:1337")
        );
        assert_eq!(tracker_address("udp://x:1").as_deref(), Some("x:1"));
        assert!(tracker_address("https://tracker.example.org/announce").is_none());
        assert!(tracker_address("udp://nohostport/announce").is_none());
    }

    #[test]
    fn test_decode_info_hash() {
        let bytes = decode_info_hash(HASH).unwrap();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[19], 0x67);
        assert!(decode_info_hash("short").is_err());
        assert!(decode_info_hash(&"zz".repeat(20)).is_err());
    }

    #[test]
    fn test_error_action_is_reported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ACTION_ERROR.to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(b"torrent not registered");

        let err = parse_scrape_response(&buf, 7).unwrap_err();
        assert!(err.to_string().contains("torrent not registered"));
        assert!(parse_scrape_response(&buf, 8).is_err());
    }

    #[tokio::test]
    async fn test_scrape_against_local_tracker() {
        let tracker = fake_tracker(25, 9).await;
        let scraper = UdpTrackerScraper::new(&[tracker], Duration::from_secs(2));

        let counts = scraper.query(HASH).await.unwrap();
        assert_eq!(counts, SwarmCounts { broadcasters: 25, watchers: 9 });
    }

    #[tokio::test]
    async fn test_falls_through_to_next_tracker() {
        // Bound but silent.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_url = format!("udp://{}/announce", silent.local_addr().unwrap());
        let tracker = fake_tracker(3, 1).await;

        let scraper =
            UdpTrackerScraper::new(&[silent_url, tracker], Duration::from_millis(200));
        let counts = scraper.query(HASH).await.unwrap();
        assert_eq!(counts.broadcasters, 3);
        drop(silent);
    }

    #[tokio::test]
    async fn test_no_trackers() {
        let scraper = UdpTrackerScraper::new(&["http://only-http/announce".to_string()], Duration::from_millis(50));
        assert!(matches!(
            scraper.query(HASH).await,
            Err(SwarmStatsError::NoTrackers)
        ));
    }
}
