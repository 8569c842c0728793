//! Batch geolocation backends
//!
//! `IpApiBatch` posts every address in one request to the ip-api.com batch
//! endpoint. `MaxMindLookup` answers from a local GeoLite2-City database.

use maxminddb::{geoip2, Reader};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Address, GeoCoordinate};
use crate::config::{GeoBackend, GeoSettings};

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("geolocation request failed: HTTP {0}")]
    Status(u16),

    #[error("geolocation request failed: {0}")]
    Transport(String),

    #[error("malformed geolocation response: {0}")]
    Malformed(String),

    #[error("geolocation database unavailable: {0}")]
    Database(String),
}

/// Resolve a batch of addresses in one round trip.
///
/// The result is positionally aligned with `addresses`; `None` marks an
/// address the backend could not place.
pub trait GeoLookup: Send + Sync {
    fn lookup_batch(&self, addresses: &[Address]) -> Result<Vec<Option<GeoCoordinate>>, LookupError>;
}

/// Build the configured backend
pub fn from_settings(settings: &GeoSettings) -> Result<Box<dyn GeoLookup>, LookupError> {
    match settings.backend {
        GeoBackend::IpApi => Ok(Box::new(IpApiBatch::new(
            settings.endpoint.clone(),
            Duration::from_secs(settings.timeout_secs),
        ))),
        GeoBackend::MaxMind => Ok(Box::new(MaxMindLookup::open(settings.maxmind_db.as_deref())?)),
    }
}

// ============================================================================
// ip-api.com batch
// ============================================================================

#[derive(Serialize)]
struct BatchQuery<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    query: Option<String>,
}

pub struct IpApiBatch {
    endpoint: String,
    timeout: Duration,
}

impl IpApiBatch {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }
}

impl GeoLookup for IpApiBatch {
    fn lookup_batch(&self, addresses: &[Address]) -> Result<Vec<Option<GeoCoordinate>>, LookupError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let body: Vec<BatchQuery> = addresses
            .iter()
            .map(|a| BatchQuery { query: a.as_str() })
            .collect();

        info!(count = addresses.len(), endpoint = %self.endpoint, "batch geolocation request");
        let resp = match ureq::post(&self.endpoint)
            .timeout(self.timeout)
            .set("Content-Type", "application/json; charset=UTF-8")
            .send_json(&body)
        {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                warn!(code, "geolocation batch rejected");
                return Err(LookupError::Status(code));
            }
            Err(ureq::Error::Transport(t)) => return Err(LookupError::Transport(t.to_string())),
        };

        if resp.status() != 200 {
            return Err(LookupError::Status(resp.status()));
        }

        let items: Vec<BatchItem> = resp
            .into_json()
            .map_err(|e| LookupError::Malformed(e.to_string()))?;

        merge_batch(addresses, items)
    }
}

/// Turn a batch response into per-address results, rejecting the whole
/// batch if it does not line up with the request.
fn merge_batch(
    addresses: &[Address],
    items: Vec<BatchItem>,
) -> Result<Vec<Option<GeoCoordinate>>, LookupError> {
    if items.len() != addresses.len() {
        return Err(LookupError::Malformed(format!(
            "expected {} results, got {}",
            addresses.len(),
            items.len()
        )));
    }

    addresses
        .iter()
        .zip(items)
        .map(|(addr, item)| {
            if let Some(echo) = item.query.as_deref() {
                if echo != addr.as_str() {
                    return Err(LookupError::Malformed(format!(
                        "result for {echo} where {addr} was expected"
                    )));
                }
            }
            if item.status != "success" {
                debug!(%addr, message = item.message.as_deref().unwrap_or(""), "no location");
                return Ok(None);
            }
            match (item.lat, item.lon) {
                (Some(lat), Some(lon)) => Ok(Some(GeoCoordinate::new(lon, lat))),
                _ => Err(LookupError::Malformed(format!("{addr}: success without coordinates"))),
            }
        })
        .collect()
}

// ============================================================================
// MaxMind GeoLite2
// ============================================================================

/// Offline lookups against a GeoLite2-City database
pub struct MaxMindLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLookup {
    pub fn open(explicit: Option<&Path>) -> Result<Self, LookupError> {
        let path = find_database(explicit)
            .ok_or_else(|| LookupError::Database("no GeoLite2-City.mmdb found".into()))?;
        let reader = Reader::open_readfile(&path)
            .map_err(|e| LookupError::Database(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "opened GeoLite2 database");
        Ok(Self { reader })
    }

    fn lookup(&self, ip: IpAddr) -> Option<GeoCoordinate> {
        let city: geoip2::City = self.reader.lookup(ip).ok()?;
        let location = city.location?;
        Some(GeoCoordinate::new(location.longitude?, location.latitude?))
    }
}

impl GeoLookup for MaxMindLookup {
    fn lookup_batch(&self, addresses: &[Address]) -> Result<Vec<Option<GeoCoordinate>>, LookupError> {
        Ok(addresses
            .iter()
            .map(|a| {
                a.as_str()
                    .parse::<Ipv4Addr>()
                    .ok()
                    .and_then(|ip| self.lookup(IpAddr::V4(ip)))
            })
            .collect())
    }
}

fn find_database(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    let candidates = [
        dirs::config_dir().map(|p| p.join("traceglobe/GeoLite2-City.mmdb")),
        Some(PathBuf::from("/usr/share/GeoIP/GeoLite2-City.mmdb")),
        Some(PathBuf::from("/var/lib/GeoIP/GeoLite2-City.mmdb")),
        Some(PathBuf::from("./GeoLite2-City.mmdb")),
    ];

    candidates.into_iter().flatten().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn addrs(list: &[&str]) -> Vec<Address> {
        list.iter().map(|s| Address::new(*s)).collect()
    }

    /// Serve one canned HTTP response and hand back the request body
    fn serve_once(status: &str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/batch", listener.local_addr().unwrap());
        let status = status.to_string();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request = vec![0; content_length];
            reader.read_exact(&mut request).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            String::from_utf8(request).unwrap()
        });
        (url, handle)
    }

    #[test]
    fn batch_posts_queries_in_order_and_parses_results() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"status":"success","lat":37.75,"lon":-97.82,"query":"8.8.8.8"},
                {"status":"fail","message":"private range","query":"10.0.0.1"}]"#,
        );
        let backend = IpApiBatch::new(url, Duration::from_secs(5));
        let result = backend.lookup_batch(&addrs(&["8.8.8.8", "10.0.0.1"])).unwrap();

        assert_eq!(result, vec![Some(GeoCoordinate::new(-97.82, 37.75)), None]);
        let sent: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(sent, serde_json::json!([{"query": "8.8.8.8"}, {"query": "10.0.0.1"}]));
    }

    #[test]
    fn non_success_status_is_error() {
        let (url, server) = serve_once("503 Service Unavailable", "[]");
        let backend = IpApiBatch::new(url, Duration::from_secs(5));
        let err = backend.lookup_batch(&addrs(&["8.8.8.8"])).unwrap_err();
        assert!(matches!(err, LookupError::Status(503)));
        server.join().unwrap();
    }

    #[test]
    fn unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/batch", listener.local_addr().unwrap());
        drop(listener);
        let backend = IpApiBatch::new(url, Duration::from_secs(2));
        let err = backend.lookup_batch(&addrs(&["8.8.8.8"])).unwrap_err();
        assert!(matches!(err, LookupError::Transport(_)));
    }

    #[test]
    fn empty_batch_makes_no_request() {
        let backend = IpApiBatch::new("http://127.0.0.1:9/batch".into(), Duration::from_secs(1));
        assert!(backend.lookup_batch(&[]).unwrap().is_empty());
    }

    fn item(status: &str, lat: Option<f64>, lon: Option<f64>, query: Option<&str>) -> BatchItem {
        BatchItem {
            status: status.into(),
            message: None,
            lat,
            lon,
            query: query.map(String::from),
        }
    }

    #[test]
    fn merge_rejects_length_mismatch() {
        let err = merge_batch(&addrs(&["1.1.1.1", "8.8.8.8"]), vec![item("fail", None, None, None)]);
        assert!(matches!(err, Err(LookupError::Malformed(_))));
    }

    #[test]
    fn merge_rejects_reordered_echo() {
        let items = vec![
            item("success", Some(1.0), Some(2.0), Some("8.8.8.8")),
            item("success", Some(3.0), Some(4.0), Some("1.1.1.1")),
        ];
        let err = merge_batch(&addrs(&["1.1.1.1", "8.8.8.8"]), items);
        assert!(matches!(err, Err(LookupError::Malformed(_))));
    }

    #[test]
    fn merge_accepts_positional_items_without_echo() {
        let items = vec![item("success", Some(53.3), Some(-6.2), None)];
        let result = merge_batch(&addrs(&["1.1.1.1"]), items).unwrap();
        assert_eq!(result, vec![Some(GeoCoordinate::new(-6.2, 53.3))]);
    }

    #[test]
    fn merge_rejects_success_without_coordinates() {
        let items = vec![item("success", None, Some(-6.2), Some("1.1.1.1"))];
        assert!(merge_batch(&addrs(&["1.1.1.1"]), items).is_err());
    }

    #[test]
    fn maxmind_without_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.mmdb");
        // Only meaningful when no system-wide database is installed
        if find_database(None).is_none() {
            assert!(matches!(
                MaxMindLookup::open(Some(&missing)),
                Err(LookupError::Database(_))
            ));
        }
    }
}
