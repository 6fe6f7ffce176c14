//! Byte fetching for remote files and reference feeds.
//!
//! A location is either an `http(s)://` URL, a `file://` URL or a plain path.
//! Query strings and fragments (as found on signed URLs) are ignored when
//! guessing the file format from the extension.
use std::path::{Path, PathBuf};

use crate::error::FetchError;

/// Where a location points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Http(String),
}

impl Location {
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Location::Http(location.to_string())
        } else if let Some(rest) = location.strip_prefix("file://") {
            Location::Local(PathBuf::from(rest))
        } else {
            Location::Local(PathBuf::from(location))
        }
    }
}

/// `file://` URL for a local path.
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Lowercased extension of the location's path, without query or fragment.
pub fn extension_of(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() { None } else { Some(ext.to_ascii_lowercase()) }
}

/// Read the full contents at `location`.
pub async fn fetch_bytes(location: &str) -> Result<Vec<u8>, FetchError> {
    match Location::parse(location) {
        Location::Local(path) => tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io { location: location.to_string(), source }),
        Location::Http(url) => {
            let http = |source| FetchError::Http { location: location.to_string(), source };
            let resp = reqwest::get(&url).await.map_err(http)?;
            let resp = resp.error_for_status().map_err(http)?;
            let body = resp.bytes().await.map_err(http)?;
            Ok(body.to_vec())
        }
    }
}

#[cfg(test)]
mod location_tests {
    use super::*;

    #[test]
    fn parses_all_location_kinds() {
        assert_eq!(Location::parse("https://x/y.tsv"), Location::Http("https://x/y.tsv".into()));
        assert_eq!(Location::parse("file:///tmp/a.tsv"), Location::Local(PathBuf::from("/tmp/a.tsv")));
        assert_eq!(Location::parse("rel/a.tsv"), Location::Local(PathBuf::from("rel/a.tsv")));
    }

    #[test]
    fn extension_ignores_signed_url_parameters() {
        assert_eq!(extension_of("https://h/p/run.bracken_long_format.TSV?sig=a.b&x=1").as_deref(), Some("tsv"));
        assert_eq!(extension_of("/data/out.parquet#frag").as_deref(), Some("parquet"));
        assert_eq!(extension_of("https://h.org/dir/noext"), None);
    }

    #[tokio::test]
    async fn missing_local_file_is_an_io_error() {
        let err = fetch_bytes("/definitely/not/here.tsv").await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }
}
