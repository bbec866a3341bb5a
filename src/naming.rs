//! Save-path derivation
//!
//! Segments are saved under names derived deterministically from the
//! recorded page's address: the host with dots dashed, the path with its
//! leading slash stripped.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const SEGMENT_EXTENSION: &str = "webm";

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid page address: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("page address has no host: {0}")]
    MissingHost(String),
}

/// Address of the page whose canvas is being recorded.
///
/// Always carries a host, so every derived save path starts with a non-empty
/// host token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Url", into = "Url")]
pub struct PageAddress(Url);

impl PageAddress {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        Self::try_from(Url::parse(input)?)
    }

    /// Host with `.` replaced by `-`: `example.com` becomes `example-com`.
    pub fn host_token(&self) -> String {
        self.0.host_str().unwrap_or_default().replace('.', "-")
    }

    /// Path with the leading `/` stripped; query and fragment are dropped.
    pub fn path_token(&self) -> &str {
        self.0.path().trim_start_matches('/')
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<Url> for PageAddress {
    type Error = AddressError;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        if url.host_str().map_or(true, str::is_empty) {
            return Err(AddressError::MissingHost(url.to_string()));
        }
        Ok(Self(url))
    }
}

impl From<PageAddress> for Url {
    fn from(address: PageAddress) -> Url {
        address.0
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Where one segment should land, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePlan {
    relative_path: PathBuf,
}

impl SavePlan {
    /// Builds the plan from raw `/`-separated segments. Empty and dot
    /// components are dropped so a derived path can never escape the
    /// storage root; the final component gets the container extension.
    fn from_segments<'a>(segments: impl Iterator<Item = &'a str>) -> Self {
        let mut parts: Vec<&str> = segments
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect();
        let file = match parts.pop() {
            Some(last) => format!("{last}.{SEGMENT_EXTENSION}"),
            None => format!("capture.{SEGMENT_EXTENSION}"),
        };
        let mut relative_path: PathBuf = parts.iter().collect();
        relative_path.push(file);
        Self { relative_path }
    }

    /// Single-file capture: `{host-token}-{path-token}.webm`. A path with
    /// inner slashes keeps them, so nested pages save into subdirectories.
    pub fn whole_capture(page: &PageAddress) -> Self {
        let host = page.host_token();
        let path = page.path_token();
        let flat = if path.is_empty() {
            host
        } else {
            format!("{host}-{path}")
        };
        Self::from_segments(flat.split('/'))
    }

    /// Chunked capture: `{host-token}/{path-token}/chunk_{sequence}.webm`.
    pub fn chunk(page: &PageAddress, sequence: u64) -> Self {
        let host = page.host_token();
        let file = format!("chunk_{sequence}");
        Self::from_segments(
            std::iter::once(host.as_str())
                .chain(page.path_token().split('/'))
                .chain(std::iter::once(file.as_str())),
        )
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }
}

impl fmt::Display for SavePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path.display().to_string())
    }
}
