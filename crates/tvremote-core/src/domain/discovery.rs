//! Discovery records built from SSDP responses.
//!
//! An SSDP response is an HTTP-style header block sent over UDP:
//!
//! ```text
//! HTTP/1.1 200 OK
//! CACHE-CONTROL: max-age=1800
//! LOCATION: http://192.168.1.62:9197/dmr
//! SERVER: SHP, UPnP/1.0, Samsung UPnP SDK/1.0
//! ST: urn:schemas-upnp-org:device:MediaRenderer:1
//! USN: uuid:0ee5c8a4-...::urn:schemas-upnp-org:device:MediaRenderer:1
//! ```
//!
//! [`SsdpHeaders`] keeps those lines in arrival order with lowercased keys.
//! [`DiscoveryRecord`] is one candidate TV, keyed by IP and merged on every
//! repeated sighting.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Substrings that mark a response as coming from a Samsung TV.
///
/// Matched against the lowercased `SERVER`, `USN` and `LOCATION` values.  The
/// list is intentionally loose: firmware variants disagree on which header
/// carries the vendor string.
const RELEVANCE_TOKENS: [&str; 3] = ["samsung", "tv", "smarttv"];

/// Ordered SSDP header set with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsdpHeaders {
    entries: Vec<(String, String)>,
}

impl SsdpHeaders {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a CRLF-delimited header block.
    ///
    /// Lines without a colon (the status line, blank lines) are skipped.  Keys
    /// are lowercased and values trimmed.  A repeated key keeps its first
    /// position and takes the latest value.
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                headers.insert(key, value.trim());
            }
        }
        headers
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: &str, value: &str) {
        let key = key.to_ascii_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key, value.to_string())),
        }
    }

    /// Returns the value for `key`, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Merges `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: &SsdpHeaders) {
        for (k, v) in &other.entries {
            self.insert(k, v);
        }
    }

    /// Iterates over `(key, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cheap vendor filter applied before a response becomes a record.
    pub fn looks_like_samsung_tv(&self) -> bool {
        let haystack = format!(
            "{} {} {}",
            self.get("server").unwrap_or_default(),
            self.get("usn").unwrap_or_default(),
            self.get("location").unwrap_or_default(),
        )
        .to_ascii_lowercase();
        RELEVANCE_TOKENS.iter().any(|t| haystack.contains(t))
    }
}

/// One candidate TV found on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Unique key of the record.
    pub ip: String,
    /// `<friendlyName>` from the device description.
    pub name: Option<String>,
    /// `<modelName>` from the device description.
    pub model: Option<String>,
    /// UPnP description URL taken from `LOCATION`.
    pub location_url: Option<String>,
    pub raw_headers: SsdpHeaders,
    /// Derived from the current session; not authoritative.
    #[serde(default)]
    pub is_connected: bool,
}

impl DiscoveryRecord {
    /// Builds a record from a parsed response.
    ///
    /// The IP comes from the `LOCATION` host when present, otherwise from the
    /// datagram's source address.
    pub fn from_response(headers: SsdpHeaders, source: IpAddr) -> Self {
        let location_url = headers.get("location").map(str::to_string);
        let ip = location_url
            .as_deref()
            .and_then(host_from_location)
            .unwrap_or_else(|| source.to_string());
        Self {
            ip,
            name: None,
            model: None,
            location_url,
            raw_headers: headers,
            is_connected: false,
        }
    }

    /// A record with no metadata, used for hosts found by active probing.
    pub fn synthetic(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            name: None,
            model: None,
            location_url: None,
            raw_headers: SsdpHeaders::new(),
            is_connected: false,
        }
    }

    /// Folds a later sighting of the same IP into this record.
    ///
    /// Headers are merged, and fields that are still empty are filled from
    /// `other`.  Existing name/model/location values are kept.
    pub fn merge(&mut self, other: &DiscoveryRecord) {
        self.raw_headers.merge(&other.raw_headers);
        if self.location_url.is_none() {
            self.location_url = other.location_url.clone();
        }
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        if self.model.is_none() {
            self.model = other.model.clone();
        }
    }

    /// Applies fields read from the device description.
    ///
    /// Returns `true` when the record changed.
    pub fn enrich(&mut self, name: Option<String>, model: Option<String>) -> bool {
        let mut changed = false;
        if let Some(name) = name {
            if self.name.as_deref() != Some(name.as_str()) {
                self.name = Some(name);
                changed = true;
            }
        }
        if let Some(model) = model {
            if self.model.as_deref() != Some(model.as_str()) {
                self.model = Some(model);
                changed = true;
            }
        }
        changed
    }

    /// Best human-readable label: friendly name, then model, then IP.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or(self.ip.as_str())
    }
}

/// Extracts the host part of an `http://` or `https://` URL.
pub fn host_from_location(location: &str) -> Option<String> {
    let rest = location
        .strip_prefix("http://")
        .or_else(|| location.strip_prefix("https://"))
        .or_else(|| location.strip_prefix("HTTP://"))
        .or_else(|| location.strip_prefix("HTTPS://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Finds the text of the first `<tag>…</tag>` element, ignoring case.
///
/// This is a tag search, not an XML parser: device descriptions in the wild
/// are frequently malformed, and only two leaf values are needed.
pub fn grab_tag(xml: &str, tag: &str) -> Option<String> {
    let lower = xml.to_ascii_lowercase();
    let open = format!("<{}>", tag.to_ascii_lowercase());
    let close = format!("</{}>", tag.to_ascii_lowercase());
    let start = lower.find(&open)? + open.len();
    let end = start + lower[start..].find(&close)?;
    let value = xml[start..end].trim();
    if value.is_empty() || value.contains('<') {
        None
    } else {
        Some(value.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
