//! Authoritative zone set and query-name normalization.

use hickory_proto::rr::Name;

use crate::error::DnsError;

/// Lower-case a DNS name and make it fully qualified.
pub fn normalize(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// Part of a normalized `qname` below a normalized `zone`, without trailing dot.
///
/// Returns `None` for the apex itself or when `qname` is not in `zone`.
pub fn relative_to(qname: &str, zone: &str) -> Option<String> {
    if zone == "." {
        let rel = qname.trim_end_matches('.');
        return (!rel.is_empty()).then(|| rel.to_string());
    }
    let prefix = qname.strip_suffix(zone)?.strip_suffix('.')?;
    (!prefix.is_empty()).then(|| prefix.to_string())
}

/// Configured authoritative zones, normalized and ordered longest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zones {
    zones: Vec<String>,
}

impl Zones {
    /// Validate and normalize a zone list.
    pub fn new<I, S>(zones: I) -> Result<Self, DnsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for zone in zones {
            let zone = zone.as_ref();
            if zone.trim().is_empty() {
                return Err(DnsError::Config("empty zone name".to_string()));
            }
            let zone = normalize(zone);
            Name::from_ascii(&zone)
                .map_err(|e| DnsError::Config(format!("invalid zone {zone:?}: {e}")))?;
            if !normalized.contains(&zone) {
                normalized.push(zone);
            }
        }

        if normalized.is_empty() {
            return Err(DnsError::Config("at least one zone is required".to_string()));
        }

        normalized.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Ok(Self { zones: normalized })
    }

    /// Most specific zone containing `qname`, if any.
    pub fn matches(&self, qname: &str) -> Option<&str> {
        let qname = normalize(qname);
        self.zones
            .iter()
            .find(|zone| {
                zone.as_str() == "."
                    || qname == **zone
                    || qname
                        .strip_suffix(zone.as_str())
                        .is_some_and(|p| p.ends_with('.'))
            })
            .map(String::as_str)
    }

    /// Iterate zones, longest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(String::as_str)
    }

    /// Number of zones.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether there are no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
