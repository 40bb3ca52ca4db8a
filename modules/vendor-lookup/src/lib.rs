//! MAC prefix to vendor resolution: operator overrides first, then the IEEE table.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Label for hardware addresses too short to carry an OUI.
pub const SHORT_MAC: &str = "Unknown (Short MAC)";
/// Label when neither table knows the prefix.
pub const UNKNOWN: &str = "Unknown";
/// Suffix appended to vendors that came from the custom table.
pub const CUSTOM_MARKER: &str = " (Custom)";

/// Strip separators and upper-case: `de:ad:be:ef:00:01` -> `DEADBEEF0001`.
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn valid_prefix(p: &str) -> bool {
    p.len() == 6 && p.chars().all(|c| c.is_ascii_hexdigit())
}

/// Immutable prefix -> vendor mapping, keyed by 6 upper-case hex characters.
#[derive(Debug, Clone, Default)]
pub struct VendorTable {
    entries: HashMap<String, String>,
}

impl VendorTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.entries.get(prefix).map(String::as_str)
    }

    /// Parse the IEEE `oui.txt` layout (`AA-BB-CC   (hex)   Vendor`).
    /// Plain `AABBCC Vendor` lines are accepted as well; everything else
    /// (addresses, `(base 16)` duplicates, headers) is ignored.
    pub fn parse_standard(text: &str) -> Self {
        let mut entries = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            if let Some((left, right)) = line.split_once("(hex)") {
                let prefix = normalize_mac(left);
                let vendor = right.trim();
                if valid_prefix(&prefix) && !vendor.is_empty() {
                    entries.insert(prefix, vendor.to_string());
                } else {
                    warn!(line = idx + 1, content = line.trim(), "skipping malformed OUI line");
                }
                continue;
            }
            if line.contains("(base 16)") || line.starts_with(char::is_whitespace) {
                continue;
            }
            if let Some((left, right)) = line.trim().split_once(char::is_whitespace) {
                let prefix = normalize_mac(left);
                if valid_prefix(&prefix) && !right.trim().is_empty() {
                    entries.insert(prefix, right.trim().to_string());
                }
            }
        }
        VendorTable { entries }
    }

    /// Parse operator overrides: `PREFIX vendor name` per line, `#` comments.
    /// Malformed lines are skipped with a warning.
    pub fn parse_custom(text: &str) -> Self {
        let mut entries = HashMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((left, right)) = line.split_once(char::is_whitespace) else {
                warn!(line = idx + 1, content = line, "invalid custom OUI line format");
                continue;
            };
            let mut prefix = normalize_mac(left);
            if let Some(stripped) = prefix.strip_suffix("(HEX)") {
                prefix = stripped.to_string();
            }
            let vendor = right.trim();
            let vendor = vendor.strip_prefix("(hex)").map(str::trim).unwrap_or(vendor);
            if prefix.len() != 6 {
                warn!(line = idx + 1, prefix = left, "invalid custom OUI prefix length");
                continue;
            }
            if !valid_prefix(&prefix) {
                warn!(line = idx + 1, prefix = left, "invalid custom OUI hex prefix");
                continue;
            }
            if vendor.is_empty() {
                warn!(line = idx + 1, "custom OUI line has no vendor name");
                continue;
            }
            entries.insert(prefix, vendor.to_string());
        }
        VendorTable { entries }
    }

    pub fn load_standard(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read standard OUI file {}", path.display()))?;
        let table = Self::parse_standard(&text);
        if table.is_empty() {
            warn!(path = %path.display(), "no standard OUI data loaded");
        }
        info!(records = table.len(), path = %path.display(), "loaded standard OUI table");
        Ok(table)
    }

    /// A missing override file is normal and yields an empty table.
    pub fn load_custom(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "custom OUI file not found");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("read custom OUI file {}", path.display())),
        };
        let table = Self::parse_custom(&text);
        info!(records = table.len(), path = %path.display(), "loaded custom OUI overrides");
        Ok(table)
    }
}

impl FromIterator<(String, String)> for VendorTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        VendorTable {
            entries: iter.into_iter().map(|(k, v)| (normalize_mac(&k), v)).collect(),
        }
    }
}

/// Three-tier lookup over a pair of tables built once per run.
#[derive(Debug, Clone, Default)]
pub struct VendorResolver {
    standard: VendorTable,
    custom: VendorTable,
}

impl VendorResolver {
    pub fn new(standard: VendorTable, custom: VendorTable) -> Self {
        if standard.is_empty() && !custom.is_empty() {
            warn!("standard OUI table unavailable, using custom overrides only");
        } else if standard.is_empty() {
            warn!("no OUI data loaded, all vendors will resolve as unknown");
        }
        VendorResolver { standard, custom }
    }

    /// Never fails: short input yields [`SHORT_MAC`], no match yields [`UNKNOWN`].
    pub fn resolve(&self, mac: &str) -> String {
        let normalized = normalize_mac(mac);
        if normalized.chars().count() < 6 {
            debug!(mac, "hardware address too short for OUI lookup");
            return SHORT_MAC.to_string();
        }
        let prefix: String = normalized.chars().take(6).collect();
        if let Some(v) = self.custom.get(&prefix) {
            return format!("{v}{CUSTOM_MARKER}");
        }
        if let Some(v) = self.standard.get(&prefix) {
            return v.to_string();
        }
        UNKNOWN.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> VendorTable {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn custom_overrides_standard() {
        let r = VendorResolver::new(
            table(&[("DEADBE", "Acme Corp"), ("001122", "Std Only")]),
            table(&[("DE:AD:BE", "Lab Switch")]),
        );
        assert_eq!(r.resolve("de:ad:be:ef:00:01"), "Lab Switch (Custom)");
        assert_eq!(r.resolve("00-11-22-33-44-55"), "Std Only");
        assert_eq!(r.resolve("FF:FF:FF:00:00:00"), UNKNOWN);
    }

    #[test]
    fn standard_hit_without_override() {
        let r = VendorResolver::new(table(&[("DEADBE", "Acme Corp")]), VendorTable::default());
        assert_eq!(r.resolve("DE:AD:BE:EF:00:01"), "Acme Corp");
        assert_eq!(r.resolve("deadbeef0001"), "Acme Corp");
    }

    #[test]
    fn short_or_empty_addresses_are_indeterminate() {
        let r = VendorResolver::new(table(&[("DEADBE", "Acme Corp")]), VendorTable::default());
        for mac in ["", "DE:AD", "de-ad-b", "::--"] {
            assert_eq!(r.resolve(mac), SHORT_MAC, "input {mac:?}");
        }
    }

    #[test]
    fn parses_ieee_layout() {
        let text = "\
OUI/MA-L                                                    Organization
company_id                                                  Organization
                                                            Address

28-6F-B9   (hex)\t\tNokia Shanghai Bell Co., Ltd.
286FB9     (base 16)\t\tNokia Shanghai Bell Co., Ltd.
\t\t\t\tNo.388 Ning Qiao Road
\t\t\t\tShanghai    201206
\t\t\t\tCN

08-EA-44   (hex)\t\tExtreme Networks Headquarters
";
        let t = VendorTable::parse_standard(text);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get("286FB9"), Some("Nokia Shanghai Bell Co., Ltd."));
        assert_eq!(t.get("08EA44"), Some("Extreme Networks Headquarters"));
    }

    #[test]
    fn custom_parser_skips_malformed_lines() {
        let text = "\
# lab gear
AA:BB:CC  Rack PDU
aabbcd(hex) Spare Router
11-22-33 (hex) Camera
ZZZZZZ Bogus
ABCD Too Short
lonely
";
        let t = VendorTable::parse_custom(text);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get("AABBCC"), Some("Rack PDU"));
        assert_eq!(t.get("AABBCD"), Some("Spare Router"));
        assert_eq!(t.get("112233"), Some("Camera"));
    }

    #[test]
    fn missing_custom_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let t = VendorTable::load_custom(&dir.path().join("custom_oui.txt")).unwrap();
        assert!(t.is_empty());
        assert!(VendorTable::load_standard(&dir.path().join("oui.txt")).is_err());
    }
}
