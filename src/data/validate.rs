//! Identifier validation and normalization
//!
//! Runs at entity construction time so invalid wire data is rejected as
//! soon as the entity is built, on either side of the socket.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// SCSI VPD page 0x83 NAA identifier: NAA type 6 (32 hex digits) or
/// NAA type 2/3/5 (16 hex digits).
static VPD83_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:6[0-9a-f]{31}|[235][0-9a-f]{15})$").unwrap());

/// WWPN in any accepted separator style: `:`/`-`/`.`/none, optional `0x`
/// prefix, any case.
static WWPN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:0[xX])?[0-9A-Fa-f]{2}(?:[.:\-]?[0-9A-Fa-f]{2}){7}$").unwrap());

/// Check a VPD 0x83 NAA string. Empty means "not reported" and is allowed.
pub fn vpd83_valid(vpd83: &str) -> bool {
    vpd83.is_empty() || VPD83_RE.is_match(vpd83)
}

/// Initiator ID kinds accepted in access groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorKind {
    Wwpn,
    IscsiIqn,
}

/// Verify one initiator ID, returning its kind and normalized form.
///
/// WWPNs come back as lower-case colon-separated octets
/// (`10:00:00:00:c9:95:2f:de`); iSCSI names (`iqn`/`eui`/`naa` prefixes)
/// pass through untouched.
pub fn initiator_id_verify(init_id: &str) -> Result<(InitiatorKind, String)> {
    if init_id.starts_with("iqn") || init_id.starts_with("eui") || init_id.starts_with("naa") {
        return Ok((InitiatorKind::IscsiIqn, init_id.to_string()));
    }
    if WWPN_RE.is_match(init_id) {
        return Ok((InitiatorKind::Wwpn, normalize_wwpn_unchecked(init_id)));
    }
    Err(Error::InvalidArgument(format!(
        "Initiator id '{init_id}' is invalid"
    )))
}

/// Normalize a WWPN to the canonical lower-case colon-separated form.
pub fn wwpn_normalize(wwpn: &str) -> Result<String> {
    if WWPN_RE.is_match(wwpn) {
        Ok(normalize_wwpn_unchecked(wwpn))
    } else {
        Err(Error::InvalidArgument(format!("Invalid WWPN: '{wwpn}'")))
    }
}

fn normalize_wwpn_unchecked(wwpn: &str) -> String {
    let hex: String = wwpn
        .to_lowercase()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();
    hex.as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

/// Validate and normalize a whole initiator list, preserving order and
/// dropping duplicates.
pub fn standardize_init_ids(init_ids: &[String]) -> Result<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(init_ids.len());
    for raw in init_ids {
        let (_, normalized) = initiator_id_verify(raw)?;
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_vpd83_naa_type_6() {
        let good = format!("6{}", "0".repeat(31));
        assert!(vpd83_valid(&good));
    }

    #[test]
    fn test_vpd83_naa_type_2() {
        let good = format!("2{}", "0".repeat(15));
        assert!(vpd83_valid(&good));
    }

    #[test]
    fn test_vpd83_rejects_bad_prefix_and_length() {
        assert!(!vpd83_valid(&format!("1{}", "0".repeat(15))));
        assert!(!vpd83_valid("60a98000abc"));
        assert!(!vpd83_valid(&format!("6{}", "0".repeat(30))));
        // upper case hex is not accepted on the wire
        assert!(!vpd83_valid(&format!("6{}", "A".repeat(31))));
        // empty means "not reported"
        assert!(vpd83_valid(""));
    }

    #[test]
    fn test_wwpn_normalization_styles() {
        let want = "10:00:00:00:c9:95:2f:de";
        for style in [
            "10:00:00:00:c9:95:2f:de",
            "10:00:00:00:C9:95:2F:DE",
            "10-00-00-00-C9-95-2F-DE",
            "10.00.00.00.c9.95.2f.de",
            "0x10000000c9952fde",
            "0X10000000C9952FDE",
            "10000000c9952fde",
        ] {
            assert_eq!(wwpn_normalize(style).unwrap(), want, "style {style}");
        }
    }

    #[test]
    fn test_wwpn_rejects_malformed() {
        assert_matches!(wwpn_normalize("10:00:00"), Err(Error::InvalidArgument(_)));
        assert_matches!(wwpn_normalize("zz:00:00:00:c9:95:2f:de"), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_initiator_kinds() {
        let (kind, id) = initiator_id_verify("iqn.1994-05.com.domain:01.89bd01").unwrap();
        assert_eq!(kind, InitiatorKind::IscsiIqn);
        assert_eq!(id, "iqn.1994-05.com.domain:01.89bd01");

        let (kind, id) = initiator_id_verify("0x10000000c9952fde").unwrap();
        assert_eq!(kind, InitiatorKind::Wwpn);
        assert_eq!(id, "10:00:00:00:c9:95:2f:de");

        assert_matches!(initiator_id_verify("not-an-initiator"), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_standardize_preserves_order_drops_dups() {
        let ids = vec![
            "0x10000000c9952fde".to_string(),
            "iqn.2001-04.com.example:sn.1".to_string(),
            "10-00-00-00-C9-95-2F-DE".to_string(),
        ];
        let out = standardize_init_ids(&ids).unwrap();
        assert_eq!(
            out,
            vec![
                "10:00:00:00:c9:95:2f:de".to_string(),
                "iqn.2001-04.com.example:sn.1".to_string(),
            ]
        );
    }
}
