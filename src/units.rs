//! Human-readable size string conversion
//!
//! Sizes follow IEC binary prefixes (`KiB`..`EiB`) on output. Input also
//! accepts decimal SI units (`KB`..`EB`), bare single letters (treated as
//! binary) and plain byte counts. Conversion is exact for power-of-1024
//! multiples.

use crate::error::{Error, Result};

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;
const PIB: u64 = 1 << 50;
const EIB: u64 = 1 << 60;

/// Units checked largest-first when rendering
const IEC_UNITS: [(&str, u64); 6] = [
    ("EiB", EIB),
    ("PiB", PIB),
    ("TiB", TIB),
    ("GiB", GIB),
    ("MiB", MIB),
    ("KiB", KIB),
];

fn unit_multiplier(unit: &str) -> Option<u64> {
    // Case-folded; "IB" suffixes are binary, "B" suffixes decimal,
    // bare letters binary (so "2K" reads as "2KiB").
    match unit.to_uppercase().as_str() {
        "" | "B" => Some(1),
        "KIB" | "K" => Some(KIB),
        "MIB" | "M" => Some(MIB),
        "GIB" | "G" => Some(GIB),
        "TIB" | "T" => Some(TIB),
        "PIB" | "P" => Some(PIB),
        "EIB" | "E" => Some(EIB),
        "KB" => Some(10u64.pow(3)),
        "MB" => Some(10u64.pow(6)),
        "GB" => Some(10u64.pow(9)),
        "TB" => Some(10u64.pow(12)),
        "PB" => Some(10u64.pow(15)),
        "EB" => Some(10u64.pow(18)),
        _ => None,
    }
}

/// Convert a byte count into a human readable IEC string, e.g. `"1.00 GiB"`.
/// Counts below 1 KiB render as a plain byte count.
pub fn size_bytes_to_human(size: u64) -> String {
    for (unit, mult) in IEC_UNITS {
        if size >= mult {
            return format!("{:.2} {}", size as f64 / mult as f64, unit);
        }
    }
    format!("{} B", size)
}

/// Parse a human readable size string into bytes.
///
/// Accepted forms: `"1.9KiB"`, `"1 KiB"`, `"200GiB"`, `"2K"`, `"2KB"`,
/// `"512"`. Whitespace between number and unit is optional.
pub fn size_human_to_bytes(size_human: &str) -> Result<u64> {
    let s = size_human.trim();
    let split = s
        .find(|c: char| c != '.' && !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let unit = unit.trim();

    if number.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "Invalid size string: '{size_human}'"
        )));
    }
    let mult = unit_multiplier(unit).ok_or_else(|| {
        Error::InvalidArgument(format!("Unknown size unit '{unit}' in '{size_human}'"))
    })?;

    // Integral counts stay exact; fractional ones go through f64.
    if let Ok(n) = number.parse::<u64>() {
        return Ok(n * mult);
    }
    let f: f64 = number
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid size string: '{size_human}'")))?;
    Ok((f * mult as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_bytes_to_human() {
        assert_eq!(size_bytes_to_human(GIB), "1.00 GiB");
        assert_eq!(size_bytes_to_human(512), "512 B");
        assert_eq!(size_bytes_to_human(1996), "1.95 KiB");
        assert_eq!(size_bytes_to_human(10 * MIB), "10.00 MiB");
    }

    #[test]
    fn test_human_to_bytes_exact() {
        assert_eq!(size_human_to_bytes("200GiB").unwrap(), 200 * GIB);
        assert_eq!(size_human_to_bytes("1 KiB").unwrap(), 1024);
        assert_eq!(size_human_to_bytes("1B").unwrap(), 1);
        assert_eq!(size_human_to_bytes("512").unwrap(), 512);
        assert_eq!(size_human_to_bytes("2K").unwrap(), 2 * KIB);
        assert_eq!(size_human_to_bytes("2k").unwrap(), 2 * KIB);
        assert_eq!(size_human_to_bytes("2KB").unwrap(), 2000);
        assert_eq!(size_human_to_bytes("3 TiB").unwrap(), 3 * TIB);
    }

    #[test]
    fn test_human_to_bytes_fractional() {
        assert_eq!(size_human_to_bytes("1.9KiB").unwrap(), (1024.0 * 1.9) as u64);
        assert_eq!(size_human_to_bytes("0.5 GiB").unwrap(), GIB / 2);
    }

    #[test]
    fn test_human_to_bytes_rejects_garbage() {
        assert_matches!(size_human_to_bytes("GiB"), Err(Error::InvalidArgument(_)));
        assert_matches!(size_human_to_bytes("12 parsecs"), Err(Error::InvalidArgument(_)));
        assert_matches!(size_human_to_bytes(""), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_round_trip_power_of_1024() {
        for mult in [KIB, MIB, GIB, TIB] {
            let human = size_bytes_to_human(mult);
            assert_eq!(size_human_to_bytes(&human).unwrap(), mult);
        }
    }
}
