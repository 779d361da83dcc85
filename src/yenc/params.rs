//! yEnc header and trailer line parsing
//!
//! `=ybegin`, `=ypart`, and `=yend` lines carry space-separated `key=value`
//! pairs. The `name=` key, when present, is always last and its value runs
//! to end-of-line (filenames may contain spaces).

use crate::error::{Result, YencError};

/// Parsed `=ybegin` line
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Ybegin {
    /// Declared total file size, if present
    pub size: Option<u64>,
    /// Original filename (may be empty if the header omitted `name=`)
    pub name: String,
    /// Part number for multi-part articles
    pub part: Option<u32>,
    /// Total part count for multi-part articles
    pub total: Option<u32>,
}

/// Parsed `=ypart` line
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Ypart {
    /// 1-based inclusive start offset in the original file
    pub begin: u64,
    /// 1-based inclusive end offset in the original file
    pub end: u64,
}

/// Parsed `=yend` line
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Yend {
    /// Declared decoded size of this part
    pub size: Option<u64>,
    /// Whole-file CRC32 (hex in the wire form)
    pub crc32: Option<u32>,
    /// This part's CRC32 (hex in the wire form)
    pub pcrc32: Option<u32>,
}

/// Split a parameter region into `key=value` pairs.
///
/// `name=` terminates keyword parsing: everything after it, spaces
/// included, is the value.
fn split_pairs(params: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];

        if key == "name" {
            pairs.push((key, after.trim()));
            break;
        }

        let (value, remainder) = match after.find(' ') {
            Some(space) => (&after[..space], after[space + 1..].trim_start()),
            None => (after, ""),
        };
        pairs.push((key, value));
        rest = remainder;
    }

    pairs
}

fn parse_u64(line: &'static str, key: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| {
        YencError::Malformed {
            line,
            reason: format!("{key}={value} is not a number"),
        }
        .into()
    })
}

fn parse_hex_u32(line: &'static str, key: &str, value: &str) -> Result<u32> {
    u32::from_str_radix(value.trim(), 16).map_err(|_| {
        YencError::Malformed {
            line,
            reason: format!("{key}={value} is not hex"),
        }
        .into()
    })
}

/// Parse an `=ybegin ...` line (without the leading marker).
pub(super) fn parse_ybegin(params: &str) -> Result<Ybegin> {
    let mut header = Ybegin {
        size: None,
        name: String::new(),
        part: None,
        total: None,
    };

    for (key, value) in split_pairs(params) {
        match key {
            "size" => header.size = Some(parse_u64("ybegin", key, value)?),
            "part" => header.part = Some(parse_u64("ybegin", key, value)? as u32),
            "total" => header.total = Some(parse_u64("ybegin", key, value)? as u32),
            "name" => header.name = value.to_string(),
            // line= and unknown keys don't affect decoding
            _ => {}
        }
    }

    Ok(header)
}

/// Parse an `=ypart ...` line (without the leading marker).
pub(super) fn parse_ypart(params: &str) -> Result<Ypart> {
    let mut begin = None;
    let mut end = None;

    for (key, value) in split_pairs(params) {
        match key {
            "begin" => begin = Some(parse_u64("ypart", key, value)?),
            "end" => end = Some(parse_u64("ypart", key, value)?),
            _ => {}
        }
    }

    match (begin, end) {
        (Some(begin), Some(end)) => Ok(Ypart { begin, end }),
        _ => Err(YencError::Malformed {
            line: "ypart",
            reason: "missing begin= or end=".to_string(),
        }
        .into()),
    }
}

/// Parse an `=yend ...` line (without the leading marker).
pub(super) fn parse_yend(params: &str) -> Result<Yend> {
    let mut trailer = Yend {
        size: None,
        crc32: None,
        pcrc32: None,
    };

    for (key, value) in split_pairs(params) {
        match key {
            "size" => trailer.size = Some(parse_u64("yend", key, value)?),
            "crc32" => trailer.crc32 = Some(parse_hex_u32("yend", key, value)?),
            "pcrc32" => trailer.pcrc32 = Some(parse_hex_u32("yend", key, value)?),
            _ => {}
        }
    }

    Ok(trailer)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ybegin_with_all_keys() {
        let header = parse_ybegin("part=1 total=2 line=128 size=768000 name=file.rar").unwrap();
        assert_eq!(header.part, Some(1));
        assert_eq!(header.total, Some(2));
        assert_eq!(header.size, Some(768000));
        assert_eq!(header.name, "file.rar");
    }

    #[test]
    fn name_value_extends_to_end_of_line_with_spaces() {
        let header = parse_ybegin("line=128 size=5 name=My File (final).mkv").unwrap();
        assert_eq!(header.name, "My File (final).mkv");
    }

    #[test]
    fn name_containing_equals_is_preserved() {
        let header = parse_ybegin("size=5 name=weird=name.bin").unwrap();
        assert_eq!(header.name, "weird=name.bin");
    }

    #[test]
    fn ybegin_without_name_yields_empty_name() {
        let header = parse_ybegin("line=128 size=42").unwrap();
        assert_eq!(header.name, "");
        assert_eq!(header.size, Some(42));
    }

    #[test]
    fn ypart_parses_begin_and_end() {
        let part = parse_ypart("begin=1 end=384000").unwrap();
        assert_eq!(part.begin, 1);
        assert_eq!(part.end, 384000);
    }

    #[test]
    fn ypart_missing_end_is_malformed() {
        let err = parse_ypart("begin=1").unwrap_err();
        assert!(err.to_string().contains("ypart"));
    }

    #[test]
    fn yend_parses_hex_crcs() {
        let trailer = parse_yend("size=5 crc32=DeadBeef pcrc32=0000ffff").unwrap();
        assert_eq!(trailer.size, Some(5));
        assert_eq!(trailer.crc32, Some(0xDEAD_BEEF));
        assert_eq!(trailer.pcrc32, Some(0x0000_FFFF));
    }

    #[test]
    fn yend_without_crcs_is_ok() {
        let trailer = parse_yend("size=5").unwrap();
        assert_eq!(trailer.crc32, None);
        assert_eq!(trailer.pcrc32, None);
    }

    #[test]
    fn non_numeric_size_is_malformed() {
        assert!(parse_ybegin("size=abc name=x").is_err());
        assert!(parse_yend("size=5 crc32=zzzz").is_err());
    }
}
