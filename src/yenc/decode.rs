//! yEnc payload decoding and integrity verification

use crc32fast::Hasher;

use crate::error::{Result, YencError};

use super::params::{parse_ybegin, parse_ypart, parse_yend};
use super::types::DecodedSegment;

/// Decode one yEnc article body into its payload.
///
/// `input` is the dot-unstuffed article body: an `=ybegin` line, an optional
/// `=ypart` line, encoded payload lines, and an `=yend` trailer. Lines before
/// the header (e.g. stray headers some posters leave in the body) are
/// ignored.
///
/// # Errors
///
/// - [`YencError::MissingHeader`] when no `=ybegin` line exists
/// - [`YencError::MissingTrailer`] when no `=yend` line follows the header
/// - [`YencError::CrcMismatch`] when the trailer declares a part CRC
///   (`pcrc32=`) - or, for single-part articles, a whole-file `crc32=` -
///   that does not match the decoded payload
pub fn decode(input: &[u8]) -> Result<DecodedSegment> {
    let lines: Vec<&[u8]> = split_lines(input);

    let header_idx = lines
        .iter()
        .position(|line| line.starts_with(b"=ybegin "))
        .ok_or(YencError::MissingHeader)?;

    let header_str = String::from_utf8_lossy(&lines[header_idx][b"=ybegin ".len()..]);
    let header = parse_ybegin(header_str.trim_end_matches('\r'))?;

    let mut data_start = header_idx + 1;
    let mut part = None;

    if let Some(line) = lines.get(data_start)
        && line.starts_with(b"=ypart ")
    {
        let part_str = String::from_utf8_lossy(&line[b"=ypart ".len()..]);
        part = Some(parse_ypart(part_str.trim_end_matches('\r'))?);
        data_start += 1;
    }

    let trailer_idx = lines
        .iter()
        .rposition(|line| line.starts_with(b"=yend"))
        .filter(|idx| *idx >= data_start)
        .ok_or(YencError::MissingTrailer)?;

    let trailer_str = String::from_utf8_lossy(&lines[trailer_idx][b"=yend".len()..]);
    let trailer = parse_yend(trailer_str.trim_end_matches('\r'))?;

    let mut data = Vec::with_capacity(trailer.size.unwrap_or(0) as usize);
    for line in &lines[data_start..trailer_idx] {
        decode_line(line, &mut data)?;
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let actual = hasher.finalize();

    // pcrc32 binds this part; crc32 binds the whole file and is only
    // checkable here when the article is single-part.
    let expected = trailer
        .pcrc32
        .or(if part.is_none() { trailer.crc32 } else { None });

    if let Some(expected) = expected
        && expected != actual
    {
        return Err(YencError::CrcMismatch { expected, actual }.into());
    }

    Ok(DecodedSegment {
        name: header.name,
        part: header.part,
        total: header.total,
        range: part.map(|p| (p.begin, p.end)),
        data,
        crc_verified: expected.is_some(),
    })
}

/// Split on LF without copying; CR is handled inside [`decode_line`].
fn split_lines(input: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;

    for (i, &byte) in input.iter().enumerate() {
        if byte == b'\n' {
            lines.push(&input[start..i]);
            start = i + 1;
        }
    }
    if start < input.len() {
        lines.push(&input[start..]);
    }

    lines
}

/// Decode a single payload line.
///
/// Every byte is offset by -42 (mod 256); `=` marks an escape whose operand
/// gets an extra -64. CR and LF are transport framing, not payload.
fn decode_line(line: &[u8], output: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;

    while i < line.len() {
        let byte = line[i];

        if byte == b'\r' || byte == b'\n' {
            i += 1;
            continue;
        }

        if byte == b'=' {
            i += 1;
            let Some(&escaped) = line.get(i) else {
                return Err(YencError::Malformed {
                    line: "payload",
                    reason: "incomplete escape sequence at end of line".to_string(),
                }
                .into());
            };
            output.push(escaped.wrapping_sub(64).wrapping_sub(42));
        } else {
            output.push(byte.wrapping_sub(42));
        }

        i += 1;
    }

    Ok(())
}
