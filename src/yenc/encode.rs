//! yEnc encoding
//!
//! The encoding half of the codec. Production code only decodes; the
//! encoder exists for the `decode(encode(p)) == p` law and for building
//! article fixtures in tests.

use crc32fast::Hasher;

/// Wire line length for encoded payload lines
const LINE_LENGTH: usize = 128;

/// Bytes that must always be escaped after the +42 offset
fn is_critical(byte: u8) -> bool {
    matches!(byte, 0x00 | 0x0A | 0x0D | 0x3D)
}

fn crc32_of(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encode the payload region, wrapping lines at [`LINE_LENGTH`].
fn encode_payload(data: &[u8], out: &mut Vec<u8>) {
    let mut column = 0;

    for &byte in data {
        let encoded = byte.wrapping_add(42);

        // Escape the critical set, plus a leading dot so encoded lines never
        // collide with the NNTP terminator.
        let escape = is_critical(encoded) || (column == 0 && encoded == b'.');

        if escape {
            out.push(b'=');
            out.push(encoded.wrapping_add(64));
            column += 2;
        } else {
            out.push(encoded);
            column += 1;
        }

        if column >= LINE_LENGTH {
            out.extend_from_slice(b"\r\n");
            column = 0;
        }
    }

    if column > 0 {
        out.extend_from_slice(b"\r\n");
    }
}

/// Encode a single-part yEnc article with a whole-file `crc32=` trailer.
pub fn encode(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 128);

    out.extend_from_slice(
        format!(
            "=ybegin line={} size={} name={}\r\n",
            LINE_LENGTH,
            data.len(),
            name
        )
        .as_bytes(),
    );

    encode_payload(data, &mut out);

    out.extend_from_slice(
        format!("=yend size={} crc32={:08x}\r\n", data.len(), crc32_of(data)).as_bytes(),
    );

    out
}

/// Encode one part of a multi-part yEnc article with a `pcrc32=` trailer.
///
/// `begin..end` is the inclusive 1-based byte range this part occupies in
/// the original file; `size` in the header is the whole-file size implied
/// by the caller's plan (here taken as `end`, which suffices for the final
/// part and for fixtures).
pub fn encode_part(
    name: &str,
    part: u32,
    total: u32,
    begin: u64,
    end: u64,
    data: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 160);

    out.extend_from_slice(
        format!(
            "=ybegin part={} total={} line={} size={} name={}\r\n",
            part, total, LINE_LENGTH, end, name
        )
        .as_bytes(),
    );
    out.extend_from_slice(format!("=ypart begin={} end={}\r\n", begin, end).as_bytes());

    encode_payload(data, &mut out);

    out.extend_from_slice(
        format!(
            "=yend size={} pcrc32={:08x}\r\n",
            data.len(),
            crc32_of(data)
        )
        .as_bytes(),
    );

    out
}
