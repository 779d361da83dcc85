/// A decoded yEnc article payload
#[derive(Debug, Clone)]
pub struct DecodedSegment {
    /// Original filename from the `=ybegin` header
    pub name: String,
    /// Part number for multi-part articles (`part=` key)
    pub part: Option<u32>,
    /// Total part count for multi-part articles (`total=` key)
    pub total: Option<u32>,
    /// Inclusive 1-based byte range from the `=ypart` line, when multi-part
    pub range: Option<(u64, u64)>,
    /// Decoded payload bytes
    pub data: Vec<u8>,
    /// Whether a trailer CRC32 was present and matched the payload
    pub crc_verified: bool,
}

impl DecodedSegment {
    /// True when an `=ypart` line was present
    pub fn is_multipart(&self) -> bool {
        self.range.is_some()
    }
}
