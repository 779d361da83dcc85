//! NZB descriptor parser
//!
//! NZB is an XML-based format describing Usenet binary posts: one or more
//! `<file>` entries, each carrying newsgroups and yEnc article segments
//! addressed by message-id. An optional `<head>` section carries metadata,
//! including the archive password.
//!
//! Reference: https://sabnzbd.org/wiki/extra/nzb-spec

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};

/// Parsed NZB job plan
#[derive(Debug, Clone, PartialEq)]
pub struct NzbPlan {
    /// Metadata from the `<head>` section, in document order
    pub meta: Vec<(String, String)>,
    /// Files described by this NZB, in document order
    pub files: Vec<NzbFile>,
}

/// A single file entry in an NZB
#[derive(Debug, Clone, PartialEq)]
pub struct NzbFile {
    /// Poster name/email
    pub poster: String,
    /// Unix timestamp of posting
    pub date: i64,
    /// Subject line (the only legal filename source)
    pub subject: String,
    /// Newsgroups where this file was posted
    pub groups: Vec<String>,
    /// Segments of this file, unordered as stored in the document
    pub segments: Vec<NzbSegment>,
}

/// A segment (one article) of a file
#[derive(Debug, Clone, PartialEq)]
pub struct NzbSegment {
    /// Size of this segment in bytes
    pub bytes: u64,
    /// Segment ordinal (1-based, unique within the file)
    pub number: u32,
    /// Message-id for retrieving this segment, without angle brackets
    pub message_id: String,
}

impl NzbFile {
    /// Extract the output filename from the subject line.
    ///
    /// Preference order:
    /// 1. the substring between the first pair of ASCII double quotes,
    /// 2. the first whitespace-delimited token containing a `.`,
    /// 3. the subject itself.
    pub fn filename(&self) -> String {
        if let Some(open) = self.subject.find('"') {
            let rest = &self.subject[open + 1..];
            if let Some(close) = rest.find('"') {
                let quoted = &rest[..close];
                if !quoted.is_empty() {
                    return quoted.to_string();
                }
            }
        }

        if let Some(token) = self
            .subject
            .split_whitespace()
            .find(|token| token.contains('.'))
        {
            return token.to_string();
        }

        self.subject.clone()
    }

    /// Total size of all segments in bytes
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    /// Return the segments sorted by ordinal, ascending.
    ///
    /// Duplicate ordinals are a fatal plan-level error: the assembler could
    /// not decide which payload wins the slot.
    pub fn sorted_segments(&self) -> Result<Vec<&NzbSegment>> {
        let mut sorted: Vec<&NzbSegment> = self.segments.iter().collect();
        sorted.sort_by_key(|s| s.number);

        for pair in sorted.windows(2) {
            if pair[0].number == pair[1].number {
                return Err(Error::InvalidNzb(format!(
                    "duplicate segment number {} in \"{}\"",
                    pair[0].number,
                    self.filename()
                )));
            }
        }

        Ok(sorted)
    }
}

impl NzbPlan {
    /// Total size of all files in bytes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_bytes()).sum()
    }

    /// Total segment count across all files
    pub fn total_segments(&self) -> u64 {
        self.files.iter().map(|f| f.segments.len() as u64).sum()
    }

    /// Archive password from the first `<meta type="password">` entry,
    /// trimmed; `None` if absent or empty.
    pub fn password(&self) -> Option<&str> {
        self.meta
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("password"))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Strip one pair of enclosing angle brackets from a message-id token.
fn normalize_message_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
        .to_string()
}

/// Parse an NZB document from raw bytes.
///
/// Tolerates arbitrary XML namespaces on the root element and does not
/// require (or fetch) the DTD.
///
/// # Errors
///
/// Returns [`Error::InvalidNzb`] when the XML is malformed, the plan has
/// zero files, any file has zero segments, or any segment has an empty
/// message-id.
pub fn parse_nzb(bytes: &[u8]) -> Result<NzbPlan> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut plan = NzbPlan {
        meta: Vec::new(),
        files: Vec::new(),
    };

    let mut in_head = false;
    let mut in_groups = false;
    let mut in_segments = false;
    let mut meta_type: Option<String> = None;
    let mut current_file: Option<NzbFile> = None;
    // Attributes of the <segment> whose text content is still pending
    let mut pending_segment: Option<(u64, u32)> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"head" => in_head = true,
                b"meta" if in_head => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"type" {
                            meta_type =
                                Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
                b"file" => {
                    let mut poster = String::new();
                    let mut date = 0i64;
                    let mut subject = String::new();

                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().unwrap_or_default().to_string();
                        match attr.key.local_name().as_ref() {
                            b"poster" => poster = value,
                            b"date" => date = value.parse().unwrap_or(0),
                            b"subject" => subject = value,
                            _ => {}
                        }
                    }

                    current_file = Some(NzbFile {
                        poster,
                        date,
                        subject,
                        groups: Vec::new(),
                        segments: Vec::new(),
                    });
                }
                b"groups" if current_file.is_some() => in_groups = true,
                b"segments" if current_file.is_some() => in_segments = true,
                b"segment" if in_segments => {
                    let mut bytes_attr = 0u64;
                    let mut number = 0u32;

                    for attr in e.attributes().flatten() {
                        let value = String::from_utf8_lossy(&attr.value).to_string();
                        match attr.key.local_name().as_ref() {
                            b"bytes" => bytes_attr = value.parse().unwrap_or(0),
                            b"number" => number = value.parse().unwrap_or(0),
                            _ => {}
                        }
                    }

                    pending_segment = Some((bytes_attr, number));
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();

                if let Some(key) = meta_type.as_ref() {
                    plan.meta.push((key.clone(), text));
                } else if in_groups {
                    if let Some(file) = current_file.as_mut()
                        && !text.is_empty()
                    {
                        file.groups.push(text);
                    }
                } else if let Some((seg_bytes, seg_number)) = pending_segment.take()
                    && let Some(file) = current_file.as_mut()
                {
                    file.segments.push(NzbSegment {
                        bytes: seg_bytes,
                        number: seg_number,
                        message_id: normalize_message_id(&text),
                    });
                }
            }
            Ok(Event::Empty(ref e)) => {
                // A self-closing <segment/> has no message-id; record it so
                // validation rejects the plan instead of silently dropping it.
                if e.local_name().as_ref() == b"segment"
                    && in_segments
                    && let Some(file) = current_file.as_mut()
                {
                    file.segments.push(NzbSegment {
                        bytes: 0,
                        number: 0,
                        message_id: String::new(),
                    });
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"head" => in_head = false,
                b"meta" => meta_type = None,
                b"file" => {
                    if let Some(file) = current_file.take() {
                        plan.files.push(file);
                    }
                }
                b"groups" => in_groups = false,
                b"segments" => in_segments = false,
                b"segment" => {
                    // A <segment></segment> with an empty body never produced
                    // a Text event; record the missing message-id so
                    // validation rejects the plan.
                    if let Some((seg_bytes, seg_number)) = pending_segment.take()
                        && let Some(file) = current_file.as_mut()
                    {
                        file.segments.push(NzbSegment {
                            bytes: seg_bytes,
                            number: seg_number,
                            message_id: String::new(),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::InvalidNzb(format!("XML parse error: {}", e)));
            }
            _ => {}
        }

        buf.clear();
    }

    validate_plan(&plan)?;
    Ok(plan)
}

/// Reject structurally useless plans before they reach the engine.
fn validate_plan(plan: &NzbPlan) -> Result<()> {
    if plan.files.is_empty() {
        return Err(Error::InvalidNzb("NZB contains no files".to_string()));
    }

    for file in &plan.files {
        if file.segments.is_empty() {
            return Err(Error::InvalidNzb(format!(
                "file \"{}\" has no segments",
                file.filename()
            )));
        }

        for segment in &file.segments {
            if segment.message_id.is_empty() {
                return Err(Error::InvalidNzb(format!(
                    "segment {} of \"{}\" has an empty message-id",
                    segment.number,
                    file.filename()
                )));
            }
        }
    }

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_NZB: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.1//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd">
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
  <head>
    <meta type="title">Test File</meta>
    <meta type="password">secret123</meta>
  </head>
  <file poster="user@example.com" date="1234567890" subject="[01/10] - &quot;archive.part01.rar&quot; yEnc (1/3)">
    <groups>
      <group>alt.binaries.test</group>
      <group>alt.binaries.backup</group>
    </groups>
    <segments>
      <segment bytes="768000" number="1">part1@example.com</segment>
      <segment bytes="768000" number="3">part3@example.com</segment>
      <segment bytes="500000" number="2">part2@example.com</segment>
    </segments>
  </file>
</nzb>"#;

    #[test]
    fn parses_files_groups_and_segments() {
        let plan = parse_nzb(SIMPLE_NZB.as_bytes()).unwrap();

        assert_eq!(plan.files.len(), 1);
        let file = &plan.files[0];
        assert_eq!(file.poster, "user@example.com");
        assert_eq!(file.date, 1234567890);
        assert_eq!(
            file.groups,
            vec!["alt.binaries.test", "alt.binaries.backup"]
        );
        assert_eq!(file.segments.len(), 3);
        assert_eq!(file.segments[0].bytes, 768000);
        assert_eq!(file.segments[0].message_id, "part1@example.com");
    }

    #[test]
    fn segments_keep_document_order_until_sorted() {
        let plan = parse_nzb(SIMPLE_NZB.as_bytes()).unwrap();
        let file = &plan.files[0];

        // As stored: 1, 3, 2
        assert_eq!(file.segments[1].number, 3);

        let sorted = file.sorted_segments().unwrap();
        let numbers: Vec<u32> = sorted.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_ordinals_are_a_fatal_plan_error() {
        let xml = r#"<nzb>
  <file poster="p" date="0" subject="dup.bin">
    <groups><group>alt.test</group></groups>
    <segments>
      <segment bytes="10" number="1">a@x</segment>
      <segment bytes="10" number="1">b@x</segment>
    </segments>
  </file>
</nzb>"#;

        let plan = parse_nzb(xml.as_bytes()).unwrap();
        let err = plan.files[0].sorted_segments().unwrap_err();
        assert!(err.to_string().contains("duplicate segment number 1"));
    }

    #[test]
    fn password_is_first_case_insensitive_meta_trimmed() {
        let plan = parse_nzb(SIMPLE_NZB.as_bytes()).unwrap();
        assert_eq!(plan.password(), Some("secret123"));

        let xml = r#"<nzb>
  <head>
    <meta type="PassWord">  spaced  </meta>
    <meta type="password">second</meta>
  </head>
  <file poster="p" date="0" subject="a.bin">
    <groups><group>g</group></groups>
    <segments><segment bytes="1" number="1">m@x</segment></segments>
  </file>
</nzb>"#;
        let plan = parse_nzb(xml.as_bytes()).unwrap();
        assert_eq!(plan.password(), Some("spaced"));
    }

    #[test]
    fn absent_or_empty_password_is_none() {
        let xml = r#"<nzb>
  <head><meta type="password">   </meta></head>
  <file poster="p" date="0" subject="a.bin">
    <groups><group>g</group></groups>
    <segments><segment bytes="1" number="1">m@x</segment></segments>
  </file>
</nzb>"#;
        let plan = parse_nzb(xml.as_bytes()).unwrap();
        assert_eq!(plan.password(), None);
    }

    #[test]
    fn tolerates_namespace_prefix_on_every_element() {
        let xml = r#"<?xml version="1.0"?>
<x:nzb xmlns:x="http://www.newzbin.com/DTD/2003/nzb">
  <x:file poster="p" date="5" subject="data.bin">
    <x:groups><x:group>alt.test</x:group></x:groups>
    <x:segments><x:segment bytes="100" number="1">msg@example</x:segment></x:segments>
  </x:file>
</x:nzb>"#;

        let plan = parse_nzb(xml.as_bytes()).unwrap();
        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].segments[0].message_id, "msg@example");
    }

    #[test]
    fn message_ids_with_angle_brackets_are_normalized() {
        let xml = r#"<nzb>
  <file poster="p" date="0" subject="a.bin">
    <groups><group>g</group></groups>
    <segments>
      <segment bytes="1" number="1">&lt;bracketed@example.com&gt;</segment>
      <segment bytes="1" number="2">bare@example.com</segment>
    </segments>
  </file>
</nzb>"#;

        let plan = parse_nzb(xml.as_bytes()).unwrap();
        assert_eq!(plan.files[0].segments[0].message_id, "bracketed@example.com");
        assert_eq!(plan.files[0].segments[1].message_id, "bare@example.com");
    }

    // --- filename extraction ---

    #[test]
    fn filename_prefers_quoted_substring() {
        let plan = parse_nzb(SIMPLE_NZB.as_bytes()).unwrap();
        assert_eq!(plan.files[0].filename(), "archive.part01.rar");
    }

    #[test]
    fn filename_falls_back_to_dotted_token() {
        let file = NzbFile {
            poster: String::new(),
            date: 0,
            subject: "great post movie.mkv yEnc (1/20)".to_string(),
            groups: vec![],
            segments: vec![],
        };
        assert_eq!(file.filename(), "movie.mkv");
    }

    #[test]
    fn filename_final_fallback_is_the_subject() {
        let file = NzbFile {
            poster: String::new(),
            date: 0,
            subject: "no filename here".to_string(),
            groups: vec![],
            segments: vec![],
        };
        assert_eq!(file.filename(), "no filename here");
    }

    #[test]
    fn filename_ignores_empty_quote_pair() {
        let file = NzbFile {
            poster: String::new(),
            date: 0,
            subject: r#""" fallback.bin"#.to_string(),
            groups: vec![],
            segments: vec![],
        };
        assert_eq!(file.filename(), "fallback.bin");
    }

    // --- validation failures ---

    #[test]
    fn malformed_xml_is_invalid_nzb() {
        let err = parse_nzb(b"<nzb><file></nzb>").unwrap_err();
        assert!(matches!(err, Error::InvalidNzb(_)), "got: {err}");
    }

    #[test]
    fn zero_files_is_invalid_nzb() {
        let err = parse_nzb(b"<nzb><head></head></nzb>").unwrap_err();
        assert!(err.to_string().contains("no files"));
    }

    #[test]
    fn file_without_segments_is_invalid_nzb() {
        let xml = r#"<nzb>
  <file poster="p" date="0" subject="a.bin">
    <groups><group>g</group></groups>
    <segments></segments>
  </file>
</nzb>"#;
        let err = parse_nzb(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no segments"));
    }

    #[test]
    fn empty_message_id_is_invalid_nzb() {
        let xml = r#"<nzb>
  <file poster="p" date="0" subject="a.bin">
    <groups><group>g</group></groups>
    <segments><segment bytes="1" number="1"></segment></segments>
  </file>
</nzb>"#;
        let err = parse_nzb(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("empty message-id"), "got: {err}");
    }

    // --- totals ---

    #[test]
    fn totals_sum_across_files() {
        let xml = r#"<nzb>
  <file poster="p" date="0" subject="a.bin">
    <groups><group>g</group></groups>
    <segments>
      <segment bytes="100" number="1">a1@x</segment>
      <segment bytes="200" number="2">a2@x</segment>
    </segments>
  </file>
  <file poster="p" date="0" subject="b.bin">
    <groups><group>g</group></groups>
    <segments><segment bytes="50" number="1">b1@x</segment></segments>
  </file>
</nzb>"#;

        let plan = parse_nzb(xml.as_bytes()).unwrap();
        assert_eq!(plan.total_bytes(), 350);
        assert_eq!(plan.total_segments(), 3);
    }
}
