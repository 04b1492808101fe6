//! Cross-reference parsing.
//!
//! Maps object numbers to their location in the document arena. Both
//! traditional `xref` tables (with their `trailer` dictionary) and PDF 1.5
//! cross-reference streams are read, and `/Prev` chains left by earlier
//! incremental updates are followed so the newest definition of every object
//! wins.

use crate::error::{Error, Result};
use crate::lexer::{bare_keyword, skip_ws, token, Token};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{HashMap, HashSet};

/// Longest `/Prev` chain followed before giving up.
const MAX_PREV_CHAIN: u32 = 100;

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Object stored at a byte offset
    Uncompressed,
    /// Object stored inside an object stream (PDF 1.5+)
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or object stream number (compressed)
    pub offset: u64,
    /// Generation number (uncompressed) or index within the object stream
    pub generation: u16,
}

impl XRefEntry {
    /// Object stored at `offset`.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Object `index` of object stream `stream_obj_num`.
    pub fn compressed(stream_obj_num: u64, index: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index,
        }
    }

    /// Free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry refers to a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// How the newest cross-reference section is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefFormat {
    /// `xref` keyword table followed by `trailer`
    Table,
    /// `/Type /XRef` stream object
    Stream,
}

/// Merged cross-reference information of a document.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dictionary,
    format: XRefFormat,
    start_offset: u64,
}

impl CrossRefTable {
    fn empty(format: XRefFormat, start_offset: u64) -> Self {
        Self {
            entries: HashMap::new(),
            trailer: Dictionary::new(),
            format,
            start_offset,
        }
    }

    /// Trailer of the newest section, with keys only present in older
    /// trailers filled in.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Format of the newest section.
    pub fn format(&self) -> XRefFormat {
        self.format
    }

    /// Byte offset of the newest section (the value after `startxref`).
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Get an entry by object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Highest object number with an entry.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add entries and trailer keys of an older section. Existing entries
    /// win because they are newer.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (num, entry) in older.entries {
            self.entries.entry(num).or_insert(entry);
        }
        for (key, value) in older.trailer {
            if key != "Prev" && key != "XRefStm" {
                self.trailer.entry(key).or_insert(value);
            }
        }
    }
}

/// Locate the offset after the last `startxref` keyword.
///
/// Only the final 2 KiB are searched, which is where writers put it.
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    match token(&tail[pos + keyword.len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 && (offset as usize) < data.len() => {
            Ok(offset as u64)
        },
        _ => Err(Error::InvalidXref),
    }
}

/// Parse the cross-reference chain starting at `offset`.
pub fn parse_xref(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let mut visited = HashSet::new();
    let mut table = parse_section(data, offset)?;
    visited.insert(offset);

    // Hybrid files point at a supplementary stream from the table trailer.
    if let Some(stm) = table.trailer.get("XRefStm").and_then(Object::as_integer) {
        match parse_section(data, stm as u64) {
            Ok(extra) => {
                for (num, entry) in extra.entries {
                    table.entries.entry(num).or_insert(entry);
                }
            },
            Err(e) => log::warn!("ignoring unreadable /XRefStm at {}: {}", stm, e),
        }
    }

    let mut prev = table.trailer.get("Prev").and_then(Object::as_integer);
    let mut depth = 0;
    while let Some(prev_offset) = prev {
        depth += 1;
        if depth > MAX_PREV_CHAIN {
            return Err(Error::RecursionLimitExceeded(MAX_PREV_CHAIN));
        }
        if prev_offset < 0 || !visited.insert(prev_offset as u64) {
            return Err(Error::MalformedPdf(format!(
                "cross-reference /Prev chain loops at offset {}",
                prev_offset
            )));
        }
        log::debug!("following /Prev to cross-reference section at {}", prev_offset);
        let older = parse_section(data, prev_offset as u64)?;
        prev = older.trailer.get("Prev").and_then(Object::as_integer);
        table.merge_older(older);
    }

    if !table.trailer.contains_key("Root") {
        return Err(Error::MalformedPdf("trailer has no /Root entry".to_string()));
    }

    Ok(table)
}

/// Parse one section (table or stream) without following `/Prev`.
fn parse_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let input = data.get(offset as usize..).ok_or(Error::InvalidXref)?;
    if skip_ws(input).starts_with(b"xref") {
        parse_table_section(data, offset)
    } else {
        parse_stream_section(data, offset)
    }
}

/// Traditional table:
///
/// ```text
/// xref
/// 0 7
/// 0000000000 65535 f
/// 0000000015 00000 n
/// ...
/// trailer
/// << /Size 7 /Root 1 0 R >>
/// ```
fn parse_table_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let bad = |reason: &str| Error::ParseError {
        offset: offset as usize,
        reason: format!("cross-reference table: {}", reason),
    };

    let mut table = CrossRefTable::empty(XRefFormat::Table, offset);
    let (mut input, _) = bare_keyword(&data[offset as usize..]).map_err(|_| bad("missing xref"))?;

    loop {
        if let Ok((rest, b"trailer")) = bare_keyword(input) {
            let (_, trailer) = parse_object(rest).map_err(|_| bad("unreadable trailer"))?;
            match trailer {
                Object::Dictionary(dict) => table.trailer = dict,
                _ => return Err(bad("trailer is not a dictionary")),
            }
            return Ok(table);
        }

        let (rest, start, count) = match (token(input), input) {
            (Ok((rest, Token::Integer(start))), _) => match token(rest) {
                Ok((rest, Token::Integer(count))) if start >= 0 && count >= 0 => {
                    (rest, start as u32, count as u32)
                },
                _ => return Err(bad("invalid subsection header")),
            },
            _ => return Err(bad("expected subsection or trailer")),
        };
        if count > 10_000_000 {
            return Err(bad("subsection count exceeds limit"));
        }

        input = rest;
        for i in 0..count {
            let (rest, entry) = read_table_entry(input).ok_or_else(|| bad("malformed entry"))?;
            // The first occurrence in a section wins if a writer repeats one.
            table.entries.entry(start + i).or_insert(entry);
            input = rest;
        }
    }
}

fn read_table_entry(input: &[u8]) -> Option<(&[u8], XRefEntry)> {
    let (rest, offset) = match token(input).ok()? {
        (rest, Token::Integer(v)) if v >= 0 => (rest, v as u64),
        _ => return None,
    };
    let (rest, gen) = match token(rest).ok()? {
        (rest, Token::Integer(v)) if (0..=65535).contains(&v) => (rest, v as u16),
        _ => return None,
    };
    let (rest, flag) = bare_keyword(rest).ok()?;
    let entry = match flag {
        b"n" => XRefEntry::uncompressed(offset, gen),
        b"f" => XRefEntry::free(offset, gen),
        _ => return None,
    };
    Some((rest, entry))
}

/// Cross-reference stream: binary rows of `/W` widths, optionally split by
/// `/Index` ranges; the stream dictionary doubles as trailer.
fn parse_stream_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let (_, object) = parse_indirect_object(data, offset as usize)?;
    let dict = match &object {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::MalformedPdf(format!(
                "startxref points at a {} instead of a cross-reference stream",
                other.type_name()
            )))
        },
    };
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(Error::MalformedPdf("cross-reference stream lacks /Type /XRef".to_string()));
    }

    let widths: Vec<usize> = object
        .require("W")?
        .as_array()
        .map(|w| {
            w.iter()
                .filter_map(Object::as_integer)
                .filter(|v| (0..=8).contains(v))
                .map(|v| v as usize)
                .collect()
        })
        .unwrap_or_default();
    if widths.len() != 3 {
        return Err(Error::MalformedPdf("invalid /W in cross-reference stream".to_string()));
    }

    let size = object
        .require("Size")?
        .as_integer()
        .filter(|s| *s >= 0)
        .ok_or_else(|| Error::MalformedPdf("invalid /Size".to_string()))? as u32;

    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [start, count] => Some((start.as_integer()? as u32, count.as_integer()? as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let rows = object.decode_stream_data()?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::MalformedPdf("zero-width cross-reference rows".to_string()));
    }

    let mut table = CrossRefTable::empty(XRefFormat::Stream, offset);
    let mut chunks = rows.chunks_exact(row_len);
    for (start, count) in ranges {
        for i in 0..count {
            let row = chunks
                .next()
                .ok_or_else(|| Error::MalformedPdf("truncated cross-reference stream".to_string()))?;
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to type 1.
            let kind = if widths[0] == 0 { 1 } else { read_int(f1) };
            let entry = match kind {
                0 => XRefEntry::free(read_int(f2), read_int(f3) as u16),
                1 => XRefEntry::uncompressed(read_int(f2), read_int(f3) as u16),
                2 => XRefEntry::compressed(read_int(f2), read_int(f3) as u16),
                // Unknown types are treated as null references.
                _ => continue,
            };
            table.entries.entry(start + i).or_insert(entry);
        }
    }

    table.trailer = dict.clone();
    Ok(table)
}

/// Big-endian unsigned integer.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
