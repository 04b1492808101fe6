//! Object streams (PDF 1.5+).
//!
//! An `/Type /ObjStm` stream packs several objects into one compressed body:
//!
//! ```text
//! 10 0 11 15 12 28     % /N pairs of (object number, offset from /First)
//! << ... >>            % object 10
//! [ ... ]              % object 11
//! ```
//!
//! Documents that store their catalog or page tree this way still have to be
//! readable before an update can be appended.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream into its objects, keyed by object number.
///
/// Objects that fail to parse are skipped with a warning; the rest of the
/// stream is still usable.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };

    if let Some(type_name) = dict.get("Type").and_then(Object::as_name) {
        if type_name != "ObjStm" {
            return Err(Error::MalformedPdf(format!(
                "expected /Type /ObjStm, got /Type /{}",
                type_name
            )));
        }
    }

    let n = stream_obj.require("N")?.as_integer().unwrap_or(-1);
    let first = stream_obj.require("First")?.as_integer().unwrap_or(-1);
    if !(0..=1_000_000).contains(&n) {
        return Err(Error::MalformedPdf(format!("invalid object stream /N value: {}", n)));
    }
    if first < 0 {
        return Err(Error::MalformedPdf(format!("invalid object stream /First value: {}", first)));
    }
    let (n, first) = (n as usize, first as usize);

    let decoded = stream_obj.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::MalformedPdf(format!(
            "object stream data too short: {} bytes, /First is {}",
            decoded.len(),
            first
        )));
    }

    let pairs = parse_pairs(&decoded[..first], n)?;
    let body = &decoded[first..];
    let mut result = HashMap::with_capacity(pairs.len());

    for (obj_num, offset) in pairs {
        let Some(obj_data) = body.get(offset..) else {
            log::warn!("object {} offset {} is beyond object stream data", obj_num, offset);
            continue;
        };
        match parse_object(obj_data) {
            Ok((_, obj)) => {
                result.insert(obj_num, obj);
            },
            Err(e) => log::warn!("failed to parse object {} from object stream: {:?}", obj_num, e),
        }
    }

    Ok(result)
}

fn parse_pairs(mut data: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    for i in 0..count {
        let mut next = || match token(data) {
            Ok((rest, Token::Integer(v))) if v >= 0 => {
                data = rest;
                Ok(v)
            },
            _ => Err(Error::ParseError {
                offset: 0,
                reason: format!("object stream pair {} is not two integers", i),
            }),
        };
        let obj_num = next()?;
        let offset = next()?;
        pairs.push((obj_num as u32, offset as usize));
    }
    Ok(pairs)
}
