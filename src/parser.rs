//! PDF object parser.
//!
//! Recursive descent over lexer tokens. [`parse_object`] reads one direct
//! object; [`parse_indirect_object`] reads an `N G obj ... endobj` block at a
//! byte offset of the document arena and reports failures with that offset.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;

/// Decode escape sequences in PDF literal strings (ISO 32000-1, 7.3.4.2).
///
/// ```
/// # use pdf_oxide_sign::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"Section \\247 1"), b"Section \xa7 1");
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)"), b"a(b)");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 >= raw.len() {
            out.push(c);
            i += 1;
            continue;
        }

        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'(' | b')' | b'\\' => out.push(next),
            // Line continuation
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = u32::from(next - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match raw.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        },
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            },
            // Unknown escapes drop the backslash
            other => out.push(other),
        }
    }

    out
}

/// Decode the body of a hex string; whitespace is ignored and an odd final
/// digit is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        (c as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| Error::ParseError {
                offset: 0,
                reason: format!("invalid hex digit {:?}", c as char),
            })
    };

    digits
        .chunks(2)
        .map(|pair| {
            let hi = nibble(pair[0])?;
            let lo = match pair.get(1) {
                Some(&c) => nibble(c)?,
                None => 0,
            };
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn nom_error(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Parse one direct PDF object.
///
/// `N G R` is recognised as a reference; a dictionary followed by `stream`
/// becomes a stream object.
///
/// ```
/// use pdf_oxide_sign::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Sig /ByteRange [0 10 20 30] >>").unwrap();
/// assert_eq!(obj.as_dict().unwrap()["Type"].as_name(), Some("Sig"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;

    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(i) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if (0..=i64::from(u32::MAX)).contains(&i) && (0..=65535).contains(&gen) {
                        let r = ObjectRef::new(i as u32, gen as u16);
                        return Ok((after_r, Object::Reference(r)));
                    }
                }
            }
            Ok((rest, Object::Integer(i)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => decode_hex(raw)
            .map(|bytes| (rest, Object::String(bytes)))
            .map_err(|_| {
                nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit))
            }),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayStart => parse_array(rest),
        Token::DictStart => {
            let (rest, dict) = parse_dictionary(rest)?;
            match token(rest) {
                Ok((data, Token::StreamStart)) => {
                    let (rest, bytes) = parse_stream_data(data, &dict)?;
                    Ok((
                        rest,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::copy_from_slice(bytes),
                        },
                    ))
                },
                _ => Ok((rest, Object::Dictionary(dict))),
            }
        },
        _ => Err(nom_error(input, nom::error::ErrorKind::Tag)),
    }
}

fn parse_array(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(input)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8]) -> IResult<&[u8], Dictionary> {
    let mut dict = Dictionary::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object(rest)?;
                // A null value is equivalent to the key being absent.
                if !value.is_null() {
                    dict.insert(key, value);
                }
                input = rest;
            },
            _ => return Err(nom_error(input, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Stream body after the `stream` keyword.
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise
/// (indirect or wrong length) the body runs up to the next `endstream`.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], &'a [u8]> {
    let body = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        if length >= 0 && (length as usize) <= body.len() {
            let (data, rest) = body.split_at(length as usize);
            if let Ok((rest, Token::StreamEnd)) = token(rest) {
                return Ok((rest, data));
            }
        }
        log::debug!("stream /Length {} does not reach endstream, scanning", length);
    }

    let pos = find_keyword(body, b"endstream")
        .ok_or_else(|| nom_error(body, nom::error::ErrorKind::Eof))?;
    let mut data = &body[..pos];
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }
    Ok((&body[pos + b"endstream".len()..], data))
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_keyword(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse the indirect object that starts at `offset` in `data`.
///
/// Returns the object's reference as declared in its `N G obj` header.
pub fn parse_indirect_object(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let input = data.get(offset..).ok_or(Error::UnexpectedEof)?;
    let parse_err = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };

    let (rest, id) = match token(input) {
        Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id),
        _ => return Err(parse_err("expected object number")),
    };
    let (rest, gen) = match token(rest) {
        Ok((rest, Token::Integer(gen))) if (0..=65535).contains(&gen) => (rest, gen),
        _ => return Err(parse_err("expected generation number")),
    };
    let rest = match token(rest) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => return Err(parse_err("expected 'obj' keyword")),
    };

    let (rest, object) = parse_object(rest).map_err(|e| {
        let at = match &e {
            nom::Err::Error(inner) | nom::Err::Failure(inner) => data.len() - inner.input.len(),
            nom::Err::Incomplete(_) => data.len(),
        };
        Error::ParseError {
            offset: at,
            reason: format!("invalid body of object {} {}", id, gen),
        }
    })?;

    if !matches!(token(rest), Ok((_, Token::ObjEnd))) {
        log::debug!("object {} {} at {} lacks endobj", id, gen, offset);
    }

    Ok((ObjectRef::new(id as u32, gen as u16), object))
}
