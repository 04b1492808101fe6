//! PDF lexer (tokenizer).
//!
//! Splits PDF bytes into tokens: numbers, literal and hex strings, names,
//! keywords and delimiters. Whitespace and `%` comments between tokens are
//! skipped. Escape sequences in literal strings are left for the parser;
//! `#XX` escapes in names are decoded here.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (42, -123)
    Integer(i64),
    /// Real number (3.14, -.5)
    Real(f64),
    /// Raw bytes between the parentheses of a literal string
    LiteralString(&'a [u8]),
    /// Raw bytes between the angle brackets of a hex string
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R` (in `10 0 R`)
    R,
}

/// PDF whitespace characters (ISO 32000-1, Table 1).
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters (ISO 32000-1, Table 2).
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip whitespace and comments.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let start = input.len();
        while let Some((&c, rest)) = input.split_first() {
            if !is_whitespace(c) {
                break;
            }
            input = rest;
        }
        if let Ok((rest, _)) = comment(input) {
            input = rest;
        }
        if input.len() == start {
            return input;
        }
    }
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), opt(digit1))))),
            recognize(pair(char('.'), digit1)),
        )),
    ))(input)?;

    // Both branches above only accept ASCII, so this cannot fail.
    let text = std::str::from_utf8(text).unwrap_or("0");
    let fail = || nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit));

    if text.contains('.') {
        let normalized = text.trim_start_matches('+');
        let normalized = if normalized.ends_with('.') {
            format!("{}0", normalized)
        } else {
            normalized.to_string()
        };
        normalized
            .parse::<f64>()
            .map(|r| (rest, Token::Real(r)))
            .map_err(|_| fail())
    } else {
        text.trim_start_matches('+')
            .parse::<i64>()
            .map(|i| (rest, Token::Integer(i)))
            .map_err(|_| fail())
    }
}

/// Literal string with balanced parentheses; escapes are skipped, not decoded.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0;

    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#XX` escape sequences in a PDF name.
///
/// Invalid sequences are kept literally.
///
/// ```
/// # use pdf_oxide_sign::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes(b"A#20B"), "A B");
/// assert_eq!(decode_name_escapes(b"Adobe.PPKLite"), "Adobe.PPKLite");
/// assert_eq!(decode_name_escapes(b"A#"), "A#");
/// ```
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = &raw[i + 1..i + 3];
            if let Some(byte) = std::str::from_utf8(hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(is_regular), |raw: &[u8]| Token::Name(decode_name_escapes(raw))),
    )(input)
}

/// Keywords must not run into following regular characters (`nullx`).
fn keyword<'a>(
    word: &'static str,
    tok: Token<'static>,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Token<'a>> {
    move |input: &'a [u8]| {
        let (rest, _) = tag(word)(input)?;
        if rest.first().copied().is_some_and(is_regular) {
            return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
        }
        Ok((rest, tok.clone()))
    }
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        keyword("true", Token::True),
        keyword("false", Token::False),
        keyword("null", Token::Null),
        keyword("obj", Token::ObjStart),
        keyword("endobj", Token::ObjEnd),
        keyword("endstream", Token::StreamEnd),
        keyword("stream", Token::StreamStart),
        keyword("R", Token::R),
        value(Token::DictStart, tag("<<")),
        value(Token::DictEnd, tag(">>")),
        value(Token::ArrayStart, tag("[")),
        value(Token::ArrayEnd, tag("]")),
    ))(input)
}

/// Parse a single token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((
        parse_keyword,
        parse_name,
        parse_number,
        parse_literal_string,
        parse_hex_string,
    ))(input)
}

/// Read a bare keyword such as `xref` or `trailer` that is not a [`Token`].
pub fn bare_keyword(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let input = skip_ws(input);
    take_while1(is_regular)(input)
}
