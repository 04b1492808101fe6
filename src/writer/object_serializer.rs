//! PDF object serialization.
//!
//! Writes [`Object`] values in PDF syntax (ISO 32000-1 §7.3). Dictionary
//! keys are emitted in sorted order so an update is byte-for-byte
//! reproducible for the same inputs.

use crate::object::{Dictionary, Object, ObjectRef};
use std::io::Write;

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (single-line dictionaries)
    compact: bool,
}

impl ObjectSerializer {
    /// Serializer that puts each dictionary entry on its own line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer with minimal whitespace.
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj)?;
        Ok(buf)
    }

    /// Serialize an indirect object definition:
    /// `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, obj_ref: ObjectRef, obj: &Object) -> std::io::Result<Vec<u8>> {
        let mut buf = format!("{} {} obj\n", obj_ref.id, obj_ref.gen).into_bytes();
        self.write_object(&mut buf, obj)?;
        buf.extend_from_slice(b"\nendobj\n");
        Ok(buf)
    }

    /// Write an object to `w`.
    pub fn write_object<W: Write>(&self, w: &mut W, obj: &Object) -> std::io::Result<()> {
        match obj {
            Object::Null => write!(w, "null"),
            Object::Boolean(b) => write!(w, "{}", b),
            Object::Integer(i) => write!(w, "{}", i),
            Object::Real(r) => self.write_real(w, *r),
            Object::String(s) => self.write_string(w, s),
            Object::Name(n) => self.write_name(w, n),
            Object::Array(arr) => self.write_array(w, arr),
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => self.write_stream(w, dict, data),
            Object::Reference(r) => write!(w, "{} {} R", r.id, r.gen),
        }
    }

    fn write_real<W: Write>(&self, w: &mut W, value: f64) -> std::io::Result<()> {
        if value.fract() == 0.0 {
            write!(w, "{}", value as i64)
        } else {
            let formatted = format!("{:.5}", value);
            write!(w, "{}", formatted.trim_end_matches('0').trim_end_matches('.'))
        }
    }

    /// Literal `(...)` syntax for printable text, `<...>` hex otherwise.
    fn write_string<W: Write>(&self, w: &mut W, data: &[u8]) -> std::io::Result<()> {
        let is_printable = data
            .iter()
            .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

        if is_printable {
            w.write_all(b"(")?;
            for &byte in data {
                match byte {
                    b'(' => w.write_all(b"\\(")?,
                    b')' => w.write_all(b"\\)")?,
                    b'\\' => w.write_all(b"\\\\")?,
                    b'\n' => w.write_all(b"\\n")?,
                    b'\r' => w.write_all(b"\\r")?,
                    b'\t' => w.write_all(b"\\t")?,
                    _ => w.write_all(&[byte])?,
                }
            }
            w.write_all(b")")
        } else {
            w.write_all(b"<")?;
            for byte in data {
                write!(w, "{:02X}", byte)?;
            }
            w.write_all(b">")
        }
    }

    /// Names escape everything outside the regular printable set as `#xx`.
    fn write_name<W: Write>(&self, w: &mut W, name: &str) -> std::io::Result<()> {
        w.write_all(b"/")?;
        for byte in name.bytes() {
            match byte {
                b'!'
                | b'"'
                | b'$'..=b'&'
                | b'\''..=b'.'
                | b'0'..=b'9'
                | b';'
                | b'?'
                | b'@'
                | b'A'..=b'Z'
                | b'^'..=b'z'
                | b'|'
                | b'~' => w.write_all(&[byte])?,
                _ => write!(w, "#{:02X}", byte)?,
            }
        }
        Ok(())
    }

    fn write_array<W: Write>(&self, w: &mut W, arr: &[Object]) -> std::io::Result<()> {
        w.write_all(b"[")?;
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                w.write_all(b" ")?;
            }
            self.write_object(w, obj)?;
        }
        w.write_all(b"]")
    }

    /// Write a dictionary including its `<<` and `>>`.
    pub fn write_dictionary<W: Write>(&self, w: &mut W, dict: &Dictionary) -> std::io::Result<()> {
        w.write_all(b"<<")?;
        self.write_entries(w, dict)?;
        if !self.compact && !dict.is_empty() {
            writeln!(w)?;
        }
        w.write_all(b">>")
    }

    /// Write dictionary entries without the surrounding delimiters.
    pub fn write_entries<W: Write>(&self, w: &mut W, dict: &Dictionary) -> std::io::Result<()> {
        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();

        for key in keys {
            if self.compact {
                w.write_all(b" ")?;
            } else {
                w.write_all(b"\n  ")?;
            }
            self.write_name(w, key)?;
            w.write_all(b" ")?;
            self.write_object(w, &dict[key])?;
        }
        Ok(())
    }

    /// `/Length` always reflects the data actually written.
    fn write_stream<W: Write>(&self, w: &mut W, dict: &Dictionary, data: &[u8]) -> std::io::Result<()> {
        let mut dict = dict.clone();
        dict.insert("Length".to_string(), Object::Integer(data.len() as i64));

        self.write_dictionary(w, &dict)?;
        w.write_all(b"\nstream\n")?;
        w.write_all(data)?;
        w.write_all(b"\nendstream")
    }
}

/// Helper constructors for building PDF objects.
impl ObjectSerializer {
    /// Create a Dictionary object.
    pub fn dict(entries: Vec<(&str, Object)>) -> Object {
        Object::Dictionary(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// Create a Reference object.
    pub fn reference(obj_ref: ObjectRef) -> Object {
        Object::Reference(obj_ref)
    }

    /// Create a rectangle `[llx lly urx ury]` from integer coordinates.
    pub fn rect(llx: i64, lly: i64, urx: i64, ury: i64) -> Object {
        Object::Array(vec![
            Object::Integer(llx),
            Object::Integer(lly),
            Object::Integer(urx),
            Object::Integer(ury),
        ])
    }
}
