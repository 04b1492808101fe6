//! Incremental signature updates.
//!
//! The original file is never rewritten. A signature is added by appending
//! a new revision after the last `%%EOF`:
//!
//! ```text
//! <original bytes>
//! 12 0 obj <</Type /Sig ... /ByteRange [0 a b c] /Contents <0000...>>> endobj
//! 13 0 obj <</FT /Sig /Subtype /Widget /V 12 0 R ...>> endobj
//!  3 0 obj <page with /Annots [... 13 0 R]> endobj
//!  7 0 obj <AcroForm with /Fields [... 13 0 R] /SigFlags 3> endobj
//! xref / trailer (or an xref stream) with /Prev
//! startxref
//! %%EOF
//! ```
//!
//! The `/ByteRange` numbers depend on the final layout, so they are written
//! into a fixed-width slot once every other byte is in place.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::signatures::{to_hex, ByteRange, SignOptions, SignaturePlaceholder};
use crate::writer::object_serializer::ObjectSerializer;
use crate::xref::XRefFormat;
use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Seek, SeekFrom, Write};

/// Reserved text for the `/ByteRange` value.
const BYTE_RANGE_SLOT: &str = "[0 0000000000 0000000000 0000000000]";

/// Widget flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// AcroForm flags: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// An appended revision with a reserved signature placeholder.
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    /// Bytes to append to the original document
    pub bytes: Vec<u8>,
    /// Length of the original document
    pub base_len: u64,
    /// Placeholder position in the combined file
    pub placeholder: SignaturePlaceholder,
    /// `/ByteRange` written into the signature dictionary
    pub byte_range: ByteRange,
    /// Name of the new signature field
    pub field_name: String,
    /// The signature value dictionary
    pub signature_ref: ObjectRef,
}

impl PreparedUpdate {
    /// Length of the combined file.
    pub fn total_len(&self) -> u64 {
        self.base_len + self.bytes.len() as u64
    }
}

/// Builds incremental signature updates for a document.
pub struct IncrementalPdfWriter<'a> {
    doc: &'a mut PdfDocument,
    serializer: ObjectSerializer,
}

impl<'a> IncrementalPdfWriter<'a> {
    /// Writer appending to `doc`.
    pub fn new(doc: &'a mut PdfDocument) -> Self {
        Self {
            doc,
            serializer: ObjectSerializer::compact(),
        }
    }

    /// Lay out the signature revision.
    ///
    /// `capacity` is the number of DER bytes the placeholder must hold.
    pub fn prepare(
        &mut self,
        options: &SignOptions,
        signing_time: DateTime<Utc>,
        capacity: usize,
    ) -> Result<PreparedUpdate> {
        if capacity == 0 {
            return Err(Error::Configuration("signature placeholder size must be positive".to_string()));
        }

        let base_len = self.doc.data().len() as u64;
        let catalog_ref = self.doc.catalog_ref()?;
        let page_ref = self.doc.page_ref(options.page_index)?;
        let field_name = self.doc.unique_field_name("Signature")?;

        let mut next_id = self.doc.next_object_number();
        let mut allocate = || {
            let r = ObjectRef::new(next_id, 0);
            next_id += 1;
            r
        };
        let sig_ref = allocate();
        let field_ref = allocate();

        let field = ObjectSerializer::dict(vec![
            ("Type", Object::name("Annot")),
            ("Subtype", Object::name("Widget")),
            ("FT", Object::name("Sig")),
            ("T", text_object(&field_name)),
            ("V", Object::Reference(sig_ref)),
            ("P", Object::Reference(page_ref)),
            ("Rect", ObjectSerializer::rect(0, 0, 0, 0)),
            ("F", Object::Integer(WIDGET_FLAGS)),
        ]);

        // Objects other than the signature dictionary, in write order.
        let mut updated: Vec<(ObjectRef, Object)> = vec![(field_ref, field)];

        let page = self.doc.load_dictionary(page_ref)?;
        match page.get("Annots") {
            Some(Object::Reference(annots_ref)) => {
                let annots = self.appended_array(*annots_ref, field_ref)?;
                updated.push((*annots_ref, annots));
            },
            existing => {
                let mut annots = existing.and_then(Object::as_array).cloned().unwrap_or_default();
                annots.push(Object::Reference(field_ref));
                let mut page = page.clone();
                page.insert("Annots".to_string(), Object::Array(annots));
                updated.push((page_ref, Object::Dictionary(page)));
            },
        }

        let mut catalog = self.doc.catalog()?;
        match catalog.get("AcroForm").cloned() {
            Some(Object::Reference(form_ref)) => {
                let form = self.doc.load_dictionary(form_ref)?;
                let form = self.add_field(form, field_ref, &mut updated)?;
                updated.push((form_ref, Object::Dictionary(form)));
            },
            Some(Object::Dictionary(form)) => {
                let form = self.add_field(form, field_ref, &mut updated)?;
                catalog.insert("AcroForm".to_string(), Object::Dictionary(form));
                updated.push((catalog_ref, Object::Dictionary(catalog)));
            },
            _ => {
                let form_ref = allocate();
                let form = ObjectSerializer::dict(vec![
                    ("Fields", Object::Array(vec![Object::Reference(field_ref)])),
                    ("SigFlags", Object::Integer(SIG_FLAGS)),
                ]);
                updated.push((form_ref, form));
                catalog.insert("AcroForm".to_string(), Object::Reference(form_ref));
                updated.push((catalog_ref, Object::Dictionary(catalog)));
            },
        }

        let mut out = Vec::new();
        if !matches!(self.doc.data().last(), Some(b'\n') | Some(b'\r')) {
            out.push(b'\n');
        }

        let mut offsets: Vec<(ObjectRef, u64)> = Vec::with_capacity(updated.len() + 2);

        offsets.push((sig_ref, base_len + out.len() as u64));
        let sig = self.signature_dictionary(options, signing_time, capacity)?;
        let slot_pos = out.len() + sig.slot_pos;
        let contents_pos = out.len() + sig.contents_pos;
        writeln!(out, "{} {} obj", sig_ref.id, sig_ref.gen)?;
        let header_len = format!("{} {} obj\n", sig_ref.id, sig_ref.gen).len();
        out.extend_from_slice(&sig.bytes);
        out.extend_from_slice(b"\nendobj\n");
        let (slot_pos, contents_pos) = (slot_pos + header_len, contents_pos + header_len);

        for (obj_ref, obj) in &updated {
            offsets.push((*obj_ref, base_len + out.len() as u64));
            out.extend_from_slice(&self.serializer.serialize_indirect(*obj_ref, obj)?);
        }

        let size = next_id;
        self.write_xref_section(&mut out, base_len, &mut offsets, size, catalog_ref)?;

        let placeholder = SignaturePlaceholder::with_capacity(base_len + contents_pos as u64, capacity);
        let byte_range = ByteRange::around(&placeholder, base_len + out.len() as u64)?;
        let filled = format!("{:width$}", byte_range.to_string(), width = BYTE_RANGE_SLOT.len());
        if filled.len() != BYTE_RANGE_SLOT.len() {
            return Err(Error::Unsupported(format!("byte range {} does not fit its slot", byte_range)));
        }
        out[slot_pos..slot_pos + filled.len()].copy_from_slice(filled.as_bytes());

        log::info!(
            "prepared signature field {:?}: {} objects appended, placeholder {} bytes at {}",
            field_name,
            offsets.len(),
            placeholder.len,
            placeholder.offset
        );

        Ok(PreparedUpdate {
            bytes: out,
            base_len,
            placeholder,
            byte_range,
            field_name,
            signature_ref: sig_ref,
        })
    }

    /// Load the array object `array_ref` and append a reference to `item`.
    fn appended_array(&mut self, array_ref: ObjectRef, item: ObjectRef) -> Result<Object> {
        match self.doc.load_object(array_ref)? {
            Object::Array(mut items) => {
                items.push(Object::Reference(item));
                Ok(Object::Array(items))
            },
            other => Err(Error::InvalidObjectType {
                expected: "Array".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Register the field in an AcroForm dictionary and set `/SigFlags`.
    fn add_field(
        &mut self,
        mut form: Dictionary,
        field_ref: ObjectRef,
        updated: &mut Vec<(ObjectRef, Object)>,
    ) -> Result<Dictionary> {
        match form.get("Fields").cloned() {
            Some(Object::Reference(fields_ref)) => {
                let fields = self.appended_array(fields_ref, field_ref)?;
                updated.push((fields_ref, fields));
            },
            existing => {
                let mut fields = existing.as_ref().and_then(Object::as_array).cloned().unwrap_or_default();
                fields.push(Object::Reference(field_ref));
                form.insert("Fields".to_string(), Object::Array(fields));
            },
        }
        let flags = form.get("SigFlags").and_then(Object::as_integer).unwrap_or(0);
        form.insert("SigFlags".to_string(), Object::Integer(flags | SIG_FLAGS));
        Ok(form)
    }

    fn signature_dictionary(
        &self,
        options: &SignOptions,
        signing_time: DateTime<Utc>,
        capacity: usize,
    ) -> std::io::Result<SignatureDictionaryBytes> {
        let mut entries = Dictionary::new();
        entries.insert("Type".to_string(), Object::name("Sig"));
        entries.insert("Filter".to_string(), Object::name("Adobe.PPKLite"));
        entries.insert("SubFilter".to_string(), Object::name(options.sub_filter.as_pdf_name()));
        entries.insert("M".to_string(), Object::text(&pdf_date(&signing_time)));
        for (key, value) in [
            ("Name", &options.name),
            ("Reason", &options.reason),
            ("Location", &options.location),
            ("ContactInfo", &options.contact_info),
        ] {
            if let Some(value) = value {
                entries.insert(key.to_string(), text_object(value));
            }
        }

        let mut bytes = b"<<".to_vec();
        self.serializer.write_entries(&mut bytes, &entries)?;
        bytes.extend_from_slice(b" /ByteRange ");
        let slot_pos = bytes.len();
        bytes.extend_from_slice(BYTE_RANGE_SLOT.as_bytes());
        bytes.extend_from_slice(b" /Contents ");
        let contents_pos = bytes.len();
        bytes.push(b'<');
        bytes.resize(bytes.len() + capacity * 2, b'0');
        bytes.extend_from_slice(b">>>");

        Ok(SignatureDictionaryBytes {
            bytes,
            slot_pos,
            contents_pos,
        })
    }

    /// Append the cross-reference section, trailer and `%%EOF`, in the same
    /// format as the previous revision.
    fn write_xref_section(
        &self,
        out: &mut Vec<u8>,
        base_len: u64,
        offsets: &mut Vec<(ObjectRef, u64)>,
        size: u32,
        root: ObjectRef,
    ) -> Result<()> {
        let previous = self.doc.xref();
        let prev_offset = previous.start_offset();
        let old_size = self
            .doc
            .trailer()
            .get("Size")
            .and_then(Object::as_integer)
            .unwrap_or(0)
            .max(0) as u32;

        let mut trailer = Dictionary::new();
        trailer.insert("Root".to_string(), Object::Reference(root));
        trailer.insert("Prev".to_string(), Object::Integer(prev_offset as i64));
        for key in ["Info", "ID"] {
            if let Some(value) = self.doc.trailer().get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }

        let xref_offset = base_len + out.len() as u64;
        match previous.format() {
            XRefFormat::Table => {
                offsets.sort_by_key(|(obj_ref, _)| obj_ref.id);
                trailer.insert("Size".to_string(), Object::Integer(size.max(old_size) as i64));

                writeln!(out, "xref")?;
                for run in contiguous_runs(offsets) {
                    writeln!(out, "{} {}", run[0].0.id, run.len())?;
                    for (obj_ref, offset) in run {
                        write!(out, "{:010} {:05} n \n", offset, obj_ref.gen)?;
                    }
                }
                writeln!(out, "trailer")?;
                self.serializer.write_dictionary(out, &trailer)?;
                writeln!(out)?;
            },
            XRefFormat::Stream => {
                let xref_id = size;
                offsets.push((ObjectRef::new(xref_id, 0), xref_offset));
                offsets.sort_by_key(|(obj_ref, _)| obj_ref.id);

                let max_offset = offsets.iter().map(|(_, o)| *o).max().unwrap_or(0);
                let offset_width: usize = if max_offset > u64::from(u32::MAX) { 8 } else { 4 };

                let mut rows = Vec::with_capacity(offsets.len() * (offset_width + 3));
                let mut index = Vec::new();
                for run in contiguous_runs(offsets) {
                    index.push(Object::Integer(run[0].0.id as i64));
                    index.push(Object::Integer(run.len() as i64));
                    for (obj_ref, offset) in run {
                        rows.push(1u8);
                        rows.extend_from_slice(&offset.to_be_bytes()[8 - offset_width..]);
                        rows.extend_from_slice(&obj_ref.gen.to_be_bytes());
                    }
                }

                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&rows)?;
                let data = encoder.finish()?;

                trailer.insert("Type".to_string(), Object::name("XRef"));
                trailer.insert("Size".to_string(), Object::Integer((xref_id + 1).max(old_size) as i64));
                trailer.insert(
                    "W".to_string(),
                    Object::Array(vec![
                        Object::Integer(1),
                        Object::Integer(offset_width as i64),
                        Object::Integer(2),
                    ]),
                );
                trailer.insert("Index".to_string(), Object::Array(index));
                trailer.insert("Filter".to_string(), Object::name("FlateDecode"));

                let stream = Object::Stream {
                    dict: trailer,
                    data: data.into(),
                };
                out.extend_from_slice(
                    &self
                        .serializer
                        .serialize_indirect(ObjectRef::new(xref_id, 0), &stream)?,
                );
            },
        }

        write!(out, "startxref\n{}\n%%EOF\n", xref_offset)?;
        Ok(())
    }
}

struct SignatureDictionaryBytes {
    bytes: Vec<u8>,
    /// Offset of the `/ByteRange` slot within `bytes`
    slot_pos: usize,
    /// Offset of `<` of `/Contents` within `bytes`
    contents_pos: usize,
}

/// Split (reference, offset) pairs sorted by id into runs of consecutive ids.
fn contiguous_runs(entries: &[(ObjectRef, u64)]) -> Vec<&[(ObjectRef, u64)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].0.id != entries[i - 1].0.id + 1 {
            if start < i {
                runs.push(&entries[start..i]);
            }
            start = i;
        }
    }
    runs
}

/// PDF date string (ISO 32000-1 §7.9.4) in UTC.
pub fn pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Text string object: PDFDocEncoding-compatible ASCII as is, anything
/// else as UTF-16BE with a byte order mark.
pub fn text_object(text: &str) -> Object {
    if text.is_ascii() {
        Object::text(text)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes)
    }
}

/// Write the original document followed by the prepared revision.
pub fn write_update<W: Write>(out: &mut W, original: &[u8], update: &PreparedUpdate) -> Result<()> {
    out.write_all(original)?;
    out.write_all(&update.bytes)?;
    Ok(())
}

/// Write `signature` as hex into the placeholder of a combined file.
///
/// The unused tail of the placeholder keeps its zero padding. Nothing is
/// written when the signature does not fit.
pub fn embed_signature<F: Write + Seek>(
    out: &mut F,
    placeholder: &SignaturePlaceholder,
    signature: &[u8],
) -> Result<()> {
    if signature.len() > placeholder.capacity() {
        return Err(Error::PlaceholderTooSmall {
            required: signature.len(),
            reserved: placeholder.capacity(),
        });
    }
    let hex = to_hex(signature);
    out.seek(SeekFrom::Start(placeholder.offset + 1))?;
    out.write_all(hex.as_bytes())?;
    out.flush()?;
    Ok(())
}
