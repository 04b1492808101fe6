//! Read-only document view.
//!
//! [`PdfDocument`] owns the original file bytes and resolves objects through
//! the merged cross-reference table. It answers exactly the questions an
//! incremental signing update asks: where the catalog and the target page
//! are, which object numbers are free, and which form fields already exist.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{find_xref_offset, parse_xref, CrossRefTable, XRefEntryType};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Maximum nesting of page tree nodes and field kids.
const MAX_TREE_DEPTH: usize = 64;

/// Parsed view of an existing PDF.
///
/// # Example
///
/// ```no_run
/// use pdf_oxide_sign::document::PdfDocument;
///
/// let mut doc = PdfDocument::open("contract.pdf")?;
/// println!("PDF {}.{}, {} pages", doc.version().0, doc.version().1, doc.page_count()?);
/// # Ok::<(), pdf_oxide_sign::error::Error>(())
/// ```
pub struct PdfDocument {
    data: Bytes,
    version: (u8, u8),
    xref: CrossRefTable,
    object_cache: HashMap<ObjectRef, Object>,
    /// Decoded object streams by stream object number
    objstm_cache: HashMap<u32, HashMap<u32, Object>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("len", &self.data.len())
            .field("xref_entries", &self.xref.len())
            .field("xref_format", &self.xref.format())
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Read and index the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::file(path, e))?;
        Self::from_bytes(data)
    }

    /// Index an in-memory document.
    ///
    /// Encrypted documents are refused: the appended objects would have to
    /// be encrypted with the document key.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let version = parse_header(&data)?;
        let xref = parse_xref(&data, find_xref_offset(&data)?)?;

        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::Unsupported("signing encrypted documents".to_string()));
        }

        log::debug!(
            "opened PDF {}.{}: {} bytes, {} xref entries ({:?})",
            version.0,
            version.1,
            data.len(),
            xref.len(),
            xref.format()
        );

        Ok(Self {
            data,
            version,
            xref,
            object_cache: HashMap::new(),
            objstm_cache: HashMap::new(),
        })
    }

    /// Original file bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Merged cross-reference table.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Merged trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Reference held by the trailer's `/Root`.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::MalformedPdf("/Root is not a reference".to_string()))
    }

    /// The document catalog.
    pub fn catalog(&mut self) -> Result<Dictionary> {
        let root = self.catalog_ref()?;
        self.load_dictionary(root)
    }

    /// Smallest object number not used by any revision.
    pub fn next_object_number(&self) -> u32 {
        let size = self
            .trailer()
            .get("Size")
            .and_then(Object::as_integer)
            .filter(|s| *s > 0)
            .unwrap_or(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// Load an indirect object.
    pub fn load_object(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.object_cache.get(&obj_ref) {
            return Ok(cached.clone());
        }

        let entry = *self
            .xref
            .get(obj_ref.id)
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        let object = match entry.entry_type {
            XRefEntryType::Uncompressed => self.load_uncompressed(obj_ref, entry.offset)?,
            XRefEntryType::Compressed => {
                self.load_compressed(obj_ref, entry.offset as u32, entry.generation)?
            },
            XRefEntryType::Free => return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
        };

        self.object_cache.insert(obj_ref, object.clone());
        Ok(object)
    }

    fn load_uncompressed(&self, obj_ref: ObjectRef, offset: u64) -> Result<Object> {
        let (found, object) = parse_indirect_object(&self.data, offset as usize)?;
        if found.id != obj_ref.id {
            return Err(Error::MalformedPdf(format!(
                "xref entry for object {} points at object {}",
                obj_ref.id, found.id
            )));
        }
        Ok(object)
    }

    fn load_compressed(&mut self, obj_ref: ObjectRef, stream_num: u32, index: u16) -> Result<Object> {
        if !self.objstm_cache.contains_key(&stream_num) {
            let entry = self
                .xref
                .get(stream_num)
                .copied()
                .filter(|e| e.entry_type == XRefEntryType::Uncompressed)
                .ok_or_else(|| {
                    Error::MalformedPdf(format!(
                        "object stream {} holding object {} is not a plain object",
                        stream_num, obj_ref.id
                    ))
                })?;
            let stream = self.load_uncompressed(ObjectRef::new(stream_num, 0), entry.offset)?;
            log::debug!("decoding object stream {}", stream_num);
            let objects = parse_object_stream(&stream)?;
            self.objstm_cache.insert(stream_num, objects);
        }

        self.objstm_cache
            .get(&stream_num)
            .and_then(|objects| objects.get(&obj_ref.id))
            .cloned()
            .ok_or_else(|| {
                log::warn!("object {} missing from index {} of stream {}", obj_ref.id, index, stream_num);
                Error::ObjectNotFound(obj_ref.id, obj_ref.gen)
            })
    }

    /// Follow `obj` if it is a reference; otherwise return a copy.
    pub fn resolve(&mut self, obj: &Object) -> Result<Object> {
        match obj {
            Object::Reference(r) => self.load_object(*r),
            other => Ok(other.clone()),
        }
    }

    /// Load an object that must be a dictionary (or a stream's dictionary).
    pub fn load_dictionary(&mut self, obj_ref: ObjectRef) -> Result<Dictionary> {
        let object = self.load_object(obj_ref)?;
        match object {
            Object::Dictionary(dict) | Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    fn resolve_dictionary(&mut self, obj: &Object) -> Result<Dictionary> {
        match self.resolve(obj)? {
            Object::Dictionary(dict) | Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// References of all leaf pages in document order.
    pub fn page_refs(&mut self) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::MalformedPdf("catalog /Pages is not a reference".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        // Depth-first with an explicit stack; kids pushed in reverse.
        let mut stack = vec![(root, 0usize)];
        while let Some((node_ref, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(Error::RecursionLimitExceeded(MAX_TREE_DEPTH as u32));
            }
            if !visited.insert(node_ref) {
                return Err(Error::MalformedPdf(format!("page tree cycle at {}", node_ref)));
            }
            let node = self.load_dictionary(node_ref)?;
            match node.get("Kids").and_then(Object::as_array) {
                Some(kids) => {
                    for kid in kids.iter().rev() {
                        if let Some(kid_ref) = kid.as_reference() {
                            stack.push((kid_ref, depth + 1));
                        }
                    }
                },
                None => pages.push(node_ref),
            }
        }
        Ok(pages)
    }

    /// Number of pages.
    pub fn page_count(&mut self) -> Result<usize> {
        Ok(self.page_refs()?.len())
    }

    /// Reference of the page at `index` (zero-based).
    pub fn page_ref(&mut self, index: usize) -> Result<ObjectRef> {
        let pages = self.page_refs()?;
        pages.get(index).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "page index {} out of range: document has {} page(s)",
                index,
                pages.len()
            ))
        })
    }

    /// The `/AcroForm` dictionary, if the catalog has one.
    pub fn acroform(&mut self) -> Result<Option<Dictionary>> {
        let catalog = self.catalog()?;
        match catalog.get("AcroForm") {
            Some(form) => Ok(Some(self.resolve_dictionary(form)?)),
            None => Ok(None),
        }
    }

    /// Every terminal form field as (fully qualified name, field reference,
    /// field dictionary). Fields written inline in `/Fields` have no
    /// reference and are skipped.
    pub fn form_fields(&mut self) -> Result<Vec<(String, ObjectRef, Dictionary)>> {
        let Some(form) = self.acroform()? else {
            return Ok(Vec::new());
        };
        let roots = match form.get("Fields") {
            Some(fields) => match self.resolve(fields)? {
                Object::Array(arr) => arr,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(ObjectRef, String, usize)> = roots
            .iter()
            .rev()
            .filter_map(Object::as_reference)
            .map(|r| (r, String::new(), 0))
            .collect();

        while let Some((field_ref, parent_name, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH || !visited.insert(field_ref) {
                log::warn!("skipping field {}: cycle or excessive nesting", field_ref);
                continue;
            }
            let field = self.load_dictionary(field_ref)?;
            let partial = field
                .get("T")
                .and_then(Object::as_string)
                .map(decode_text_string);
            let name = match (parent_name.is_empty(), partial) {
                (_, None) => parent_name.clone(),
                (true, Some(p)) => p,
                (false, Some(p)) => format!("{}.{}", parent_name, p),
            };

            let kids: Vec<ObjectRef> = field
                .get("Kids")
                .and_then(Object::as_array)
                .map(|kids| kids.iter().filter_map(Object::as_reference).collect())
                .unwrap_or_default();
            // Kids without /T are widgets of this field, not sub-fields.
            let has_named_kids = kids.iter().any(|k| {
                matches!(self.load_dictionary(*k), Ok(kid) if kid.contains_key("T"))
            });

            if has_named_kids {
                for kid in kids.into_iter().rev() {
                    stack.push((kid, name.clone(), depth + 1));
                }
            } else {
                result.push((name, field_ref, field));
            }
        }
        Ok(result)
    }

    /// First name of the form `{base}{n}` (n = 1, 2, ...) not used by an
    /// existing field.
    pub fn unique_field_name(&mut self, base: &str) -> Result<String> {
        let taken: HashSet<String> = self.form_fields()?.into_iter().map(|(n, _, _)| n).collect();
        let name = (1..)
            .map(|n| format!("{}{}", base, n))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_else(|| base.to_string());
        Ok(name)
    }

    /// Signature fields with a value: (field name, signature dictionary).
    pub fn signature_dictionaries(&mut self) -> Result<Vec<(String, Dictionary)>> {
        let mut result = Vec::new();
        for (name, _, field) in self.form_fields()? {
            if field.get("FT").and_then(Object::as_name) != Some("Sig") {
                continue;
            }
            if let Some(value) = field.get("V") {
                let sig = self.resolve_dictionary(value)?;
                result.push((name, sig));
            }
        }
        Ok(result)
    }
}

/// Read the `%PDF-M.m` header.
///
/// Up to 1 KiB of leading garbage is tolerated, as in most readers.
///
/// ```
/// use pdf_oxide_sign::document::parse_header;
///
/// assert_eq!(parse_header(b"%PDF-1.7\n").unwrap(), (1, 7));
/// assert!(parse_header(b"GIF89a").is_err());
/// ```
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| Error::MalformedPdf("missing %PDF- header".to_string()))?;
    match data.get(pos + 5..pos + 8) {
        Some([major, b'.', minor]) if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::MalformedPdf("invalid version in %PDF- header".to_string())),
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise byte-per-char).
pub fn decode_text_string(raw: &[u8]) -> String {
    if let Some(utf16) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_page() -> PdfDocument {
        PdfDocument::open(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/one_page.pdf")).unwrap()
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header(b"%PDF-1.4\n").unwrap(), (1, 4));
        assert_eq!(parse_header(b"junk\r\n%PDF-2.0\n").unwrap(), (2, 0));
        assert!(parse_header(b"%PDF-x").is_err());
        assert!(parse_header(b"").is_err());
    }

    #[test]
    fn test_decode_text_string() {
        assert_eq!(decode_text_string(b"Signature1"), "Signature1");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "A\u{e9}");
    }

    #[test]
    fn test_open_one_page() {
        let mut doc = one_page();
        assert_eq!(doc.version(), (1, 4));
        assert_eq!(doc.catalog_ref().unwrap(), ObjectRef::new(1, 0));
        assert_eq!(doc.page_count().unwrap(), 1);
        assert_eq!(doc.page_ref(0).unwrap(), ObjectRef::new(3, 0));
        assert_eq!(doc.next_object_number(), 7);
        assert!(doc.acroform().unwrap().is_none());
    }

    #[test]
    fn test_page_index_out_of_range() {
        let mut doc = one_page();
        let err = doc.page_ref(3).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unique_field_name_without_form() {
        assert_eq!(one_page().unique_field_name("Signature").unwrap(), "Signature1");
    }

    #[test]
    fn test_free_object_not_found() {
        let mut doc = one_page();
        assert!(matches!(
            doc.load_object(ObjectRef::new(0, 65535)),
            Err(Error::ObjectNotFound(0, _))
        ));
        assert!(matches!(doc.load_object(ObjectRef::new(99, 0)), Err(Error::ObjectNotFound(99, 0))));
    }

    #[test]
    fn test_encrypted_rejected() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n\
xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \n\
trailer\n<< /Size 2 /Root 1 0 R /Encrypt << /Filter /Standard >> >>\nstartxref\n45\n%%EOF\n";
        let err = PdfDocument::from_bytes(data.to_vec()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
