//! Stream decoders.
//!
//! Signing only has to read the structural streams of a document:
//! cross-reference streams and object streams. Both are FlateDecode in every
//! writer seen in practice, usually with a PNG predictor, so that is the whole
//! filter set. Any other filter is reported as unsupported.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// Upper bound for a decoded structural stream.
const MAX_DECODED_SIZE: usize = 256 * 1024 * 1024;

/// A PDF stream filter.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Filter name as written in `/Filter`.
    fn name(&self) -> &str;
}

fn decoder_for(filter: &str) -> Result<Box<dyn StreamDecoder>> {
    match filter {
        "FlateDecode" | "Fl" => Ok(Box::new(FlateDecoder)),
        other => Err(Error::UnsupportedFilter(other.to_string())),
    }
}

/// Apply `filters` in order, then reverse the predictor from `params`.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder = decoder_for(filter_name)?;
        current = decoder.decode(&current)?;
        if current.len() > MAX_DECODED_SIZE {
            return Err(Error::Decode(format!(
                "{} output of {} bytes exceeds limit of {} bytes",
                decoder.name(),
                current.len(),
                MAX_DECODED_SIZE
            )));
        }
    }

    if let Some(params) = params {
        if params.predictor != 1 {
            current = decode_predictor(&current, params)?;
        }
    }

    Ok(current)
}
