//! Minimal NPY codec for one-dimensional little-endian `f64` arrays.
//!
//! Writes format version 1.0 with the header padded to a 64-byte boundary,
//! the same layout `numpy.save` produces for a float64 vector. Reads
//! versions 1.0, 2.0 and 3.0.

use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;
const F64_DESCR: &str = "<f8";

#[derive(Debug, Error, PartialEq)]
pub enum NpyError {
    #[error("missing NUMPY magic string")]
    BadMagic,

    #[error("unsupported format version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("truncated data")]
    Truncated,

    #[error("malformed header: {0}")]
    Header(String),

    #[error("unsupported dtype {0}, expected <f8")]
    UnsupportedDtype(String),

    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("expected a one-dimensional array, got shape ({0})")]
    Shape(String),

    #[error("{0} bytes after the declared array data")]
    TrailingData(usize),
}

pub fn encode_f64(values: &[f64]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '{F64_DESCR}', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // magic + version + u16 length + dict + trailing newline
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(unpadded + padding + values.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat_n(b' ', padding));
    out.push(b'\n');
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_f64(bytes: &[u8]) -> Result<Vec<f64>, NpyError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => {
            let raw = bytes.get(8..10).ok_or(NpyError::Truncated)?;
            (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
        }
        2 | 3 => {
            let raw = bytes.get(8..12).ok_or(NpyError::Truncated)?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                12,
            )
        }
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or(NpyError::Truncated)?;
    let header = std::str::from_utf8(header)
        .map_err(|err| NpyError::Header(err.to_string()))?
        .trim();

    let descr = header_value(header, "descr")
        .ok_or_else(|| NpyError::Header("missing 'descr'".to_string()))?;
    if descr != F64_DESCR {
        return Err(NpyError::UnsupportedDtype(descr.to_string()));
    }
    match header_value(header, "fortran_order") {
        Some("False") => {}
        Some("True") => return Err(NpyError::FortranOrder),
        _ => return Err(NpyError::Header("missing 'fortran_order'".to_string())),
    }
    let shape = header_value(header, "shape")
        .ok_or_else(|| NpyError::Header("missing 'shape'".to_string()))?;
    let len = parse_vector_shape(shape)?;

    let data = &bytes[data_start..];
    let byte_len = len
        .checked_mul(8)
        .ok_or_else(|| NpyError::Shape(shape.to_string()))?;
    if data.len() < byte_len {
        return Err(NpyError::Truncated);
    }
    if data.len() > byte_len {
        return Err(NpyError::TrailingData(data.len() - byte_len));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

/// Pulls the literal value for `key` out of the header's Python dict.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{key}':");
    let start = header.find(&needle)? + needle.len();
    let rest = header[start..].trim_start();
    if let Some(quoted) = rest.strip_prefix('\'') {
        let end = quoted.find('\'')?;
        return Some(&quoted[..end]);
    }
    if let Some(tuple) = rest.strip_prefix('(') {
        let end = tuple.find(')')?;
        return Some(&tuple[..end]);
    }
    let end = rest.find([',', '}'])?;
    Some(rest[..end].trim())
}

fn parse_vector_shape(shape: &str) -> Result<usize, NpyError> {
    let dims = shape
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .collect::<Vec<_>>();
    match dims.as_slice() {
        [len] => len
            .parse::<usize>()
            .map_err(|_| NpyError::Shape(shape.to_string())),
        _ => Err(NpyError::Shape(shape.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_aligned() {
        let bytes = encode_f64(&[1.0, 2.0, 3.0]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % ALIGNMENT, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 24);
    }

    #[test]
    fn decodes_numpy_written_header() {
        let dict = "{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }";
        let mut header = dict.to_string();
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&(-1.5f64).to_le_bytes());
        bytes.extend_from_slice(&0.25f64.to_le_bytes());

        assert_eq!(decode_f64(&bytes).unwrap(), vec![-1.5, 0.25]);
    }

    #[test]
    fn empty_vector_survives() {
        let bytes = encode_f64(&[]);
        assert!(decode_f64(&bytes).unwrap().is_empty());
    }

    #[test]
    fn rejects_other_dtypes_and_shapes() {
        let mut bytes = encode_f64(&[1.0]);
        let pos = bytes.windows(3).position(|w| w == b"<f8").unwrap();
        bytes[pos + 2] = b'4';
        assert_eq!(
            decode_f64(&bytes).unwrap_err(),
            NpyError::UnsupportedDtype("<f4".to_string())
        );

        assert_eq!(
            parse_vector_shape("3, 2").unwrap_err(),
            NpyError::Shape("3, 2".to_string())
        );
        assert_eq!(
            decode_f64(b"not an npy file").unwrap_err(),
            NpyError::BadMagic
        );
    }

    fn with_shape(shape: &str, payload: &[u8]) -> Vec<u8> {
        let mut header =
            format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({shape},), }}");
        while (10 + header.len() + 1) % ALIGNMENT != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn oversized_shape_is_rejected() {
        let bytes = with_shape("2305843009213693953", &1.0f64.to_le_bytes());
        assert_eq!(
            decode_f64(&bytes).unwrap_err(),
            NpyError::Shape("2305843009213693953,".to_string())
        );

        let bytes = with_shape("4", &1.0f64.to_le_bytes());
        assert_eq!(decode_f64(&bytes).unwrap_err(), NpyError::Truncated);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = 1.0f64.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xff; 3]);
        let bytes = with_shape("1", &payload);
        assert_eq!(decode_f64(&bytes).unwrap_err(), NpyError::TrailingData(3));
    }
}
