//! Minimal NumPy `.npy` codec for 2-D float matrices.
//!
//! Reads versions 1.0, 2.0 and 3.0 with `descr` `<f4`, `>f4`, `<f8` or `>f8`
//! in C or Fortran order. Float64 input is narrowed to f32. Output is always
//! version 1.0, little-endian f32, C order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{EmbeddingError, Result};
use crate::matrix::EmbeddingMatrix;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    F32,
    F64,
}

impl Element {
    const fn size(self) -> usize {
        match self {
            Element::F32 => 4,
            Element::F64 => 8,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Header {
    endian: Endian,
    element: Element,
    fortran_order: bool,
    rows: usize,
    cols: usize,
}

/// Load a 2-D float matrix from an `.npy` file.
pub fn load_f32(path: &Path) -> Result<EmbeddingMatrix> {
    let artifact = path.display();
    let file = File::open(path)
        .map_err(|e| EmbeddingError::malformed(&artifact, format!("cannot open matrix: {e}")))?;
    let len = file.metadata()?.len();
    if len < 10 {
        return Err(EmbeddingError::malformed(
            &artifact,
            format!("file is {len} bytes, too short for an npy header"),
        ));
    }
    // SAFETY: artifacts are produced once by the training pipeline and are
    // not modified while the service runs; the mapping is dropped after decode.
    #[allow(unsafe_code)]
    let mmap = unsafe { Mmap::map(&file)? };
    decode(&mmap).map_err(|reason| EmbeddingError::malformed(&artifact, reason))
}

/// Write a matrix as a version 1.0 little-endian f32 `.npy` file.
pub fn save_f32(path: &Path, matrix: &EmbeddingMatrix) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    out.write_all(&encode_header(matrix.rows(), matrix.dim()))?;
    for value in matrix.as_slice() {
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

fn encode_header(rows: usize, cols: usize) -> Vec<u8> {
    let mut dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    // magic(6) + version(2) + len(2) + dict + '\n' must be a multiple of HEADER_ALIGN.
    let unpadded = MAGIC.len() + 4 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    dict.extend(std::iter::repeat_n(' ', padding));
    dict.push('\n');

    let mut header = Vec::with_capacity(10 + dict.len());
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

fn decode(bytes: &[u8]) -> Result<EmbeddingMatrix, String> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err("invalid npy magic number".into());
    }
    let (header_len, header_start) = match (bytes[6], bytes[7]) {
        (1, 0) => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        (2, 0) | (3, 0) => {
            if bytes.len() < 12 {
                return Err("truncated npy header".into());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        (major, minor) => return Err(format!("unsupported npy version {major}.{minor}")),
    };
    let data_start = header_start + header_len;
    let dict = bytes
        .get(header_start..data_start)
        .ok_or("truncated npy header")?;
    let dict = std::str::from_utf8(dict).map_err(|_| "npy header is not valid text")?;
    let header = parse_header(dict)?;

    let expected = header
        .rows
        .checked_mul(header.cols)
        .and_then(|n| n.checked_mul(header.element.size()))
        .ok_or("npy shape overflows usize")?;
    let payload = &bytes[data_start..];
    if payload.len() < expected {
        return Err(format!(
            "truncated npy payload: shape ({}, {}) needs {expected} bytes, found {}",
            header.rows,
            header.cols,
            payload.len()
        ));
    }
    if payload.len() > expected {
        return Err(format!(
            "npy payload has {} trailing bytes beyond shape ({}, {})",
            payload.len() - expected,
            header.rows,
            header.cols
        ));
    }

    let values: Vec<f32> = match header.element {
        Element::F32 => payload
            .chunks_exact(4)
            .map(|c| {
                let raw = [c[0], c[1], c[2], c[3]];
                match header.endian {
                    Endian::Little => f32::from_le_bytes(raw),
                    Endian::Big => f32::from_be_bytes(raw),
                }
            })
            .collect(),
        Element::F64 => payload
            .chunks_exact(8)
            .map(|c| {
                let raw = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                let wide = match header.endian {
                    Endian::Little => f64::from_le_bytes(raw),
                    Endian::Big => f64::from_be_bytes(raw),
                };
                wide as f32
            })
            .collect(),
    };

    let values = if header.fortran_order {
        transpose(&values, header.rows, header.cols)
    } else {
        values
    };
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(format!(
            "non-finite value at element {pos} (row {}, col {})",
            pos / header.cols,
            pos % header.cols
        ));
    }
    EmbeddingMatrix::from_flat(values, header.rows, header.cols).map_err(|e| e.to_string())
}

/// Column-major `rows x cols` to row-major.
fn transpose(values: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; values.len()];
    for c in 0..cols {
        for r in 0..rows {
            out[r * cols + c] = values[c * rows + r];
        }
    }
    out
}

fn parse_header(dict: &str) -> Result<Header, String> {
    let descr = value_after_key(dict, "descr").ok_or("npy header missing 'descr'")?;
    let descr = quoted(descr).ok_or("npy 'descr' is not a string")?;
    let (endian, element) = match descr {
        "<f4" => (Endian::Little, Element::F32),
        ">f4" => (Endian::Big, Element::F32),
        "<f8" => (Endian::Little, Element::F64),
        ">f8" => (Endian::Big, Element::F64),
        other => return Err(format!("unsupported npy dtype {other:?}, expected float32/float64")),
    };

    let order = value_after_key(dict, "fortran_order").ok_or("npy header missing 'fortran_order'")?;
    let fortran_order = if order.starts_with("True") {
        true
    } else if order.starts_with("False") {
        false
    } else {
        return Err("npy 'fortran_order' is not a boolean".into());
    };

    let shape = value_after_key(dict, "shape").ok_or("npy header missing 'shape'")?;
    let dims = parse_shape(shape)?;
    let [rows, cols] = dims[..] else {
        return Err(format!("expected a 2-D array, found shape {dims:?}"));
    };

    Ok(Header {
        endian,
        element,
        fortran_order,
        rows,
        cols,
    })
}

/// Text following `'key':`, with leading whitespace removed.
fn value_after_key<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    ['\'', '"'].into_iter().find_map(|q| {
        let needle = format!("{q}{key}{q}");
        let at = dict.find(&needle)? + needle.len();
        let rest = dict[at..].trim_start().strip_prefix(':')?;
        Some(rest.trim_start())
    })
}

fn quoted(value: &str) -> Option<&str> {
    let q = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = &value[1..];
    inner.find(q).map(|end| &inner[..end])
}

fn parse_shape(value: &str) -> Result<Vec<usize>, String> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.find(')').map(|end| &v[..end]))
        .ok_or("npy 'shape' is not a tuple")?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| format!("npy shape entry {part:?} is not an integer"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn raw_npy(descr: &str, fortran: bool, shape: &str, payload: &[u8]) -> Vec<u8> {
        raw_npy_versioned(1, descr, fortran, shape, payload)
    }

    fn raw_npy_versioned(
        major: u8,
        descr: &str,
        fortran: bool,
        shape: &str,
        payload: &[u8],
    ) -> Vec<u8> {
        let dict = format!(
            "{{'descr': '{descr}', 'fortran_order': {}, 'shape': {shape}, }}\n",
            if fortran { "True" } else { "False" }
        );
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[major, 0]);
        if major == 1 {
            bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        } else {
            bytes.extend_from_slice(&(dict.len() as u32).to_le_bytes());
        }
        bytes.extend_from_slice(dict.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn f32_le(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn save_then_load_preserves_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.npy");
        let matrix = EmbeddingMatrix::from_rows([[0.5f32, -1.0, 2.0], [3.0, 4.0, 5.25]]).unwrap();

        save_f32(&path, &matrix).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % HEADER_ALIGN, 0);

        assert_eq!(load_f32(&path).unwrap(), matrix);
    }

    #[test]
    fn float64_is_narrowed() {
        let payload: Vec<u8> = [1.0f64, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let m = decode(&raw_npy("<f8", false, "(2, 2)", &payload)).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn fortran_order_is_transposed() {
        // Column-major storage of [[1, 2, 3], [4, 5, 6]].
        let payload = f32_le(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let m = decode(&raw_npy("<f4", true, "(2, 3)", &payload)).unwrap();
        assert_eq!(m.row(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(m.row(1), Some(&[4.0, 5.0, 6.0][..]));
    }

    #[test]
    fn big_endian_f32() {
        let payload: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let m = decode(&raw_npy(">f4", false, "(1, 2)", &payload)).unwrap();
        assert_eq!(m.as_slice(), &[1.5, -2.0]);
    }

    #[test]
    fn version_two_and_three_headers() {
        let payload = f32_le(&[1.5, 2.5]);
        for major in [2, 3] {
            let m = decode(&raw_npy_versioned(major, "<f4", false, "(1, 2)", &payload)).unwrap();
            assert_eq!(m.as_slice(), &[1.5, 2.5]);
        }

        let mut cut = MAGIC.to_vec();
        cut.extend_from_slice(&[2, 0, 0, 0]);
        assert!(decode(&cut).unwrap_err().contains("truncated npy header"));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let nan = raw_npy("<f4", false, "(2, 2)", &f32_le(&[0.0, 1.0, f32::NAN, 3.0]));
        let err = decode(&nan).unwrap_err();
        assert!(err.contains("non-finite value at element 2 (row 1, col 0)"));

        let inf = raw_npy("<f4", false, "(1, 2)", &f32_le(&[f32::INFINITY, 0.0]));
        assert!(decode(&inf).unwrap_err().contains("non-finite"));

        // Finite in f64 but out of f32 range.
        let wide: Vec<u8> = [1.0e300f64, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let err = decode(&raw_npy("<f8", false, "(1, 2)", &wide)).unwrap_err();
        assert!(err.contains("non-finite"));
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(decode(b"not an npy file").unwrap_err().contains("magic"));

        let ints = raw_npy("<i8", false, "(1, 1)", &[0; 8]);
        assert!(decode(&ints).unwrap_err().contains("unsupported npy dtype"));

        let one_d = raw_npy("<f4", false, "(4,)", &f32_le(&[0.0; 4]));
        assert!(decode(&one_d).unwrap_err().contains("2-D"));

        let short = raw_npy("<f4", false, "(2, 2)", &f32_le(&[0.0; 3]));
        assert!(decode(&short).unwrap_err().contains("truncated"));

        let long = raw_npy("<f4", false, "(1, 2)", &f32_le(&[0.0; 3]));
        assert!(decode(&long).unwrap_err().contains("trailing"));
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.npy");
        std::fs::write(&path, b"\x93NUMPY\x09\x00garbage").unwrap();
        match load_f32(&path).unwrap_err() {
            EmbeddingError::MalformedArtifact { artifact, reason } => {
                assert!(artifact.ends_with("broken.npy"));
                assert!(reason.contains("unsupported npy version 9.0"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
