//! Making sure CSV input is UTF-8 before handing it to `xsv`.

use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DETECT_CHUNK_SIZE: usize = 4096;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// windows-1252 code points for 0x80..=0x9F; None marks bytes the code page leaves undefined
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Input file not found at '{0}'")]
    NotFound(PathBuf),

    #[error("I/O error while checking encoding: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf8Sig,
    Windows1252,
    Latin1,
}

impl Encoding {
    pub fn is_utf8(&self) -> bool {
        matches!(self, Encoding::Utf8 | Encoding::Utf8Sig)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf8Sig => "utf-8-sig",
            Encoding::Windows1252 => "windows-1252",
            Encoding::Latin1 => "latin-1",
        }
    }

    /// Decode a full byte buffer; only meaningful for the single-byte encodings
    fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 | Encoding::Utf8Sig => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Windows1252 => bytes.iter().map(|&b| windows_1252_char(b)).collect(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn windows_1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => WINDOWS_1252_HIGH[(byte - 0x80) as usize].unwrap_or('\u{FFFD}'),
        _ => byte as char,
    }
}

fn is_windows_1252(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| match b {
        0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize].is_some(),
        _ => true,
    })
}

/// An incomplete trailing sequence is accepted only when the read stopped at the chunk limit
fn is_utf8_chunk(bytes: &[u8], truncated: bool) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => truncated && e.error_len().is_none(),
    }
}

/// Guess the encoding of the leading bytes of a file
///
/// `truncated` says whether `chunk` stops short of the end of the file.
pub fn detect_encoding(chunk: &[u8], truncated: bool) -> Encoding {
    if let Some(rest) = chunk.strip_prefix(UTF8_BOM) {
        if is_utf8_chunk(rest, truncated) {
            return Encoding::Utf8Sig;
        }
    }
    if is_utf8_chunk(chunk, truncated) {
        Encoding::Utf8
    } else if is_windows_1252(chunk) {
        Encoding::Windows1252
    } else {
        Encoding::Latin1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodingReport {
    /// The file later steps should read
    pub path_to_process: PathBuf,
    pub detected_encoding: Encoding,
    pub converted: bool,
}

/// `<stem>.utf8<.ext>` next to the original
pub fn utf8_sibling_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.utf8.{}", stem, ext.to_string_lossy()),
        None => format!("{}.utf8", stem),
    };
    path.with_file_name(name)
}

/// Detect the file's encoding and transcode it to a UTF-8 sibling when needed
#[tracing::instrument]
pub fn ensure_utf8_file(path: &Path) -> Result<EncodingReport, EncodingError> {
    if !path.is_file() {
        return Err(EncodingError::NotFound(path.to_path_buf()));
    }

    let mut chunk = Vec::with_capacity(DETECT_CHUNK_SIZE);
    File::open(path)?
        .take(DETECT_CHUNK_SIZE as u64)
        .read_to_end(&mut chunk)?;
    let detected_encoding = detect_encoding(&chunk, chunk.len() == DETECT_CHUNK_SIZE);
    tracing::info!("Detected encoding {} for '{}'", detected_encoding, path.display());

    if detected_encoding.is_utf8() {
        return Ok(EncodingReport {
            path_to_process: path.to_path_buf(),
            detected_encoding,
            converted: false,
        });
    }

    let target = utf8_sibling_path(path);
    let decoded = detected_encoding.decode(&fs::read(path)?);
    fs::write(&target, decoded)?;
    tracing::info!(
        "Converted '{}' from {} to UTF-8 at '{}'",
        path.display(),
        detected_encoding,
        target.display()
    );

    Ok(EncodingReport {
        path_to_process: target,
        detected_encoding,
        converted: true,
    })
}
