//! Manifest and magnet decoding for the simulated swarm
//!
//! Manifests use the usual bencoded layout: an `info` dictionary with
//! `name`, `piece length`, `pieces` and either `length` (single file) or
//! `files` (multi file). The info hash is the SHA-1 of the raw `info`
//! dictionary bytes.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use undertow_core::{EngineError, ManifestFile};

type BencodeDict<'a> = HashMap<&'a [u8], bencode_rs::Value<'a>>;
type ParseResult<T> = Result<T, EngineError>;

/// Default piece size used by [`ManifestBuilder`].
pub const DEFAULT_PIECE_LENGTH: u64 = 256 * 1024;

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidManifest {
        reason: reason.into(),
    }
}

/// SHA-1 identity of a manifest's info dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Wrong length or non-hex characters
    pub fn from_hex(value: &str) -> ParseResult<Self> {
        let bytes = hex::decode(value).map_err(|e| invalid(format!("Invalid info hash: {e}")))?;
        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|_| invalid(format!("Info hash needs 40 hex digits, got {}", value.len())))?;
        Ok(Self(hash))
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Decoded manifest: file layout plus piece geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u64,
    pub total_length: u64,
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    /// Decodes bencoded manifest bytes.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Bencode or manifest structure is invalid
    pub fn from_bytes(manifest_bytes: &[u8]) -> ParseResult<Self> {
        let parsed = bencode_rs::Value::parse(manifest_bytes)
            .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

        let Some(bencode_rs::Value::Dictionary(root)) = parsed.first() else {
            return Err(invalid("Root element must be dictionary"));
        };

        let Some(bencode_rs::Value::Dictionary(info)) = root.get(b"info".as_slice()) else {
            return Err(invalid("Missing 'info' dictionary"));
        };

        let info_hash = calculate_info_hash(manifest_bytes)?;
        let name = extract_string(info, b"name")?;
        let piece_length = u64::try_from(extract_integer(info, b"piece length")?)
            .ok()
            .filter(|length| *length > 0)
            .ok_or_else(|| invalid("Piece length must be positive"))?;

        let pieces = extract_bytes(info, b"pieces")?;
        if !pieces.len().is_multiple_of(20) {
            return Err(invalid("Invalid pieces length"));
        }

        let layout = if let Ok(length) = extract_integer(info, b"length") {
            vec![(name.clone(), non_negative(length)?)]
        } else if let Some(bencode_rs::Value::List(files)) = info.get(b"files".as_slice()) {
            extract_files(files)?
        } else {
            return Err(invalid("Missing 'files' or 'length' field"));
        };

        let files = ManifestFile::sequential(layout)?;
        let total_length = files.last().map_or(0, |file| file.offset + file.length);

        let expected_pieces = total_length.div_ceil(piece_length);
        if (pieces.len() / 20) as u64 != expected_pieces {
            return Err(invalid(format!(
                "Manifest lists {} pieces, layout needs {}",
                pieces.len() / 20,
                expected_pieces
            )));
        }

        Ok(Self {
            info_hash,
            name,
            piece_length,
            total_length,
            files,
        })
    }

    pub fn piece_count(&self) -> u32 {
        self.total_length.div_ceil(self.piece_length) as u32
    }

    /// Container byte range `[start, end)` covered by piece `index`.
    pub fn piece_range(&self, index: u32) -> (u64, u64) {
        let start = u64::from(index) * self.piece_length;
        (start, (start + self.piece_length).min(self.total_length))
    }

    /// Piece containing container offset `offset`.
    pub fn piece_at(&self, offset: u64) -> u32 {
        (offset / self.piece_length) as u32
    }

    /// Magnet URI that resolves to this manifest.
    pub fn magnet_uri(&self) -> String {
        format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            self.info_hash,
            urlencoding::encode(&self.name)
        )
    }
}

fn non_negative(value: i64) -> ParseResult<u64> {
    u64::try_from(value).map_err(|_| invalid(format!("Negative length: {value}")))
}

/// SHA-1 of the raw `info` dictionary as it appears in the input.
fn calculate_info_hash(original_data: &[u8]) -> ParseResult<InfoHash> {
    let info_start = original_data
        .windows(b"4:info".len())
        .position(|window| window == b"4:info")
        .ok_or_else(|| invalid("Could not find info dictionary in data"))?
        + b"4:info".len();

    let info_len = find_bencode_dictionary_end(&original_data[info_start..])?;
    let digest = Sha1::digest(&original_data[info_start..info_start + info_len]);

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    Ok(InfoHash::new(hash))
}

/// Length of the bencoded dictionary at the start of `data`.
///
/// # Errors
/// - `EngineError::InvalidManifest` - Data is not a complete dictionary
pub fn find_bencode_dictionary_end(data: &[u8]) -> ParseResult<usize> {
    if data.first() != Some(&b'd') {
        return Err(invalid("Expected dictionary start"));
    }

    let mut pos = 1;
    let mut depth = 1;

    while pos < data.len() && depth > 0 {
        match data[pos] {
            b'd' | b'l' => {
                depth += 1;
                pos += 1;
            }
            b'e' => {
                depth -= 1;
                pos += 1;
            }
            b'i' => {
                pos += 1;
                while pos < data.len() && data[pos] != b'e' {
                    pos += 1;
                }
                pos += 1;
            }
            b'0'..=b'9' => {
                let start = pos;
                while pos < data.len() && data[pos] != b':' {
                    pos += 1;
                }
                let length: usize = std::str::from_utf8(&data[start..pos.min(data.len())])
                    .ok()
                    .and_then(|digits| digits.parse().ok())
                    .ok_or_else(|| invalid("Invalid string length"))?;
                pos += 1 + length;
            }
            _ => return Err(invalid("Invalid bencode character")),
        }
    }

    if depth != 0 || pos > data.len() {
        return Err(invalid("Incomplete bencode dictionary"));
    }

    Ok(pos)
}

fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
    match dict.get(key) {
        Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(invalid(format!(
            "Missing or invalid field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn extract_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
    let bytes = extract_bytes(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        invalid(format!(
            "Invalid UTF-8 in field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
    match dict.get(key) {
        Some(bencode_rs::Value::Integer(value)) => Ok(*value),
        _ => Err(invalid(format!(
            "Missing or invalid integer field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// Multi-file entries as `(display path, length)`; components joined by `/`.
fn extract_files(files: &[bencode_rs::Value<'_>]) -> ParseResult<Vec<(String, u64)>> {
    files
        .iter()
        .map(|file| {
            let bencode_rs::Value::Dictionary(file) = file else {
                return Err(invalid("Invalid file entry type"));
            };
            let length = non_negative(extract_integer(file, b"length")?)?;

            let Some(bencode_rs::Value::List(components)) = file.get(b"path".as_slice()) else {
                return Err(invalid("Missing or invalid path in file"));
            };
            let components = components
                .iter()
                .map(|component| match component {
                    bencode_rs::Value::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                        .map_err(|_| invalid("Invalid UTF-8 in file path")),
                    _ => Err(invalid("Invalid path component type")),
                })
                .collect::<ParseResult<Vec<_>>>()?;

            if components.is_empty() {
                return Err(invalid("Empty file path"));
            }
            Ok((components.join("/"), length))
        })
        .collect()
}

/// Parsed magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
}

impl MagnetLink {
    /// Parses a `magnet:` URI carrying a hex `btih` exact topic.
    ///
    /// # Errors
    /// - `EngineError::InvalidManifest` - Malformed URI or missing info hash
    pub fn parse(uri: &str) -> ParseResult<Self> {
        let magnet =
            magnet_url::Magnet::new(uri).map_err(|e| invalid(format!("Invalid magnet link: {e}")))?;

        let query = uri
            .split_once('?')
            .map(|(_, query)| query)
            .ok_or_else(|| invalid("Magnet link has no parameters"))?;
        let topic = query
            .split('&')
            .find_map(|param| param.strip_prefix("xt=urn:btih:"))
            .ok_or_else(|| invalid(format!("Missing info hash in magnet link: {uri}")))?;

        let display_name = magnet.display_name().map(|name| {
            let name = name.replace('+', " ");
            urlencoding::decode(&name)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(name)
        });

        Ok(Self {
            info_hash: InfoHash::from_hex(topic)?,
            display_name,
        })
    }
}

/// Writes bencoded manifests.
///
/// Piece hashes are zero filled since the simulated swarm never verifies
/// pieces.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    name: String,
    piece_length: u64,
    single_length: Option<u64>,
    files: Vec<(String, u64)>,
}

impl ManifestBuilder {
    /// Manifest holding a single file called `name`.
    pub fn single_file(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
            single_length: Some(length),
            files: Vec::new(),
        }
    }

    /// Multi-file manifest; add entries with [`ManifestBuilder::file`].
    pub fn multi_file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
            single_length: None,
            files: Vec::new(),
        }
    }

    /// Appends a file; `path` components are separated by `/`.
    pub fn file(mut self, path: impl Into<String>, length: u64) -> Self {
        self.files.push((path.into(), length));
        self
    }

    pub fn piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length.max(1);
        self
    }

    /// Builds a multi-file manifest from the regular files below `root`,
    /// sorted by relative path.
    ///
    /// # Errors
    /// - `io::Error` - Directory could not be walked
    pub async fn from_directory(root: &Path) -> io::Result<Self> {
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "seed".to_string());

        let mut files = Vec::new();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else if metadata.is_file() {
                    let relative = entry
                        .path()
                        .strip_prefix(root)
                        .map(|path| {
                            path.components()
                                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                                .collect::<Vec<_>>()
                                .join("/")
                        })
                        .map_err(io::Error::other)?;
                    files.push((relative, metadata.len()));
                }
            }
        }
        files.sort();

        Ok(Self {
            name,
            piece_length: DEFAULT_PIECE_LENGTH,
            single_length: None,
            files,
        })
    }

    /// Bencoded manifest bytes.
    pub fn build(&self) -> Vec<u8> {
        let total: u64 = match self.single_length {
            Some(length) => length,
            None => self.files.iter().map(|(_, length)| length).sum(),
        };
        let piece_count = total.div_ceil(self.piece_length) as usize;

        let mut out = Vec::new();
        out.extend_from_slice(b"d4:infod");

        if self.single_length.is_none() {
            write_bytes(&mut out, b"files");
            out.push(b'l');
            for (path, length) in &self.files {
                out.push(b'd');
                write_bytes(&mut out, b"length");
                write_integer(&mut out, *length);
                write_bytes(&mut out, b"path");
                out.push(b'l');
                for component in path.split('/') {
                    write_bytes(&mut out, component.as_bytes());
                }
                out.extend_from_slice(b"ee");
            }
            out.push(b'e');
        }

        if let Some(length) = self.single_length {
            write_bytes(&mut out, b"length");
            write_integer(&mut out, length);
        }

        write_bytes(&mut out, b"name");
        write_bytes(&mut out, self.name.as_bytes());
        write_bytes(&mut out, b"piece length");
        write_integer(&mut out, self.piece_length);
        write_bytes(&mut out, b"pieces");
        write_bytes(&mut out, &vec![0u8; piece_count * 20]);

        out.extend_from_slice(b"ee");
        out
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn write_integer(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(format!("i{value}e").as_bytes());
}
