// SPDX-License-Identifier: CEPL-1.0
//! On-disk cache for pre-compressed texture payloads.
//!
//! File layout (little-endian):
//!
//! ```text
//! magic    [u8; 4]  "LXTC"
//! version  u32      FORMAT_VERSION
//! size     i32      payload length in bytes
//! width    i32
//! height   i32
//! format   i32      backend format tag, opaque to the cache
//! payload  [u8; size]
//! ```
//!
//! A file with a different magic or version is rejected instead of being
//! reinterpreted, so a layout change never produces a silent misread.

use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

pub const MAGIC: [u8; 4] = *b"LXTC";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 4 * 4;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("texture cache io: {0}")]
    Io(#[from] io::Error),
    #[error("not a texture cache file (magic {0:?})")]
    BadMagic([u8; 4]),
    #[error("texture cache version {found} is not supported (expected {FORMAT_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("texture cache field `{field}` is negative ({value})")]
    NegativeField { field: &'static str, value: i32 },
    #[error("texture cache payload truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("texture payload of {0} bytes does not fit the cache header")]
    TooLarge(usize),
}

/// A compressed texture as stored in the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedImage {
    pub width: i32,
    pub height: i32,
    pub format: i32,
    pub data: Vec<u8>,
}

impl CompressedImage {
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), CacheError> {
        let size = i32::try_from(self.data.len()).map_err(|_| CacheError::TooLarge(self.data.len()))?;
        check_non_negative("width", self.width)?;
        check_non_negative("height", self.height)?;

        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&size.to_le_bytes());
        header[12..16].copy_from_slice(&self.width.to_le_bytes());
        header[16..20].copy_from_slice(&self.height.to_le_bytes());
        header[20..24].copy_from_slice(&self.format.to_le_bytes());

        out.write_all(&header)?;
        out.write_all(&self.data)?;
        out.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut input: R) -> Result<Self, CacheError> {
        let mut header = [0u8; HEADER_LEN];
        input.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CacheError::Truncated {
                expected: HEADER_LEN,
                actual: 0,
            },
            _ => CacheError::Io(e),
        })?;

        let magic: [u8; 4] = [header[0], header[1], header[2], header[3]];
        if magic != MAGIC {
            return Err(CacheError::BadMagic(magic));
        }
        let version = u32::from_le_bytes(field(&header, 4));
        if version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion { found: version });
        }

        let size = i32::from_le_bytes(field(&header, 8));
        let width = i32::from_le_bytes(field(&header, 12));
        let height = i32::from_le_bytes(field(&header, 16));
        let format = i32::from_le_bytes(field(&header, 20));
        check_non_negative("size", size)?;
        check_non_negative("width", width)?;
        check_non_negative("height", height)?;

        // Grow incrementally so a corrupted size can't force a huge allocation up front.
        let expected = size as usize;
        let mut data = Vec::new();
        input.take(expected as u64).read_to_end(&mut data)?;
        if data.len() != expected {
            return Err(CacheError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }
}

fn field(header: &[u8; HEADER_LEN], at: usize) -> [u8; 4] {
    [header[at], header[at + 1], header[at + 2], header[at + 3]]
}

fn check_non_negative(field: &'static str, value: i32) -> Result<(), CacheError> {
    if value < 0 {
        Err(CacheError::NegativeField { field, value })
    } else {
        Ok(())
    }
}

/// Directory-backed store of [`CompressedImage`]s keyed by file stem.
///
/// Constructed once by the application and passed to whoever loads textures.
#[derive(Debug, Clone)]
pub struct TextureCache {
    dir: PathBuf,
}

impl TextureCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.bin"))
    }

    pub fn store(&self, stem: &str, image: &CompressedImage) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(stem);
        let file = fs::File::create(&path)?;
        image.write_to(BufWriter::new(file))?;
        debug!(
            "texture cache: stored {} ({}x{}, {} bytes)",
            path.display(),
            image.width,
            image.height,
            image.byte_size()
        );
        Ok(path)
    }

    /// `Ok(None)` when no entry exists; `Err` when an entry exists but can't be used.
    pub fn load(&self, stem: &str) -> Result<Option<CompressedImage>, CacheError> {
        let path = self.path_for(stem);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        CompressedImage::read_from(BufReader::new(file)).map(Some)
    }

    /// Like [`load`](Self::load), but an unusable entry is logged, removed and
    /// reported as a miss so the caller rebuilds it.
    pub fn fetch(&self, stem: &str) -> Option<CompressedImage> {
        match self.load(stem) {
            Ok(hit) => hit,
            Err(e) => {
                let path = self.path_for(stem);
                warn!("texture cache: discarding {}: {e}", path.display());
                if let Err(rm) = fs::remove_file(&path) {
                    warn!("texture cache: could not remove {}: {rm}", path.display());
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> CompressedImage {
        CompressedImage {
            width: 4,
            height: 2,
            format: 0x83F1,
            data: (0u8..32).collect(),
        }
    }

    #[test]
    fn store_then_load_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TextureCache::new(dir.path().join("textures"));
        let img = sample();

        let path = cache.store("brick", &img).unwrap();
        assert_eq!(path, cache.path_for("brick"));

        let back = cache.load("brick").unwrap().expect("entry present");
        assert_eq!(back.width, img.width);
        assert_eq!(back.height, img.height);
        assert_eq!(back.format, img.format);
        assert_eq!(back.data, img.data);
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TextureCache::new(dir.path());
        assert!(cache.load("nope").unwrap().is_none());
        assert!(cache.fetch("nope").is_none());
    }

    #[test]
    fn header_is_little_endian_and_versioned() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[0..4], b"LXTC");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), FORMAT_VERSION);
        assert_eq!(i32::from_le_bytes(bytes[8..12].try_into().unwrap()), 32);
        assert_eq!(bytes.len(), HEADER_LEN + 32);
    }

    #[test]
    fn rejects_unversioned_legacy_layout() {
        // size, width, height, format with no magic/version in front
        let mut legacy = Vec::new();
        for v in [4i32, 1, 1, 7] {
            legacy.extend_from_slice(&v.to_le_bytes());
        }
        legacy.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let err = CompressedImage::read_from(Cursor::new(legacy)).unwrap_err();
        assert!(matches!(err, CacheError::BadMagic(_)));
    }

    #[test]
    fn rejects_other_version() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        let err = CompressedImage::read_from(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedVersion { found: 2 }));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 5);
        let err = CompressedImage::read_from(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Truncated {
                expected: 32,
                actual: 27
            }
        ));
    }

    #[test]
    fn rejects_negative_size() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes[8..12].copy_from_slice(&(-1i32).to_le_bytes());
        let err = CompressedImage::read_from(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CacheError::NegativeField { field: "size", .. }));
    }

    #[test]
    fn fetch_discards_corrupt_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TextureCache::new(dir.path());
        fs::write(cache.path_for("bad"), b"garbage").unwrap();

        assert!(cache.fetch("bad").is_none());
        assert!(!cache.path_for("bad").exists());
    }
}
