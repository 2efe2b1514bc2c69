//! Reader for packed runtime images (`lib/modules`).
//!
//! The image starts with a fixed header followed by the index: a redirect
//! table, a location offset table, the location attribute stream and a string
//! table. Resource bytes follow the index. The image is written in the byte
//! order of the platform that produced it, which is detected from the magic.

use indexmap::IndexMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

pub const IMAGE_MAGIC: u32 = 0xCAFE_DADA;
pub const IMAGE_MAJOR_VERSION: u32 = 1;
pub const IMAGE_HEADER_SIZE: usize = 7 * 4;

const ATTRIBUTE_END: usize = 0;
const ATTRIBUTE_MODULE: usize = 1;
const ATTRIBUTE_PARENT: usize = 2;
const ATTRIBUTE_BASE: usize = 3;
const ATTRIBUTE_EXTENSION: usize = 4;
const ATTRIBUTE_OFFSET: usize = 5;
const ATTRIBUTE_COMPRESSED: usize = 6;
const ATTRIBUTE_UNCOMPRESSED: usize = 7;
const ATTRIBUTE_COUNT: usize = 8;

/// Pseudo-modules holding the directory tree used by the `jrt` file system.
const SYNTHETIC_MODULES: &[&str] = &["modules", "packages"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid runtime image magic {found:#010x}")]
    InvalidMagic { found: u32 },
    #[error("unsupported runtime image version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },
    #[error("runtime image index is truncated")]
    Truncated,
    #[error("resource {name} is compressed and cannot be read")]
    Compressed { name: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub major_version: u32,
    pub minor_version: u32,
    pub flags: u32,
    pub resource_count: u32,
    pub table_length: u32,
    pub locations_size: u32,
    pub strings_size: u32,
}

impl ImageHeader {
    pub fn index_size(&self) -> usize {
        IMAGE_HEADER_SIZE
            + self.table_length as usize * 4 * 2
            + self.locations_size as usize
            + self.strings_size as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    offset: u64,
    compressed: u64,
    uncompressed: u64,
}

/// An opened runtime image. The index is held in memory; resource bytes are
/// read on demand.
#[derive(Debug)]
pub struct RuntimeImage {
    path: PathBuf,
    header: ImageHeader,
    modules: IndexMap<String, IndexMap<String, Location>>,
    file: Mutex<Option<File>>,
}

impl RuntimeImage {
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let mut file = File::open(path)?;
        let mut header_bytes = [0u8; IMAGE_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|_| ImageError::Truncated)?;

        let order = detect_byte_order(&header_bytes)?;
        let header = read_header(&header_bytes, order)?;

        let mut index = vec![0u8; header.index_size()];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut index)
            .map_err(|_| ImageError::Truncated)?;

        let modules = read_locations(&index, &header, order)?;
        debug!(
            path = %path.display(),
            modules = modules.len(),
            resources = header.resource_count,
            "opened runtime image"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            modules,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Names of the modules stored in the image, in index order.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Entry names of one module, relative to the module root
    /// (`java/lang/Object.class`).
    pub fn entries(&self, module: &str) -> impl Iterator<Item = &str> {
        self.modules
            .get(module)
            .into_iter()
            .flat_map(|entries| entries.keys().map(String::as_str))
    }

    pub fn contains(&self, module: &str, entry: &str) -> bool {
        self.modules
            .get(module)
            .is_some_and(|entries| entries.contains_key(entry))
    }

    /// Reads the bytes of one resource. Returns `Ok(None)` when the resource
    /// does not exist.
    pub fn read(&self, module: &str, entry: &str) -> Result<Option<Vec<u8>>, ImageError> {
        let Some(location) = self
            .modules
            .get(module)
            .and_then(|entries| entries.get(entry))
        else {
            return Ok(None);
        };

        if location.compressed != 0 {
            return Err(ImageError::Compressed {
                name: format!("/{module}/{entry}"),
            });
        }

        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = guard.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "runtime image has been closed")
        })?;
        let mut buffer = vec![0u8; location.uncompressed as usize];
        file.seek(SeekFrom::Start(
            self.header.index_size() as u64 + location.offset,
        ))?;
        file.read_exact(&mut buffer)?;
        Ok(Some(buffer))
    }

    /// Releases the underlying file. Returns `false` when it was already
    /// released.
    pub fn close(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some()
    }
}

fn detect_byte_order(header: &[u8]) -> Result<ByteOrder, ImageError> {
    if ByteOrder::Little.u32(header) == IMAGE_MAGIC {
        Ok(ByteOrder::Little)
    } else if ByteOrder::Big.u32(header) == IMAGE_MAGIC {
        Ok(ByteOrder::Big)
    } else {
        Err(ImageError::InvalidMagic {
            found: ByteOrder::Little.u32(header),
        })
    }
}

fn read_header(bytes: &[u8], order: ByteOrder) -> Result<ImageHeader, ImageError> {
    let field = |index: usize| order.u32(&bytes[index * 4..index * 4 + 4]);
    let version = field(1);
    let header = ImageHeader {
        major_version: version >> 16,
        minor_version: version & 0xFFFF,
        flags: field(2),
        resource_count: field(3),
        table_length: field(4),
        locations_size: field(5),
        strings_size: field(6),
    };
    if header.major_version != IMAGE_MAJOR_VERSION {
        return Err(ImageError::UnsupportedVersion {
            major: header.major_version,
            minor: header.minor_version,
        });
    }
    Ok(header)
}

fn read_locations(
    index: &[u8],
    header: &ImageHeader,
    order: ByteOrder,
) -> Result<IndexMap<String, IndexMap<String, Location>>, ImageError> {
    let table_length = header.table_length as usize;
    let offsets_start = IMAGE_HEADER_SIZE + table_length * 4;
    let locations_start = offsets_start + table_length * 4;
    let strings_start = locations_start + header.locations_size as usize;
    let locations = &index[locations_start..strings_start];
    let strings = &index[strings_start..];

    let mut modules: IndexMap<String, IndexMap<String, Location>> = IndexMap::new();
    for slot in 0..table_length {
        let at = offsets_start + slot * 4;
        let offset = order.u32(&index[at..at + 4]) as usize;
        let attributes = decode_attributes(locations, offset)?;

        let module = read_string(strings, attributes[ATTRIBUTE_MODULE])?;
        if module.is_empty() || SYNTHETIC_MODULES.contains(&module.as_str()) {
            continue;
        }
        let parent = read_string(strings, attributes[ATTRIBUTE_PARENT])?;
        let base = read_string(strings, attributes[ATTRIBUTE_BASE])?;
        let extension = read_string(strings, attributes[ATTRIBUTE_EXTENSION])?;

        let mut entry = String::new();
        if !parent.is_empty() {
            entry.push_str(&parent);
            entry.push('/');
        }
        entry.push_str(&base);
        if !extension.is_empty() {
            entry.push('.');
            entry.push_str(&extension);
        }

        modules.entry(module).or_default().insert(
            entry,
            Location {
                offset: attributes[ATTRIBUTE_OFFSET],
                compressed: attributes[ATTRIBUTE_COMPRESSED],
                uncompressed: attributes[ATTRIBUTE_UNCOMPRESSED],
            },
        );
    }
    Ok(modules)
}

/// Decodes one location. Each attribute starts with a byte holding the kind in
/// the upper five bits and the value length minus one in the lower three; the
/// value follows in big-endian order.
fn decode_attributes(bytes: &[u8], mut pos: usize) -> Result<[u64; ATTRIBUTE_COUNT], ImageError> {
    let mut attributes = [0u64; ATTRIBUTE_COUNT];
    loop {
        let data = *bytes.get(pos).ok_or(ImageError::Truncated)? as usize;
        let kind = data >> 3;
        if kind == ATTRIBUTE_END {
            break;
        }
        let length = (data & 0x7) + 1;
        let value_bytes = bytes
            .get(pos + 1..pos + 1 + length)
            .ok_or(ImageError::Truncated)?;
        let value = value_bytes
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        if kind < ATTRIBUTE_COUNT {
            attributes[kind] = value;
        }
        pos += length + 1;
    }
    Ok(attributes)
}

fn read_string(strings: &[u8], offset: u64) -> Result<String, ImageError> {
    let start = offset as usize;
    let tail = strings.get(start..).ok_or(ImageError::Truncated)?;
    let end = tail
        .iter()
        .position(|byte| *byte == 0)
        .ok_or(ImageError::Truncated)?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ImageWriter, ImageWriterOrder};

    fn write_sample(order: ImageWriterOrder) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules");
        let mut writer = ImageWriter::new(order);
        writer.add("java.base", "java/lang/Object.class", b"object");
        writer.add("java.base", "module-info.class", b"descriptor");
        writer.add("java.sql", "java/sql/Driver.class", b"driver");
        writer.add("packages", "java.lang/java.base", b"");
        writer.write(&path).unwrap();
        (dir, path)
    }

    #[test]
    fn lists_modules_and_entries() {
        let (_dir, path) = write_sample(ImageWriterOrder::Little);
        let image = RuntimeImage::open(&path).expect("open image");

        let modules: Vec<_> = image.module_names().collect();
        assert_eq!(modules, vec!["java.base", "java.sql"]);
        assert!(image.contains("java.base", "java/lang/Object.class"));
        assert!(!image.contains("java.sql", "java/lang/Object.class"));
        let entries: Vec<_> = image.entries("java.base").collect();
        assert_eq!(entries, vec!["java/lang/Object.class", "module-info.class"]);
    }

    #[test]
    fn reads_resources_in_either_byte_order() {
        for order in [ImageWriterOrder::Little, ImageWriterOrder::Big] {
            let (_dir, path) = write_sample(order);
            let image = RuntimeImage::open(&path).unwrap();
            let bytes = image.read("java.sql", "java/sql/Driver.class").unwrap();
            assert_eq!(bytes.as_deref(), Some(&b"driver"[..]));
            assert!(image.read("java.sql", "Missing.class").unwrap().is_none());
        }
    }

    #[test]
    fn close_is_idempotent() {
        let (_dir, path) = write_sample(ImageWriterOrder::Little);
        let image = RuntimeImage::open(&path).unwrap();
        assert!(image.close());
        assert!(!image.close());
        assert!(image.read("java.base", "module-info.class").is_err());
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules");
        std::fs::write(&path, [0u8; IMAGE_HEADER_SIZE]).unwrap();
        assert!(matches!(
            RuntimeImage::open(&path),
            Err(ImageError::InvalidMagic { .. })
        ));
    }
}
