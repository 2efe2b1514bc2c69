use crate::descriptor::{parse_module_info, ModuleDescriptor};
use crate::image::RuntimeImage;
use crate::{DepsError, MODULE_INFO};
use indexmap::{IndexMap, IndexSet};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::trace;
use walkdir::WalkDir;
use zip::ZipArchive;

const VERSIONS_PREFIX: &str = "META-INF/versions/";
const MANIFEST: &str = "META-INF/MANIFEST.MF";
const JMOD_CLASSES: &str = "classes/";

/// Returns the dotted package name for an entry such as `p/q/Foo.class`.
/// Entries in the unnamed package map to the empty string.
pub fn package_of_entry(entry: &str) -> String {
    match entry.rfind('/') {
        Some(index) if index > 0 => entry[..index].replace('/', "."),
        _ => String::new(),
    }
}

/// Turns `p.q.Foo`, `p/q/Foo` or `p/q/Foo.class` into the entry name
/// `p/q/Foo.class`.
pub fn class_entry_name(class_name: &str) -> String {
    let stem = class_name.strip_suffix(".class").unwrap_or(class_name);
    if stem.contains('/') {
        format!("{stem}.class")
    } else {
        format!("{}.class", stem.replace('.', "/"))
    }
}

pub(crate) fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| matches_ignore_case(ext, &["jar", "zip", "jmod"]))
        .unwrap_or(false)
}

fn is_jmod(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| ext.eq_ignore_ascii_case("jmod"))
        .unwrap_or(false)
}

pub(crate) fn matches_ignore_case(candidate: &str, values: &[&str]) -> bool {
    values
        .iter()
        .any(|value| candidate.eq_ignore_ascii_case(value))
}

enum Backing {
    Zip {
        archive: ZipArchive<BufReader<File>>,
        physical: IndexMap<String, String>,
    },
    Directory {
        root: PathBuf,
    },
    Image {
        image: Arc<RuntimeImage>,
        module: String,
    },
}

/// Entry listing and content access for one archive, directory or image
/// subtree. The entry list is captured when the reader is opened; `close`
/// releases the underlying file handle.
pub struct EntryReader {
    path: PathBuf,
    entries: IndexSet<String>,
    backing: Mutex<Option<Backing>>,
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EntryReader {
    /// Opens a directory tree or a zip-based archive. `release` selects the
    /// versioned entries of multi-release jars.
    pub fn open(path: &Path, release: Option<u16>) -> Result<Self, DepsError> {
        if path.is_dir() {
            Self::directory(path)
        } else {
            Self::zip(path, release)
        }
    }

    pub fn directory(root: &Path) -> Result<Self, DepsError> {
        let mut entries = IndexSet::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|error| {
                let path = error
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                DepsError::Io {
                    path,
                    source: error.into(),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.insert(name);
        }

        Ok(Self {
            path: root.to_path_buf(),
            entries,
            backing: Mutex::new(Some(Backing::Directory {
                root: root.to_path_buf(),
            })),
        })
    }

    pub fn zip(path: &Path, release: Option<u16>) -> Result<Self, DepsError> {
        let file = File::open(path).map_err(|source| DepsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|source| DepsError::Zip {
                path: path.to_path_buf(),
                source,
            })?;

        let jmod = is_jmod(path);
        let multi_release = release.is_some() && !jmod && declares_multi_release(&mut archive);

        let mut names = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let entry = archive.by_index(idx).map_err(|source| DepsError::Zip {
                path: path.to_path_buf(),
                source,
            })?;
            if entry.is_file() {
                names.push(entry.name().to_string());
            }
        }

        let mut physical: IndexMap<String, String> = IndexMap::new();
        let mut chosen_versions: IndexMap<String, u16> = IndexMap::new();
        for name in &names {
            if name.ends_with('/') {
                continue;
            }

            let logical = if jmod {
                match name.strip_prefix(JMOD_CLASSES) {
                    Some(stripped) => stripped.to_string(),
                    None => continue,
                }
            } else if let Some(versioned) = name.strip_prefix(VERSIONS_PREFIX) {
                let Some((version, rest)) = versioned.split_once('/') else {
                    continue;
                };
                let (Some(limit), Ok(version)) = (release, version.parse::<u16>()) else {
                    continue;
                };
                if !multi_release || version > limit || rest.is_empty() {
                    continue;
                }
                let previous = chosen_versions.get(rest).copied().unwrap_or(0);
                if version < previous {
                    continue;
                }
                chosen_versions.insert(rest.to_string(), version);
                physical.insert(rest.to_string(), name.clone());
                continue;
            } else {
                name.clone()
            };

            physical.entry(logical).or_insert_with(|| name.clone());
        }

        trace!(
            path = %path.display(),
            entries = physical.len(),
            versioned = chosen_versions.len(),
            "opened archive"
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries: physical.keys().cloned().collect(),
            backing: Mutex::new(Some(Backing::Zip { archive, physical })),
        })
    }

    /// Binds a reader to one module of a runtime image.
    pub fn image(image: Arc<RuntimeImage>, module: &str) -> Self {
        let entries = image.entries(module).map(str::to_string).collect();
        Self {
            path: image.path().join(module),
            entries,
            backing: Mutex::new(Some(Backing::Image {
                image,
                module: module.to_string(),
            })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(entry)
    }

    /// Reads one entry. Returns `Ok(None)` when the entry does not exist and
    /// `DepsError::Closed` after `close`.
    pub fn read(&self, entry: &str) -> Result<Option<Vec<u8>>, DepsError> {
        if !self.entries.contains(entry) {
            return Ok(None);
        }

        let mut guard = self
            .backing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let backing = guard.as_mut().ok_or_else(|| DepsError::Closed {
            path: self.path.clone(),
        })?;

        match backing {
            Backing::Zip { archive, physical } => {
                let Some(name) = physical.get(entry) else {
                    return Ok(None);
                };
                let mut file = archive.by_name(name).map_err(|source| DepsError::Zip {
                    path: self.path.clone(),
                    source,
                })?;
                let mut buffer = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut buffer)
                    .map_err(|source| DepsError::Io {
                        path: self.path.clone(),
                        source,
                    })?;
                Ok(Some(buffer))
            }
            Backing::Directory { root } => {
                let path = root.join(entry);
                fs::read(&path)
                    .map(Some)
                    .map_err(|source| DepsError::Io { path, source })
            }
            Backing::Image { image, module } => {
                image
                    .read(module, entry)
                    .map_err(|source| DepsError::Image {
                        path: image.path().to_path_buf(),
                        source,
                    })
            }
        }
    }

    /// Releases the underlying handle. Returns `false` when the reader was
    /// already closed.
    pub fn close(&self) -> bool {
        self.backing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.backing
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }
}

fn declares_multi_release(archive: &mut ZipArchive<BufReader<File>>) -> bool {
    let Ok(mut manifest) = archive.by_name(MANIFEST) else {
        return false;
    };
    let mut contents = String::new();
    if manifest.read_to_string(&mut contents).is_err() {
        return false;
    }
    contents.lines().any(|line| {
        line.split_once(':').is_some_and(|(key, value)| {
            key.trim().eq_ignore_ascii_case("Multi-Release")
                && value.trim().eq_ignore_ascii_case("true")
        })
    })
}

/// One archive or directory given on the command line or class path.
#[derive(Debug)]
pub struct ArchiveHandle {
    path: PathBuf,
    reader: EntryReader,
    descriptor: Option<ModuleDescriptor>,
}

impl ArchiveHandle {
    pub fn open(path: &Path, release: Option<u16>) -> Result<Self, DepsError> {
        let reader = EntryReader::open(path, release)?;
        let descriptor = match reader.read(MODULE_INFO)? {
            Some(bytes) => {
                let mut descriptor =
                    parse_module_info(&bytes).map_err(|source| DepsError::Descriptor {
                        path: path.to_path_buf(),
                        source,
                    })?;
                descriptor.extend_packages_from_entries(reader.entries());
                Some(descriptor)
            }
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            descriptor,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path_name())
    }

    /// The declared descriptor when this archive is a modular jar or an
    /// exploded module.
    pub fn descriptor(&self) -> Option<&ModuleDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_modular(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn reader(&self) -> &EntryReader {
        &self.reader
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.reader.entries()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.reader.contains(entry)
    }

    /// Distinct packages of the class entries in this archive, in first-seen
    /// order. `module-info.class` is not counted.
    pub fn class_packages(&self) -> IndexSet<String> {
        self.reader
            .entries()
            .filter(|entry| entry.ends_with(".class") && *entry != MODULE_INFO)
            .map(package_of_entry)
            .collect()
    }

    pub fn close(&self) -> bool {
        self.reader.close()
    }
}
