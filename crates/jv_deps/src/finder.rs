//! Module finders: where named units are looked up before resolution.

use crate::archive::{is_archive, ArchiveHandle};
use crate::descriptor::ModuleDescriptor;
use crate::resolver::ResolutionError;
use crate::{DepsError, MODULE_INFO};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the content of a module lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLocation {
    /// A unit of the platform image, read through the platform catalog.
    Platform,
    /// A modular jar/jmod or an exploded module directory.
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    pub descriptor: ModuleDescriptor,
    pub location: ModuleLocation,
}

impl ModuleReference {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_platform(&self) -> bool {
        self.location == ModuleLocation::Platform
    }

    /// Location string as reported in diagnostics.
    pub fn location_string(&self) -> String {
        match &self.location {
            ModuleLocation::Platform => format!("jrt:/{}", self.descriptor.name),
            ModuleLocation::Path(path) => file_uri(path),
        }
    }
}

pub(crate) fn file_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    format!("file://{}", absolute.display())
}

pub trait ModuleFinder: Send + Sync {
    fn find(&self, name: &str) -> Option<ModuleReference>;

    /// Every module this finder can see, one per name.
    fn find_all(&self) -> Vec<ModuleReference>;
}

/// Finder over a module path: directories of modular jars/jmods, exploded
/// module directories, or individual modular archives.
#[derive(Debug, Default)]
pub struct ModulePathFinder {
    entries: Vec<PathBuf>,
    modules: IndexMap<String, ModuleReference>,
}

impl ModulePathFinder {
    pub fn new<I>(entries: I, release: Option<u16>) -> Result<Self, DepsError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let entries: Vec<PathBuf> = entries.into_iter().collect();
        let mut modules = IndexMap::new();
        for entry in &entries {
            let found = scan_entry(entry, release)?;
            for reference in found.into_values() {
                if modules.contains_key(reference.name()) {
                    debug!(
                        module = reference.name(),
                        entry = %entry.display(),
                        "module shadowed by an earlier module path entry"
                    );
                    continue;
                }
                modules.insert(reference.name().to_string(), reference);
            }
        }
        Ok(Self { entries, modules })
    }

    /// Splits a path list on the platform separator and scans each entry.
    pub fn from_path_list(paths: &str, release: Option<u16>) -> Result<Self, DepsError> {
        Self::new(
            std::env::split_paths(paths).filter(|path| !path.as_os_str().is_empty()),
            release,
        )
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl ModuleFinder for ModulePathFinder {
    fn find(&self, name: &str) -> Option<ModuleReference> {
        self.modules.get(name).cloned()
    }

    fn find_all(&self) -> Vec<ModuleReference> {
        self.modules.values().cloned().collect()
    }
}

fn scan_entry(
    entry: &Path,
    release: Option<u16>,
) -> Result<IndexMap<String, ModuleReference>, DepsError> {
    let mut found = IndexMap::new();
    if !entry.exists() {
        warn!(path = %entry.display(), "module path entry does not exist");
        return Ok(found);
    }

    if entry.is_dir() && !entry.join(MODULE_INFO).is_file() {
        let mut children = fs::read_dir(entry)
            .map_err(|source| DepsError::Io {
                path: entry.to_path_buf(),
                source,
            })?
            .map(|child| child.map(|child| child.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| DepsError::Io {
                path: entry.to_path_buf(),
                source,
            })?;
        children.sort();

        for child in children {
            let candidate = is_archive(&child) || child.join(MODULE_INFO).is_file();
            if !candidate {
                continue;
            }
            let Some(reference) = read_reference(&child, release)? else {
                continue;
            };
            if let Some(existing) = found.get(reference.name()) {
                return Err(ResolutionError::Duplicate {
                    name: reference.name().to_string(),
                    first: location_path(existing),
                    second: child,
                }
                .into());
            }
            found.insert(reference.name().to_string(), reference);
        }
        return Ok(found);
    }

    if let Some(reference) = read_reference(entry, release)? {
        found.insert(reference.name().to_string(), reference);
    }
    Ok(found)
}

fn location_path(reference: &ModuleReference) -> PathBuf {
    match &reference.location {
        ModuleLocation::Path(path) => path.clone(),
        ModuleLocation::Platform => PathBuf::from(reference.location_string()),
    }
}

fn read_reference(path: &Path, release: Option<u16>) -> Result<Option<ModuleReference>, DepsError> {
    let handle = ArchiveHandle::open(path, release)?;
    let reference = match handle.descriptor() {
        Some(descriptor) => Some(ModuleReference {
            descriptor: descriptor.clone(),
            location: ModuleLocation::Path(path.to_path_buf()),
        }),
        None => {
            // Automatic modules are not derived from plain jars.
            warn!(path = %path.display(), "skipping non-modular archive on module path");
            None
        }
    };
    handle.close();
    Ok(reference)
}

/// Ordered chain of finders; the first finder that knows a name wins.
#[derive(Clone, Default)]
pub struct ComposedFinder {
    finders: Vec<Arc<dyn ModuleFinder>>,
}

impl ComposedFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, finder: Arc<dyn ModuleFinder>) -> Self {
        self.finders.push(finder);
        self
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }
}

impl ModuleFinder for ComposedFinder {
    fn find(&self, name: &str) -> Option<ModuleReference> {
        self.finders.iter().find_map(|finder| finder.find(name))
    }

    fn find_all(&self) -> Vec<ModuleReference> {
        let mut modules: IndexMap<String, ModuleReference> = IndexMap::new();
        for finder in &self.finders {
            for reference in finder.find_all() {
                modules
                    .entry(reference.name().to_string())
                    .or_insert(reference);
            }
        }
        modules.into_values().collect()
    }
}
