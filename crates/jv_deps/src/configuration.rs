//! The frozen dependency configuration and its builder.

use crate::archive::{ArchiveHandle, EntryReader};
use crate::descriptor::ModuleDescriptor;
use crate::finder::{ModuleFinder, ModuleLocation, ModulePathFinder, ModuleReference};
use crate::index::PackageIndex;
use crate::platform::{PlatformCatalog, PlatformSelector};
use crate::resolver::{
    FinderChain, RequiresClosureEngine, ResolutionEngine, ResolvedGraph, UnitGraphResolver,
};
use crate::unit::{Archive, Unit};
use crate::DepsError;
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Root token selecting every unit on the application module path.
pub const ALL_MODULE_PATH: &str = "ALL-MODULE-PATH";
/// Root token selecting the platform default roots.
pub const ALL_DEFAULT: &str = "ALL-DEFAULT";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{} is not a valid platform home (no lib/modules image or modules directory)", .path.display())]
    InvalidPlatformHome { path: PathBuf },
    #[error("module {name} is in the resolved graph but was not opened by the configuration")]
    InconsistentGraph { name: String },
    #[error("module {name} is not part of this configuration")]
    NotInConfiguration { name: String },
    #[error("invalid settings: {message}")]
    InvalidSettings { message: String },
}

/// Splits a class path on the platform separator. An entry whose last
/// component is `*` expands to the `.jar` files of that directory in
/// directory order; any other entry is taken literally.
pub fn expand_class_path(raw: &str) -> Result<Vec<PathBuf>, DepsError> {
    let mut paths = Vec::new();
    if raw.is_empty() {
        return Ok(paths);
    }

    for entry in std::env::split_paths(raw) {
        if entry.as_os_str().is_empty() {
            continue;
        }
        if entry.file_name().map_or(true, |name| name != "*") {
            paths.push(entry);
            continue;
        }
        let dir = match entry.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let read_dir = fs::read_dir(&dir).map_err(|source| DepsError::Io {
            path: dir.clone(),
            source,
        })?;
        for child in read_dir {
            let child = child.map_err(|source| DepsError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = child.path();
            let is_jar = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"));
            if is_jar && path.is_file() {
                paths.push(path);
            }
        }
    }
    Ok(paths)
}

/// Accumulates options for a [`DependencyConfiguration`]. Nothing is opened
/// or validated until [`build`](Self::build).
pub struct DependencyConfigurationBuilder {
    selector: PlatformSelector,
    platform: Option<PlatformCatalog>,
    upgrade_module_path: Option<String>,
    app_module_path: Option<String>,
    roots: IndexSet<String>,
    root_paths: Vec<PathBuf>,
    class_paths: Vec<String>,
    add_all_application: bool,
    add_all_default: bool,
    add_all_platform: bool,
    release: Option<u16>,
    engine: Option<Box<dyn ResolutionEngine>>,
}

impl DependencyConfigurationBuilder {
    pub fn new(selector: PlatformSelector) -> Self {
        Self {
            selector,
            platform: None,
            upgrade_module_path: None,
            app_module_path: None,
            roots: IndexSet::new(),
            root_paths: Vec::new(),
            class_paths: Vec::new(),
            add_all_application: false,
            add_all_default: false,
            add_all_platform: false,
            release: None,
            engine: None,
        }
    }

    /// Uses an already opened catalog instead of opening the selector's.
    pub fn with_platform(mut self, platform: PlatformCatalog) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn upgrade_module_path(mut self, paths: impl Into<String>) -> Self {
        self.upgrade_module_path = Some(paths.into());
        self
    }

    pub fn app_module_path(mut self, paths: impl Into<String>) -> Self {
        self.app_module_path = Some(paths.into());
        self
    }

    /// Adds root names. `ALL-MODULE-PATH` and `ALL-DEFAULT` are recognised.
    pub fn add_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            match name.as_str() {
                ALL_MODULE_PATH => self.add_all_application = true,
                ALL_DEFAULT => self.add_all_default = true,
                _ => {
                    self.roots.insert(name);
                }
            }
        }
        self
    }

    /// Roots every platform unit and every unit on the application path.
    pub fn all_modules(mut self) -> Self {
        self.add_all_platform = true;
        self.add_all_application = true;
        self
    }

    /// Selects the versioned entries of multi-release archives.
    pub fn release(mut self, release: u16) -> Self {
        self.release = Some(release);
        self
    }

    /// Adds an archive to analyze. Modular archives join the resolution as
    /// roots; others become unnamed root archives.
    pub fn add_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_paths.push(path.into());
        self
    }

    pub fn add_class_path(mut self, class_path: impl Into<String>) -> Self {
        self.class_paths.push(class_path.into());
        self
    }

    pub fn engine(mut self, engine: Box<dyn ResolutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> Result<DependencyConfiguration, DepsError> {
        let release = self.release;
        let platform = match self.platform {
            Some(platform) => platform,
            None => PlatformCatalog::open(&self.selector)?,
        };
        let platform = Arc::new(platform);

        let mut roots = self.roots;
        if self.add_all_platform {
            roots.extend(platform.unit_names().map(str::to_string));
        }

        let mut initial_archives = Vec::new();
        let mut extra_paths = Vec::new();
        for path in &self.root_paths {
            let archive = ArchiveHandle::open(path, release)?;
            if archive.is_modular() {
                archive.close();
                extra_paths.push(path.clone());
            } else {
                initial_archives.push(Arc::new(archive));
            }
        }

        let mut chain = FinderChain::new().with_platform(Arc::clone(&platform));
        if let Some(paths) = &self.upgrade_module_path {
            chain = chain.with_override(Arc::new(ModulePathFinder::from_path_list(
                paths, release,
            )?));
        }
        let application = match &self.app_module_path {
            Some(paths) => Some(Arc::new(ModulePathFinder::from_path_list(paths, release)?)),
            None => None,
        };
        if let Some(application) = &application {
            chain = chain.with_application(application.clone());
        }
        if !extra_paths.is_empty() {
            let extra = ModulePathFinder::new(extra_paths, release)?;
            roots.extend(extra.module_names().map(str::to_string));
            chain = chain.with_extra(Arc::new(extra));
        }
        if self.add_all_application {
            if let Some(application) = &application {
                roots.extend(application.module_names().map(str::to_string));
            }
        }

        let mut class_paths = Vec::new();
        for raw in &self.class_paths {
            class_paths.extend(expand_class_path(raw)?);
        }

        let mut resolution_roots: BTreeSet<String> = roots.iter().cloned().collect();
        if !initial_archives.is_empty()
            || !class_paths.is_empty()
            || roots.is_empty()
            || self.add_all_default
        {
            resolution_roots.extend(platform.default_roots());
        }
        trace!(roots = ?resolution_roots, "expanded root set");

        let engine: Box<dyn ResolutionEngine> = match self.engine {
            Some(engine) => engine,
            None => Box::new(RequiresClosureEngine),
        };
        let resolver = UnitGraphResolver::new(chain, engine);
        let graph = resolver.resolve(&resolution_roots)?;

        let mut index = PackageIndex::new();
        let mut units = IndexMap::with_capacity(graph.len());
        for module in graph.modules() {
            let unit = Arc::new(open_unit(&platform, &module.reference, release)?);
            index.add_unit(&unit);
            units.insert(unit.name().to_string(), unit);
        }

        for archive in &initial_archives {
            index.add_unnamed(archive);
        }

        let mut classpath_archives = Vec::new();
        for path in class_paths {
            if !path.exists() {
                warn!(path = %path.display(), "class path entry does not exist");
                continue;
            }
            let archive = Arc::new(ArchiveHandle::open(&path, release)?);
            index.add_unnamed(&archive);
            classpath_archives.push(archive);
        }

        debug!(
            units = units.len(),
            initial_archives = initial_archives.len(),
            classpath_archives = classpath_archives.len(),
            "built dependency configuration"
        );

        Ok(DependencyConfiguration {
            platform,
            resolver,
            graph,
            units,
            roots,
            initial_archives,
            classpath_archives,
            index,
            release,
        })
    }
}

fn open_unit(
    platform: &PlatformCatalog,
    reference: &ModuleReference,
    release: Option<u16>,
) -> Result<Unit, DepsError> {
    let reader = match &reference.location {
        ModuleLocation::Platform => platform.class_reader(reference.name())?,
        ModuleLocation::Path(path) => EntryReader::open(path, release)?,
    };
    let is_platform = platform.find(reference.name()).is_some();
    Ok(Unit::new(
        reference.descriptor.clone(),
        reference.location_string(),
        is_platform,
        reader,
    ))
}

/// Immutable catalog of resolved units, unnamed archives and package
/// ownership. Queries take `&self`; `close` releases every archive.
pub struct DependencyConfiguration {
    platform: Arc<PlatformCatalog>,
    resolver: UnitGraphResolver,
    graph: ResolvedGraph,
    units: IndexMap<String, Arc<Unit>>,
    roots: IndexSet<String>,
    initial_archives: Vec<Arc<ArchiveHandle>>,
    classpath_archives: Vec<Arc<ArchiveHandle>>,
    index: PackageIndex,
    release: Option<u16>,
}

impl std::fmt::Debug for DependencyConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyConfiguration")
            .field("units", &self.units.keys().collect::<Vec<_>>())
            .field("roots", &self.roots)
            .field("initial_archives", &self.initial_archives.len())
            .field("classpath_archives", &self.classpath_archives.len())
            .field("release", &self.release)
            .finish()
    }
}

impl DependencyConfiguration {
    pub fn builder(selector: PlatformSelector) -> DependencyConfigurationBuilder {
        DependencyConfigurationBuilder::new(selector)
    }

    pub fn find_unit(&self, name: &str) -> Option<&Arc<Unit>> {
        self.units.get(name)
    }

    pub fn find_descriptor(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.units.get(name).map(|unit| unit.descriptor())
    }

    /// Every resolved unit, in resolution order.
    pub fn units(&self) -> &IndexMap<String, Arc<Unit>> {
        &self.units
    }

    /// Units named as roots explicitly or through a modular root archive.
    pub fn root_units(&self) -> Vec<Arc<Unit>> {
        self.roots
            .iter()
            .filter_map(|name| self.units.get(name).cloned())
            .collect()
    }

    pub fn initial_archives(&self) -> &[Arc<ArchiveHandle>] {
        &self.initial_archives
    }

    pub fn classpath_archives(&self) -> &[Arc<ArchiveHandle>] {
        &self.classpath_archives
    }

    pub fn is_platform(&self, unit: &Unit) -> bool {
        self.platform.find(unit.name()).is_some()
    }

    pub fn platform(&self) -> &PlatformCatalog {
        &self.platform
    }

    pub fn release(&self) -> Option<u16> {
        self.release
    }

    pub fn package_index(&self) -> &PackageIndex {
        &self.index
    }

    /// Resolves `roots` against the finder chain. An empty root set returns
    /// every unit the chain can find.
    ///
    /// Units opened at build time are shared; other chain members are opened
    /// on demand and are not released by [`DependencyConfiguration::close`].
    pub fn resolve(&self, roots: &BTreeSet<String>) -> Result<Vec<Arc<Unit>>, DepsError> {
        if roots.is_empty() {
            return self
                .resolver
                .finder()
                .find_all()
                .iter()
                .map(|reference| self.unit_for(reference))
                .collect();
        }

        let graph = self.resolver.resolve(roots)?;
        graph
            .modules()
            .map(|module| self.unit_for(&module.reference))
            .collect()
    }

    fn unit_for(&self, reference: &ModuleReference) -> Result<Arc<Unit>, DepsError> {
        if let Some(unit) = self.units.get(reference.name()) {
            return Ok(Arc::clone(unit));
        }
        trace!(module = reference.name(), "opening unit outside the build graph");
        open_unit(&self.platform, reference, self.release).map(Arc::new)
    }

    /// Units that `unit` reads in the graph resolved at build time.
    pub fn reads(&self, unit: &Unit) -> Result<Vec<Arc<Unit>>, DepsError> {
        let resolved =
            self.graph
                .find(unit.name())
                .ok_or_else(|| ConfigurationError::NotInConfiguration {
                    name: unit.name().to_string(),
                })?;
        resolved
            .reads
            .iter()
            .map(|name| {
                self.units.get(name).cloned().ok_or_else(|| {
                    DepsError::from(ConfigurationError::InconsistentGraph { name: name.clone() })
                })
            })
            .collect()
    }

    pub fn split_packages(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.index.split_packages()
    }

    pub fn find_owner(&self, class_name: &str) -> Option<Archive> {
        self.index.find_owner(class_name)
    }

    /// Releases root archives, then class path archives, then units. Later
    /// calls find everything closed and release nothing.
    pub fn close(&self) {
        let roots = self
            .initial_archives
            .iter()
            .filter(|archive| archive.close())
            .count();
        let classpath = self
            .classpath_archives
            .iter()
            .filter(|archive| archive.close())
            .count();
        let units = self.units.values().filter(|unit| unit.close()).count();
        let image = self.platform.close();
        debug!(roots, classpath, units, image, "closed dependency configuration");
    }
}

/// Joins path entries with the platform separator.
pub(crate) fn join_paths(paths: &[PathBuf]) -> Result<String, DepsError> {
    std::env::join_paths(paths)
        .map(|joined| joined.to_string_lossy().into_owned())
        .map_err(|error| {
            DepsError::from(ConfigurationError::InvalidSettings {
                message: error.to_string(),
            })
        })
}
