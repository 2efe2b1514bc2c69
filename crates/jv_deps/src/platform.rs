//! Catalog of the units shipped with a platform installation.

use crate::archive::EntryReader;
use crate::configuration::ConfigurationError;
use crate::descriptor::{parse_module_info, ModuleDescriptor};
use crate::finder::{ModuleFinder, ModuleLocation, ModuleReference};
use crate::image::RuntimeImage;
use crate::{DepsError, MODULE_INFO};
use indexmap::{IndexMap, IndexSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Aggregator unit representing the full standard platform API.
pub const DEFAULT_AGGREGATOR: &str = "java.se";

/// Which platform installation to catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSelector {
    Home(PathBuf),
    None,
}

enum PlatformSource {
    Packed(Arc<RuntimeImage>),
    Exploded(PathBuf),
    Empty,
}

pub struct PlatformCatalog {
    home: Option<PathBuf>,
    source: PlatformSource,
    units: IndexMap<String, ModuleDescriptor>,
}

impl std::fmt::Debug for PlatformCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.source {
            PlatformSource::Packed(_) => "packed",
            PlatformSource::Exploded(_) => "exploded",
            PlatformSource::Empty => "empty",
        };
        f.debug_struct("PlatformCatalog")
            .field("home", &self.home)
            .field("kind", &kind)
            .field("units", &self.units.len())
            .finish()
    }
}

impl PlatformCatalog {
    pub fn open(selector: &PlatformSelector) -> Result<Self, DepsError> {
        match selector {
            PlatformSelector::None => Ok(Self::empty()),
            PlatformSelector::Home(home) => Self::open_home(home),
        }
    }

    pub fn empty() -> Self {
        Self {
            home: None,
            source: PlatformSource::Empty,
            units: IndexMap::new(),
        }
    }

    fn open_home(home: &Path) -> Result<Self, DepsError> {
        let packed = home.join("lib").join("modules");
        if packed.is_file() {
            return Self::open_packed(home, &packed);
        }
        let exploded = home.join("modules");
        if exploded.is_dir() {
            return Self::open_exploded(home, &exploded);
        }
        Err(ConfigurationError::InvalidPlatformHome {
            path: home.to_path_buf(),
        }
        .into())
    }

    fn open_packed(home: &Path, image_path: &Path) -> Result<Self, DepsError> {
        let image = RuntimeImage::open(image_path).map_err(|source| DepsError::Image {
            path: image_path.to_path_buf(),
            source,
        })?;
        let image = Arc::new(image);

        let mut units = IndexMap::new();
        for name in image.module_names() {
            let bytes = image
                .read(name, MODULE_INFO)
                .map_err(|source| DepsError::Image {
                    path: image_path.to_path_buf(),
                    source,
                })?;
            let Some(bytes) = bytes else {
                debug!(module = name, "image module has no descriptor");
                continue;
            };
            let mut descriptor =
                parse_module_info(&bytes).map_err(|source| DepsError::Descriptor {
                    path: image_path.join(name),
                    source,
                })?;
            descriptor.extend_packages_from_entries(image.entries(name));
            units.insert(descriptor.name.clone(), descriptor.without_hashes());
        }

        debug!(home = %home.display(), units = units.len(), "opened packed platform image");
        Ok(Self {
            home: Some(home.to_path_buf()),
            source: PlatformSource::Packed(image),
            units,
        })
    }

    fn open_exploded(home: &Path, modules_dir: &Path) -> Result<Self, DepsError> {
        let io_error = |source| DepsError::Io {
            path: modules_dir.to_path_buf(),
            source,
        };
        let mut children = fs::read_dir(modules_dir)
            .map_err(io_error)?
            .map(|child| child.map(|child| child.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_error)?;
        children.sort();

        let mut units = IndexMap::new();
        for child in children {
            let info = child.join(MODULE_INFO);
            if !info.is_file() {
                continue;
            }
            let bytes = fs::read(&info).map_err(|source| DepsError::Io {
                path: info.clone(),
                source,
            })?;
            let mut descriptor =
                parse_module_info(&bytes).map_err(|source| DepsError::Descriptor {
                    path: info.clone(),
                    source,
                })?;
            let reader = EntryReader::directory(&child)?;
            descriptor.extend_packages_from_entries(reader.entries());
            units.insert(descriptor.name.clone(), descriptor);
        }

        debug!(home = %home.display(), units = units.len(), "opened exploded platform image");
        Ok(Self {
            home: Some(home.to_path_buf()),
            source: PlatformSource::Exploded(modules_dir.to_path_buf()),
            units,
        })
    }

    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.units.get(name)
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.units.values()
    }

    /// Roots used when the caller asks for platform defaults.
    pub fn default_roots(&self) -> IndexSet<String> {
        default_roots(self.units.values(), DEFAULT_AGGREGATOR)
    }

    /// Returns a reader bound to one unit's subtree of the image.
    pub fn class_reader(&self, name: &str) -> Result<EntryReader, DepsError> {
        match &self.source {
            PlatformSource::Packed(image) if image.has_module(name) => {
                Ok(EntryReader::image(Arc::clone(image), name))
            }
            PlatformSource::Exploded(root) if root.join(name).is_dir() => {
                EntryReader::directory(&root.join(name))
            }
            _ => {
                let path = self
                    .home
                    .as_deref()
                    .map(|home| home.join(name))
                    .unwrap_or_else(|| PathBuf::from(name));
                Err(DepsError::Io {
                    path,
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("platform unit {name} not found"),
                    ),
                })
            }
        }
    }

    /// Releases the packed image file, if any.
    pub fn close(&self) -> bool {
        match &self.source {
            PlatformSource::Packed(image) => image.close(),
            _ => false,
        }
    }
}

impl ModuleFinder for PlatformCatalog {
    fn find(&self, name: &str) -> Option<ModuleReference> {
        self.units.get(name).map(|descriptor| ModuleReference {
            descriptor: descriptor.clone(),
            location: ModuleLocation::Platform,
        })
    }

    fn find_all(&self) -> Vec<ModuleReference> {
        self.units
            .values()
            .map(|descriptor| ModuleReference {
                descriptor: descriptor.clone(),
                location: ModuleLocation::Platform,
            })
            .collect()
    }
}

/// Default root computation: the aggregator when present (other units in its
/// namespace are reached through it), then every unit exporting at least one
/// package without qualification.
pub fn default_roots<'a, I>(descriptors: I, aggregator: &str) -> IndexSet<String>
where
    I: IntoIterator<Item = &'a ModuleDescriptor>,
{
    let descriptors: Vec<&ModuleDescriptor> = descriptors.into_iter().collect();
    let namespace = match aggregator.find('.') {
        Some(index) => &aggregator[..=index],
        None => "",
    };
    let namespace = if namespace.is_empty() {
        format!("{aggregator}.")
    } else {
        namespace.to_string()
    };

    let mut roots = IndexSet::new();
    let has_aggregator = descriptors.iter().any(|d| d.name == aggregator);
    if has_aggregator {
        roots.insert(aggregator.to_string());
    }
    for descriptor in descriptors {
        if descriptor.name == aggregator {
            continue;
        }
        if has_aggregator && descriptor.name.starts_with(&namespace) {
            continue;
        }
        if descriptor.exports_unqualified() {
            roots.insert(descriptor.name.clone());
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Exports, ModuleHashes, Requires};
    use crate::test_support::{write_exploded_module, ImageWriter, ImageWriterOrder};
    use std::collections::BTreeMap;

    fn exporting(name: &str, exports: Vec<Exports>) -> ModuleDescriptor {
        let mut descriptor = ModuleDescriptor::new(name);
        descriptor.exports = exports;
        descriptor
    }

    #[test]
    fn default_roots_use_aggregator_namespace() {
        let descriptors = vec![
            exporting("agg", vec![Exports::unqualified("x")]),
            exporting("agg.impl", vec![Exports::qualified("y", ["other"])]),
            exporting("other", vec![Exports::unqualified("z")]),
            exporting("internal", vec![Exports::qualified("w", ["other"])]),
        ];
        let roots = default_roots(&descriptors, "agg");
        assert_eq!(roots.into_iter().collect::<Vec<_>>(), vec!["agg", "other"]);
    }

    #[test]
    fn default_roots_without_aggregator_keep_namespace_units() {
        let descriptors = vec![
            exporting("java.sql", vec![Exports::unqualified("java.sql")]),
            exporting("jdk.internal.vm", vec![Exports::qualified("jdk.vm", ["java.sql"])]),
        ];
        let roots = default_roots(&descriptors, DEFAULT_AGGREGATOR);
        assert_eq!(roots.into_iter().collect::<Vec<_>>(), vec!["java.sql"]);
    }

    #[test]
    fn packed_image_catalog_strips_hashes() {
        let home = tempfile::tempdir().unwrap();
        let mut base = exporting("java.base", vec![Exports::unqualified("java.lang")]);
        base.version = Some("17".into());
        base.hashes = Some(ModuleHashes {
            algorithm: "SHA-256".into(),
            hashes: BTreeMap::from([("java.sql".to_string(), vec![1, 2, 3])]),
        });
        let mut sql = exporting("java.sql", vec![Exports::unqualified("java.sql")]);
        sql.requires.push(Requires::transitive("java.base"));

        let mut writer = ImageWriter::new(ImageWriterOrder::Big);
        writer.add_module(&base, &["java/lang/Object.class", "jdk/internal/Misc.class"]);
        writer.add_module(&sql, &["java/sql/Driver.class"]);
        writer
            .write(&home.path().join("lib").join("modules"))
            .unwrap();

        let catalog =
            PlatformCatalog::open(&PlatformSelector::Home(home.path().to_path_buf())).unwrap();
        assert_eq!(
            catalog.unit_names().collect::<Vec<_>>(),
            vec!["java.base", "java.sql"]
        );
        let base = catalog.find("java.base").unwrap();
        assert!(base.hashes.is_none());
        assert!(base.version.is_none());
        assert!(base.packages.contains("jdk.internal"));

        let reader = catalog.class_reader("java.sql").unwrap();
        assert!(reader.contains("java/sql/Driver.class"));
        assert!(catalog.class_reader("java.desktop").is_err());
        assert!(ModuleFinder::find(&catalog, "java.sql").unwrap().is_platform());
    }

    #[test]
    fn exploded_image_catalog() {
        let home = tempfile::tempdir().unwrap();
        let modules = home.path().join("modules");
        write_exploded_module(
            &modules,
            &exporting("java.base", vec![Exports::unqualified("java.lang")]),
            &["java/lang/Object.class"],
        );
        std::fs::create_dir_all(modules.join("not-a-module")).unwrap();

        let catalog =
            PlatformCatalog::open(&PlatformSelector::Home(home.path().to_path_buf())).unwrap();
        assert_eq!(catalog.unit_names().collect::<Vec<_>>(), vec!["java.base"]);
        let reader = catalog.class_reader("java.base").unwrap();
        assert!(reader.contains("java/lang/Object.class"));
    }

    #[test]
    fn invalid_home_is_a_configuration_error() {
        let home = tempfile::tempdir().unwrap();
        let error =
            PlatformCatalog::open(&PlatformSelector::Home(home.path().to_path_buf())).unwrap_err();
        assert!(matches!(
            error,
            DepsError::Configuration(ConfigurationError::InvalidPlatformHome { .. })
        ));
    }

    #[test]
    fn none_selector_is_empty() {
        let catalog = PlatformCatalog::open(&PlatformSelector::None).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.default_roots().is_empty());
    }
}
