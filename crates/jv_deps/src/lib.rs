// jv_deps - Module and package dependency index
//
// Catalogs the units of a platform image, module paths and class path
// archives, resolves root sets into their requires closure and answers
// package ownership queries.

pub mod archive;
pub mod configuration;
pub mod descriptor;
pub mod finder;
pub mod image;
pub mod index;
pub mod platform;
pub mod report;
pub mod resolver;
pub mod settings;
pub mod unit;

#[cfg(test)]
mod test_support;

pub use archive::{ArchiveHandle, EntryReader};
pub use configuration::{
    expand_class_path, ConfigurationError, DependencyConfiguration,
    DependencyConfigurationBuilder, ALL_DEFAULT, ALL_MODULE_PATH,
};
pub use descriptor::{DescriptorError, Exports, ModuleDescriptor, Requires};
pub use finder::{ComposedFinder, ModuleFinder, ModuleLocation, ModulePathFinder, ModuleReference};
pub use image::{ImageError, RuntimeImage};
pub use index::PackageIndex;
pub use platform::{PlatformCatalog, PlatformSelector};
pub use report::{OwnerReport, ReadsReport, SplitPackageReport, UnitSummary};
pub use resolver::{
    RequiresClosureEngine, ResolutionEngine, ResolutionError, ResolvedGraph, ResolvedModule,
    UnitGraphResolver,
};
pub use settings::{Settings, SystemSetting};
pub use unit::{Archive, Unit};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Entry name of a module descriptor inside an archive or module directory.
pub const MODULE_INFO: &str = "module-info.class";

#[derive(Debug, Error)]
pub enum DepsError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("invalid module descriptor in {}: {source}", .path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },
    #[error("runtime image error in {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("IO error while reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ZIP error while reading {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{} has been closed", .path.display())]
    Closed { path: PathBuf },
}
