use crate::archive::{class_entry_name, package_of_entry, ArchiveHandle};
use crate::unit::{Archive, Unit};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Package ownership for one configuration.
///
/// Named units own their declared packages; unstructured archives contribute
/// the packages of the classes they carry. A package present on both sides is
/// a split package.
#[derive(Debug, Default)]
pub struct PackageIndex {
    owner_by_package: HashMap<String, Arc<Unit>>,
    unnamed_owners_by_package: HashMap<String, Vec<Arc<ArchiveHandle>>>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every package declared by `unit`. A package already owned
    /// by another unit keeps its first owner.
    pub fn add_unit(&mut self, unit: &Arc<Unit>) {
        for package in unit.packages() {
            match self.owner_by_package.get(package) {
                Some(existing) => {
                    debug!(
                        package = %package,
                        owner = existing.name(),
                        ignored = unit.name(),
                        "package already owned by another unit"
                    );
                }
                None => {
                    self.owner_by_package
                        .insert(package.clone(), Arc::clone(unit));
                }
            }
        }
    }

    pub fn add_unnamed(&mut self, archive: &Arc<ArchiveHandle>) {
        let packages = archive.class_packages();
        trace!(archive = %archive.path().display(), packages = packages.len(), "indexing archive");
        for package in packages {
            self.unnamed_owners_by_package
                .entry(package)
                .or_default()
                .push(Arc::clone(archive));
        }
    }

    pub fn owner(&self, package: &str) -> Option<&Arc<Unit>> {
        self.owner_by_package.get(package)
    }

    pub fn unnamed_owners(&self, package: &str) -> &[Arc<ArchiveHandle>] {
        self.unnamed_owners_by_package
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn packages(&self) -> BTreeSet<&str> {
        self.owner_by_package
            .keys()
            .chain(self.unnamed_owners_by_package.keys())
            .map(String::as_str)
            .collect()
    }

    /// Finds the archive holding a class given as `p.q.Foo`, `p/q/Foo` or
    /// `p/q/Foo.class`.
    ///
    /// The owning unit of the package wins when it actually contains the
    /// class. Otherwise the unstructured archives contributing the package
    /// are tried in the order they were added.
    pub fn find_owner(&self, class_name: &str) -> Option<Archive> {
        let entry = class_entry_name(class_name);
        let package = package_of_entry(&entry);

        if let Some(unit) = self.owner_by_package.get(&package) {
            if unit.contains(&entry) {
                return Some(Archive::Unit(Arc::clone(unit)));
            }
        }

        self.unnamed_owners(&package)
            .iter()
            .find(|archive| archive.contains(&entry))
            .map(|archive| Archive::Unnamed(Arc::clone(archive)))
    }

    /// Packages owned by a unit and also contributed by unstructured
    /// archives, each with the sorted origins that provide it.
    pub fn split_packages(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut split = BTreeMap::new();
        for (package, archives) in &self.unnamed_owners_by_package {
            let Some(unit) = self.owner_by_package.get(package) else {
                continue;
            };
            let mut origins = BTreeSet::new();
            origins.insert(unit.location().to_string());
            origins.extend(archives.iter().map(|archive| archive.path_name()));
            split.insert(package.clone(), origins);
        }
        split
    }
}
