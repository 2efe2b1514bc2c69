use crate::archive::{ArchiveHandle, EntryReader};
use crate::descriptor::{Exports, ModuleDescriptor, Requires};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A resolved named module together with the reader for its content.
#[derive(Debug)]
pub struct Unit {
    descriptor: ModuleDescriptor,
    location: String,
    platform: bool,
    reader: EntryReader,
}

impl Unit {
    pub fn new(
        descriptor: ModuleDescriptor,
        location: String,
        platform: bool,
        reader: EntryReader,
    ) -> Self {
        Self {
            descriptor,
            location,
            platform,
            reader,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// `jrt:/<name>` for platform units, `file://…` otherwise.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_platform(&self) -> bool {
        self.platform
    }

    pub fn packages(&self) -> &BTreeSet<String> {
        &self.descriptor.packages
    }

    pub fn requires(&self) -> &[Requires] {
        &self.descriptor.requires
    }

    pub fn exports(&self) -> &[Exports] {
        &self.descriptor.exports
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

    pub fn close(&self) -> bool {
        self.reader.close()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Either a named unit or an unstructured archive; the two kinds of class
/// owners a lookup can report.
#[derive(Debug, Clone)]
pub enum Archive {
    Unit(Arc<Unit>),
    Unnamed(Arc<ArchiveHandle>),
}

impl Archive {
    pub fn name(&self) -> String {
        match self {
            Archive::Unit(unit) => unit.name().to_string(),
            Archive::Unnamed(archive) => archive.name(),
        }
    }

    pub fn location(&self) -> String {
        match self {
            Archive::Unit(unit) => unit.location().to_string(),
            Archive::Unnamed(archive) => archive.path_name(),
        }
    }

    pub fn as_unit(&self) -> Option<&Arc<Unit>> {
        match self {
            Archive::Unit(unit) => Some(unit),
            Archive::Unnamed(_) => None,
        }
    }

    pub fn as_unnamed(&self) -> Option<&Arc<ArchiveHandle>> {
        match self {
            Archive::Unit(_) => None,
            Archive::Unnamed(archive) => Some(archive),
        }
    }

    pub fn reader(&self) -> &EntryReader {
        match self {
            Archive::Unit(unit) => unit.reader(),
            Archive::Unnamed(archive) => archive.reader(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.reader().entries()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.reader().contains(entry)
    }

    pub fn close(&self) -> bool {
        self.reader().close()
    }
}
