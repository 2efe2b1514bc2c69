//! Serializable views of a configuration for reporting.

use crate::configuration::DependencyConfiguration;
use crate::unit::{Archive, Unit};
use crate::DepsError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSummary {
    pub name: String,
    pub location: String,
    pub platform: bool,
    pub requires: Vec<String>,
    pub exports: Vec<String>,
    pub packages: BTreeSet<String>,
}

impl UnitSummary {
    pub fn from_unit(unit: &Unit) -> Self {
        let descriptor = unit.descriptor();
        Self {
            name: unit.name().to_string(),
            location: unit.location().to_string(),
            platform: unit.is_platform(),
            requires: descriptor
                .requires
                .iter()
                .map(|requires| requires.name.clone())
                .collect(),
            exports: descriptor
                .exports
                .iter()
                .map(|export| {
                    if export.is_qualified() {
                        let targets: Vec<&str> =
                            export.targets.iter().map(String::as_str).collect();
                        format!("{} to {}", export.source, targets.join(", "))
                    } else {
                        export.source.clone()
                    }
                })
                .collect(),
            packages: descriptor.packages.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadsReport {
    pub unit: String,
    pub reads: Vec<String>,
}

impl ReadsReport {
    pub fn collect(configuration: &DependencyConfiguration, unit: &Unit) -> Result<Self, DepsError> {
        let reads = configuration
            .reads(unit)?
            .iter()
            .map(|read| read.name().to_string())
            .collect();
        Ok(Self {
            unit: unit.name().to_string(),
            reads,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitPackageReport {
    pub packages: BTreeMap<String, BTreeSet<String>>,
}

impl SplitPackageReport {
    pub fn collect(configuration: &DependencyConfiguration) -> Self {
        Self {
            packages: configuration.split_packages(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OwnerReport {
    Unit { class: String, name: String, location: String },
    Unnamed { class: String, path: String },
    Unknown { class: String },
}

impl OwnerReport {
    pub fn lookup(configuration: &DependencyConfiguration, class: &str) -> Self {
        let class_name = class.to_string();
        match configuration.find_owner(class) {
            Some(Archive::Unit(unit)) => OwnerReport::Unit {
                class: class_name,
                name: unit.name().to_string(),
                location: unit.location().to_string(),
            },
            Some(Archive::Unnamed(archive)) => OwnerReport::Unnamed {
                class: class_name,
                path: archive.path_name(),
            },
            None => OwnerReport::Unknown { class: class_name },
        }
    }
}
