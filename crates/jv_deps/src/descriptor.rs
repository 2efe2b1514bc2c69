//! `module-info.class` parsing.
//!
//! Only the attributes relevant to dependency analysis are decoded: `Module`,
//! `ModulePackages`, `ModuleMainClass`, `ModuleTarget` and `ModuleHashes`.
//! Everything else in the class file is skipped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const ACC_OPEN: u16 = 0x0020;
const ACC_TRANSITIVE: u16 = 0x0020;
const ACC_STATIC_PHASE: u16 = 0x0040;
const ACC_SYNTHETIC: u16 = 0x1000;
const ACC_MANDATED: u16 = 0x8000;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("invalid UTF-8 string in constant pool: {0}")]
    Utf8Decode(#[from] std::string::FromUtf8Error),
    #[error("module-info missing Module attribute")]
    MissingModuleAttribute,
}

/// Modifiers attached to a `requires` directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiresModifiers {
    pub transitive: bool,
    pub is_static: bool,
    pub synthetic: bool,
    pub mandated: bool,
}

impl RequiresModifiers {
    fn from_flags(flags: u16) -> Self {
        Self {
            transitive: flags & ACC_TRANSITIVE != 0,
            is_static: flags & ACC_STATIC_PHASE != 0,
            synthetic: flags & ACC_SYNTHETIC != 0,
            mandated: flags & ACC_MANDATED != 0,
        }
    }

    pub fn to_flags(self) -> u16 {
        let mut flags = 0;
        if self.transitive {
            flags |= ACC_TRANSITIVE;
        }
        if self.is_static {
            flags |= ACC_STATIC_PHASE;
        }
        if self.synthetic {
            flags |= ACC_SYNTHETIC;
        }
        if self.mandated {
            flags |= ACC_MANDATED;
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requires {
    pub name: String,
    pub modifiers: RequiresModifiers,
    pub compiled_version: Option<String>,
}

impl Requires {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifiers: RequiresModifiers::default(),
            compiled_version: None,
        }
    }

    pub fn transitive(name: impl Into<String>) -> Self {
        let mut requires = Self::new(name);
        requires.modifiers.transitive = true;
        requires
    }
}

/// An `exports` or `opens` directive. An empty target set means the package
/// is visible to every module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exports {
    pub source: String,
    pub targets: BTreeSet<String>,
}

impl Exports {
    pub fn unqualified(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            targets: BTreeSet::new(),
        }
    }

    pub fn qualified<I, S>(source: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_qualified(&self) -> bool {
        !self.targets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provides {
    pub service: String,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHashes {
    pub algorithm: String,
    pub hashes: BTreeMap<String, Vec<u8>>,
}

/// Decoded module descriptor. Package and class names use dotted form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub open: bool,
    pub version: Option<String>,
    pub requires: Vec<Requires>,
    pub exports: Vec<Exports>,
    pub opens: Vec<Exports>,
    pub uses: BTreeSet<String>,
    pub provides: Vec<Provides>,
    pub packages: BTreeSet<String>,
    pub main_class: Option<String>,
    pub target_platform: Option<String>,
    pub hashes: Option<ModuleHashes>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Rebuilds the descriptor keeping only what dependency analysis needs:
    /// requires, exports, uses, provides and the package set. Recorded hashes
    /// and build metadata are dropped.
    pub fn without_hashes(&self) -> ModuleDescriptor {
        let mut packages = self.packages.clone();
        packages.extend(self.exports.iter().map(|export| export.source.clone()));
        packages.extend(self.opens.iter().map(|open| open.source.clone()));

        ModuleDescriptor {
            name: self.name.clone(),
            open: false,
            version: None,
            requires: self.requires.clone(),
            exports: self.exports.clone(),
            opens: Vec::new(),
            uses: self.uses.clone(),
            provides: self.provides.clone(),
            packages,
            main_class: None,
            target_platform: None,
            hashes: None,
        }
    }

    pub fn exports_unqualified(&self) -> bool {
        self.exports.iter().any(|export| !export.is_qualified())
    }

    /// Adds package names derived from class-file entry names, such as
    /// `p/q/Foo.class`, to the package set.
    pub fn extend_packages_from_entries<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for entry in entries {
            if entry.ends_with(".class") && !entry.ends_with(crate::MODULE_INFO) {
                let package = crate::archive::package_of_entry(entry);
                if !package.is_empty() {
                    self.packages.insert(package);
                }
            }
        }
    }
}

pub fn parse_module_info(bytes: &[u8]) -> Result<ModuleDescriptor, DescriptorError> {
    let mut reader = ClassReader::new(bytes);
    reader.expect_magic()?;
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let constant_pool = ConstantPool::parse(&mut reader)?;

    let _access_flags = reader.read_u2()?;
    let _this_class = reader.read_u2()?;
    let _super_class = reader.read_u2()?;
    let interfaces_count = reader.read_u2()?;
    for _ in 0..interfaces_count {
        reader.read_u2()?;
    }

    let fields = reader.read_u2()?;
    for _ in 0..fields {
        skip_member(&mut reader)?;
    }

    let methods = reader.read_u2()?;
    for _ in 0..methods {
        skip_member(&mut reader)?;
    }

    let mut descriptor: Option<ModuleDescriptor> = None;
    let mut packages = BTreeSet::new();
    let mut main_class = None;
    let mut target_platform = None;
    let mut hashes = None;

    let attributes_count = reader.read_u2()?;
    for _ in 0..attributes_count {
        let attribute_name_index = reader.read_u2()?;
        let attribute_length = reader.read_u4()? as usize;
        let attribute_name = constant_pool.utf8(attribute_name_index)?;
        let slice = reader.read_slice(attribute_length)?;
        let mut sub_reader = ClassReader::new(slice);
        match attribute_name {
            "Module" => {
                descriptor = Some(read_module_attribute(&mut sub_reader, &constant_pool)?);
            }
            "ModulePackages" => {
                let count = sub_reader.read_u2()?;
                for _ in 0..count {
                    let index = sub_reader.read_u2()?;
                    packages.insert(constant_pool.package_name(index)?);
                }
            }
            "ModuleMainClass" => {
                let index = sub_reader.read_u2()?;
                main_class = Some(constant_pool.class_name(index)?);
            }
            "ModuleTarget" => {
                let index = sub_reader.read_u2()?;
                if index != 0 {
                    target_platform = Some(constant_pool.utf8(index)?.to_string());
                }
            }
            "ModuleHashes" => {
                hashes = Some(read_hashes_attribute(&mut sub_reader, &constant_pool)?);
            }
            _ => {}
        }
    }

    let mut descriptor = descriptor.ok_or(DescriptorError::MissingModuleAttribute)?;
    descriptor.packages = packages;
    descriptor
        .packages
        .extend(descriptor.exports.iter().map(|export| export.source.clone()));
    descriptor
        .packages
        .extend(descriptor.opens.iter().map(|open| open.source.clone()));
    descriptor.main_class = main_class;
    descriptor.target_platform = target_platform;
    descriptor.hashes = hashes;
    Ok(descriptor)
}

fn read_module_attribute(
    reader: &mut ClassReader<'_>,
    constant_pool: &ConstantPool,
) -> Result<ModuleDescriptor, DescriptorError> {
    let module_name_index = reader.read_u2()?;
    let module_flags = reader.read_u2()?;
    let module_version_index = reader.read_u2()?;

    let mut descriptor = ModuleDescriptor::new(constant_pool.module_name(module_name_index)?);
    descriptor.open = module_flags & ACC_OPEN != 0;
    descriptor.version = constant_pool.optional_utf8(module_version_index)?;

    let requires_count = reader.read_u2()?;
    for _ in 0..requires_count {
        let requires_index = reader.read_u2()?;
        let requires_flags = reader.read_u2()?;
        let requires_version_index = reader.read_u2()?;
        descriptor.requires.push(Requires {
            name: constant_pool.module_name(requires_index)?,
            modifiers: RequiresModifiers::from_flags(requires_flags),
            compiled_version: constant_pool.optional_utf8(requires_version_index)?,
        });
    }

    let exports_count = reader.read_u2()?;
    for _ in 0..exports_count {
        descriptor
            .exports
            .push(read_exports_entry(reader, constant_pool)?);
    }

    let opens_count = reader.read_u2()?;
    for _ in 0..opens_count {
        descriptor.opens.push(read_exports_entry(reader, constant_pool)?);
    }

    let uses_count = reader.read_u2()?;
    for _ in 0..uses_count {
        let index = reader.read_u2()?;
        descriptor.uses.insert(constant_pool.class_name(index)?);
    }

    let provides_count = reader.read_u2()?;
    for _ in 0..provides_count {
        let service = constant_pool.class_name(reader.read_u2()?)?;
        let with_count = reader.read_u2()?;
        let mut providers = Vec::with_capacity(with_count as usize);
        for _ in 0..with_count {
            providers.push(constant_pool.class_name(reader.read_u2()?)?);
        }
        descriptor.provides.push(Provides { service, providers });
    }

    Ok(descriptor)
}

fn read_exports_entry(
    reader: &mut ClassReader<'_>,
    constant_pool: &ConstantPool,
) -> Result<Exports, DescriptorError> {
    let source = constant_pool.package_name(reader.read_u2()?)?;
    reader.read_u2()?; // flags
    let to_count = reader.read_u2()?;
    let mut targets = BTreeSet::new();
    for _ in 0..to_count {
        targets.insert(constant_pool.module_name(reader.read_u2()?)?);
    }
    Ok(Exports { source, targets })
}

fn read_hashes_attribute(
    reader: &mut ClassReader<'_>,
    constant_pool: &ConstantPool,
) -> Result<ModuleHashes, DescriptorError> {
    let algorithm = constant_pool.utf8(reader.read_u2()?)?.to_string();
    let count = reader.read_u2()?;
    let mut hashes = BTreeMap::new();
    for _ in 0..count {
        let module = constant_pool.module_name(reader.read_u2()?)?;
        let length = reader.read_u2()? as usize;
        hashes.insert(module, reader.read_slice(length)?.to_vec());
    }
    Ok(ModuleHashes { algorithm, hashes })
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class { name_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    Other,
    Unusable,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut ClassReader<'_>) -> Result<Self, DescriptorError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable); // index 0 unused

        let mut index = 1;
        while index < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    Constant::Utf8(String::from_utf8(bytes.to_vec())?)
                }
                3 | 4 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    reader.skip(8)?;
                    entries.push(Constant::Unusable);
                    index += 1;
                    Constant::Other
                }
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                8 | 16 => {
                    reader.read_u2()?;
                    Constant::Other
                }
                9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                15 => {
                    reader.skip(3)?;
                    Constant::Other
                }
                19 => Constant::Module {
                    name_index: reader.read_u2()?,
                },
                20 => Constant::Package {
                    name_index: reader.read_u2()?,
                },
                other => return Err(DescriptorError::UnsupportedConstant { tag: other }),
            };

            entries.push(entry);
            index += 1;
        }

        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant, DescriptorError> {
        self.entries
            .get(index as usize)
            .ok_or(DescriptorError::InvalidConstantIndex { index })
    }

    fn utf8(&self, index: u16) -> Result<&str, DescriptorError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.as_str()),
            _ => Err(DescriptorError::InvalidConstantIndex { index }),
        }
    }

    fn optional_utf8(&self, index: u16) -> Result<Option<String>, DescriptorError> {
        if index == 0 {
            return Ok(None);
        }
        self.utf8(index).map(|value| Some(value.to_string()))
    }

    fn class_name(&self, index: u16) -> Result<String, DescriptorError> {
        match self.get(index)? {
            Constant::Class { name_index } => Ok(self.utf8(*name_index)?.replace('/', ".")),
            _ => Err(DescriptorError::InvalidConstantIndex { index }),
        }
    }

    fn package_name(&self, index: u16) -> Result<String, DescriptorError> {
        match self.get(index)? {
            Constant::Package { name_index } | Constant::Class { name_index } => {
                Ok(self.utf8(*name_index)?.replace('/', "."))
            }
            _ => Err(DescriptorError::InvalidConstantIndex { index }),
        }
    }

    fn module_name(&self, index: u16) -> Result<String, DescriptorError> {
        match self.get(index)? {
            Constant::Module { name_index } => Ok(self.utf8(*name_index)?.to_string()),
            _ => Err(DescriptorError::InvalidConstantIndex { index }),
        }
    }
}

struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn expect_magic(&mut self) -> Result<(), DescriptorError> {
        const MAGIC: u32 = 0xCAFEBABE;
        if self.read_u4()? != MAGIC {
            return Err(DescriptorError::InvalidMagic);
        }
        Ok(())
    }

    fn read_u1(&mut self) -> Result<u8, DescriptorError> {
        let value = *self
            .data
            .get(self.pos)
            .ok_or(DescriptorError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_u2(&mut self) -> Result<u16, DescriptorError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, DescriptorError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DescriptorError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DescriptorError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), DescriptorError> {
        self.read_slice(len).map(|_| ())
    }
}

fn skip_attributes(reader: &mut ClassReader<'_>, count: u16) -> Result<(), DescriptorError> {
    for _ in 0..count {
        reader.read_u2()?; // attribute_name_index
        let length = reader.read_u4()? as usize;
        reader.skip(length)?;
    }
    Ok(())
}

fn skip_member(reader: &mut ClassReader<'_>) -> Result<(), DescriptorError> {
    reader.read_u2()?; // access_flags
    reader.read_u2()?; // name_index
    reader.read_u2()?; // descriptor_index
    let attributes_count = reader.read_u2()?;
    skip_attributes(reader, attributes_count)
}
