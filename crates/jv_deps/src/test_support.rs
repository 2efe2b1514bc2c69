//! Fixture writers for unit tests: module-info encoder, jar writer and a
//! minimal runtime image writer.

use crate::descriptor::{Exports, ModuleDescriptor};
use crate::image::{IMAGE_HEADER_SIZE, IMAGE_MAGIC, IMAGE_MAJOR_VERSION};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::ZipWriter;

#[derive(Default)]
struct PoolBuilder {
    bytes: Vec<u8>,
    count: u16,
    cache: HashMap<(u8, String), u16>,
}

impl PoolBuilder {
    fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.cache.get(&(1, value.to_string())) {
            return *index;
        }
        self.bytes.push(1);
        self.bytes
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self.register(1, value)
    }

    fn indirect(&mut self, tag: u8, value: &str) -> u16 {
        if let Some(index) = self.cache.get(&(tag, value.to_string())) {
            return *index;
        }
        let name_index = self.utf8(value);
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&name_index.to_be_bytes());
        self.register(tag, value)
    }

    fn register(&mut self, tag: u8, value: &str) -> u16 {
        self.count += 1;
        self.cache.insert((tag, value.to_string()), self.count);
        self.count
    }

    fn class(&mut self, dotted: &str) -> u16 {
        self.indirect(7, &dotted.replace('.', "/"))
    }

    fn module(&mut self, name: &str) -> u16 {
        self.indirect(19, name)
    }

    fn package(&mut self, dotted: &str) -> u16 {
        self.indirect(20, &dotted.replace('.', "/"))
    }

    fn optional_utf8(&mut self, value: Option<&str>) -> u16 {
        value.map(|value| self.utf8(value)).unwrap_or(0)
    }
}

fn push_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_exports(out: &mut Vec<u8>, pool: &mut PoolBuilder, entries: &[Exports]) {
    push_u2(out, entries.len() as u16);
    for entry in entries {
        push_u2(out, pool.package(&entry.source));
        push_u2(out, 0);
        push_u2(out, entry.targets.len() as u16);
        for target in &entry.targets {
            push_u2(out, pool.module(target));
        }
    }
}

/// Encodes a descriptor as a `module-info.class` file.
pub fn encode_module_info(descriptor: &ModuleDescriptor) -> Vec<u8> {
    let mut pool = PoolBuilder::default();
    let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();

    let mut module = Vec::new();
    push_u2(&mut module, pool.module(&descriptor.name));
    push_u2(&mut module, if descriptor.open { 0x0020 } else { 0 });
    let version = pool.optional_utf8(descriptor.version.as_deref());
    push_u2(&mut module, version);
    push_u2(&mut module, descriptor.requires.len() as u16);
    for requires in &descriptor.requires {
        push_u2(&mut module, pool.module(&requires.name));
        push_u2(&mut module, requires.modifiers.to_flags());
        let compiled = pool.optional_utf8(requires.compiled_version.as_deref());
        push_u2(&mut module, compiled);
    }
    push_exports(&mut module, &mut pool, &descriptor.exports);
    push_exports(&mut module, &mut pool, &descriptor.opens);
    push_u2(&mut module, descriptor.uses.len() as u16);
    for service in &descriptor.uses {
        push_u2(&mut module, pool.class(service));
    }
    push_u2(&mut module, descriptor.provides.len() as u16);
    for provides in &descriptor.provides {
        push_u2(&mut module, pool.class(&provides.service));
        push_u2(&mut module, provides.providers.len() as u16);
        for provider in &provides.providers {
            push_u2(&mut module, pool.class(provider));
        }
    }
    attributes.push((pool.utf8("Module"), module));

    if !descriptor.packages.is_empty() {
        let mut packages = Vec::new();
        push_u2(&mut packages, descriptor.packages.len() as u16);
        for package in &descriptor.packages {
            push_u2(&mut packages, pool.package(package));
        }
        attributes.push((pool.utf8("ModulePackages"), packages));
    }

    if let Some(main_class) = &descriptor.main_class {
        let mut body = Vec::new();
        push_u2(&mut body, pool.class(main_class));
        attributes.push((pool.utf8("ModuleMainClass"), body));
    }

    if let Some(target) = &descriptor.target_platform {
        let mut body = Vec::new();
        push_u2(&mut body, pool.utf8(target));
        attributes.push((pool.utf8("ModuleTarget"), body));
    }

    if let Some(hashes) = &descriptor.hashes {
        let mut body = Vec::new();
        push_u2(&mut body, pool.utf8(&hashes.algorithm));
        push_u2(&mut body, hashes.hashes.len() as u16);
        for (module, hash) in &hashes.hashes {
            push_u2(&mut body, pool.module(module));
            push_u2(&mut body, hash.len() as u16);
            body.extend_from_slice(hash);
        }
        attributes.push((pool.utf8("ModuleHashes"), body));
    }

    let this_class = pool.class("module-info");

    let mut out = Vec::new();
    out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
    push_u2(&mut out, 0);
    push_u2(&mut out, 53);
    push_u2(&mut out, pool.count + 1);
    out.extend_from_slice(&pool.bytes);
    push_u2(&mut out, 0x8000);
    push_u2(&mut out, this_class);
    push_u2(&mut out, 0); // super_class
    push_u2(&mut out, 0); // interfaces
    push_u2(&mut out, 0); // fields
    push_u2(&mut out, 0); // methods
    push_u2(&mut out, attributes.len() as u16);
    for (name, body) in attributes {
        push_u2(&mut out, name);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
    }
    out
}

/// Writes a zip archive entry by entry.
pub struct JarWriter {
    writer: ZipWriter<File>,
}

impl JarWriter {
    pub fn new(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create jar parent");
        }
        let file = File::create(path).expect("create jar");
        Self {
            writer: ZipWriter::new(file),
        }
    }

    pub fn entry(mut self, name: &str, bytes: impl AsRef<[u8]>) -> Self {
        self.writer
            .start_file(name, FileOptions::default())
            .expect("start jar entry");
        self.writer
            .write_all(bytes.as_ref())
            .expect("write jar entry");
        self
    }

    pub fn finish(mut self) {
        self.writer.finish().expect("finish jar");
    }
}

/// Writes a modular jar containing `module-info.class` and empty class files.
pub fn write_modular_jar(path: &Path, descriptor: &ModuleDescriptor, classes: &[&str]) {
    let mut jar = JarWriter::new(path).entry("module-info.class", encode_module_info(descriptor));
    for class in classes {
        jar = jar.entry(class, b"");
    }
    jar.finish();
}

/// Writes an exploded module directory `<root>/<name>`.
pub fn write_exploded_module(root: &Path, descriptor: &ModuleDescriptor, classes: &[&str]) {
    let module_dir = root.join(&descriptor.name);
    fs::create_dir_all(&module_dir).expect("create module dir");
    fs::write(
        module_dir.join("module-info.class"),
        encode_module_info(descriptor),
    )
    .expect("write module-info");
    for class in classes {
        let path = module_dir.join(class);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create class dir");
        }
        fs::write(path, b"").expect("write class");
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ImageWriterOrder {
    Little,
    Big,
}

/// Produces a runtime image with uncompressed resources. The redirect table
/// is left zeroed since readers here enumerate every location.
pub struct ImageWriter {
    order: ImageWriterOrder,
    resources: Vec<(String, String, Vec<u8>)>,
}

impl ImageWriter {
    pub fn new(order: ImageWriterOrder) -> Self {
        Self {
            order,
            resources: Vec::new(),
        }
    }

    pub fn add(&mut self, module: &str, entry: &str, bytes: &[u8]) {
        self.resources
            .push((module.to_string(), entry.to_string(), bytes.to_vec()));
    }

    pub fn add_module(&mut self, descriptor: &ModuleDescriptor, classes: &[&str]) {
        self.add(
            &descriptor.name,
            "module-info.class",
            &encode_module_info(descriptor),
        );
        for class in classes {
            self.add(&descriptor.name, class, b"");
        }
    }

    fn u32(&self, value: u32) -> [u8; 4] {
        match self.order {
            ImageWriterOrder::Little => value.to_le_bytes(),
            ImageWriterOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut strings = vec![0u8];
        let mut string_offsets: HashMap<String, u64> = HashMap::new();
        let mut intern = |value: &str| -> u64 {
            if value.is_empty() {
                return 0;
            }
            *string_offsets.entry(value.to_string()).or_insert_with(|| {
                let offset = strings.len() as u64;
                strings.extend_from_slice(value.as_bytes());
                strings.push(0);
                offset
            })
        };

        let mut locations = Vec::new();
        let mut location_offsets = Vec::new();
        let mut content = Vec::new();
        for (module, entry, bytes) in &self.resources {
            let (parent, file_name) = match entry.rfind('/') {
                Some(index) => (&entry[..index], &entry[index + 1..]),
                None => ("", entry.as_str()),
            };
            let (base, extension) = match file_name.rfind('.') {
                Some(index) => (&file_name[..index], &file_name[index + 1..]),
                None => (file_name, ""),
            };

            let attributes = [
                (1u8, intern(module)),
                (2, intern(parent)),
                (3, intern(base)),
                (4, intern(extension)),
                (5, content.len() as u64),
                (7, bytes.len() as u64),
            ];
            location_offsets.push(locations.len() as u32);
            for (kind, value) in attributes {
                if value == 0 {
                    continue;
                }
                let significant = (8 - value.leading_zeros() as usize / 8).max(1);
                locations.push((kind << 3) | (significant as u8 - 1));
                locations.extend_from_slice(&value.to_be_bytes()[8 - significant..]);
            }
            locations.push(0);
            content.extend_from_slice(bytes);
        }

        let table_length = self.resources.len() as u32;
        let mut out = Vec::with_capacity(IMAGE_HEADER_SIZE + content.len());
        out.extend_from_slice(&self.u32(IMAGE_MAGIC));
        out.extend_from_slice(&self.u32(IMAGE_MAJOR_VERSION << 16));
        out.extend_from_slice(&self.u32(0));
        out.extend_from_slice(&self.u32(table_length));
        out.extend_from_slice(&self.u32(table_length));
        out.extend_from_slice(&self.u32(locations.len() as u32));
        out.extend_from_slice(&self.u32(strings.len() as u32));
        for _ in 0..table_length {
            out.extend_from_slice(&self.u32(0));
        }
        for offset in &location_offsets {
            out.extend_from_slice(&self.u32(*offset));
        }
        out.extend_from_slice(&locations);
        out.extend_from_slice(&strings);
        out.extend_from_slice(&content);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, out)
    }
}
