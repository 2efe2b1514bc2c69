use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use jv_deps::{expand_class_path, Archive, DependencyConfiguration, DepsError, PlatformSelector};
use zip::write::FileOptions;

fn write_jar(path: &Path, entries: &[&str]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default();
    writer.start_file("META-INF/MANIFEST.MF", options).unwrap();
    writer.write_all(b"Manifest-Version: 1.0\n").unwrap();
    for entry in entries {
        writer.start_file(*entry, options).unwrap();
        writer.write_all(b"").unwrap();
    }
    writer.finish().unwrap();
}

fn lib_dir() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let lib = temp.path().join("lib");
    fs::create_dir_all(&lib).unwrap();
    write_jar(&lib.join("alpha.jar"), &["com/example/alpha/Alpha.class"]);
    write_jar(
        &lib.join("beta.jar"),
        &["com/example/beta/Beta.class", "com/example/shared/Util.class"],
    );
    write_jar(
        &lib.join("gamma.jar"),
        &["com/example/shared/Util.class", "Root.class"],
    );
    fs::write(lib.join("NOTICE.txt"), "not an archive").unwrap();
    (temp, lib)
}

#[test]
fn wildcard_expands_to_jars_in_directory_order() {
    let (_temp, lib) = lib_dir();
    let expanded = expand_class_path(&format!("{}/*", lib.display())).unwrap();

    let listed: Vec<PathBuf> = fs::read_dir(&lib)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jar"))
        .collect();
    assert_eq!(expanded.len(), 3);
    assert_eq!(expanded, listed);
}

#[test]
fn class_path_archives_answer_owner_queries() {
    let (_temp, lib) = lib_dir();
    let configuration = DependencyConfiguration::builder(PlatformSelector::None)
        .add_class_path(format!("{}/*", lib.display()))
        .build()
        .expect("build configuration");

    assert!(configuration.units().is_empty());
    assert_eq!(configuration.classpath_archives().len(), 3);
    assert!(configuration.split_packages().is_empty());

    let alpha = configuration
        .find_owner("com.example.alpha.Alpha")
        .expect("alpha owner");
    assert_eq!(alpha.name(), "alpha.jar");
    assert!(matches!(alpha, Archive::Unnamed(_)));

    let shared = configuration
        .find_owner("com/example/shared/Util")
        .expect("shared owner");
    let first_with_shared = configuration
        .classpath_archives()
        .iter()
        .find(|archive| archive.contains("com/example/shared/Util.class"))
        .unwrap();
    assert_eq!(shared.location(), first_with_shared.path_name());

    assert_eq!(configuration.find_owner("Root").unwrap().name(), "gamma.jar");
    assert!(configuration.find_owner("com.example.alpha.Missing").is_none());
}

#[test]
fn missing_class_path_entries_are_skipped() {
    let (temp, lib) = lib_dir();
    let missing = temp.path().join("missing.jar");
    let class_path = std::env::join_paths([lib.join("alpha.jar"), missing]).unwrap();

    let configuration = DependencyConfiguration::builder(PlatformSelector::None)
        .add_class_path(class_path.to_string_lossy().into_owned())
        .build()
        .unwrap();
    assert_eq!(configuration.classpath_archives().len(), 1);
}

#[test]
fn wildcard_on_missing_directory_is_an_io_error() {
    let temp = tempfile::tempdir().unwrap();
    let error = DependencyConfiguration::builder(PlatformSelector::None)
        .add_class_path(format!("{}/*", temp.path().join("absent").display()))
        .build()
        .unwrap_err();
    assert!(matches!(error, DepsError::Io { .. }));
}

#[test]
fn closing_twice_keeps_metadata_available() {
    let (_temp, lib) = lib_dir();
    let configuration = DependencyConfiguration::builder(PlatformSelector::None)
        .add_class_path(format!("{}/*", lib.display()))
        .build()
        .unwrap();

    configuration.close();
    configuration.close();

    for archive in configuration.classpath_archives() {
        assert!(archive.reader().is_closed());
    }
    assert!(configuration.find_owner("com.example.beta.Beta").is_some());
}
