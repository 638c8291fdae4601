//! Shared fixtures

use async_trait::async_trait;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use wheelsmith::build::{ArtifactBuilder, ProjectMetadata, ResolvedSource};
use wheelsmith::error::WheelsmithResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, contents) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn sample_wheel(name: &str, version: &str, payload: &str) -> Vec<u8> {
    let dist_info = format!("{}-{}.dist-info", name, version);
    build_archive(&[
        (&format!("{}/__init__.py", name), payload),
        (
            &format!("{}/METADATA", dist_info),
            &format!("Metadata-Version: 2.1\nName: {}\nVersion: {}\n", name, version),
        ),
        (
            &format!("{}/WHEEL", dist_info),
            "Wheel-Version: 1.0\nRoot-Is-Purelib: true\n",
        ),
    ])
}

pub fn wheel_file_name(name: &str, version: &str) -> String {
    format!("{}-{}-py3-none-any.whl", name, version)
}

/// A minimal Python project with a pyproject.toml
pub fn write_project(root: &Path, name: &str, version: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join(name)).unwrap();
    std::fs::write(
        dir.join("pyproject.toml"),
        format!("[project]\nname = \"{}\"\nversion = \"{}\"\n", name, version),
    )
    .unwrap();
    std::fs::write(dir.join(name).join("__init__.py"), "VALUE = 1\n").unwrap();
    dir
}

/// Builder that writes fixed bytes and counts invocations
pub struct CountingBuilder {
    bytes: Vec<u8>,
    calls: AtomicUsize,
    id: String,
}

impl CountingBuilder {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::with_id(bytes, "counting")
    }

    /// A builder with its own identity, like one platform of a build matrix
    pub fn with_id(bytes: Vec<u8>, id: &str) -> Self {
        Self {
            bytes,
            calls: AtomicUsize::new(0),
            id: id.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactBuilder for CountingBuilder {
    async fn build(
        &self,
        _source: &ResolvedSource,
        project: &ProjectMetadata,
        out_dir: &Path,
    ) -> WheelsmithResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = out_dir.join(wheel_file_name(&project.name, &project.version));
        std::fs::write(&path, &self.bytes).unwrap();
        Ok(path)
    }

    fn builder_id(&self) -> String {
        self.id.clone()
    }
}
