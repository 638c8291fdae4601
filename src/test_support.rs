//! Fixtures shared by unit tests

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build a zip archive from `(name, contents)` pairs, in order
pub fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, contents) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A minimal valid wheel; `payload` varies the bytes and therefore the digest
pub fn sample_wheel(name: &str, version: &str, payload: &[u8]) -> Vec<u8> {
    let dist_info = format!("{}-{}.dist-info", name, version);
    let metadata = format!("Metadata-Version: 2.1\nName: {}\nVersion: {}\n", name, version);
    let module = String::from_utf8_lossy(payload).into_owned();
    build_archive(&[
        (&format!("{}/__init__.py", name), &module),
        (&format!("{}/METADATA", dist_info), &metadata),
        (
            &format!("{}/WHEEL", dist_info),
            "Wheel-Version: 1.0\nGenerator: wheelsmith-test\nRoot-Is-Purelib: true\n",
        ),
    ])
}

/// Conventional file name for a sample wheel
pub fn wheel_file_name(name: &str, version: &str) -> String {
    format!("{}-{}-py3-none-any.whl", name, version)
}
