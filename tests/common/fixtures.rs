//! Fixture builders shared by the integration tests

use procpipe::{ArchiveOperations, Config, Logger, TarCompression};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Whether every named tool is on PATH; prints a skip notice otherwise
pub fn tools_available(names: &[&str]) -> bool {
    for name in names {
        if which::which(name).is_err() {
            println!("Skipping test: {} not found in PATH", name);
            return false;
        }
    }
    true
}

/// A small directory tree with text and binary files at several depths
pub fn write_sample_tree(root: &Path) {
    std::fs::create_dir_all(root.join("Payload/Frameworks")).unwrap();
    std::fs::write(root.join("Info.plist"), b"<plist version=\"1.0\"/>\n").unwrap();
    std::fs::write(root.join("Payload/app.txt"), b"application body\n").unwrap();
    let blob: Vec<u8> = (0..70_000u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(root.join("Payload/Frameworks/lib.bin"), blob).unwrap();
}

/// Archive operations with the given tar stream compression
pub fn archive_ops(compression: TarCompression, logger: Arc<dyn Logger>) -> ArchiveOperations {
    let mut config = Config::default();
    config.archive.stream_compression = compression;
    ArchiveOperations::new(config, logger).unwrap()
}

/// Logger that records every line it receives
pub fn recording_logger() -> (Arc<dyn Logger>, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let logger: Arc<dyn Logger> = Arc::new(move |line: &str| {
        sink.lock().unwrap().push(line.to_string());
    });
    (logger, lines)
}
