use super::*;
use crate::config::{ArchiveConfig, ToolsConfig};
use crate::signature::classify;
use std::io::Write;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn tools_available(names: &[&str]) -> bool {
    for name in names {
        if which::which(name).is_err() {
            println!("Skipping test: {} not found in PATH", name);
            return false;
        }
    }
    true
}

fn ops_with(compression: TarCompression) -> ArchiveOperations {
    let config = Config {
        archive: ArchiveConfig {
            stream_compression: compression,
            ..ArchiveConfig::default()
        },
        ..Config::default()
    };
    ArchiveOperations::new(config, TracingLogger::shared("archive-test")).unwrap()
}

/// Operations whose tools cannot be executed, to prove which tool a path reaches
fn unrunnable_ops() -> ArchiveOperations {
    let config = Config {
        tools: ToolsConfig {
            tar_path: Some(PathBuf::from("/nonexistent/bin/tar")),
            unzip_path: Some(PathBuf::from("/nonexistent/bin/unzip")),
            gzip_path: Some(PathBuf::from("/nonexistent/bin/gzip")),
            search_path: false,
        },
        ..Config::default()
    };
    ArchiveOperations::new(config, TracingLogger::shared("archive-test")).unwrap()
}

fn write_tree(root: &Path) {
    std::fs::create_dir_all(root.join("nested/deeper")).unwrap();
    std::fs::write(root.join("readme.txt"), b"top level file\n").unwrap();
    std::fs::write(root.join("nested/notes.txt"), b"nested file\n").unwrap();
    let binary: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(root.join("nested/deeper/data.bin"), binary).unwrap();
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in entries {
        zip.start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Regular files under `root` with their contents, relative and sorted
fn tree_listing(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            (
                entry.path().strip_prefix(root).unwrap().to_path_buf(),
                std::fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

async fn tar_bytes_of(ops: &ArchiveOperations, path: &Path) -> Vec<u8> {
    ops.create_tar_for_path(path)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_signature_fails_without_starting_a_tool() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x.unknownext");
    std::fs::write(&path, b"just some text, not an archive").unwrap();

    // Any spawned tool would fail with ExternalTool instead.
    let result = unrunnable_ops()
        .extract_archive(&path, &dir.path().join("out"))
        .await;

    match result {
        Err(Error::UnsupportedFormat { path: reported }) => assert_eq!(reported, path),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn missing_and_empty_files_are_unsupported() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty.zip");
    std::fs::write(&empty, b"").unwrap();
    let ops = unrunnable_ops();

    for path in [empty, dir.path().join("missing.tar")] {
        assert!(matches!(
            ops.extract_archive(&path, dir.path()).await,
            Err(Error::UnsupportedFormat { .. })
        ));
    }
}

#[tokio::test]
async fn zip_signature_dispatches_to_unzip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.ipa");
    std::fs::write(&path, b"PK\x03\x04\x00\x00").unwrap();

    match unrunnable_ops().extract_archive(&path, &dir.path().join("out")).await {
        Err(Error::ExternalTool(msg)) => assert!(msg.contains("unzip"), "{msg}"),
        other => panic!("expected ExternalTool, got {other:?}"),
    }
}

#[tokio::test]
async fn gzip_signature_dispatches_to_tar() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle.tgz");
    std::fs::write(&path, [0x1Fu8, 0x8B, 0x08, 0x00]).unwrap();

    match unrunnable_ops().extract_archive(&path, &dir.path().join("out")).await {
        Err(Error::ExternalTool(msg)) => assert!(msg.contains("tar"), "{msg}"),
        other => panic!("expected ExternalTool, got {other:?}"),
    }
}

#[test]
fn explicit_tool_paths_win_over_search() {
    let ops = unrunnable_ops();
    assert_eq!(ops.tools.tar, PathBuf::from("/nonexistent/bin/tar"));
    assert_eq!(ops.tools.unzip, PathBuf::from("/nonexistent/bin/unzip"));
    assert_eq!(ops.tools.gzip, PathBuf::from("/nonexistent/bin/gzip"));
}

#[test]
fn bare_name_without_search() {
    assert_eq!(resolve_tool(None, "tar", false), PathBuf::from("tar"));
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = Config::default();
    config.streams.chunk_size = 0;

    let result = ArchiveOperations::new(config, TracingLogger::shared("archive-test"));
    assert!(matches!(result, Err(Error::Config { .. })));
}

// ---------------------------------------------------------------------------
// Extraction with real tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extracts_zip_into_new_directory() {
    if !tools_available(&["unzip"]) {
        return;
    }
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bundle.zip");
    write_zip(
        &archive,
        &[
            ("Payload/app.txt", &b"application"[..]),
            ("Info.plist", &b"<plist/>"[..]),
        ],
    );
    let dest = dir.path().join("out/extracted");

    let extracted = ops_with(TarCompression::Gzip)
        .extract_archive(&archive, &dest)
        .await
        .unwrap();

    assert_eq!(extracted, dest);
    assert_eq!(
        tree_listing(&dest),
        vec![
            (PathBuf::from("Info.plist"), b"<plist/>".to_vec()),
            (PathBuf::from("Payload/app.txt"), b"application".to_vec()),
        ]
    );
}

#[tokio::test]
async fn unzip_without_overwrite_keeps_existing_files() {
    if !tools_available(&["unzip"]) {
        return;
    }
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bundle.zip");
    write_zip(
        &archive,
        &[("a.txt", &b"from archive"[..]), ("b.txt", &b"new"[..])],
    );
    let dest = dir.path().join("out");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("a.txt"), b"already here").unwrap();

    let config = Config {
        archive: ArchiveConfig {
            overwrite: false,
            ..ArchiveConfig::default()
        },
        ..Config::default()
    };
    let ops = ArchiveOperations::new(config, TracingLogger::shared("archive-test")).unwrap();
    ops.extract_zip_archive(&archive, &dest).await.unwrap();

    assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"already here");
    assert_eq!(std::fs::read(dest.join("b.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn created_tar_extracts_to_same_tree() {
    if !tools_available(&["tar"]) {
        return;
    }
    let source = TempDir::new().unwrap();
    write_tree(&source.path().join("bundle"));
    let ops = ops_with(TarCompression::None);

    let bytes = tar_bytes_of(&ops, &source.path().join("bundle")).await;
    assert_eq!(classify(&bytes), SignatureKind::Tar);

    let work = TempDir::new().unwrap();
    let archive = work.path().join("bundle.tar");
    std::fs::write(&archive, &bytes).unwrap();
    let dest = work.path().join("out");
    ops.extract_archive(&archive, &dest).await.unwrap();

    assert_eq!(
        tree_listing(&dest.join("bundle")),
        tree_listing(&source.path().join("bundle"))
    );
}

#[tokio::test]
async fn corrupt_tar_reports_tool_failure() {
    if !tools_available(&["tar"]) {
        return;
    }
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.tar");
    let mut header = vec![0xAAu8; 512];
    header[257..262].copy_from_slice(b"ustar");
    std::fs::write(&archive, &header).unwrap();

    match ops_with(TarCompression::None)
        .extract_archive(&archive, &dir.path().join("out"))
        .await
    {
        Err(Error::UnderlyingToolFailure { tool, exit_code, .. }) => {
            assert_eq!(tool, "tar");
            assert_ne!(exit_code, Some(0));
        }
        other => panic!("expected UnderlyingToolFailure, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_extraction_is_independent_of_chunking() {
    if !tools_available(&["tar"]) {
        return;
    }
    let source = TempDir::new().unwrap();
    write_tree(&source.path().join("bundle"));
    let ops = ops_with(TarCompression::None);
    let bytes = tar_bytes_of(&ops, &source.path().join("bundle")).await;

    let whole = TempDir::new().unwrap();
    ops.extract_tar_archive_from_stream(ProcessInput::from_bytes(bytes.clone()), whole.path())
        .await
        .unwrap();

    let (input, consumer) = ProcessInput::from_consumer();
    for byte in &bytes {
        consumer.write(std::slice::from_ref(byte)).unwrap();
    }
    consumer.close();
    let bytewise = TempDir::new().unwrap();
    ops.extract_tar_archive_from_stream(input, bytewise.path())
        .await
        .unwrap();

    let listing = tree_listing(whole.path());
    assert_eq!(listing.len(), 3);
    assert_eq!(listing, tree_listing(bytewise.path()));
}

#[tokio::test]
async fn stream_extraction_from_concurrent_writer() {
    if !tools_available(&["tar"]) {
        return;
    }
    let source = TempDir::new().unwrap();
    write_tree(&source.path().join("bundle"));
    let ops = ops_with(TarCompression::None);
    let bytes = tar_bytes_of(&ops, &source.path().join("bundle")).await;

    let (input, mut writer) = ProcessInput::from_stream();
    let producer = tokio::spawn(async move {
        for chunk in bytes.chunks(100) {
            // tar may stop reading once it has seen the end-of-archive blocks
            if writer.write_all(chunk).await.is_err() {
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let dest = TempDir::new().unwrap();
    ops.extract_tar_archive_from_stream(input, dest.path())
        .await
        .unwrap();
    producer.await.unwrap();

    assert_eq!(
        tree_listing(&dest.path().join("bundle")),
        tree_listing(&source.path().join("bundle"))
    );
}

#[tokio::test]
async fn gzip_output_extracts_as_compressed_stream() {
    if !tools_available(&["tar", "gzip"]) {
        return;
    }
    let source = TempDir::new().unwrap();
    write_tree(&source.path().join("bundle"));
    let plain = ops_with(TarCompression::None);
    let tar_path = source.path().join("bundle.tar");
    std::fs::write(&tar_path, tar_bytes_of(&plain, &source.path().join("bundle")).await).unwrap();

    let compressed = plain
        .gzip_path(&tar_path)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(&compressed[..2], &[0x1Fu8, 0x8B]);

    let dest = TempDir::new().unwrap();
    ops_with(TarCompression::Gzip)
        .extract_tar_archive_from_stream(ProcessInput::from_bytes(compressed.clone()), dest.path())
        .await
        .unwrap();
    assert_eq!(
        tree_listing(&dest.path().join("bundle")),
        tree_listing(&source.path().join("bundle"))
    );

    // The same bytes on disk sniff as tar and go through `tar -x -f`.
    let tgz = source.path().join("bundle.tar.gz");
    std::fs::write(&tgz, &compressed).unwrap();
    let from_file = TempDir::new().unwrap();
    plain.extract_archive(&tgz, from_file.path()).await.unwrap();
    assert_eq!(
        tree_listing(&from_file.path().join("bundle")),
        tree_listing(&source.path().join("bundle"))
    );
}

#[tokio::test]
async fn gzip_of_missing_file_fails_with_stderr() {
    if !tools_available(&["gzip"]) {
        return;
    }
    let dir = TempDir::new().unwrap();

    let generated = ops_with(TarCompression::Gzip)
        .gzip_path(&dir.path().join("missing.bin"))
        .await
        .unwrap();

    match generated.collect().await {
        Err(Error::UnderlyingToolFailure { tool, stderr, .. }) => {
            assert_eq!(tool, "gzip");
            assert!(stderr.contains("missing.bin"), "{stderr}");
        }
        other => panic!("expected UnderlyingToolFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn generated_archive_exposes_running_process() {
    if !tools_available(&["tar"]) {
        return;
    }
    let source = TempDir::new().unwrap();
    write_tree(&source.path().join("bundle"));

    let generated = ops_with(TarCompression::None)
        .create_tar_for_path(&source.path().join("bundle"))
        .await
        .unwrap();

    assert_eq!(generated.process.tool(), "tar");
    assert!(generated.process.pid().is_some());
    let bytes = generated.collect().await.unwrap();
    assert_eq!(bytes.len() % 512, 0);
}
