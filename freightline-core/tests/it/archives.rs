//! S3: files matched by extension/name rules inside a zip archive are discovered and packaged
//! the same way plain filesystem files are, without the archive itself being matched.

use std::fs;
use std::io::Write as _;

use tempfile::tempdir;

use crate::{base_config, run};

fn write_fixture_zip(path: &std::path::Path) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    zip.start_file("inside.txt", options).unwrap();
    zip.write_all(b"found inside an archive").unwrap();

    zip.start_file("ignored.bin", options).unwrap();
    zip.write_all(b"not matched by the rule").unwrap();

    zip.finish().unwrap();
}

#[tokio::test]
async fn matching_files_inside_an_archive_are_discovered_and_packaged() {
    let root = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let scratch = tempdir().unwrap();

    write_fixture_zip(&root.path().join("bundle.zip"));

    let config = base_config(root.path().to_owned(), dest.path().to_owned(), scratch.path(), "task-archive-1");
    let result = run(config).await;

    assert!(result.success, "failures: {:?}", result.failed_items);
    assert_eq!(result.processed_files.len(), 1, "only the .txt member should match");
    assert!(result.processed_files[0].path.ends_with("inside.txt"));
}
