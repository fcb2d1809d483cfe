//! Unit tests.

use std::{fs::File, io::Write};

use tempfile::tempdir;
use zip::write::FileOptions;

use crate::walk;

fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, contents) in entries {
        writer
            .start_file(*name, FileOptions::default())
            .expect("start entry");
        writer.write_all(contents).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

#[test]
fn walks_flat_zip() {
    let dir = tempdir().expect("tempdir");
    let archive = dir.path().join("flat.zip");
    write_zip(
        &archive,
        &[("a.txt", b"hello"), ("nested/b.txt", b"world")],
    );

    let entries: Vec<_> = walk(archive, 5)
        .collect::<Result<Vec<_>, _>>()
        .expect("walk succeeds");

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.nesting() == 1));
    let names: Vec<_> = entries
        .iter()
        .map(|e| e.internal_path().to_string_lossy().replace('\\', "/"))
        .collect();
    assert!(names.contains(&"a.txt".to_string()));
    assert!(names.contains(&"nested/b.txt".to_string()));
}

#[test]
fn recurses_into_nested_zip() {
    let dir = tempdir().expect("tempdir");
    let inner = dir.path().join("inner.zip");
    write_zip(&inner, &[("deep.txt", b"deep")]);

    let inner_bytes = std::fs::read(&inner).expect("read inner zip");
    let outer = dir.path().join("outer.zip");
    write_zip(&outer, &[("inner.zip", &inner_bytes), ("top.txt", b"top")]);

    let entries: Vec<_> = walk(outer, 5)
        .collect::<Result<Vec<_>, _>>()
        .expect("walk succeeds");

    let nested: Vec<_> = entries.iter().filter(|e| e.nesting() == 2).collect();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].internal_path().to_str().unwrap(), "inner.zip/deep.txt");

    let top_level: Vec<_> = entries.iter().filter(|e| e.nesting() == 1).collect();
    assert_eq!(top_level.len(), 2);
}

#[test]
fn respects_nesting_limit() {
    let dir = tempdir().expect("tempdir");
    let inner = dir.path().join("inner.zip");
    write_zip(&inner, &[("deep.txt", b"deep")]);
    let inner_bytes = std::fs::read(&inner).expect("read inner zip");

    let outer = dir.path().join("outer.zip");
    write_zip(&outer, &[("inner.zip", &inner_bytes)]);

    // max_nesting=0 permits only the root archive (nesting level 1); the nested archive
    // discovered at nesting level 1 would need to recurse to level 2, which is rejected.
    let results: Vec<_> = walk(outer, 0).collect();
    let errors: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
    assert!(!errors.is_empty(), "expected a recursion-limit error");

    let ok_entries: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(ok_entries.len(), 1);
    assert_eq!(ok_entries[0].internal_path().to_str().unwrap(), "inner.zip");
}

#[test]
fn scratch_directory_cleaned_up_after_drop() {
    let dir = tempdir().expect("tempdir");
    let archive = dir.path().join("flat.zip");
    write_zip(&archive, &[("a.txt", b"hello")]);

    let entries: Vec<_> = walk(archive, 5)
        .collect::<Result<Vec<_>, _>>()
        .expect("walk succeeds");
    let scratch_path = entries[0].concrete_path().to_owned();
    assert!(scratch_path.exists());

    drop(entries);
    assert!(!scratch_path.exists());
}
