//! Atomic on-disk persistence (C10): write-to-temp-then-rename, the same technique
//! `fingerprint`'s digest cache and `archive`'s scratch directories rely on implicitly via
//! their single-writer discipline, made explicit here since both the history store and the
//! result document are read back by a subsequent run or by the caller.

use std::path::Path;

use rand::Rng;

/// Write `contents` to `path` atomically: write to a sibling temp file, `fsync`, then rename
/// over the destination. A reader never observes a partially written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let suffix: u64 = rand::thread_rng().gen();
    let tmp_path = parent.join(format!(
        ".{}.{:x}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("write"),
        suffix
    ));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    use tokio::io::AsyncWriteExt;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    match tokio::fs::rename(&tmp_path, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"{\"ok\":true}").await.unwrap();

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"{\"ok\":true}");

        let leftover = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn write_atomic_overwrites_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"second");
    }
}
