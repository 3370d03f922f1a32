//! Small filesystem helpers shared by the block store and backends.

use std::path::Path;

use uuid::Uuid;

/// Write `data` to `dst` atomically: write a `.tmp-<uuid>` sibling and
/// rename it into place. Concurrent writers for the same content-addressed
/// path race harmlessly; the rename is the serialization point. An existing
/// destination is left untouched.
pub async fn safe_write_file(data: &[u8], dst: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dst).await.unwrap_or(false) {
        return Ok(());
    }

    if let Some(dir) = dst.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let tmp = dst.with_file_name(format!(
        "{}.tmp-{}",
        dst.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4()
    ));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, dst).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_then_keeps_first_content() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("blocks").join("abc");

        safe_write_file(b"first", &dst).await.unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"first");

        // A second write for the same key is a no-op.
        safe_write_file(b"second", &dst).await.unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn leaves_no_temp_files_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("key");
        safe_write_file(b"data", &dst).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("key")]);
    }
}
