//! OpenDAL Operator factory for the upload directory

use anyhow::{Context, Result};
use opendal::Operator;

use docseal_core::config::StorageConfig;

/// Build an OpenDAL `Fs` operator rooted at `storage.upload_dir`.
///
/// Record paths are resolved relative to this root. Every write lands in a
/// temp file under [`StorageConfig::scratch_dir`] first and is renamed over
/// the target, so an interrupted overwrite never leaves a half-written file.
pub fn build_fs_operator(storage: &StorageConfig) -> Result<Operator> {
    let root = std::path::absolute(&storage.upload_dir)
        .with_context(|| format!("resolving upload dir: {}", storage.upload_dir.display()))?;

    let scratch_dir = storage.scratch_dir();
    let scratch = std::path::absolute(&scratch_dir)
        .with_context(|| format!("resolving atomic write dir: {}", scratch_dir.display()))?;
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("creating atomic write dir: {}", scratch.display()))?;

    let builder = opendal::services::Fs::default()
        .root(&root.to_string_lossy())
        .atomic_write_dir(&scratch.to_string_lossy());

    let op = Operator::new(builder)
        .context("creating OpenDAL fs operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_operator_reads_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("acme")).unwrap();
        std::fs::write(dir.path().join("acme/report.pdf"), b"plaintext").unwrap();

        let op = build_fs_operator(&StorageConfig {
            upload_dir: dir.path().to_path_buf(),
            atomic_write_dir: None,
        })
        .unwrap();

        let data = op.read("acme/report.pdf").await.unwrap();
        assert_eq!(data.to_vec(), b"plaintext");
    }

    #[tokio::test]
    async fn test_default_scratch_dir_under_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let op = build_fs_operator(&StorageConfig {
            upload_dir: dir.path().to_path_buf(),
            atomic_write_dir: None,
        })
        .unwrap();
        assert!(dir.path().join(".docseal-tmp").is_dir());

        op.write("doc.bin", b"old".to_vec()).await.unwrap();
        op.write("doc.bin", b"new contents".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("doc.bin")).unwrap(), b"new contents");
        // temp files are renamed away, not left behind
        assert_eq!(std::fs::read_dir(dir.path().join(".docseal-tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_atomic_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(uploads.join("doc.bin"), b"old contents").unwrap();

        let op = build_fs_operator(&StorageConfig {
            upload_dir: uploads.clone(),
            atomic_write_dir: Some(scratch),
        })
        .unwrap();

        op.write("doc.bin", b"new".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(uploads.join("doc.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let op = build_fs_operator(&StorageConfig {
            upload_dir: dir.path().to_path_buf(),
            atomic_write_dir: None,
        })
        .unwrap();

        let err = op.read("absent.pdf").await.unwrap_err();
        assert_eq!(err.kind(), opendal::ErrorKind::NotFound);
    }
}
