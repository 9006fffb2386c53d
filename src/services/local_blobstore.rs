//! src/services/local_blobstore.rs
//!
//! LocalBlobStore: a `BlobStore` that keeps multipart sessions and finished
//! objects on local disk. Parts are staged beneath
//! `base_path/.multipart/{upload_id}/` and merged into
//! `base_path/objects/{shard}/{shard}/{key}` on completion, where `key` is the
//! host and path of the upload URL.

use crate::models::UploadError;
use crate::services::uploader::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const STAGING_DIR: &str = ".multipart";
const OBJECTS_DIR: &str = "objects";

#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    /// Root directory for staged parts and merged objects.
    pub base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Path the merged object for `upload_url` is (or will be) stored at.
    pub fn object_path_for(&self, upload_url: &str) -> Result<PathBuf, UploadError> {
        let key = object_key(upload_url)?;
        Ok(self.object_path(&key))
    }

    /// Verify the root directory exists and accepts writes.
    pub async fn check_writable(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await
    }

    fn objects_root(&self) -> PathBuf {
        self.base_path.join(OBJECTS_DIR)
    }

    /// Two-level shard identifiers from MD5(key), as lowercase hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.objects_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Upload ids are ours, so anything that is not a UUID never existed.
    fn staging_dir(&self, upload_id: &str) -> Result<PathBuf, UploadError> {
        let id = Uuid::parse_str(upload_id)
            .map_err(|_| UploadError::fatal(format!("unknown upload id `{upload_id}`")))?;
        Ok(self.base_path.join(STAGING_DIR).join(id.to_string()))
    }

    /// Staged parts of a session ordered by part number.
    async fn staged_parts(staging: &Path) -> io::Result<Vec<(u32, PathBuf)>> {
        let mut entries = fs::read_dir(staging).await?;
        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|name| name.strip_suffix(".part"))
                .and_then(|stem| stem.parse::<u32>().ok())
            else {
                continue;
            };
            parts.push((number, entry.path()));
        }
        parts.sort_by_key(|(number, _)| *number);
        Ok(parts)
    }

    /// Write `data` to `path` through a fsynced temp file and rename.
    async fn write_durable(path: &Path, data: &[u8]) -> io::Result<String> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "path missing parent directory"))?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let result = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            replace_file(&tmp_path, path).await
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result.map(|()| format!("{:x}", md5::compute(data)))
    }

    /// Concatenate staged parts into the final object and return its etag.
    async fn assemble(&self, parts: &[(u32, PathBuf)], object_path: &Path) -> io::Result<String> {
        let parent = object_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let mut digest = Context::new();

        let result = async {
            for (_, part_path) in parts {
                let chunk = fs::read(part_path).await?;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            replace_file(&tmp_path, object_path).await
        }
        .await;
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(format!("{:x}", digest.compute()))
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_multipart_upload(&self, upload_url: &str) -> Result<String, UploadError> {
        object_key(upload_url)?;
        let upload_id = Uuid::new_v4().to_string();
        let staging = self.staging_dir(&upload_id)?;
        fs::create_dir_all(&staging)
            .await
            .map_err(|err| io_failure("creating staging directory", err))?;
        debug!(upload_url, upload_id = %upload_id, "multipart upload created");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_url: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, UploadError> {
        object_key(upload_url)?;
        if part_number == 0 {
            return Err(UploadError::fatal("part numbers start at 1"));
        }
        let staging = self.staging_dir(upload_id)?;
        match fs::metadata(&staging).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) | Err(_) => {
                return Err(UploadError::fatal(format!("unknown upload id `{upload_id}`")));
            }
        }

        let part_path = staging.join(format!("{part_number:05}.part"));
        let etag = Self::write_durable(&part_path, &data)
            .await
            .map_err(|err| io_failure("writing part", err))?;
        debug!(upload_id, part_number, size = data.len(), etag = %etag, "part stored");
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        upload_url: &str,
        upload_id: &str,
    ) -> Result<(), UploadError> {
        let key = object_key(upload_url)?;
        let object_path = self.object_path(&key);
        let staging = self.staging_dir(upload_id)?;

        let parts = match Self::staged_parts(&staging).await {
            Ok(parts) => parts,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // Already merged by an earlier attempt.
                return match fs::try_exists(&object_path).await {
                    Ok(true) => Ok(()),
                    _ => Err(UploadError::fatal(format!("unknown upload id `{upload_id}`"))),
                };
            }
            Err(err) => return Err(io_failure("listing parts", err)),
        };

        let etag = self
            .assemble(&parts, &object_path)
            .await
            .map_err(|err| io_failure("assembling object", err))?;
        if let Err(err) = fs::remove_dir_all(&staging).await {
            debug!("failed to remove staging directory {}: {}", staging.display(), err);
        }
        debug!(
            upload_url,
            upload_id,
            parts = parts.len(),
            etag = %etag,
            "multipart upload completed"
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        upload_url: &str,
        upload_id: &str,
    ) -> Result<(), UploadError> {
        object_key(upload_url)?;
        let staging = self.staging_dir(upload_id)?;
        match fs::remove_dir_all(&staging).await {
            Ok(()) => debug!(upload_url, upload_id, "multipart upload aborted"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(upload_id, "multipart upload already gone");
            }
            Err(err) => return Err(io_failure("aborting upload", err)),
        }
        Ok(())
    }

    async fn delete_object(&self, upload_url: &str) -> Result<(), UploadError> {
        let key = object_key(upload_url)?;
        let object_path = self.object_path(&key);
        match fs::remove_file(&object_path).await {
            Ok(_) => debug!("removed object {}", object_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object {} already missing", object_path.display());
            }
            Err(err) => return Err(io_failure("deleting object", err)),
        }

        if let Some(parent) = object_path.parent() {
            self.prune_empty_dirs(parent, &self.objects_root()).await;
        }
        Ok(())
    }
}

/// Object key for an upload URL: everything after the scheme, without query
/// or fragment.
fn object_key(upload_url: &str) -> Result<String, UploadError> {
    let rest = upload_url
        .split_once("://")
        .map_or(upload_url, |(_, rest)| rest);
    let key = rest
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    ensure_key_safe(key)?;
    Ok(key.to_string())
}

/// Reject keys that could escape the store root.
fn ensure_key_safe(key: &str) -> Result<(), UploadError> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == ".." || segment == ".")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(UploadError::fatal(format!("invalid object key `{key}`")));
    }
    Ok(())
}

async fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(to).await?;
            fs::rename(from, to).await
        }
        other => other,
    }
}

/// Local disk hiccups are worth retrying.
fn io_failure(action: &str, err: io::Error) -> UploadError {
    UploadError::transient(format!("{action}: {err}"))
}
