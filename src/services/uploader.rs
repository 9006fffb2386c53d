//! Upload capabilities consumed by the engine.
//!
//! - `BlobStore` is the remote multipart protocol (S3-style): open a session,
//!   send numbered parts, then merge or abort them. Objects can be deleted.
//! - `Uploader` turns one `UploadRequest` into a lazy stream of
//!   `UploadResult`s. Streams are pull-based, so the next part is not sent
//!   until the driver has persisted the previous result.
//! - `MultipartUploader` is the stock `Uploader`: it reads the request's local
//!   file from its checkpoint offset and drives any `BlobStore`.

use crate::config::SyncConfig;
use crate::models::{UploadError, UploadRequest, UploadResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use std::{
    io::{self, SeekFrom},
    sync::Arc,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::debug;

/// Remote object store speaking a multipart upload protocol.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a multipart session for `upload_url` and return its upload id.
    async fn create_multipart_upload(&self, upload_url: &str) -> Result<String, UploadError>;

    /// Store one part and return its etag. Re-sending a part number replaces it.
    async fn upload_part(
        &self,
        upload_url: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, UploadError>;

    /// Merge all parts into the final object. Completing an already completed
    /// upload succeeds without doing anything.
    async fn complete_multipart_upload(
        &self,
        upload_url: &str,
        upload_id: &str,
    ) -> Result<(), UploadError>;

    /// Discard a session and its staged parts. Aborting a session that is
    /// already gone succeeds.
    async fn abort_multipart_upload(
        &self,
        upload_url: &str,
        upload_id: &str,
    ) -> Result<(), UploadError>;

    async fn delete_object(&self, upload_url: &str) -> Result<(), UploadError>;
}

/// Produces the results for one upload request.
pub trait Uploader: Send + Sync {
    fn upload(&self, request: UploadRequest) -> BoxStream<'_, UploadResult>;
}

/// Reads local files in parts and pushes them through a `BlobStore`.
pub struct MultipartUploader<B: ?Sized> {
    blobstore: Arc<B>,
    part_size: i64,
    min_part_size: i64,
}

/// Where an upload stream currently stands.
struct Cursor {
    request: UploadRequest,
    file: Option<File>,
    done: bool,
}

impl<B: BlobStore + ?Sized> MultipartUploader<B> {
    pub fn new(blobstore: Arc<B>, config: &SyncConfig) -> Self {
        Self::with_part_sizes(blobstore, config.part_size_bytes, config.min_part_size_bytes)
    }

    /// `part_size` is the regular part size. A tail shorter than
    /// `part_size + min_part_size` is sent as one final part so no part but
    /// the last falls below the remote store's minimum.
    pub fn with_part_sizes(blobstore: Arc<B>, part_size: i64, min_part_size: i64) -> Self {
        Self {
            blobstore,
            part_size: part_size.max(1),
            min_part_size: min_part_size.max(0),
        }
    }

    /// Size of the next part given the bytes still to send.
    pub fn next_part_size(&self, remaining: i64) -> i64 {
        if remaining < self.part_size + self.min_part_size {
            remaining
        } else {
            self.part_size
        }
    }

    async fn advance(&self, cursor: &mut Cursor) -> UploadResult {
        let request_id = cursor.request.request_id.clone();

        let upload_id = match cursor.request.upload_id.clone() {
            Some(upload_id) => upload_id,
            None => {
                return match self
                    .blobstore
                    .create_multipart_upload(&cursor.request.upload_url)
                    .await
                {
                    Ok(upload_id) => {
                        cursor.request.upload_id = Some(upload_id.clone());
                        UploadResult::Started {
                            request_id,
                            upload_id,
                            started_at: Utc::now(),
                        }
                    }
                    Err(error) => UploadResult::Failure { request_id, error },
                };
            }
        };

        if cursor.request.remaining_bytes() > 0 {
            let part_number = cursor.request.next_part;
            let data = match self.read_part(cursor).await {
                Ok(data) => data,
                Err(error) => return UploadResult::Failure { request_id, error },
            };
            let size = data.len() as i64;

            debug!(
                request_id = %request_id,
                part_number,
                size,
                "uploading part"
            );
            return match self
                .blobstore
                .upload_part(&cursor.request.upload_url, &upload_id, part_number, data)
                .await
            {
                Ok(_etag) => {
                    cursor.request.bytes_uploaded += size;
                    cursor.request.next_part += 1;
                    UploadResult::Success {
                        request_id,
                        part_number,
                        bytes_uploaded: size,
                        uploaded_at: Utc::now(),
                    }
                }
                Err(error) => UploadResult::Failure { request_id, error },
            };
        }

        match self
            .blobstore
            .complete_multipart_upload(&cursor.request.upload_url, &upload_id)
            .await
        {
            Ok(()) => {
                debug!(request_id = %request_id, "multipart upload merged");
                UploadResult::Completed {
                    request_id,
                    completed_at: Utc::now(),
                }
            }
            Err(error) => UploadResult::Failure { request_id, error },
        }
    }

    /// Read the next part from the checkpoint offset, opening the file lazily.
    async fn read_part(&self, cursor: &mut Cursor) -> Result<Bytes, UploadError> {
        let offset = cursor.request.bytes_uploaded;
        let size = self.next_part_size(cursor.request.remaining_bytes());

        if cursor.file.is_none() {
            let mut file = File::open(&cursor.request.file_path)
                .await
                .map_err(|err| local_file_error(&cursor.request.file_path, err))?;
            file.seek(SeekFrom::Start(offset as u64))
                .await
                .map_err(|err| local_file_error(&cursor.request.file_path, err))?;
            cursor.file = Some(file);
        }
        let Some(file) = cursor.file.as_mut() else {
            return Err(UploadError::transient("local file handle unavailable"));
        };

        let mut buffer = vec![0u8; size as usize];
        file.read_exact(&mut buffer)
            .await
            .map_err(|err| local_file_error(&cursor.request.file_path, err))?;
        Ok(Bytes::from(buffer))
    }
}

impl<B: BlobStore + ?Sized> Uploader for MultipartUploader<B> {
    fn upload(&self, request: UploadRequest) -> BoxStream<'_, UploadResult> {
        let cursor = Cursor {
            request,
            file: None,
            done: false,
        };
        stream::unfold(cursor, move |mut cursor| async move {
            if cursor.done {
                return None;
            }
            let result = self.advance(&mut cursor).await;
            cursor.done = result.is_terminal();
            Some((result, cursor))
        })
        .boxed()
    }
}

/// A vanished or truncated source file cannot be fixed by retrying.
fn local_file_error(path: &str, err: io::Error) -> UploadError {
    match err.kind() {
        io::ErrorKind::NotFound => UploadError::fatal(format!("local file `{path}` is missing")),
        io::ErrorKind::UnexpectedEof => {
            UploadError::fatal(format!("local file `{path}` is shorter than recorded"))
        }
        _ => UploadError::transient(format!("reading `{path}`: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaptureType, Resource};
    use crate::services::deriver::derive_upload_request;
    use std::sync::Mutex;

    /// Records every call and fails the configured part once.
    #[derive(Default)]
    struct RecordingStore {
        parts: Mutex<Vec<(u32, usize)>>,
        fail_part: Option<u32>,
        completed: Mutex<u32>,
    }

    #[async_trait]
    impl BlobStore for RecordingStore {
        async fn create_multipart_upload(&self, _url: &str) -> Result<String, UploadError> {
            Ok("upload-1".into())
        }

        async fn upload_part(
            &self,
            _url: &str,
            _upload_id: &str,
            part_number: u32,
            data: Bytes,
        ) -> Result<String, UploadError> {
            if self.fail_part == Some(part_number) {
                return Err(UploadError::transient("connection reset"));
            }
            self.parts.lock().unwrap().push((part_number, data.len()));
            Ok(format!("etag-{part_number}"))
        }

        async fn complete_multipart_upload(
            &self,
            _url: &str,
            _id: &str,
        ) -> Result<(), UploadError> {
            *self.completed.lock().unwrap() += 1;
            Ok(())
        }

        async fn abort_multipart_upload(&self, _url: &str, _id: &str) -> Result<(), UploadError> {
            Ok(())
        }

        async fn delete_object(&self, _url: &str) -> Result<(), UploadError> {
            Ok(())
        }
    }

    fn request_for(dir: &tempfile::TempDir, len: usize) -> UploadRequest {
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, vec![7u8; len]).unwrap();
        let resource = Resource::new(
            "c1",
            CaptureType::Image,
            "bin",
            path.to_string_lossy(),
            len as i64,
            "https://x/r1",
        );
        derive_upload_request(&resource)
    }

    #[test]
    fn test_tail_is_merged_into_last_part() {
        let store = Arc::new(RecordingStore::default());
        let uploader = MultipartUploader::with_part_sizes(store, 6, 5);
        assert_eq!(uploader.next_part_size(20), 6);
        assert_eq!(uploader.next_part_size(11), 6);
        assert_eq!(uploader.next_part_size(10), 10);
        assert_eq!(uploader.next_part_size(3), 3);
    }

    #[tokio::test]
    async fn test_emits_started_parts_and_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let uploader = MultipartUploader::with_part_sizes(store.clone(), 100, 0);

        let results: Vec<_> = uploader.upload(request_for(&dir, 250)).collect().await;
        assert_eq!(results.len(), 5);
        assert!(matches!(results[0], UploadResult::Started { .. }));
        assert!(matches!(
            results[3],
            UploadResult::Success { part_number: 3, bytes_uploaded: 50, .. }
        ));
        assert!(matches!(results[4], UploadResult::Completed { .. }));
        assert_eq!(*store.parts.lock().unwrap(), vec![(1, 100), (2, 100), (3, 50)]);
        assert_eq!(*store.completed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resumes_from_checkpoint_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let uploader = MultipartUploader::with_part_sizes(store.clone(), 100, 0);

        let mut request = request_for(&dir, 300);
        request.upload_id = Some("upload-1".into());
        request.bytes_uploaded = 100;
        request.next_part = 2;

        let results: Vec<_> = uploader.upload(request).collect().await;
        assert!(!results.iter().any(|r| matches!(r, UploadResult::Started { .. })));
        assert_eq!(*store.parts.lock().unwrap(), vec![(2, 100), (3, 100)]);
    }

    #[tokio::test]
    async fn test_stops_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore {
            fail_part: Some(2),
            ..Default::default()
        });
        let uploader = MultipartUploader::with_part_sizes(store.clone(), 100, 0);

        let results: Vec<_> = uploader.upload(request_for(&dir, 300)).collect().await;
        assert_eq!(results.len(), 3);
        assert!(matches!(
            &results[2],
            UploadResult::Failure { error: UploadError::Transient(_), .. }
        ));
        assert_eq!(*store.completed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = request_for(&dir, 10);
        request.file_path = dir.path().join("gone.bin").to_string_lossy().into_owned();
        let store = Arc::new(RecordingStore::default());
        let uploader = MultipartUploader::with_part_sizes(store, 100, 0);

        let results: Vec<_> = uploader.upload(request).collect().await;
        assert!(matches!(
            results.last(),
            Some(UploadResult::Failure { error: UploadError::Fatal(_), .. })
        ));
    }
}
