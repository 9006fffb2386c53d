pub mod deriver;
pub mod local_blobstore;
pub mod record_store;
pub mod sync_engine;
pub mod upload_driver;
pub mod uploader;
