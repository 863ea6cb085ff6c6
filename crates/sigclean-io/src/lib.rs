//! sigclean-io: browser I/O for sigclean.
//!
//! Handles file uploads, web worker communication, Blob downloads, and
//! PNG preview URLs. Everything here needs a browser environment at
//! runtime; the pure logic lives in `sigclean-pipeline` and
//! `sigclean-export`.

pub mod download;
pub mod raster;
pub mod upload;
pub mod worker;

pub use download::{DownloadError, download_export, trigger_download};
pub use raster::{RasterError, revoke_blob_url, rgba_image_to_blob_url};
pub use upload::{UploadError, UploadedFile, read_upload};
pub use worker::{PipelineWorker, WorkerError};
