//! sigclean-export: output encoders for sigclean (sans-IO).
//!
//! Turns the session's current image into PNG bytes and names the
//! download. Nothing here touches the filesystem or the browser.

pub mod png;

pub use png::{ExportError, Exported, default_filename, encode_png, export_session};
