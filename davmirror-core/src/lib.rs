mod client;
mod listing;

pub use client::{Credentials, DavClient, DavError, ErrorClass, NoProgress, ProgressSink};
pub use listing::{
    ACCOUNT_ROOT_MARKER, Entry, EntryKind, EntryState, FileSize, ListingError, PARENT_TITLE,
    SERVER_PATH_MARKER, account_root_path, decode_segment, parent_path, parse_listing,
    size_bucket,
};
pub use reqwest::StatusCode;
