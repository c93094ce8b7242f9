//! Multistatus listing parser.
//!
//! The grammar is deliberately small: a body is a sequence of opaque
//! `<d:response>` .. `</d:response>` blocks, and each block is searched for a
//! fixed set of leaf fields written as `<tag>value</tag>`. Nothing else in
//! the document is interpreted. Self-closing tags (`<d:getcontenttype/>`, as
//! servers emit them inside 404 propstats) simply yield an empty value.

use std::borrow::Cow;
use std::time::SystemTime;

use thiserror::Error;

/// Prefix of every account tree on the server; the next segment is the user id.
pub const ACCOUNT_ROOT_MARKER: &str = "/remote.php/dav/files/";
/// Everything in an href in front of this marker belongs to the server URL.
pub const SERVER_PATH_MARKER: &str = "/remote.php/";
/// Title of the synthetic entry that navigates to the parent folder.
pub const PARENT_TITLE: &str = "..";

const BLOCK_BEGIN: &str = "<d:response>";
const BLOCK_END: &str = "</d:response>";

const TAG_HREF: &str = "d:href";
const TAG_ETAG: &str = "d:getetag";
const TAG_LAST_MODIFIED: &str = "d:getlastmodified";
const TAG_CONTENT_TYPE: &str = "d:getcontenttype";
const TAG_SIZE: &str = "oc:size";
const TAG_FAVORITE: &str = "oc:favorite";

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingError {
    #[error("listing body contains no response blocks")]
    NoBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Known remotely, no local copy.
    Cloud,
    /// Present remotely and locally.
    Synced,
    /// Present locally, absent from the last remote listing.
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSize {
    pub bytes: u64,
    pub label: String,
}

impl FileSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self {
            bytes,
            label: size_bucket(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Canonical path starting at `/remote.php/`; folders end with `/`.
    pub remote_path: String,
    pub title: String,
    pub kind: EntryKind,
    pub size: Option<FileSize>,
    pub last_modified: String,
    pub etag: String,
    pub mime_type: String,
    pub favorite: bool,
    pub state: EntryState,
}

impl Entry {
    /// A file found in the cache that the remote listing did not report.
    pub fn local_only(remote_path: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            title: title.into(),
            kind: EntryKind::File,
            size: None,
            last_modified: String::new(),
            etag: String::new(),
            mime_type: String::new(),
            favorite: false,
            state: EntryState::LocalOnly,
        }
    }

    fn parent_link(remote_path: String) -> Self {
        Self {
            remote_path,
            title: PARENT_TITLE.to_string(),
            kind: EntryKind::Folder,
            size: None,
            last_modified: String::new(),
            etag: String::new(),
            mime_type: String::new(),
            favorite: false,
            state: EntryState::Cloud,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn is_parent_link(&self) -> bool {
        self.kind == EntryKind::Folder && self.title == PARENT_TITLE
    }

    pub fn modified_at(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.last_modified.trim()).ok()
    }
}

/// Parses a listing body into entries.
///
/// The first block describes the listed folder itself. It becomes a `..`
/// entry pointing at the parent folder, unless the parent would be the
/// account-root marker, in which case it is dropped.
pub fn parse_listing(body: &str) -> Result<Vec<Entry>, ListingError> {
    let mut blocks = ResponseBlocks::new(body);
    let own = blocks.next().ok_or(ListingError::NoBlocks)?;

    let mut entries = Vec::new();
    let own_path = canonical_path(&field(own, TAG_HREF));
    if let Some(parent) = parent_path(&own_path).filter(|p| p != ACCOUNT_ROOT_MARKER) {
        entries.push(Entry::parent_link(parent));
    }
    entries.extend(blocks.map(entry_from_block));
    Ok(entries)
}

/// Human size label: `< 1 KB`, otherwise one decimal in KB, MB or GB.
pub fn size_bucket(bytes: u64) -> String {
    if bytes < KIB {
        return "< 1 KB".to_string();
    }
    let (divisor, unit) = if bytes < MIB {
        (KIB, "KB")
    } else if bytes < GIB {
        (MIB, "MB")
    } else {
        (GIB, "GB")
    };
    let scaled = (bytes as f64 / divisor as f64 * 10.0).round() / 10.0;
    format!("{scaled:.1} {unit}")
}

/// Root folder of an account, e.g. `/remote.php/dav/files/alice/`.
pub fn account_root_path(user_id: &str) -> String {
    format!("{ACCOUNT_ROOT_MARKER}{}/", user_id.trim_matches('/'))
}

/// Folder containing `path`, with a trailing slash. `None` for `/` or empty input.
pub fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let cut = trimmed.rfind('/')?;
    Some(trimmed[..=cut].to_string())
}

/// Percent-decodes a path or segment, keeping the input when it is not UTF-8.
pub fn decode_segment(value: &str) -> String {
    urlencoding::decode(value)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| value.to_string())
}

fn entry_from_block(block: &str) -> Entry {
    let remote_path = canonical_path(&field(block, TAG_HREF));
    let kind = if remote_path.ends_with('/') {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    let (size, mime_type) = match kind {
        EntryKind::File => {
            let bytes = field(block, TAG_SIZE).trim().parse::<u64>().unwrap_or(0);
            (
                Some(FileSize::from_bytes(bytes)),
                field(block, TAG_CONTENT_TYPE).into_owned(),
            )
        }
        EntryKind::Folder => (None, String::new()),
    };

    Entry {
        title: title_for(&remote_path),
        kind,
        size,
        last_modified: field(block, TAG_LAST_MODIFIED).into_owned(),
        etag: field(block, TAG_ETAG).into_owned(),
        mime_type,
        favorite: field(block, TAG_FAVORITE).trim() == "1",
        state: EntryState::Cloud,
        remote_path,
    }
}

fn canonical_path(href: &str) -> String {
    match href.find(SERVER_PATH_MARKER) {
        Some(idx) => href[idx..].to_string(),
        None => href.to_string(),
    }
}

fn title_for(remote_path: &str) -> String {
    let trimmed = remote_path.strip_suffix('/').unwrap_or(remote_path);
    let last = trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default();
    decode_segment(last)
}

/// First `<tag>value</tag>` inside `block`, entity-decoded; empty when absent.
fn field<'a>(block: &'a str, tag: &str) -> Cow<'a, str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let Some(start) = block.find(&open).map(|idx| idx + open.len()) else {
        return Cow::Borrowed("");
    };
    let Some(len) = block[start..].find(&close) else {
        return Cow::Borrowed("");
    };
    decode_entities(&block[start..start + len])
}

fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    Cow::Owned(
        value
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
    )
}

struct ResponseBlocks<'a> {
    rest: &'a str,
}

impl<'a> ResponseBlocks<'a> {
    fn new(body: &'a str) -> Self {
        Self { rest: body }
    }
}

impl<'a> Iterator for ResponseBlocks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.rest.find(BLOCK_BEGIN)? + BLOCK_BEGIN.len();
        let remaining = &self.rest[start..];
        match remaining.find(BLOCK_END) {
            Some(len) => {
                self.rest = &remaining[len + BLOCK_END.len()..];
                Some(&remaining[..len])
            }
            // An unterminated block runs to the end of the body.
            None => {
                self.rest = "";
                Some(remaining)
            }
        }
    }
}
