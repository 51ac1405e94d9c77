//! Page sizing and page token policy shared by every entity store.

use serde::Serialize;

use provenance_core::config::PaginationConfig;
use provenance_core::error::Result;

use crate::cursor::CursorCodec;

/// Marker every listing starts after.
pub const START_MARKER: i64 = 0;

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    /// Empty when the listing is exhausted.
    pub next_page_token: String,
    /// Rows matching the scope and filter when the page was read.
    pub total_size: u64,
}

impl<T> ListPage<T> {
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_empty()
    }
}

/// Pagination policy: token codec plus page size bounds.
#[derive(Debug)]
pub struct Pagination {
    codec: CursorCodec,
    strict_page_tokens: bool,
    default_page_size: u32,
    max_page_size: u32,
}

impl Pagination {
    pub fn new(codec: CursorCodec, config: &PaginationConfig) -> Self {
        Self {
            codec,
            strict_page_tokens: config.strict_page_tokens,
            default_page_size: config.default_page_size.max(1),
            max_page_size: config.max_page_size.max(1),
        }
    }

    /// Build the codec from `config.key`, generating a key when unset.
    pub fn from_config(config: &PaginationConfig) -> Result<Self> {
        let codec = CursorCodec::from_config(config.key.as_deref())?;
        Ok(Self::new(codec, config))
    }

    pub fn codec(&self) -> &CursorCodec {
        &self.codec
    }

    /// Marker a listing resumes after.
    ///
    /// Unreadable tokens restart from the beginning unless strict page
    /// tokens are configured, in which case they are rejected.
    pub fn watermark(&self, page_token: &str) -> Result<i64> {
        if self.strict_page_tokens {
            Ok(self.codec.decode_strict(page_token)?.unwrap_or(START_MARKER))
        } else {
            Ok(self.codec.decode(page_token, START_MARKER))
        }
    }

    /// Effective page size: 0 means the default, and the maximum caps it.
    pub fn page_size(&self, requested: u32) -> u32 {
        match requested {
            0 => self.default_page_size.min(self.max_page_size),
            n => n.min(self.max_page_size),
        }
    }

    /// Token for the page after `last_marker`, or empty when nothing remains.
    pub fn next_token(&self, last_marker: Option<i64>, remaining: u64) -> Result<String> {
        match last_marker {
            Some(marker) if remaining > 0 => self.codec.encode(marker),
            _ => Ok(String::new()),
        }
    }
}
