//! Skiptoken codec
//!
//! A skiptoken is a bincode-encoded `Cursor` wrapped in unpadded URL-safe
//! base64. It records how far paging has progressed, the page size it was
//! minted with and the sort it is only valid under.

use std::borrow::Borrow;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::PaginationMode;
use crate::core::errors::{ODataError, Result};
use crate::core::value::{Record, Value};
use crate::engine::plan::{BoundExpr, QueryPlan, SortKey};
use crate::ql::ast::CompareOp;
use crate::ql::options::SortDirection;
use crate::ql::segmenter::split_query;

const CURSOR_VERSION: u8 = 1;

/// Decoded skiptoken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub version: u8,
    /// Rows delivered by earlier pages
    pub served: u64,
    /// Sort key of the last row delivered; keyset paging only
    pub key: Option<Vec<Value>>,
    pub page_size: u64,
    pub signature: String,
}

impl Cursor {
    /// Cursor positioned by row count
    pub fn offset<S: Into<String>>(served: u64, page_size: u64, signature: S) -> Self {
        Cursor {
            version: CURSOR_VERSION,
            served,
            key: None,
            page_size,
            signature: signature.into(),
        }
    }

    /// Cursor positioned after the row with sort key `key`
    pub fn keyset<S: Into<String>>(served: u64, key: Vec<Value>, page_size: u64, signature: S) -> Self {
        Cursor {
            version: CURSOR_VERSION,
            served,
            key: Some(key),
            page_size,
            signature: signature.into(),
        }
    }

    pub fn mode(&self) -> PaginationMode {
        match self.key {
            Some(_) => PaginationMode::Keyset,
            None => PaginationMode::Offset,
        }
    }

    /// Encode into an opaque, URL-safe token
    pub fn encode(&self) -> Result<String> {
        let bytes = bincode::serialize(self)
            .map_err(|e| ODataError::InvalidOperation(format!("cannot encode cursor: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a token produced by `encode`
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim())
            .map_err(|_| ODataError::InvalidCursor("not valid base64url".to_string()))?;
        let cursor: Cursor = bincode::deserialize(&bytes)
            .map_err(|_| ODataError::InvalidCursor("malformed token".to_string()))?;

        if cursor.version != CURSOR_VERSION {
            return Err(ODataError::InvalidCursor(format!("unsupported version {}", cursor.version)));
        }
        if cursor.page_size == 0 {
            return Err(ODataError::InvalidCursor("page size is zero".to_string()));
        }
        Ok(cursor)
    }

    /// Reject a cursor replayed under a sort it was not minted for
    pub fn check_signature(&self, signature: &str) -> Result<()> {
        if self.signature != signature {
            return Err(ODataError::InvalidCursor(format!(
                "token was issued for sort '{}', request sorts by '{}'", self.signature, signature
            )));
        }
        Ok(())
    }
}

/// Canonical text of a sort, e.g. `+age,-name,+id`
pub fn sort_signature(order: &[SortKey]) -> String {
    order.iter()
        .map(|key| {
            let sign = match key.direction {
                SortDirection::Asc => '+',
                SortDirection::Desc => '-',
            };
            format!("{}{}", sign, key.field)
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Predicate selecting rows strictly after `key` in the given order:
/// `k1 > v1 or (k1 eq v1 and k2 > v2) or ...`
pub fn keyset_boundary(order: &[SortKey], key: &[Value]) -> Result<BoundExpr> {
    if order.is_empty() || order.len() != key.len() {
        return Err(ODataError::InvalidCursor(format!(
            "token carries {} key value(s) for {} sort key(s)", key.len(), order.len()
        )));
    }

    let mut branches = Vec::with_capacity(order.len());
    for i in 0..order.len() {
        let mut terms: Vec<Option<BoundExpr>> = order[..i].iter()
            .zip(key)
            .map(|(sort, value)| Some(BoundExpr::field_eq(sort.field.clone(), value.clone())))
            .collect();

        let op = match order[i].direction {
            SortDirection::Asc => CompareOp::Gt,
            SortDirection::Desc => CompareOp::Lt,
        };
        terms.push(Some(BoundExpr::compare(
            op,
            BoundExpr::Field(order[i].field.clone()),
            BoundExpr::Literal(key[i].clone()),
        )));

        if let Some(branch) = BoundExpr::all(terms) {
            branches.push(branch);
        }
    }

    BoundExpr::any(branches)
        .ok_or_else(|| ODataError::InvalidCursor("empty keyset boundary".to_string()))
}

/// Mint the skiptoken for the page after `rows`, or `None` when `rows` is
/// the last page. `rows` must still carry the plan's implicit fields.
pub fn next_skiptoken<R: Borrow<Record>>(plan: &QueryPlan, rows: &[R]) -> Result<Option<String>> {
    let page = match &plan.pagination {
        Some(page) => page,
        None => return Ok(None),
    };

    let delivered = rows.len() as u64;
    if delivered == 0 || plan.limit.map_or(false, |limit| delivered < limit) {
        return Ok(None);
    }

    let served = page.served.checked_add(delivered)
        .ok_or_else(|| ODataError::InvalidCursor("served row count overflows".to_string()))?;
    if page.remaining.map_or(false, |remaining| delivered >= remaining) {
        return Ok(None);
    }

    let cursor = match page.mode {
        PaginationMode::Offset => Cursor::offset(served, page.page_size, page.signature.clone()),
        PaginationMode::Keyset => {
            let last = match rows.last() {
                Some(last) => last,
                None => return Ok(None),
            };
            let key = plan.order.iter()
                .map(|sort| last.borrow().get(&sort.field.field).cloned().ok_or_else(|| {
                    ODataError::InvalidOperation(format!("row lacks sort field {}", sort.field))
                }))
                .collect::<Result<Vec<_>>>()?;
            Cursor::keyset(served, key, page.page_size, page.signature.clone())
        },
    };

    debug!("minted skiptoken after {} row(s) of {}", served, plan.entity);
    cursor.encode().map(Some)
}

/// Rewrite `url` so that its `$skiptoken` is `token` (or removed)
pub fn replace_skiptoken(url: &str, token: Option<&str>) -> Result<String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, query),
        None => (url, ""),
    };

    let mut parts: Vec<String> = split_query(query)?
        .iter()
        .filter(|segment| segment.assignment().0 != "$skiptoken")
        .map(|segment| segment.text.to_string())
        .collect();
    if let Some(token) = token {
        parts.push(format!("$skiptoken={}", token));
    }

    if parts.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{}?{}", base, parts.join("&")))
    }
}
