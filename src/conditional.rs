//! Validators (ETag, Last-Modified) and the HTTP precondition checks on them.
use std::time::SystemTime;

use headers::{
    ETag, Header, HeaderMapExt, IfMatch, IfModifiedSince, IfNoneMatch, IfRange,
    IfUnmodifiedSince, LastModified,
};
use http::{HeaderValue, Method, Request, StatusCode};

use crate::store::{PropName, StoreItem};

/// The validators of an existing item, as far as its property manager knows them.
#[derive(Debug, Clone, Default)]
pub(crate) struct Validators {
    pub etag: Option<ETag>,
    pub last_modified: Option<LastModified>,
}

impl Validators {
    /// Read `getetag` and `getlastmodified` from the item's property manager.
    /// Missing or unparsable values are simply absent.
    pub(crate) async fn of(item: &dyn StoreItem) -> Validators {
        let pm = match item.property_manager() {
            Some(pm) => pm,
            None => return Validators::default(),
        };
        let etag = match pm.get_property(&PropName::dav("getetag"), false).await {
            Ok(Some(e)) => e.get_text().and_then(|t| t.parse::<ETag>().ok()),
            _ => None,
        };
        let last_modified = match pm.get_property(&PropName::dav("getlastmodified"), false).await {
            Ok(Some(e)) => e.get_text().and_then(|t| parse_httpdate(&t)),
            _ => None,
        };
        Validators {
            etag,
            last_modified,
        }
    }

    fn modified(&self) -> Option<SystemTime> {
        self.last_modified.as_ref().map(|lm| SystemTime::from(lm.clone()))
    }
}

fn parse_httpdate(s: &str) -> Option<LastModified> {
    let value = HeaderValue::from_str(s).ok()?;
    LastModified::decode(&mut std::iter::once(&value)).ok()
}

/// Evaluate the precondition headers of a request.
///
/// `validators` is `None` when the target does not exist. Returns the
/// status to answer with if a precondition fails.
pub(crate) fn check<B>(req: &Request<B>, validators: Option<&Validators>) -> Option<StatusCode> {
    let headers = req.headers();
    let is_read = req.method() == Method::GET || req.method() == Method::HEAD;

    if let Some(if_match) = headers.typed_get::<IfMatch>() {
        let passes = match validators.and_then(|v| v.etag.as_ref()) {
            Some(etag) => if_match.precondition_passes(etag),
            // "If-Match: *" passes for any existing entity.
            None => validators.is_some() && if_match == IfMatch::any(),
        };
        if !passes {
            debug!("If-Match precondition failed");
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(since) = headers.typed_get::<IfUnmodifiedSince>() {
        if let Some(modified) = validators.and_then(|v| v.modified()) {
            if !since.precondition_passes(modified) {
                return Some(StatusCode::PRECONDITION_FAILED);
            }
        }
    }

    if let Some(if_none_match) = headers.typed_get::<IfNoneMatch>() {
        let passes = match validators {
            None => true,
            Some(v) => match v.etag.as_ref() {
                Some(etag) => if_none_match.precondition_passes(etag),
                None => if_none_match != IfNoneMatch::any(),
            },
        };
        if !passes {
            debug!("If-None-Match matched");
            return Some(if is_read {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::PRECONDITION_FAILED
            });
        }
    } else if is_read {
        if let Some(since) = headers.typed_get::<IfModifiedSince>() {
            if let Some(modified) = validators.and_then(|v| v.modified()) {
                if !since.is_modified(modified) {
                    return Some(StatusCode::NOT_MODIFIED);
                }
            }
        }
    }

    None
}

/// Should a `Range` header be honored. An `If-Range` that does not
/// match the current validators means the full content must be sent.
pub(crate) fn range_applies<B>(req: &Request<B>, validators: &Validators) -> bool {
    match req.headers().typed_get::<IfRange>() {
        None => true,
        Some(if_range) => {
            !if_range.is_modified(validators.etag.as_ref(), validators.last_modified.as_ref())
        }
    }
}
