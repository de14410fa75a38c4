use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davheaders::{self, Depth};
use crate::errors::DavError;
use crate::ls::{self, ActiveLock, LockRequest, LockScope, LockTimeout, LockType};
use crate::store::{StoreCollection, StoreItem};
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

// scope, type and owner from a <D:lockinfo> body.
fn parse_lockinfo(root: &Element) -> DavResult<(LockScope, LockType, Option<Element>)> {
    if !root.is_dav("lockinfo") {
        return Err(DavError::XmlParseError);
    }
    let scope = root
        .dav_child("lockscope")
        .and_then(|s| s.child_elems_iter().next())
        .ok_or(DavError::XmlParseError)?;
    let scope = if scope.is_dav("exclusive") {
        LockScope::Exclusive
    } else if scope.is_dav("shared") {
        LockScope::Shared
    } else {
        return Err(DavError::XmlParseError);
    };
    let locktype = root
        .dav_child("locktype")
        .and_then(|t| t.child_elems_iter().next())
        .ok_or(DavError::XmlParseError)?;
    if !locktype.is_dav("write") {
        return Err(DavError::XmlParseError);
    }
    let owner = root.dav_child("owner").cloned();
    Ok((scope, LockType::Write, owner))
}

fn lock_response(status: StatusCode, lock: &ActiveLock) -> DavResult<Response<Body>> {
    let prop = Element::new2("D:prop").child(ls::lockdiscovery(std::slice::from_ref(lock)));
    xmltree_ext::xml_response(status, &prop)
}

impl crate::DavHandler {
    // All active locks strictly below `coll`.
    fn subtree_locks<'a>(
        &'a self,
        coll: &'a dyn StoreCollection,
        out: &'a mut Vec<ActiveLock>,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            for child in coll.get_items().await? {
                if let Some(ls) = child.locking_manager() {
                    out.extend(ls.active_locks(child.as_ref()));
                }
                if let Some(c) = child.as_collection() {
                    self.subtree_locks(c, out).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    // A deep lock on a collection must also be compatible with the
    // locks held anywhere below it.
    async fn lock_item(&self, item: &dyn StoreItem, request: LockRequest) -> DavResult<ActiveLock> {
        let lm = item
            .locking_manager()
            .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
        if let (true, Some(coll)) = (request.deep, item.as_collection()) {
            let mut below = Vec::new();
            self.subtree_locks(coll, &mut below).await?;
            if ls::conflicts(request.scope, below.iter().map(|l| l.scope)) {
                debug!("LOCK: {} has locked members", request.lock_root);
                return Err(StatusCode::LOCKED.into());
            }
        }
        lm.lock(item, request)
            .map_err(|e| DavError::Status(e.statuscode()))
    }

    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let deep = match self.depth(req)? {
            None | Some(Depth::Infinity) => true,
            Some(Depth::Zero) => false,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        // the first value the client listed wins.
        let timeout = req
            .headers()
            .typed_get::<davheaders::Timeout>()
            .and_then(|t| t.0.first().copied());

        let mut path = self.path(req)?;
        let tokens = self.if_tokens(req)?;

        let root = match xmltree_ext::parse_xml(xmldata)? {
            Some(root) => root,
            None => {
                // no body: a refresh of a lock named in the If: header.
                if tokens.is_empty() {
                    return Err(StatusCode::BAD_REQUEST.into());
                }
                let item = self
                    .store
                    .get_item(&path)
                    .await?
                    .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
                let ls = item
                    .locking_manager()
                    .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
                let lock = tokens
                    .iter()
                    .find_map(|t| ls.refresh(item.as_ref(), t, timeout).ok())
                    .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
                debug!("LOCK: refreshed {}", lock.token);
                return lock_response(StatusCode::OK, &lock);
            }
        };
        let (scope, lock_type, owner) = parse_lockinfo(&root)?;

        // depth-infinity locks held by the ancestors.
        let inherited = self.covering_locks(None, &path).await?;
        if ls::conflicts(scope, inherited.iter().map(|l| l.scope)) {
            debug!("LOCK: {} is locked by an ancestor", path);
            return Err(StatusCode::LOCKED.into());
        }

        // locking an unmapped URL creates an empty resource.
        let (item, created_in) = match self.store.get_item(&path).await? {
            Some(item) => (item, None),
            None => {
                let parent = self
                    .store
                    .get_collection(&path.parent())
                    .await?
                    .ok_or(DavError::Status(StatusCode::CONFLICT))?;
                let placed = parent.create_item(&path.file_name(), false).await?;
                (placed.entry, Some(parent))
            }
        };
        if item.is_collection() {
            path.add_slash();
        }

        let request = LockRequest {
            lock_type,
            scope,
            owner,
            lock_root: path.as_url_string_with_prefix(),
            deep,
            timeout: timeout.unwrap_or(LockTimeout::Infinite),
        };
        let lock = match self.lock_item(item.as_ref(), request).await {
            Ok(lock) => lock,
            Err(e) => {
                // do not leave the new empty resource behind.
                if let Some(parent) = created_in {
                    if let Err(de) = parent.delete_item(&path.file_name()).await {
                        debug!("LOCK: removing {} failed: {:?}", path, de);
                    }
                }
                return Err(e);
            }
        };

        let status = if created_in.is_some() {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        let mut res = lock_response(status, &lock)?;
        res.headers_mut()
            .typed_insert(davheaders::LockToken(lock.token.clone()));
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let token = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;

        let path = self.path(req)?;
        let item = self
            .store
            .get_item(&path)
            .await?
            .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
        let ls = item
            .locking_manager()
            .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;

        match ls.unlock(item.as_ref(), &token.0) {
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NO_CONTENT;
                res.headers_mut().typed_insert(headers::ContentLength(0));
                Ok(res)
            }
            Err(e) => {
                debug!("UNLOCK {}: {:?}", token.0, e);
                Err(e.statuscode().into())
            }
        }
    }
}
