use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{self, Validators};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multierror::MultiError;
use crate::store::{StoreCollection, StoreItem};
use crate::DavResult;

impl crate::DavHandler {
    // Delete `item` (a child of `parent`), children first.
    // Returns true if the item is gone.
    pub(crate) fn delete_items<'a>(
        &'a self,
        errors: &'a mut MultiError,
        parent: &'a dyn StoreCollection,
        item: Box<dyn StoreItem>,
        path: &'a DavPath,
        tokens: &'a [String],
    ) -> BoxFuture<'a, bool> {
        async move {
            if self.lock_conflict(item.as_ref(), tokens) {
                errors.add(path, StatusCode::LOCKED);
                return false;
            }

            if let Some(coll) = item.as_collection() {
                let children = match coll.get_items().await {
                    Ok(children) => children,
                    Err(e) => {
                        errors.add(path, e.statuscode());
                        return false;
                    }
                };
                let mut all_gone = true;
                for child in children {
                    let cpath = path.push_segment(&child.name(), child.is_collection());
                    if !self.delete_items(errors, coll, child, &cpath, tokens).await {
                        all_gone = false;
                    }
                }
                // the failures below us are reported, the collection itself is kept.
                if !all_gone {
                    return false;
                }
            }

            trace!("delete {}", path);
            match parent.delete_item(&item.name()).await {
                Ok(()) => {
                    if let Some(ls) = item.locking_manager() {
                        ls.release_all(item.as_ref());
                    }
                    true
                }
                Err(e) => {
                    errors.add(path, e.statuscode());
                    false
                }
            }
        }
        .boxed()
    }

    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1: DELETE always acts as if "Depth: infinity" was used.
        if let Some(depth) = self.depth(req)? {
            if depth != Depth::Infinity {
                debug!("DELETE: bad depth {:?}", depth);
                return Err(StatusCode::BAD_REQUEST.into());
            }
        }

        let mut path = self.path(req)?;
        if path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let tokens = self.if_tokens(req)?;

        let parent = self
            .store
            .get_collection(&path.parent())
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let item = parent
            .get_item(&path.file_name())
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        if item.is_collection() {
            path.add_slash();
        }

        let validators = Validators::of(item.as_ref()).await;
        if let Some(status) = conditional::check(req, Some(&validators)) {
            return Err(status.into());
        }
        self.check_locked(Some(item.as_ref()), &path, &tokens)
            .await?;

        let mut errors = MultiError::new();
        self.delete_items(&mut errors, parent.as_ref(), item, &path, &tokens)
            .await;
        errors.finish(&path, StatusCode::NO_CONTENT)
    }
}
