use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multierror::MultiError;
use crate::store::{StoreCollection, StoreItem};
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // Copy `src` into `dest_parent` as `dest_name`, then its children.
    // A failed node is recorded under its destination URL and not descended into.
    #[allow(clippy::too_many_arguments)]
    fn copy_items<'a>(
        &'a self,
        errors: &'a mut MultiError,
        src: &'a dyn StoreItem,
        dest_parent: &'a dyn StoreCollection,
        dest_name: &'a str,
        dest_path: &'a DavPath,
        depth: Depth,
        overwrite: bool,
    ) -> BoxFuture<'a, ()> {
        async move {
            trace!("copy {} to {}", src.name(), dest_path);
            let placed = match src.copy_to(dest_parent, dest_name, overwrite).await {
                Ok(placed) => placed,
                Err(e) => {
                    errors.add(dest_path, e.statuscode());
                    return;
                }
            };

            let coll = match src.as_collection() {
                Some(coll) if depth == Depth::Infinity => coll,
                _ => return,
            };
            let new_coll = match placed.entry.into_collection() {
                Some(c) => c,
                None => {
                    errors.add(dest_path, StatusCode::INTERNAL_SERVER_ERROR);
                    return;
                }
            };
            let children = match coll.get_items().await {
                Ok(children) => children,
                Err(e) => {
                    errors.add(dest_path, e.statuscode());
                    return;
                }
            };
            for child in children {
                let name = child.name();
                let cpath = dest_path.push_segment(&name, child.is_collection());
                self.copy_items(
                    errors,
                    child.as_ref(),
                    new_coll.as_ref(),
                    &name,
                    &cpath,
                    depth,
                    overwrite,
                )
                .await;
            }
        }
        .boxed()
    }

    // Lock check for everything below a collection that is about to be
    // moved. Locked items are recorded and not descended into. Visited
    // items end up in `visited`.
    fn check_subtree<'a>(
        &'a self,
        errors: &'a mut MultiError,
        coll: &'a dyn StoreCollection,
        path: &'a DavPath,
        tokens: &'a [String],
        visited: &'a mut Vec<(DavPath, Box<dyn StoreItem>)>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let children = match coll.get_items().await {
                Ok(children) => children,
                Err(e) => {
                    errors.add(path, e.statuscode());
                    return;
                }
            };
            for child in children {
                let cpath = path.push_segment(&child.name(), child.is_collection());
                if self.lock_conflict(child.as_ref(), tokens) {
                    errors.add(&cpath, StatusCode::LOCKED);
                    continue;
                }
                if let Some(c) = child.as_collection() {
                    self.check_subtree(errors, c, &cpath, tokens, visited).await;
                }
                visited.push((cpath, child));
            }
        }
        .boxed()
    }

    // Move `src` out of `src_parent`. Collections that cannot be moved in
    // one step are recreated at the destination, their children moved one
    // by one, and the source removed only if all of that succeeded.
    #[allow(clippy::too_many_arguments)]
    fn move_items<'a>(
        &'a self,
        errors: &'a mut MultiError,
        src_parent: &'a dyn StoreCollection,
        src: Box<dyn StoreItem>,
        dest_parent: &'a dyn StoreCollection,
        dest_name: &'a str,
        dest_path: &'a DavPath,
        overwrite: bool,
    ) -> BoxFuture<'a, ()> {
        async move {
            let name = src.name();
            let fast = match src.as_collection() {
                Some(coll) => coll.supports_fast_move(dest_parent, dest_name, overwrite),
                None => true,
            };

            if fast {
                trace!("move {} to {}", name, dest_path);
                match src_parent
                    .move_item(&name, dest_parent, dest_name, overwrite)
                    .await
                {
                    Ok(_) => {
                        // locks do not travel with the resource.
                        if let Some(ls) = src.locking_manager() {
                            ls.release_all(src.as_ref());
                        }
                    }
                    Err(e) => errors.add(dest_path, e.statuscode()),
                }
                return;
            }

            trace!("move {} to {} by copying", name, dest_path);
            let coll = match src.as_collection() {
                Some(coll) => coll,
                None => return,
            };
            let placed = match src.copy_to(dest_parent, dest_name, overwrite).await {
                Ok(placed) => placed,
                Err(e) => {
                    errors.add(dest_path, e.statuscode());
                    return;
                }
            };
            let new_coll = match placed.entry.into_collection() {
                Some(c) => c,
                None => {
                    errors.add(dest_path, StatusCode::INTERNAL_SERVER_ERROR);
                    return;
                }
            };
            let children = match coll.get_items().await {
                Ok(children) => children,
                Err(e) => {
                    errors.add(dest_path, e.statuscode());
                    return;
                }
            };
            let before = errors.len();
            for child in children {
                let cname = child.name();
                let cpath = dest_path.push_segment(&cname, child.is_collection());
                self.move_items(
                    errors,
                    coll,
                    child,
                    new_coll.as_ref(),
                    &cname,
                    &cpath,
                    overwrite,
                )
                .await;
            }
            if errors.len() != before {
                return;
            }
            match src_parent.delete_item(&name).await {
                Ok(()) => {
                    if let Some(ls) = src.locking_manager() {
                        ls.release_all(src.as_ref());
                    }
                }
                Err(e) => errors.add(dest_path, e.statuscode()),
            }
        }
        .boxed()
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let is_move = method == DavMethod::MOVE;

        // COPY supports 0 and infinity, MOVE only infinity.
        let depth = match self.depth(req)? {
            None | Some(Depth::Infinity) => Depth::Infinity,
            Some(Depth::Zero) if !is_move => Depth::Zero,
            Some(d) => {
                debug!("{}: bad depth {:?}", method.as_str(), d);
                return Err(StatusCode::BAD_REQUEST.into());
            }
        };
        let overwrite = req
            .headers()
            .typed_try_get::<davheaders::Overwrite>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?
            .map(|o| o.0)
            .unwrap_or(true);

        let mut path = self.path(req)?;
        let mut dest = self.destination(req)?;
        if path.same_resource(&dest) {
            debug!("{}: source and destination are the same", method.as_str());
            return Err(StatusCode::FORBIDDEN.into());
        }
        if is_move && path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let tokens = self.if_tokens(req)?;

        let src = self
            .store
            .get_item(&path)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        if src.is_collection() {
            path.add_slash();
            dest.add_slash();
        } else {
            dest.remove_slash();
        }

        // a collection cannot be copied or moved into itself, nor onto an ancestor.
        if path.contains(&dest) || dest.contains(&path) {
            debug!("{}: {} and {} overlap", method.as_str(), path, dest);
            return Err(StatusCode::FORBIDDEN.into());
        }

        let dest_parent = self
            .store
            .get_collection(&dest.parent())
            .await?
            .ok_or(DavError::Status(StatusCode::CONFLICT))?;
        let dest_name = dest.file_name();

        // what lies below a moved collection, so its locks can be released.
        let mut moved = Vec::new();
        if is_move {
            self.check_locked(Some(src.as_ref()), &path, &tokens)
                .await?;
            if let Some(coll) = src.as_collection() {
                let mut errors = MultiError::new();
                self.check_subtree(&mut errors, coll, &path, &tokens, &mut moved)
                    .await;
                if errors.has_items() {
                    return errors.finish(&path, StatusCode::NO_CONTENT);
                }
            }
        }

        // an existing destination is removed first.
        let existing = dest_parent.get_item(&dest_name).await?;
        let existed = existing.is_some();
        if let Some(existing) = existing {
            if !overwrite {
                debug!("{}: {} exists", method.as_str(), dest);
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
            self.check_locked(Some(existing.as_ref()), &dest, &tokens)
                .await?;
            let mut errors = MultiError::new();
            let mut epath = dest.clone();
            if existing.is_collection() {
                epath.add_slash();
            }
            self.delete_items(&mut errors, dest_parent.as_ref(), existing, &epath, &tokens)
                .await;
            if errors.has_items() {
                return errors.finish(&dest, StatusCode::NO_CONTENT);
            }
        } else {
            self.check_locked(None, &dest, &tokens).await?;
        }

        let mut errors = MultiError::new();
        if is_move {
            let src_parent = self
                .store
                .get_collection(&path.parent())
                .await?
                .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
            self.move_items(
                &mut errors,
                src_parent.as_ref(),
                src,
                dest_parent.as_ref(),
                &dest_name,
                &dest,
                overwrite,
            )
            .await;
        } else {
            self.copy_items(
                &mut errors,
                src.as_ref(),
                dest_parent.as_ref(),
                &dest_name,
                &dest,
                depth,
                overwrite,
            )
            .await;
        }

        // locks do not follow a resource to its new URL.
        for (mpath, item) in &moved {
            if let Ok(None) = self.store.get_item(mpath).await {
                if let Some(ls) = item.locking_manager() {
                    ls.release_all(item.as_ref());
                }
            }
        }

        let ok = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        errors.finish(&dest, ok)
    }
}
