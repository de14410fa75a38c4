use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::errors::DavError;
use crate::store::StoreError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        if path.is_root() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        let parent = self
            .store
            .get_collection(&path.parent())
            .await?
            .ok_or(DavError::Status(StatusCode::CONFLICT))?;
        let name = path.file_name();
        if parent.get_item(&name).await?.is_some() {
            debug!("MKCOL: {} already exists", path);
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let tokens = self.if_tokens(req)?;
        self.check_locked(None, &path, &tokens).await?;

        let placed = match parent.create_collection(&name, false).await {
            Ok(placed) => placed,
            // lost a race with another request.
            Err(StoreError::Exists) => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            Err(e) => return Err(e.into()),
        };

        let mut res = Response::new(Body::empty());
        *res.status_mut() = placed.status();
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
