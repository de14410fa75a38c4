use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};

use dav_engine::body::Body;
use dav_engine::store::InfiniteDepthMode;
use dav_engine::{DavHandler, DavMethodSet, DavStore, DiskStore, MemLs, MemStore};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn memstore() -> DavHandler {
    init();
    DavHandler::builder(MemStore::new(MemLs::new())).build()
}

async fn send(
    dav: &DavHandler,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> (Response<()>, Bytes) {
    let mut req = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let resp = dav.handle(req.body(body.into()).unwrap()).await;
    let (parts, mut body) = resp.into_parts();
    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk.unwrap());
    }
    (Response::from_parts(parts, ()), Bytes::from(data))
}

async fn status(
    dav: &DavHandler,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> StatusCode {
    send(dav, method, uri, headers, body).await.0.status()
}

fn text(data: &Bytes) -> String {
    String::from_utf8_lossy(data).into_owned()
}

const LOCKINFO_EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>tester</D:owner>
</D:lockinfo>"#;

const LOCKINFO_SHARED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

async fn lock(dav: &DavHandler, uri: &str, info: &'static str) -> (StatusCode, Option<String>) {
    let (resp, _) = send(dav, "LOCK", uri, &[("Timeout", "Second-600")], info).await;
    let token = resp
        .headers()
        .get("lock-token")
        .map(|v| v.to_str().unwrap().to_string());
    (resp.status(), token)
}

#[tokio::test]
async fn options() {
    let dav = memstore();
    let (resp, _) = send(&dav, "OPTIONS", "/", &[], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["dav"], "1, 2");
    let allow = resp.headers()["allow"].to_str().unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("LOCK"));

    init();
    let ro = DavHandler::builder(MemStore::new(MemLs::new()))
        .methods(DavMethodSet::WEBDAV_RO)
        .build();
    let (resp, _) = send(&ro, "OPTIONS", "/", &[], Body::empty()).await;
    assert!(!resp.headers()["allow"].to_str().unwrap().contains("PUT"));
    assert_eq!(
        status(&ro, "PUT", "/x", &[], "data").await,
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        status(&ro, "BREW", "/x", &[], Body::empty()).await,
        StatusCode::NOT_IMPLEMENTED
    );
}

#[tokio::test]
async fn put_get_delete() {
    let dav = memstore();
    assert_eq!(status(&dav, "PUT", "/a.txt", &[], "hello").await, StatusCode::CREATED);
    let (resp, body) = send(&dav, "GET", "/a.txt", &[], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body, "hello");
    assert_eq!(resp.headers()["content-length"], "5");
    assert_eq!(resp.headers()["content-type"], "text/plain");
    assert!(resp.headers().contains_key("etag"));

    let (resp, body) = send(&dav, "HEAD", "/a.txt", &[], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-length"], "5");
    assert!(body.is_empty());

    assert_eq!(status(&dav, "PUT", "/a.txt", &[], "bye").await, StatusCode::NO_CONTENT);
    assert_eq!(send(&dav, "GET", "/a.txt", &[], Body::empty()).await.1, "bye");

    assert_eq!(status(&dav, "PUT", "/no/a.txt", &[], "x").await, StatusCode::CONFLICT);
    assert_eq!(status(&dav, "DELETE", "/a.txt", &[], Body::empty()).await, StatusCode::NO_CONTENT);
    assert_eq!(status(&dav, "GET", "/a.txt", &[], Body::empty()).await, StatusCode::NOT_FOUND);
    assert_eq!(status(&dav, "DELETE", "/a.txt", &[], Body::empty()).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mkcol() {
    let dav = memstore();
    assert_eq!(status(&dav, "MKCOL", "/d", &[], Body::empty()).await, StatusCode::CREATED);
    assert_eq!(
        status(&dav, "MKCOL", "/d", &[], Body::empty()).await,
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(
        status(&dav, "MKCOL", "/x/y", &[], Body::empty()).await,
        StatusCode::CONFLICT
    );
    assert_eq!(
        status(&dav, "MKCOL", "/e", &[], "<x/>").await,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    assert_eq!(
        status(&dav, "GET", "/d/", &[], Body::empty()).await,
        StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn autoindex() {
    init();
    let dav = DavHandler::builder(MemStore::new(MemLs::new()))
        .autoindex(true)
        .build();
    status(&dav, "MKCOL", "/d", &[], Body::empty()).await;
    status(&dav, "PUT", "/d/a&b.txt", &[], "x").await;
    let (resp, body) = send(&dav, "GET", "/d/", &[], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = text(&body);
    assert!(body.contains("Index of /d/"));
    assert!(body.contains("a&amp;b.txt"));
}

#[tokio::test]
async fn ranges() {
    let dav = memstore();
    let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    status(&dav, "PUT", "/r.bin", &[], content.clone()).await;

    let (resp, body) = send(&dav, "GET", "/r.bin", &[("Range", "bytes=100-199")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()["content-range"], "bytes 100-199/1000");
    assert_eq!(resp.headers()["content-length"], "100");
    assert_eq!(&body[..], &content[100..200]);

    let (resp, body) = send(&dav, "GET", "/r.bin", &[("Range", "bytes=-10")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(&body[..], &content[990..]);

    let (resp, body) = send(&dav, "GET", "/r.bin", &[("Range", "bytes=2000-")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(resp.headers()["content-range"], "bytes */1000");
    assert!(body.is_empty());

    // a stale If-Range means the whole thing.
    let (resp, body) = send(
        &dav,
        "GET",
        "/r.bin",
        &[("Range", "bytes=0-9"), ("If-Range", "\"stale\"")],
        Body::empty(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body.len(), 1000);
}

#[tokio::test]
async fn conditionals() {
    let dav = memstore();
    status(&dav, "PUT", "/c.txt", &[], "v1").await;
    let (resp, _) = send(&dav, "GET", "/c.txt", &[], Body::empty()).await;
    let etag = resp.headers()["etag"].to_str().unwrap().to_string();

    let (resp, body) = send(&dav, "GET", "/c.txt", &[("If-None-Match", etag.as_str())], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(resp.headers()["content-length"], "0");
    assert!(body.is_empty());

    assert_eq!(
        status(&dav, "PUT", "/c.txt", &[("If-Match", "\"other\"")], "v2").await,
        StatusCode::PRECONDITION_FAILED
    );
    assert_eq!(
        status(&dav, "PUT", "/new.txt", &[("If-Match", "*")], "v2").await,
        StatusCode::PRECONDITION_FAILED
    );
    assert_eq!(
        status(&dav, "PUT", "/c.txt", &[("If-None-Match", "*")], "v2").await,
        StatusCode::PRECONDITION_FAILED
    );
    assert_eq!(
        status(&dav, "PUT", "/c.txt", &[("If-Match", etag.as_str())], "v2").await,
        StatusCode::NO_CONTENT
    );
    // the content changed, so did the etag.
    let (resp, _) = send(&dav, "GET", "/c.txt", &[("If-None-Match", etag.as_str())], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn exclusive_lock() {
    let dav = memstore();
    let (st, token) = lock(&dav, "/f", LOCKINFO_EXCLUSIVE).await;
    // locking an unmapped url creates it.
    assert_eq!(st, StatusCode::CREATED);
    let token = token.unwrap();
    assert!(token.starts_with("<opaquelocktoken:"));
    assert_eq!(status(&dav, "GET", "/f", &[], Body::empty()).await, StatusCode::OK);

    assert_eq!(status(&dav, "PUT", "/f", &[], "data").await, StatusCode::LOCKED);
    assert_eq!(
        status(&dav, "DELETE", "/f", &[], Body::empty()).await,
        StatusCode::LOCKED
    );
    let cond = format!("({token})");
    assert_eq!(
        status(&dav, "PUT", "/f", &[("If", cond.as_str())], "data").await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(lock(&dav, "/f", LOCKINFO_EXCLUSIVE).await.0, StatusCode::LOCKED);
    assert_eq!(lock(&dav, "/f", LOCKINFO_SHARED).await.0, StatusCode::LOCKED);

    // refresh: no body, token in the If: header.
    let (resp, body) = send(&dav, "LOCK", "/f", &[("If", cond.as_str())], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(text(&body).contains("lockdiscovery"));

    assert_eq!(
        status(&dav, "UNLOCK", "/f", &[("Lock-Token", token.as_str())], Body::empty()).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        status(&dav, "UNLOCK", "/f", &[("Lock-Token", token.as_str())], Body::empty()).await,
        StatusCode::PRECONDITION_FAILED
    );
    assert_eq!(status(&dav, "PUT", "/f", &[], "free").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn depth_infinity_lock_covers_members() {
    let dav = memstore();
    status(&dav, "MKCOL", "/dir", &[], Body::empty()).await;
    status(&dav, "MKCOL", "/dir/sub", &[], Body::empty()).await;
    status(&dav, "PUT", "/dir/f", &[], "f").await;
    let (st, token) = lock(&dav, "/dir/", LOCKINFO_EXCLUSIVE).await;
    assert_eq!(st, StatusCode::OK);
    let token = token.unwrap();

    assert_eq!(status(&dav, "PUT", "/dir/f", &[], "x").await, StatusCode::LOCKED);
    assert_eq!(status(&dav, "PUT", "/dir/new", &[], "x").await, StatusCode::LOCKED);
    assert_eq!(status(&dav, "PUT", "/dir/sub/deep", &[], "x").await, StatusCode::LOCKED);
    assert_eq!(
        status(&dav, "MKCOL", "/dir/c", &[], Body::empty()).await,
        StatusCode::LOCKED
    );
    assert_eq!(
        status(&dav, "DELETE", "/dir/f", &[], Body::empty()).await,
        StatusCode::LOCKED
    );
    assert_eq!(lock(&dav, "/dir/f", LOCKINFO_EXCLUSIVE).await.0, StatusCode::LOCKED);
    assert_eq!(lock(&dav, "/dir/f", LOCKINFO_SHARED).await.0, StatusCode::LOCKED);
    // a refused LOCK on an unmapped url leaves nothing behind.
    assert_eq!(lock(&dav, "/dir/ghost", LOCKINFO_SHARED).await.0, StatusCode::LOCKED);
    assert_eq!(
        status(&dav, "GET", "/dir/ghost", &[], Body::empty()).await,
        StatusCode::NOT_FOUND
    );

    // the collection's token opens the whole tree.
    let cond = format!("({token})");
    let with_token = [("If", cond.as_str())];
    assert_eq!(status(&dav, "PUT", "/dir/f", &with_token, "x").await, StatusCode::NO_CONTENT);
    assert_eq!(
        status(&dav, "PUT", "/dir/sub/deep", &with_token, "x").await,
        StatusCode::CREATED
    );
    assert_eq!(
        status(&dav, "DELETE", "/dir/f", &with_token, Body::empty()).await,
        StatusCode::NO_CONTENT
    );

    // a depth 0 lock covers the collection only.
    status(&dav, "MKCOL", "/flat", &[], Body::empty()).await;
    let (resp, _) = send(&dav, "LOCK", "/flat/", &[("Depth", "0")], LOCKINFO_EXCLUSIVE).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(status(&dav, "PUT", "/flat/f", &[], "x").await, StatusCode::CREATED);
}

#[tokio::test]
async fn depth_infinity_lock_conflicts_with_members() {
    let dav = memstore();
    status(&dav, "MKCOL", "/top", &[], Body::empty()).await;
    status(&dav, "MKCOL", "/top/mid", &[], Body::empty()).await;
    status(&dav, "PUT", "/top/mid/f", &[], "f").await;
    assert_eq!(lock(&dav, "/top/mid/f", LOCKINFO_EXCLUSIVE).await.0, StatusCode::OK);

    assert_eq!(lock(&dav, "/top/", LOCKINFO_SHARED).await.0, StatusCode::LOCKED);
    assert_eq!(lock(&dav, "/top/", LOCKINFO_EXCLUSIVE).await.0, StatusCode::LOCKED);
    // depth 0 does not look below the collection.
    let (resp, _) = send(&dav, "LOCK", "/top/", &[("Depth", "0")], LOCKINFO_EXCLUSIVE).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // shared locks on a collection and its members coexist.
    status(&dav, "MKCOL", "/sh", &[], Body::empty()).await;
    status(&dav, "PUT", "/sh/a", &[], "a").await;
    assert_eq!(lock(&dav, "/sh/a", LOCKINFO_SHARED).await.0, StatusCode::OK);
    assert_eq!(lock(&dav, "/sh/", LOCKINFO_SHARED).await.0, StatusCode::OK);
    assert_eq!(lock(&dav, "/sh/a", LOCKINFO_EXCLUSIVE).await.0, StatusCode::LOCKED);
}

#[tokio::test]
async fn shared_locks() {
    let dav = memstore();
    status(&dav, "PUT", "/s", &[], "x").await;
    let (st1, t1) = lock(&dav, "/s", LOCKINFO_SHARED).await;
    let (st2, t2) = lock(&dav, "/s", LOCKINFO_SHARED).await;
    assert_eq!(st1, StatusCode::OK);
    assert_eq!(st2, StatusCode::OK);
    assert_ne!(t1, t2);
    assert_eq!(lock(&dav, "/s", LOCKINFO_EXCLUSIVE).await.0, StatusCode::LOCKED);

    let (resp, body) = send(
        &dav,
        "PROPFIND",
        "/s",
        &[("Depth", "0")],
        r#"<D:propfind xmlns:D="DAV:"><D:prop><D:lockdiscovery/></D:prop></D:propfind>"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert_eq!(text(&body).matches("<D:activelock>").count(), 2);

    // holding either token is enough.
    let cond = format!("({})", t2.unwrap());
    assert_eq!(
        status(&dav, "PUT", "/s", &[("If", cond.as_str())], "y").await,
        StatusCode::NO_CONTENT
    );
}

#[tokio::test]
async fn proppatch_propfind() {
    let dav = memstore();
    status(&dav, "PUT", "/p.txt", &[], "x").await;
    let (resp, body) = send(
        &dav,
        "PROPPATCH",
        "/p.txt",
        &[],
        r#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:example">
  <D:set><D:prop><Z:color>blue</Z:color></D:prop></D:set>
  <D:set><D:prop><D:getetag>"mine"</D:getetag></D:prop></D:set>
</D:propertyupdate>"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = text(&body);
    assert!(body.contains("HTTP/1.1 200 OK"));
    assert!(body.contains("HTTP/1.1 403 Forbidden"));

    let (resp, body) = send(
        &dav,
        "PROPFIND",
        "/p.txt",
        &[("Depth", "0")],
        r#"<D:propfind xmlns:D="DAV:" xmlns:Z="urn:example">
  <D:prop><Z:color/><Z:size/><D:getcontentlength/></D:prop>
</D:propfind>"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = text(&body);
    assert!(body.contains(">blue<"));
    assert!(body.contains(">1<"));
    assert!(body.contains("HTTP/1.1 404 Not Found"));

    // allprop includes dead properties.
    let (_, body) = send(&dav, "PROPFIND", "/p.txt", &[("Depth", "0")], Body::empty()).await;
    let body = text(&body);
    assert!(body.contains(">blue<"));
    assert!(body.contains("getlastmodified"));
    assert!(!body.contains("quota-used-bytes"));

    let (_, body) = send(
        &dav,
        "PROPPATCH",
        "/p.txt",
        &[],
        r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:example">
  <D:remove><D:prop><Z:color/></D:prop></D:remove>
</D:propertyupdate>"#,
    )
    .await;
    assert!(text(&body).contains("HTTP/1.1 200 OK"));
    let (_, body) = send(&dav, "PROPFIND", "/p.txt", &[("Depth", "0")], Body::empty()).await;
    assert!(!text(&body).contains(">blue<"));
}

#[tokio::test]
async fn propfind_depth() {
    let dav = memstore();
    status(&dav, "MKCOL", "/d", &[], Body::empty()).await;
    status(&dav, "MKCOL", "/d/e", &[], Body::empty()).await;
    status(&dav, "PUT", "/d/e/f", &[], "x").await;

    let propname = r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
    let (resp, body) = send(&dav, "PROPFIND", "/d", &[("Depth", "1")], propname).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = text(&body);
    assert!(body.contains("<D:href>/d/</D:href>"));
    assert!(body.contains("<D:href>/d/e/</D:href>"));
    assert!(!body.contains("/d/e/f"));
    assert!(body.contains("<D:resourcetype/>") || body.contains("<D:resourcetype />"));

    let (_, body) = send(&dav, "PROPFIND", "/d", &[], propname).await;
    assert!(text(&body).contains("<D:href>/d/e/f</D:href>"));

    assert_eq!(
        status(&dav, "PROPFIND", "/d", &[("Depth", "2")], Body::empty()).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status(&dav, "PROPFIND", "/nope", &[], Body::empty()).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status(&dav, "PROPFIND", "/d", &[], "<not-xml").await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn propfind_finite_depth() {
    init();
    let store = MemStore::with_options(MemLs::new(), None, InfiniteDepthMode::Rejected);
    let dav = DavHandler::builder(store).build();
    status(&dav, "MKCOL", "/d", &[], Body::empty()).await;
    let (resp, body) = send(&dav, "PROPFIND", "/d", &[("Depth", "infinity")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(text(&body).contains("propfind-finite-depth"));
    assert_eq!(
        status(&dav, "PROPFIND", "/d", &[("Depth", "1")], Body::empty()).await,
        StatusCode::MULTI_STATUS
    );
}

#[tokio::test]
async fn delete_skips_locked_children() {
    let dav = memstore();
    status(&dav, "MKCOL", "/c", &[], Body::empty()).await;
    status(&dav, "PUT", "/c/x", &[], "x").await;
    status(&dav, "PUT", "/c/y", &[], "y").await;
    assert_eq!(lock(&dav, "/c/x", LOCKINFO_EXCLUSIVE).await.0, StatusCode::OK);

    let (resp, body) = send(&dav, "DELETE", "/c", &[], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = text(&body);
    assert!(body.contains("<D:href>/c/x</D:href>"));
    assert!(body.contains("HTTP/1.1 423 Locked"));
    assert!(!body.contains("<D:href>/c/</D:href>"));

    assert_eq!(status(&dav, "GET", "/c/x", &[], Body::empty()).await, StatusCode::OK);
    assert_eq!(status(&dav, "GET", "/c/y", &[], Body::empty()).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn copy_collection() {
    let dav = memstore();
    status(&dav, "MKCOL", "/src", &[], Body::empty()).await;
    status(&dav, "PUT", "/src/a", &[], "a").await;
    status(&dav, "MKCOL", "/src/sub", &[], Body::empty()).await;
    status(&dav, "PUT", "/src/sub/b", &[], "b").await;

    let dest = [("Destination", "http://localhost/dst/")];
    assert_eq!(status(&dav, "COPY", "/src/", &dest, Body::empty()).await, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/dst/sub/b", &[], Body::empty()).await.1, "b");
    assert_eq!(send(&dav, "GET", "/src/sub/b", &[], Body::empty()).await.1, "b");

    // Depth: 0 only copies the collection itself.
    let shallow = [("Destination", "/shallow/"), ("Depth", "0")];
    assert_eq!(status(&dav, "COPY", "/src/", &shallow, Body::empty()).await, StatusCode::CREATED);
    assert_eq!(status(&dav, "GET", "/shallow/a", &[], Body::empty()).await, StatusCode::NOT_FOUND);

    // existing destination.
    assert_eq!(status(&dav, "COPY", "/src/", &dest, Body::empty()).await, StatusCode::NO_CONTENT);
    let no = [("Destination", "/dst/"), ("Overwrite", "F")];
    assert_eq!(
        status(&dav, "COPY", "/src/", &no, Body::empty()).await,
        StatusCode::PRECONDITION_FAILED
    );

    let inside = [("Destination", "/src/sub/deeper/")];
    assert_eq!(status(&dav, "COPY", "/src/", &inside, Body::empty()).await, StatusCode::FORBIDDEN);
    let elsewhere = [("Destination", "http://otherhost/x"), ("Host", "localhost")];
    assert_eq!(
        status(&dav, "COPY", "/src/a", &elsewhere, Body::empty()).await,
        StatusCode::BAD_GATEWAY
    );
    let orphan = [("Destination", "/none/a")];
    assert_eq!(status(&dav, "COPY", "/src/a", &orphan, Body::empty()).await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn copy_partial_failure() {
    init();
    let store = MemStore::with_options(MemLs::new(), Some(30), InfiniteDepthMode::Allowed);
    let dav = DavHandler::builder(store).build();
    status(&dav, "MKCOL", "/src", &[], Body::empty()).await;
    status(&dav, "PUT", "/src/a", &[], "0123456789").await;
    status(&dav, "PUT", "/src/b", &[], "0123456789").await;

    let (resp, body) = send(&dav, "COPY", "/src/", &[("Destination", "/dst/")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = text(&body);
    assert_eq!(body.matches("<D:response>").count(), 1);
    assert!(body.contains("<D:href>/dst/b</D:href>"));
    assert!(body.contains("507"));

    assert_eq!(send(&dav, "GET", "/dst/a", &[], Body::empty()).await.1, "0123456789");
    assert_eq!(status(&dav, "GET", "/dst/b", &[], Body::empty()).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_resources() {
    let dav = memstore();
    status(&dav, "PUT", "/m1", &[], "one").await;
    status(&dav, "PUT", "/m2", &[], "two").await;

    let no = [("Destination", "/m2"), ("Overwrite", "F")];
    assert_eq!(
        status(&dav, "MOVE", "/m1", &no, Body::empty()).await,
        StatusCode::PRECONDITION_FAILED
    );
    assert_eq!(send(&dav, "GET", "/m1", &[], Body::empty()).await.1, "one");
    assert_eq!(send(&dav, "GET", "/m2", &[], Body::empty()).await.1, "two");

    let yes = [("Destination", "/m2")];
    assert_eq!(status(&dav, "MOVE", "/m1", &yes, Body::empty()).await, StatusCode::NO_CONTENT);
    assert_eq!(send(&dav, "GET", "/m2", &[], Body::empty()).await.1, "one");
    assert_eq!(status(&dav, "GET", "/m1", &[], Body::empty()).await, StatusCode::NOT_FOUND);

    status(&dav, "MKCOL", "/d", &[], Body::empty()).await;
    status(&dav, "PUT", "/d/f", &[], "f").await;
    let to_e = [("Destination", "/e/")];
    assert_eq!(status(&dav, "MOVE", "/d/", &to_e, Body::empty()).await, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/e/f", &[], Body::empty()).await.1, "f");
    assert_eq!(status(&dav, "GET", "/d/f", &[], Body::empty()).await, StatusCode::NOT_FOUND);

    let shallow = [("Destination", "/g/"), ("Depth", "0")];
    assert_eq!(status(&dav, "MOVE", "/e/", &shallow, Body::empty()).await, StatusCode::BAD_REQUEST);
    let same = [("Destination", "/e/")];
    assert_eq!(status(&dav, "MOVE", "/e", &same, Body::empty()).await, StatusCode::FORBIDDEN);

    // a locked source cannot be moved away.
    let token = lock(&dav, "/m2", LOCKINFO_EXCLUSIVE).await.1.unwrap();
    let to_m3 = [("Destination", "/m3")];
    assert_eq!(status(&dav, "MOVE", "/m2", &to_m3, Body::empty()).await, StatusCode::LOCKED);
    let cond = format!("({token})");
    let with_token = [("Destination", "/m3"), ("If", cond.as_str())];
    assert_eq!(status(&dav, "MOVE", "/m2", &with_token, Body::empty()).await, StatusCode::CREATED);
    // the lock stayed behind.
    assert_eq!(status(&dav, "PUT", "/m3", &[], "new").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn move_checks_locked_members() {
    let dav = memstore();
    status(&dav, "MKCOL", "/a", &[], Body::empty()).await;
    status(&dav, "PUT", "/a/f", &[], "f").await;
    status(&dav, "PUT", "/a/g", &[], "g").await;
    let token = lock(&dav, "/a/f", LOCKINFO_EXCLUSIVE).await.1.unwrap();

    let to_b = [("Destination", "/b/")];
    let (resp, body) = send(&dav, "MOVE", "/a/", &to_b, Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = text(&body);
    assert!(body.contains("<D:href>/a/f</D:href>"));
    assert!(body.contains("HTTP/1.1 423 Locked"));
    // nothing was moved.
    assert_eq!(status(&dav, "GET", "/a/g", &[], Body::empty()).await, StatusCode::OK);
    assert_eq!(status(&dav, "GET", "/b/f", &[], Body::empty()).await, StatusCode::NOT_FOUND);

    let cond = format!("({token})");
    let with_token = [("Destination", "/b/"), ("If", cond.as_str())];
    assert_eq!(status(&dav, "MOVE", "/a/", &with_token, Body::empty()).await, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/b/f", &[], Body::empty()).await.1, "f");

    // the lock did not travel with the member.
    let (_, body) = send(
        &dav,
        "PROPFIND",
        "/b/f",
        &[("Depth", "0")],
        r#"<D:propfind xmlns:D="DAV:"><D:prop><D:lockdiscovery/></D:prop></D:propfind>"#,
    )
    .await;
    assert!(!text(&body).contains("<D:activelock>"));
    assert_eq!(status(&dav, "PUT", "/b/f", &[], "new").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn propfind_clamped_depth() {
    init();
    let modes = [(InfiniteDepthMode::Assume0, 1), (InfiniteDepthMode::Assume1, 3)];
    for (mode, responses) in modes {
        let dav = DavHandler::builder(MemStore::with_options(MemLs::new(), None, mode)).build();
        status(&dav, "MKCOL", "/d", &[], Body::empty()).await;
        status(&dav, "MKCOL", "/d/e", &[], Body::empty()).await;
        status(&dav, "PUT", "/d/e/f", &[], "f").await;
        status(&dav, "PUT", "/d/x", &[], "x").await;
        let (resp, body) =
            send(&dav, "PROPFIND", "/d/", &[("Depth", "infinity")], Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        assert_eq!(text(&body).matches("<D:response>").count(), responses);
    }
}

#[tokio::test]
async fn allprop_include_expensive() {
    let dav = memstore();
    status(&dav, "PUT", "/q.txt", &[], "12345").await;

    let allprop = r#"<D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;
    let (resp, body) = send(&dav, "PROPFIND", "/", &[("Depth", "0")], allprop).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert_eq!(resp.headers()["content-type"], "text/xml; charset=utf-8");
    let body = text(&body);
    assert!(body.contains("<D:resourcetype>"));
    assert!(!body.contains("quota-used-bytes"));

    let include = r#"<D:propfind xmlns:D="DAV:">
  <D:allprop/>
  <D:include><D:quota-used-bytes/></D:include>
</D:propfind>"#;
    let (_, body) = send(&dav, "PROPFIND", "/", &[("Depth", "0")], include).await;
    let body = text(&body);
    assert!(body.contains("<D:resourcetype>"));
    assert!(body.contains("<D:quota-used-bytes>5</D:quota-used-bytes>"));
}

#[tokio::test]
async fn prefix() {
    init();
    let dav = DavHandler::builder(MemStore::new(MemLs::new()))
        .strip_prefix("/dav")
        .build();
    assert_eq!(status(&dav, "PUT", "/dav/a", &[], "a").await, StatusCode::CREATED);
    // outside of the prefix.
    let (resp, _) = send(&dav, "GET", "/a", &[], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(resp.headers()["connection"], "close");
    let (_, body) = send(&dav, "PROPFIND", "/dav/a", &[("Depth", "0")], Body::empty()).await;
    assert!(text(&body).contains("<D:href>/dav/a</D:href>"));
    let dest = [("Destination", "/dav/b")];
    assert_eq!(status(&dav, "COPY", "/dav/a", &dest, Body::empty()).await, StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/dav/b", &[], Body::empty()).await.1, "a");
}

#[tokio::test]
async fn stream_body_and_extra_prefix() {
    let dav = memstore();
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
    let req = Request::put("/s").body(futures_util::stream::iter(chunks)).unwrap();
    let resp = dav.handle_stream(req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(send(&dav, "GET", "/s", &[], Body::empty()).await.1, "hello world");

    let req = Request::get("/user/s").body(Body::empty()).unwrap();
    let resp = dav.handle_with(req, Some("/user".to_string())).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

fn tempdir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("dav-engine-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn diskstore() {
    init();
    let dir = tempdir();
    let store: Arc<dyn DavStore> = DiskStore::new(&dir, false, MemLs::new());
    let dav = DavHandler::builder(store).build();

    assert_eq!(status(&dav, "MKCOL", "/d", &[], Body::empty()).await, StatusCode::CREATED);
    let content: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();
    assert_eq!(status(&dav, "PUT", "/d/f.bin", &[], content.clone()).await, StatusCode::CREATED);
    assert_eq!(std::fs::read(dir.join("d/f.bin")).unwrap(), content);

    let (resp, body) = send(&dav, "GET", "/d/f.bin", &[("Range", "bytes=100-199")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(&body[..], &content[100..200]);

    let (resp, body) = send(&dav, "PROPFIND", "/d/", &[("Depth", "1")], Body::empty()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert!(text(&body).contains("<D:href>/d/f.bin</D:href>"));

    let (resp, _) = send(
        &dav,
        "PROPPATCH",
        "/d/f.bin",
        &[],
        r#"<D:propertyupdate xmlns:D="DAV:"><D:set><D:prop><D:x>1</D:x></D:prop></D:set></D:propertyupdate>"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);

    let to_e = [("Destination", "/e/")];
    assert_eq!(status(&dav, "MOVE", "/d/", &to_e, Body::empty()).await, StatusCode::CREATED);
    assert!(dir.join("e/f.bin").is_file());
    assert!(!dir.join("d").exists());

    let copy = [("Destination", "/c/")];
    assert_eq!(status(&dav, "COPY", "/e/", &copy, Body::empty()).await, StatusCode::CREATED);
    assert_eq!(std::fs::read(dir.join("c/f.bin")).unwrap(), content);

    assert_eq!(status(&dav, "DELETE", "/e/", &[], Body::empty()).await, StatusCode::NO_CONTENT);
    assert!(!dir.join("e").exists());

    std::fs::remove_dir_all(&dir).unwrap();
}
