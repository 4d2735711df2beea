use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::{header, Method, Request, Response, StatusCode};
use hyper::Body;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::{
    Config, Error, FileCache, FileEntry, FileStore, MemoryStore, ResponseBody, StaticCache,
};

const INDEX_HTML: usize = 50;
const LOGO_PNG: usize = 2000;

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let index = format!("<p>{}</p>", "i".repeat(INDEX_HTML - 7));
    fs::write(root.join("index.html"), index).unwrap();
    fs::write(root.join("logo.png"), vec![0x89; LOGO_PNG]).unwrap();
    fs::write(root.join("app.js"), "console.log('static cache');\n".repeat(200)).unwrap();
    fs::create_dir(root.join("css")).unwrap();
    fs::write(root.join("css/site.css"), "body { margin: 0; }\n".repeat(100)).unwrap();
    fs::write(root.join(".env"), "SECRET=1").unwrap();

    dir
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with(uri: &str, name: header::HeaderName, value: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(res: Response<ResponseBody>) -> Bytes {
    hyper::body::to_bytes(res.into_body()).await.unwrap()
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

fn set_mtime(path: &Path, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

#[tokio::test]
async fn serves_preloaded_file() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path())).unwrap();

    let res = svc.oneshot(get("/css/site.css")).await.unwrap();

    let disk = dir.path().join("css/site.css");
    let mtime = fs::metadata(&disk).unwrap().modified().unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/css; charset=utf-8");
    assert_eq!(res.headers()["cache-control"], "public, max-age=0");
    assert_eq!(
        res.headers()["last-modified"],
        httpdate::fmt_http_date(mtime).as_str()
    );
    assert!(res.headers().get("vary").is_none());
    assert_eq!(body_bytes(res).await, fs::read(&disk).unwrap());
}

#[tokio::test]
async fn serves_buffered_file_under_prefix() {
    let dir = fixture();
    let svc = StaticCache::new(
        Config::new(dir.path())
            .prefix("/static")
            .buffer(true)
            .max_age(600),
    )
    .unwrap();

    assert!(svc.files().get("/static/app.js").unwrap().buffer().is_some());

    let res = svc.clone().oneshot(get("/static/app.js")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["cache-control"], "public, max-age=600");
    assert_eq!(
        body_bytes(res).await,
        fs::read(dir.path().join("app.js")).unwrap()
    );

    let res = svc.oneshot(get("/app.js")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn declines_outside_prefix_without_touching_disk() {
    let svc = StaticCache::new(
        Config::new("/this/directory/does/not/exist")
            .prefix("/static")
            .preload(false)
            .dynamic(true),
    )
    .unwrap();

    let outcome = svc.handle(get("/other/app.js")).await.unwrap();
    assert!(outcome.is_declined());

    let post = Request::builder()
        .method(Method::POST)
        .uri("/static/app.js")
        .body(Body::empty())
        .unwrap();
    assert!(svc.handle(post).await.unwrap().is_declined());
}

#[tokio::test]
async fn non_get_methods_are_not_allowed() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path())).unwrap();

    let req = Request::builder()
        .method(Method::POST)
        .uri("/index.html")
        .body(Body::empty())
        .unwrap();
    let res = svc.oneshot(req).await.unwrap();

    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()["allow"], "GET,HEAD");
}

#[tokio::test]
async fn declined_requests_reach_fallback() {
    let dir = fixture();
    let fallback = tower::service_fn(|req: Request<Body>| async move {
        Ok::<_, io::Error>(Response::new(Body::from(format!(
            "fallback {}",
            req.uri().path()
        ))))
    });
    let svc = StaticCache::new(Config::new(dir.path()))
        .unwrap()
        .not_found_service(fallback);

    let res = svc.oneshot(get("/missing.txt")).await.unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(res).await, "fallback /missing.txt");
}

#[tokio::test]
async fn head_sends_headers_only() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).buffer(true)).unwrap();

    let req = Request::builder()
        .method(Method::HEAD)
        .uri("/logo.png")
        .body(Body::empty())
        .unwrap();
    let res = svc.oneshot(req).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/png");
    assert_eq!(res.headers()["content-length"], LOGO_PNG.to_string().as_str());
    assert!(body_bytes(res).await.is_empty());
}

#[tokio::test]
async fn head_on_streamed_gzip_matches_get() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).gzip(true)).unwrap();

    let req = Request::builder()
        .method(Method::HEAD)
        .uri("/app.js")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let head = svc.clone().oneshot(req).await.unwrap();
    let get = svc
        .oneshot(get_with("/app.js", header::ACCEPT_ENCODING, "gzip"))
        .await
        .unwrap();

    for res in [&head, &get] {
        assert_eq!(res.headers()["content-encoding"], "gzip");
        assert!(res.headers().get("content-length").is_none());
    }
    assert!(body_bytes(head).await.is_empty());
}

#[tokio::test]
async fn conditional_get_is_not_modified() {
    let dir = fixture();
    let mtime = fs::metadata(dir.path().join("app.js"))
        .unwrap()
        .modified()
        .unwrap();

    for gzip in [false, true] {
        let svc = StaticCache::new(Config::new(dir.path()).gzip(gzip).buffer(true)).unwrap();

        let mut req = get_with(
            "/app.js",
            header::IF_MODIFIED_SINCE,
            &httpdate::fmt_http_date(mtime),
        );
        req.headers_mut()
            .insert(header::ACCEPT_ENCODING, "gzip".parse().unwrap());
        let res = svc.clone().oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert!(res.headers().get("content-encoding").is_none());
        assert_eq!(res.headers().contains_key("vary"), gzip);
        assert!(body_bytes(res).await.is_empty());
        assert!(svc.files().get("/app.js").unwrap().gzip_buffer().is_none());
    }
}

#[tokio::test]
async fn stale_conditional_get_is_served() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path())).unwrap();

    let res = svc
        .oneshot(get_with(
            "/app.js",
            header::IF_MODIFIED_SINCE,
            "Thu, 01 Jan 1970 00:00:00 GMT",
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn gzip_for_large_compressible_files() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).gzip(true).buffer(true)).unwrap();

    let res = svc
        .oneshot(get_with("/app.js", header::ACCEPT_ENCODING, "gzip"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-encoding"], "gzip");
    assert_eq!(res.headers()["vary"], "Accept-Encoding");

    let length: usize = res.headers()["content-length"].to_str().unwrap().parse().unwrap();
    let body = body_bytes(res).await;
    assert_eq!(body.len(), length);
    assert_eq!(gunzip(&body), fs::read(dir.path().join("app.js")).unwrap());
}

#[tokio::test]
async fn brotli_is_labelled_br() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).gzip(true).buffer(true)).unwrap();

    let res = svc
        .oneshot(get_with("/app.js", header::ACCEPT_ENCODING, "gzip, deflate, br"))
        .await
        .unwrap();

    assert_eq!(res.headers()["content-encoding"], "br");

    let body = body_bytes(res).await;
    let mut decoded = Vec::new();
    brotli::Decompressor::new(body.as_ref(), 4096)
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, fs::read(dir.path().join("app.js")).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compressed_buffer_is_reused() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).gzip(true).buffer(true)).unwrap();
    let original = fs::read(dir.path().join("css/site.css")).unwrap();

    let (first, second) = tokio::join!(
        svc.clone()
            .oneshot(get_with("/css/site.css", header::ACCEPT_ENCODING, "gzip")),
        svc.clone()
            .oneshot(get_with("/css/site.css", header::ACCEPT_ENCODING, "gzip")),
    );
    for res in [first.unwrap(), second.unwrap()] {
        assert_eq!(res.headers()["content-encoding"], "gzip");
        assert_eq!(gunzip(&body_bytes(res).await), original);
    }

    let entry = svc.files().get("/css/site.css").unwrap();
    let cached = entry.gzip_buffer().unwrap();

    let res = svc
        .clone()
        .oneshot(get_with("/css/site.css", header::ACCEPT_ENCODING, "gzip"))
        .await
        .unwrap();
    assert_eq!(body_bytes(res).await, cached);
    assert_eq!(entry.gzip_buffer().unwrap().as_ptr(), cached.as_ptr());

    // the cached gzip buffer never overrides what the client accepts
    let res = svc.oneshot(get("/css/site.css")).await.unwrap();
    assert!(res.headers().get("content-encoding").is_none());
    assert_eq!(body_bytes(res).await, original);
}

#[tokio::test]
async fn small_and_binary_files_stay_uncompressed() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).gzip(true).buffer(true)).unwrap();

    for (uri, len) in [("/index.html", INDEX_HTML), ("/logo.png", LOGO_PNG)] {
        let res = svc
            .clone()
            .oneshot(get_with(uri, header::ACCEPT_ENCODING, "gzip"))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get("content-encoding").is_none());
        assert_eq!(body_bytes(res).await.len(), len);
    }
}

#[tokio::test]
async fn streamed_gzip_has_no_content_length() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).gzip(true)).unwrap();

    let res = svc
        .clone()
        .oneshot(get_with("/app.js", header::ACCEPT_ENCODING, "gzip"))
        .await
        .unwrap();

    assert_eq!(res.headers()["content-encoding"], "gzip");
    assert!(res.headers().get("content-length").is_none());
    assert_eq!(
        gunzip(&body_bytes(res).await),
        fs::read(dir.path().join("app.js")).unwrap()
    );
    // nothing to key a cached buffer on
    assert!(svc.files().get("/app.js").unwrap().gzip_buffer().is_none());
}

#[tokio::test]
async fn streamed_file_refreshes_from_disk() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path())).unwrap();
    let path = dir.path().join("index.html");

    let before = fs::metadata(&path).unwrap().modified().unwrap();
    let updated = "<p>a longer page than before</p>\n".repeat(3);
    fs::write(&path, &updated).unwrap();
    let later = before + Duration::from_secs(60);
    set_mtime(&path, later);

    let res = svc.clone().oneshot(get("/index.html")).await.unwrap();

    assert_eq!(res.headers()["last-modified"], httpdate::fmt_http_date(later).as_str());
    assert_eq!(
        res.headers()["content-length"],
        updated.len().to_string().as_str()
    );
    assert_eq!(body_bytes(res).await, updated);
    assert_eq!(svc.files().get("/index.html").unwrap().length(), updated.len() as u64);
}

#[tokio::test]
async fn deleted_streamed_file_is_declined() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path())).unwrap();
    fs::remove_file(dir.path().join("logo.png")).unwrap();

    let outcome = svc.handle(get("/logo.png")).await.unwrap();

    assert!(outcome.is_declined());
}

#[tokio::test]
async fn alias_serves_the_same_entry() {
    let dir = fixture();
    let svc = StaticCache::new(
        Config::new(dir.path())
            .buffer(true)
            .alias("/", "/index.html")
            .alias("/gone", "/missing.html"),
    )
    .unwrap();

    let aliased = svc.clone().oneshot(get("/")).await.unwrap();
    let direct = svc.clone().oneshot(get("/index.html")).await.unwrap();

    for name in ["content-type", "content-length", "last-modified", "cache-control"] {
        assert_eq!(aliased.headers()[name], direct.headers()[name]);
    }
    assert_eq!(body_bytes(aliased).await, body_bytes(direct).await);
    assert!(Arc::ptr_eq(
        &svc.files().get("/").unwrap(),
        &svc.files().get("/index.html").unwrap()
    ));
    assert!(svc.files().get("/gone").is_none());
}

#[tokio::test]
async fn dynamic_loading() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).preload(false).dynamic(true)).unwrap();
    assert!(svc.files().get("/app.js").is_none());

    let res = svc.clone().oneshot(get("/app.js")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        body_bytes(res).await,
        fs::read(dir.path().join("app.js")).unwrap()
    );
    assert!(svc.files().get("/app.js").is_some());

    let res = svc.clone().oneshot(get("/%63ss/site.css")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = svc.oneshot(get("/.env")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_escape_uses_raw_path() {
    let dir = fixture();
    fs::write(dir.path().join("a%20b%zz.txt"), "raw name").unwrap();
    fs::write(dir.path().join("a b.txt"), "decoded name").unwrap();
    let svc = StaticCache::new(Config::new(dir.path()).buffer(true)).unwrap();

    let res = svc.clone().oneshot(get("/a%20b%zz.txt")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, "raw name");

    let res = svc.oneshot(get("/a%20b.txt")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, "decoded name");
}

#[tokio::test]
async fn dynamic_loading_disabled() {
    let dir = fixture();
    let svc = StaticCache::new(Config::new(dir.path()).filter_fn(|name| name.ends_with(".css")))
        .unwrap();

    assert!(svc.handle(get("/app.js")).await.unwrap().is_declined());
    assert!(!svc.handle(get("/css/site.css")).await.unwrap().is_declined());
}

#[tokio::test]
async fn path_traversal_is_declined() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("public")).unwrap();
    fs::write(dir.path().join("public/ok.txt"), "ok").unwrap();
    fs::write(dir.path().join("secret.txt"), "secret").unwrap();

    let svc = StaticCache::new(
        Config::new(dir.path().join("public"))
            .preload(false)
            .dynamic(true),
    )
    .unwrap();

    for uri in ["/../secret.txt", "/%2e%2e/secret.txt", "/..%2fsecret.txt", "/ok.txt/../../secret.txt"] {
        let outcome = svc.handle(get(uri)).await.unwrap();
        assert!(outcome.is_declined(), "{uri} was served");
    }
    assert!(!svc.handle(get("/ok.txt")).await.unwrap().is_declined());
}

#[tokio::test]
async fn precompiled_gzip_sibling_is_used() {
    let dir = fixture();
    let original = "precompiled ".repeat(200);
    fs::write(dir.path().join("big.txt"), &original).unwrap();
    let gz = crate::compression::gzip(original.as_bytes()).unwrap();
    fs::write(dir.path().join("big.txt.gz"), &gz).unwrap();

    let svc = StaticCache::new(
        Config::new(dir.path())
            .gzip(true)
            .buffer(true)
            .use_precompiled_gzip(true),
    )
    .unwrap();

    let res = svc
        .clone()
        .oneshot(get_with("/big.txt", header::ACCEPT_ENCODING, "gzip"))
        .await
        .unwrap();

    assert_eq!(res.headers()["content-encoding"], "gzip");
    assert_eq!(body_bytes(res).await, gz);
    assert_eq!(svc.files().get("/big.txt").unwrap().gzip_buffer().unwrap(), gz);
}

#[tokio::test]
async fn cache_control_override() {
    let dir = fixture();
    let svc = StaticCache::new(
        Config::new(dir.path())
            .max_age(60)
            .cache_control("no-cache"),
    )
    .unwrap();

    let res = svc.oneshot(get("/index.html")).await.unwrap();

    assert_eq!(res.headers()["cache-control"], "no-cache");
}

#[test]
fn invalid_cache_control_is_rejected() {
    let dir = fixture();

    let err = StaticCache::new(Config::new(dir.path()).cache_control("bad\nvalue")).unwrap_err();

    assert!(matches!(err, Error::InvalidCacheControl(_)));
}

#[tokio::test]
async fn external_store_backs_the_cache() {
    let dir = fixture();
    let store = Arc::new(MemoryStore::new());

    struct Shared(Arc<MemoryStore>);

    impl FileStore for Shared {
        fn get(&self, key: &str) -> Option<Arc<FileEntry>> {
            self.0.get(key)
        }

        fn set(&self, key: String, entry: Arc<FileEntry>) {
            self.0.set(key, entry)
        }
    }

    let svc = StaticCache::new(
        Config::new(dir.path())
            .allow_list(["index.html"])
            .files(FileCache::external(Shared(store.clone()))),
    )
    .unwrap();

    assert_eq!(store.keys(), vec!["/index.html".to_owned()]);

    let res = svc.oneshot(get("/index.html")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn seeded_buffer_only_entry() {
    let files = FileCache::with_entries([(
        "/robots.txt".to_owned(),
        FileEntry::from_bytes("text/plain", "User-agent: *\n").with_max_age(86400),
    )]);
    let svc = StaticCache::new(
        Config::new("/this/directory/does/not/exist")
            .preload(false)
            .files(files),
    )
    .unwrap();

    let res = svc.oneshot(get("/robots.txt")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(res.headers()["cache-control"], "public, max-age=86400");
    assert_eq!(body_bytes(res).await, "User-agent: *\n");
}

#[cfg(feature = "include-dir")]
#[tokio::test]
async fn embedded_directory() {
    use include_dir::{include_dir, Dir};

    static DEMOS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/demos");

    let svc = StaticCache::new(
        Config::new("/this/directory/does/not/exist")
            .preload(false)
            .prefix("/demos")
            .embed(&DEMOS),
    )
    .unwrap();

    let entry = svc.files().get("/demos/serve.rs").unwrap();
    assert!(entry.path().is_none());

    let res = svc.oneshot(get("/demos/serve.rs")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, include_str!("../demos/serve.rs"));
}
