use static_cache::{Config, StaticCache};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .compact()
        .init();

    let dir = std::env::args().nth(1).unwrap_or_else(|| "demos".to_owned());

    let service = StaticCache::new(
        Config::new(dir)
            .gzip(true)
            .buffer(true)
            .dynamic(true)
            .max_age(60),
    )
    .expect("failed to load files");

    // Run our service using `hyper`
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 3000));
    hyper::Server::bind(&addr)
        .serve(tower::make::Shared::new(service))
        .await
        .expect("server error");
}
