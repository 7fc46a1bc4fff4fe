use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // `log` のレコードも tracing-subscriber 経由で出力される
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = lyte_lib::run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
