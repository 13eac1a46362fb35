//! devconnect-web: server functions, REST API and live change feed for
//! DevConnect, persisted in SQLite.

#[tokio::main]
async fn main() {
    if let Err(error) = devconnect::web::run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
