use std::path::Path;

use cinnabar::aof::{self, Aof, FsyncPolicy};
use cinnabar::config::Config;
use cinnabar::error::ServerError;
use cinnabar::server::Server;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    let appendonly = config.appendonly;
    let aof_path = config.appendfilename.clone();
    let fsync = FsyncPolicy::parse(&config.appendfsync);

    let server = Server::new(config);

    if appendonly {
        match aof::replay(Path::new(&aof_path), &server).await {
            Ok(0) => {}
            Ok(applied) => info!("replayed {applied} commands from {aof_path}"),
            Err(e) => warn!("append-only file replay failed: {e}"),
        }
        let aof = Aof::open(Path::new(&aof_path), fsync)?;
        server.attach_aof(aof.sender());
        info!("append-only file enabled: {aof_path}");
    }

    server.run().await?;
    Ok(())
}
