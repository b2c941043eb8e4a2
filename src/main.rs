use anyhow::Result;
use clap::Parser;
use reviewd::{config, db, dispatch, mailer::HttpMailer};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/reviewd.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let mailer = HttpMailer::from_config(&cfg.mail)?;
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let batch = i64::from(cfg.app.drain_batch_size);

    info!("starting notification drain loop");
    loop {
        match dispatch::drain_queue(&pool, &mailer, &cfg.mail.site_url, batch).await {
            Ok(0) => tokio::time::sleep(poll_sleep).await,
            Ok(n) => info!(jobs = n, "drained broadcast jobs"),
            Err(err) => {
                error!(?err, "drain worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
