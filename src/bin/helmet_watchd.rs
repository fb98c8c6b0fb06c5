//! helmet_watchd - helmet violation watcher
//!
//! Opens the configured video, serves the annotated MJPEG feed and the plate
//! reporting API, and records accepted plates. With `--headless` the frames
//! are processed locally without the HTTP server.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helmet_watch::{
    api::{ApiConfig, ApiServer},
    open_pipeline, HelmetConfig, PlateStore, SqlitePlateStore,
};

#[derive(Parser, Debug)]
#[command(name = "helmet_watchd", about = "Detect unhelmeted riders and capture their plates")]
struct Args {
    /// TOML (or .json) config file
    #[arg(long, env = "HELMET_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Process the video without serving HTTP
    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = HelmetConfig::load_from(args.config.as_deref())?;
    let pipeline = Arc::new(open_pipeline(&cfg)?);
    log::info!("helmet_watchd: watching {}", cfg.video_path);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    if args.headless {
        let mut frames = pipeline.stream();
        while !stop.load(Ordering::SeqCst) {
            if frames.next().is_none() {
                break;
            }
        }
        log::info!("processed {} frames", pipeline.frames_read());
    } else {
        let reports: Option<Box<dyn PlateStore>> = match cfg.db_path.as_deref() {
            Some(db_path) => Some(Box::new(SqlitePlateStore::open(db_path)?)),
            None => None,
        };
        let api = ApiServer::new(
            ApiConfig {
                addr: cfg.api_addr.clone(),
            },
            pipeline.clone(),
            reports,
        )
        .spawn()?;
        log::info!("serving http://{}/video_feed", api.addr);
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }
        api.stop()?;
    }

    pipeline.release()?;
    log::info!("helmet_watchd: stopped");
    Ok(())
}
