use tokio_util::sync::CancellationToken;

mod config;
mod media;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("es_bus", log::LevelFilter::Info)
        .filter_module("es_player", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let shutdown = CancellationToken::new();

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_clone.cancel();
        }
    });

    match media::playback::run(config, shutdown.clone()).await {
        Ok(report) => {
            let code = report.exit_code(shutdown.is_cancelled());
            if code == 0 {
                log::info!("playback finished: {}", report);
            } else {
                log::warn!("playback ended early ({}): {}", code, report);
            }
            std::process::exit(code);
        }
        Err(e) => {
            log::error!("playback failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
