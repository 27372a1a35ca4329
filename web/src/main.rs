use std::process::ExitCode;

use lexcompare_core::api::{serve, AppState};
use lexcompare_core::config::AppConfig;

fn main() -> ExitCode {
    // A missing .env is fine; the environment may already carry everything.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Configuration resolves the local UTC offset, which must happen before
    // the runtime spawns worker threads.
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("❌ {} [{}]", err, err.code());
            eprintln!("   {}", err.explain());
            log::error!("startup aborted: {err}");
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "data dir {}, {} knowledge base(s), utc offset {}",
        config.data_dir.display(),
        config.knowledge_bases.len(),
        config.utc_offset
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("❌ failed to start the async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(async move {
        let state = match AppState::build(config) {
            Ok(state) => state,
            Err(err) => {
                eprintln!("❌ startup failed: {err:#}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = serve(state).await {
            log::error!("{err:#}");
            return ExitCode::FAILURE;
        }
        ExitCode::SUCCESS
    })
}
