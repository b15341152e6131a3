use fsrsync::config::{Opts, load_config, validate_hostname, write_template};
use fsrsync::core::SyncApplication;
use fsrsync::core::scheduler::start_full_sync_scheduler;
use fsrsync::utilities::{LogLevel, init_file_logger};
use fsrsync::web::start_control_server;
use std::path::PathBuf;
use std::str::FromStr;

fn print_version_and_exit() -> ! {
    // These are set by build.rs; fall back to unknown if missing
    let pkg_version = env!("CARGO_PKG_VERSION");
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let state = option_env!("GIT_STATE").unwrap_or("unknown");
    let built = option_env!("BUILD_TIME").unwrap_or("unknown time");
    println!(
        "fsrsync {} (commit: {}, state: {}, built: {})",
        pkg_version, commit, state, built
    );
    std::process::exit(0)
}

#[tokio::main]
async fn main() {
    let opts = Opts::from_args();

    if opts.version {
        print_version_and_exit();
    }

    if opts.setup || opts.setupfolder.is_some() {
        let dir = opts
            .setupfolder
            .clone()
            .unwrap_or_else(|| PathBuf::from("/etc/fsrsync"));
        match write_template(&dir) {
            Ok(path) => {
                println!("fsrsync setup complete: {}", path.display());
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    let config = match load_config(&opts.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    // Refuse to run on the wrong machine before any watch is installed.
    if let Err(e) = validate_hostname(&config) {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }

    let level = LogLevel::from_str(&config.loglevel).unwrap_or(LogLevel::Info);
    let (logger, _logger_task) = match init_file_logger(&config.logs, level).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Failed to initialize logger at {}: {}", config.logs, e);
            std::process::exit(1);
        }
    };

    if config.sentry_dsn.is_some() {
        logger.info("SENTRY_DSN configured; critical errors are tagged in the log stream");
    }

    let app = match SyncApplication::setup(&config, logger.clone(), opts.fullsync) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{}", e);
            logger.critical(format!("{}", e));
            logger.shutdown().await;
            std::process::exit(e.exit_code());
        }
    };

    if opts.fullsync {
        logger.debug("Full sync enabled. Syncing all files...".to_string());
        app.run_full_sync_once().await;
        logger.shutdown().await;
        std::process::exit(0);
    }

    let _control_server = match start_control_server(app.shared.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", e);
            logger.critical(format!("{}", e));
            logger.shutdown().await;
            std::process::exit(1);
        }
    };
    let _scheduler = start_full_sync_scheduler(app.shared.clone());

    if let Err(e) = app.run().await {
        logger.critical(format!("Event loop failed: {}", e));
        logger.shutdown().await;
        std::process::exit(1);
    }
}
