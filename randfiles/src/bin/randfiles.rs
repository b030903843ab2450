use std::{
    env,
    io::ErrorKind,
    net::{AddrParseError, SocketAddr},
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    sync::Arc,
};

use byte_unit::Byte;
use clap::Parser;
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::PrometheusBuilder;
use randfiles::{
    aggregator::Aggregator,
    config::{self, Config},
    generator::{self, Pool},
    labels::{self, Host},
    signals, status, ticker::Ticker,
};
use randfiles_store::Store;
use tokio::{
    runtime::Builder,
    signal,
    time::{Duration, sleep},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const DEFAULT_CONFIG_PATH: &str = "randfiles.yaml";

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
    #[error("File generator returned an error: {0}")]
    Generator(#[from] generator::Error),
    #[error("Status page returned an error: {0}")]
    Status(#[from] status::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
/// Create random files.
///
/// Every option may also be set by environment variable or in a YAML
/// configuration file. The file is read from --config-path, else from
/// `randfiles.yaml` in the current directory if present. The whole file may
/// instead be passed in the `RANDFILES_CONFIG` environment variable.
struct Args {
    /// path on disk to the configuration file
    #[clap(long, env = "RANDFILES_CONFIG_PATH")]
    config_path: Option<PathBuf>,
    /// HTTP service address for monitoring, e.g. ":8081"
    #[clap(long, env = "RANDFILES_ADDR", value_parser = parse_addr)]
    addr: Option<SocketAddr>,
    /// address to bind a prometheus exporter to
    #[clap(long, env = "RANDFILES_PROMETHEUS_ADDR", value_parser = parse_addr)]
    prometheus_addr: Option<SocketAddr>,
    /// number of CPUs to use
    #[clap(long = "cpu", env = "RANDFILES_CPU")]
    cpus: Option<NonZeroUsize>,
    /// set the working directory
    #[clap(long = "wd", env = "RANDFILES_WD")]
    working_directory: Option<PathBuf>,
    /// number of writer threads
    #[clap(long, env = "RANDFILES_THREADS")]
    threads: Option<NonZeroU32>,
    /// approximate delay between writes, e.g. "1s" or "250ms"
    #[clap(long, env = "RANDFILES_DELAY", value_parser = humantime::parse_duration)]
    delay: Option<Duration>,
    /// minimum file size, e.g. 1024 or "1 KiB"
    #[clap(long = "minsize", env = "RANDFILES_MINSIZE")]
    min_size: Option<Byte>,
    /// maximum file size, exclusive
    #[clap(long = "maxsize", env = "RANDFILES_MAXSIZE")]
    max_size: Option<Byte>,
    /// file extension
    #[clap(long = "ext", env = "RANDFILES_EXT")]
    extension: Option<String>,
    /// stop after this many seconds instead of running until interrupted
    #[clap(long, env = "RANDFILES_DURATION_SECONDS")]
    duration_seconds: Option<u64>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 30)]
    max_shutdown_delay: u16,
}

/// Parse a socket address, reading a bare ":port" as every interface.
fn parse_addr(input: &str) -> Result<SocketAddr, AddrParseError> {
    match input.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => input.parse(),
    }
}

fn load_config_contents(config_path: Option<&Path>) -> Result<Option<String>, Error> {
    if let Ok(env_var_value) = env::var("RANDFILES_CONFIG") {
        debug!("Using config from env var 'RANDFILES_CONFIG'");
        return Ok(Some(env_var_value));
    }

    let (path, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    debug!("Attempting to open configuration file at: {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if !required && err.kind() == ErrorKind::NotFound => {
            debug!("No configuration file found, using defaults");
            Ok(None)
        }
        Err(err) => {
            error!("Could not read config file '{}': {}", path.display(), err);
            Err(Error::Io(err))
        }
    }
}

fn get_config(args: &Args, contents: Option<String>) -> Result<Config, Error> {
    let mut config = match contents {
        Some(contents) => Config::from_yaml(&contents).map_err(|err| {
            error!("Configuration validation failed: {}", err);
            err
        })?,
        None => Config::default(),
    };

    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(addr) = args.prometheus_addr {
        config.prometheus_addr = Some(addr);
    }
    if let Some(cpus) = args.cpus {
        config.cpus = cpus;
    }
    if let Some(ref dir) = args.working_directory {
        config.working_directory = Some(dir.clone());
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(delay) = args.delay {
        config.delay = delay;
    }
    if let Some(min_size) = args.min_size {
        config.min_size = min_size;
    }
    if let Some(max_size) = args.max_size {
        config.max_size = max_size;
    }
    if let Some(ref ext) = args.extension {
        config.extension.clone_from(ext);
    }
    Ok(config)
}

async fn inner_main(config: Config, run_duration: Option<Duration>) -> Result<(), Error> {
    let worker_config = Arc::new(config.resolve()?);

    if let Some(addr) = config.prometheus_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("prometheus exporter listening on {addr}");
    }

    let store = Arc::new(Store::new("randfiles"));
    labels::publish(
        &store,
        &Host::current(config.cpus.get()),
        &config,
        &worker_config,
    );
    generator::define_metrics(&store);

    let (shutdown_watcher, shutdown_broadcast) = signals::signal();

    tokio::spawn(Ticker::new(Arc::clone(&store), shutdown_watcher.clone()).spin());
    tokio::spawn(Aggregator::new(Arc::clone(&store), shutdown_watcher.clone()).spin());

    let status_server =
        status::Server::new(config.addr, Arc::clone(&store), shutdown_watcher.clone());
    let status_handle = tokio::spawn(status_server.run());
    tokio::pin!(status_handle);

    let pool = Pool::new(worker_config, config.threads, &store, &shutdown_watcher)?;
    let pool_handle = tokio::spawn(pool.spin());
    tokio::pin!(pool_handle);

    // Any watcher left alive here would stall `signal_and_wait` below.
    drop(shutdown_watcher);

    let run_timer = async {
        match run_duration {
            Some(duration) => sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(run_timer);

    let res = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c");
            Ok(())
        },
        () = &mut run_timer => {
            info!("run duration exceeded, signaling for shutdown");
            Ok(())
        },
        res = &mut pool_handle => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                error!("File generator shut down unexpectedly: {err}");
                Err(Error::Generator(err))
            }
            Err(err) => Err(Error::Generator(generator::Error::Child(err))),
        },
        res = &mut status_handle => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                error!("Status page shut down unexpectedly: {err}");
                Err(Error::Status(err))
            }
            Err(err) => Err(Error::Io(std::io::Error::other(err))),
        },
    };

    shutdown_broadcast.signal_and_wait().await;
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting randfiles {version} run.");

    let args = Args::parse();
    let contents = load_config_contents(args.config_path.as_deref())?;
    let config = get_config(&args, contents)?;

    let run_duration = args.duration_seconds.map(Duration::from_secs);
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .worker_threads(config.cpus.get())
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, run_duration));
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    if let Err(ref err) = res {
        warn!("randfiles exiting with error: {err}");
    }
    info!("Bye. :)");
    res
}
