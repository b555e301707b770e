use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use stubforge::settings::{ServerContext, ServerSettings};
use stubforge::{Mapping, StubServer};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const EXIT_BIND_FAILURE: i32 = 2;
const EXIT_INVALID_CONFIG: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "stubforge", about = "Programmable HTTP stub/mock server")]
struct Args {
    /// Port for the primary listener.
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Additional listen URLs, e.g. http://0.0.0.0:9090
    #[arg(long)]
    urls: Vec<String>,

    /// Serve the /__admin control surface; pass --admin=false to disable.
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    admin: bool,

    /// Directory of mapping JSON files loaded at startup.
    #[arg(long)]
    read_static_mappings: Option<PathBuf>,

    /// Re-read the static mapping directory when mappings are reset.
    #[arg(long)]
    watch_static_mappings: bool,

    /// Forward every unmatched request to this upstream.
    #[arg(long)]
    proxy_all: Option<String>,

    /// Record proxied responses as new static mappings.
    #[arg(long)]
    save_mapping: bool,

    /// Serve the best partial match instead of the fallback.
    #[arg(long)]
    allow_partial_mapping: bool,

    /// Delay, in milliseconds, before requests appear in the journal.
    #[arg(long)]
    request_logging_delay: Option<u64>,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_listen_url(raw: &str) -> Option<SocketAddr> {
    let trimmed = raw
        .strip_prefix("http://")
        .unwrap_or(raw)
        .trim_end_matches('/');
    trimmed.to_socket_addrs().ok()?.next()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let settings = ServerSettings {
        allow_partial: args.allow_partial_mapping,
        request_logging_delay: args.request_logging_delay.map(Duration::from_millis),
        admin_enabled: args.admin,
        static_mappings_dir: args.read_static_mappings.clone(),
        watch_static_mappings: args.watch_static_mappings,
        ..ServerSettings::default()
    };
    let ctx = ServerContext::new(settings);

    if let Some(dir) = &args.read_static_mappings {
        if let Err(e) = stubforge::admin::load_static_mappings(&ctx, dir) {
            error!("invalid configuration: {e}");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    }

    if let Some(upstream) = &args.proxy_all {
        if !upstream.starts_with("http://") && !upstream.starts_with("https://") {
            error!("invalid configuration: --proxy-all needs an http(s) URL, got {upstream}");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
        let catch_all = Mapping::catch_all_proxy(upstream, args.save_mapping);
        if let Err(e) = ctx.store.add(catch_all) {
            error!("invalid configuration: {e}");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
        info!("proxying unmatched requests to {upstream}");
    }

    let mut addrs: Vec<SocketAddr> = vec![SocketAddr::from(([0, 0, 0, 0], args.port))];
    for raw in &args.urls {
        match parse_listen_url(raw) {
            Some(addr) => addrs.push(addr),
            None => {
                error!("invalid configuration: cannot parse listen URL {raw}");
                std::process::exit(EXIT_INVALID_CONFIG);
            }
        }
    }

    let server = match StubServer::bind(ctx.clone(), &addrs).await {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            std::process::exit(EXIT_BIND_FAILURE);
        }
    };

    // Ctrl-C starts the graceful teardown: stop accepting, drain, exit 0.
    let shutdown_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown_ctx.trigger_shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("server error: {e}");
        std::process::exit(EXIT_BIND_FAILURE);
    }
    info!("shutdown complete");
}
