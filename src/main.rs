use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parse_video::config::Config;
use parse_video::server::auth::BasicAuth;
use parse_video::server::{self, AppState, Envelope};
use parse_video::{VideoParser, VideoSource};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parse-video", version, about = "Resolve short-video share links")]
struct Cli {
    /// Alternate config file (default ~/.config/parse-video/config.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP front end
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Resolve once and print the JSON envelope
    Parse {
        /// Share text, or a raw id when --source is given
        text: String,
        #[arg(long)]
        source: Option<VideoSource>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    match cli.command {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Parse { text, source } => parse_once(&config, &text, source).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parse_video=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    let parser = VideoParser::from_config(&config).context("building http client")?;
    let auth = BasicAuth::new(config.server.username.clone(), config.server.password.clone());
    if auth.is_enabled() {
        info!("basic auth enabled");
    } else {
        warn!("basic auth disabled; set PARSE_VIDEO_USERNAME and PARSE_VIDEO_PASSWORD to enable");
    }

    let app = server::router(AppState::new(parser, auth));
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn parse_once(config: &Config, text: &str, source: Option<VideoSource>) -> Result<()> {
    let parser = VideoParser::from_config(config).context("building http client")?;
    let result = match source {
        Some(source) => parser.resolve_id(source, text).await,
        None => parser.resolve_share_url(text).await,
    };
    let envelope = Envelope::from_result(result);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}
