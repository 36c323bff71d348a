mod command;
mod config;
mod health;
mod product;
mod retry;
mod supervisor;
mod version;

use anyhow::Context;
use clap::Parser;
use command::ProducerRequest;
use config::UlsConfig;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use supervisor::{ProducerStream, ProducerSupervisor, StreamRead, SupervisorError};
use tracing_subscriber::EnvFilter;

/// How often the producer's output is polled once it is running.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on reads per poll, so a chatty producer cannot starve Ctrl-C.
const MAX_READS_PER_TICK: usize = 64;

/// Launch a log/event producer for one product, make sure it comes up, and
/// stream its output to stdout.
#[derive(Parser, Debug)]
#[command(name = "uls-input", version, about)]
pub struct Cli {
    /// Product to stream from (EAA, ETP, MFA)
    #[arg(short, long, required_unless_present = "version_report")]
    input: Option<String>,

    /// Feed to stream (default: the product's first feed)
    #[arg(long, default_value = "")]
    feed: String,

    /// Output format (default: JSON)
    #[arg(long, default_value = "")]
    format: String,

    /// Credentials file
    #[arg(long, default_value = "~/.edgerc")]
    edgerc: String,

    /// Section within the credentials file
    #[arg(long, default_value = "default")]
    section: String,

    /// Raw producer arguments; replaces feed, format, proxy and credentials
    #[arg(long)]
    rawcmd: Option<String>,

    /// Proxy the producer should use
    #[arg(long)]
    inproxy: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "uls.toml")]
    config: PathBuf,

    /// Startup attempts before giving up (overrides config)
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds to let the producer settle before the health check (overrides config)
    #[arg(long)]
    run_delay: Option<u64>,

    /// Print the resolved producer command as JSON, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print tool and producer versions and exit
    #[arg(long)]
    version_report: bool,

    /// Extra logging (commands, state transitions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn log_filter(&self) -> EnvFilter {
        let level = if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        };
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("uls_input={level}")))
    }

    fn request(&self, product: &str) -> ProducerRequest {
        ProducerRequest {
            product: product.to_string(),
            feed: self.feed.clone(),
            format: self.format.clone(),
            credentials_file: expand_home(&self.edgerc),
            credentials_section: self.section.clone(),
            raw_command: self.rawcmd.clone(),
            proxy: self.inproxy.clone(),
        }
    }
}

/// Expand a leading `~` against `$HOME`.
fn expand_home(path: &str) -> String {
    let Ok(home) = std::env::var("HOME") else {
        return path.to_string();
    };
    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{rest}", home.trim_end_matches('/'))
    } else {
        path.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(cli.log_filter())
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = UlsConfig::load(&cli.config)?;
    if let Some(retries) = cli.retries {
        config.input.rerun_retries = retries;
    }
    if let Some(delay) = cli.run_delay {
        config.input.run_delay_secs = delay;
    }

    if cli.version_report {
        let report = tokio::task::spawn_blocking(move || version::report(&config)).await?;
        print!("{report}");
        return Ok(());
    }

    let product = cli.input.clone().context("--input is required")?;
    let request = cli.request(&product);

    if cli.dry_run {
        let command = config.command_builder().build(&request)?;
        println!("{}", serde_json::to_string_pretty(&command)?);
        return Ok(());
    }

    let mut supervisor =
        ProducerSupervisor::new(config.command_builder(), config.retry_policy());
    tracing::info!(%product, feed = %request.feed, "starting producer");
    let supervisor = tokio::task::spawn_blocking(move || {
        supervisor.create(&request).map(|_| ())?;
        Ok::<_, SupervisorError>(supervisor)
    })
    .await
    .context("producer startup task failed")??;

    pump(supervisor, &product).await
}

/// Copy producer output to stdout until it closes or we are interrupted.
async fn pump(mut supervisor: ProducerSupervisor, product: &str) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut buf = vec![0u8; 64 * 1024];
    let closed = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, stopping producer");
                break false;
            }
            _ = interval.tick() => {
                let Some(stream) = supervisor.stream_mut() else {
                    break true;
                };
                if drain(stream, &mut buf, &mut std::io::stdout().lock())? {
                    break true;
                }
            }
        }
    };

    let alive = supervisor.is_alive();
    tokio::task::spawn_blocking(move || supervisor.shutdown()).await?;

    if closed {
        tracing::error!(%product, alive, "producer closed its output");
        anyhow::bail!("producer for {product} stopped streaming");
    }
    Ok(())
}

/// Write what is currently available, at most `MAX_READS_PER_TICK` reads.
/// Returns `true` once the stream closed.
fn drain(
    stream: &mut ProducerStream,
    buf: &mut [u8],
    out: &mut impl Write,
) -> anyhow::Result<bool> {
    let mut closed = false;
    for _ in 0..MAX_READS_PER_TICK {
        match stream.poll_read(buf).context("failed to read producer output")? {
            StreamRead::Data(n) => out.write_all(&buf[..n])?,
            StreamRead::Pending => break,
            StreamRead::Closed => {
                closed = true;
                break;
            }
        }
    }
    out.flush()?;
    Ok(closed)
}
