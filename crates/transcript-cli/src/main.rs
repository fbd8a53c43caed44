//! `run-tail`: follow a run's transcript in the terminal.
//!
//! The transcript goes to stdout; the run header, live indicator and final
//! summary go to stderr so the output can be piped.

mod render;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use transcript_core::observability::init_observability_with_default;
use transcript_core::{PlainLogBuilder, Projection, RunStatus, TranscriptBuilder};
use transcript_live::{
    ChannelState, HttpRunService, JsonlArtifactSource, ObservationHandle, ObservationReport,
    ObserveOptions, Observer, RunId, ServerConfig, StatusWatch,
};

use crate::render::{OutputFormat, Render, TailPrinter, describe_run};

#[derive(Debug, Parser)]
#[command(name = "run-tail", version, about = "Follow a run's transcript as it happens")]
struct Cli {
    /// Run to follow.
    #[arg(required_unless_present = "from_file")]
    run_id: Option<String>,

    /// Base URL of the run service.
    #[arg(long, env = "ORCH_API_URL", default_value = "http://localhost:8080")]
    server: String,

    #[arg(long, env = "ORCH_API_KEY", default_value = "admin", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "ORCH_WORKSPACE_ID", default_value = "default")]
    workspace: String,

    /// Show raw stdout/stderr lines instead of the structured transcript.
    #[arg(long)]
    plain: bool,

    /// Never open the event stream; poll only.
    #[arg(long)]
    no_stream: bool,

    /// Replay a JSON-lines run artifact instead of contacting the server.
    #[arg(long, value_name = "PATH", conflicts_with = "no_stream")]
    from_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    status_interval_secs: u64,
}

impl Cli {
    fn observe_options(&self) -> ObserveOptions {
        ObserveOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..ObserveOptions::default()
        }
    }
}

/// A started observation plus whatever must stay alive while it runs.
struct Following<B> {
    handle: ObservationHandle<B>,
    _status: Option<StatusWatch>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so env-backed flags see it.
    let _ = dotenvy::dotenv();
    init_observability_with_default("warn");
    let cli = Cli::parse();

    let report = if cli.plain {
        follow::<PlainLogBuilder, _>(&cli, io::stdout()).await?
    } else {
        follow::<TranscriptBuilder, _>(&cli, io::stdout()).await?
    };
    eprintln!("{}", summarize(&report));
    Ok(())
}

async fn follow<P, W>(cli: &Cli, out: W) -> anyhow::Result<ObservationReport>
where
    P: Projection,
    P::Block: Render,
    W: Write,
{
    let following = start::<P>(cli).await?;

    let cancel = following.handle.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut printer = TailPrinter::new(out, cli.format);
    let result = print_views(following.handle, &mut printer).await;
    interrupt.abort();
    result
}

async fn start<P: Projection>(cli: &Cli) -> anyhow::Result<Following<P::Block>> {
    let options = cli.observe_options();

    if let Some(path) = &cli.from_file {
        let run_id = cli.run_id.clone().unwrap_or_else(|| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("artifact")
                .to_string()
        });
        let observer = Observer::builder()
            .pull(Arc::new(JsonlArtifactSource::new(path)))
            .options(options)
            .build()?;
        // A replayed artifact is a finished run: one catch-up, no polling.
        let (_status_tx, status_rx) = watch::channel(RunStatus::Completed);
        return Ok(Following {
            handle: observer.observe::<P>(run_id, status_rx),
            _status: None,
        });
    }

    let run_id = RunId::new(cli.run_id.clone().context("a run id is required")?);
    let config = ServerConfig::new(&cli.server)
        .api_key(&cli.api_key)
        .workspace_id(&cli.workspace);
    let service = Arc::new(HttpRunService::new(config)?);

    let info = service
        .run_info(&run_id)
        .await
        .with_context(|| format!("failed to load run {run_id} from {}", cli.server))?;
    eprintln!("{}", describe_run(&info, Utc::now()));

    let status = StatusWatch::start(
        service.clone(),
        run_id.clone(),
        Duration::from_secs(cli.status_interval_secs),
    )
    .await
    .context("failed to start status polling")?;

    let mut builder = Observer::builder().pull(service.clone()).options(options);
    if !cli.no_stream {
        builder = builder.push(service);
    }
    let observer = builder.build()?;
    Ok(Following {
        handle: observer.observe::<P>(run_id, status.receiver()),
        _status: Some(status),
    })
}

async fn print_views<B, W>(
    mut handle: ObservationHandle<B>,
    printer: &mut TailPrinter<W, B>,
) -> anyhow::Result<ObservationReport>
where
    B: Render,
    W: Write,
{
    let mut last = handle.view();
    let mut announced = last.state;
    if last.is_live {
        announce(announced);
    }

    while let Some(view) = handle.changed().await {
        if view.state != announced && view.state != ChannelState::Settled {
            announce(view.state);
            announced = view.state;
        }
        printer.render(&view).context("failed to write transcript")?;
        last = view;
    }

    let report = handle.join().await?;
    // A cancelled observation can end while still live; print what is held back.
    printer.flush_all(&last).context("failed to write transcript")?;
    Ok(report)
}

fn announce(state: ChannelState) {
    match state {
        ChannelState::Streaming => eprintln!("● live"),
        ChannelState::Polling => eprintln!("● live (polling)"),
        ChannelState::Settled => {}
    }
}

fn summarize(report: &ObservationReport) -> String {
    let mut line = format!(
        "{} events ({} streamed, {} fetched)",
        report.events, report.pushed, report.pulled
    );
    if report.fetch_errors > 0 {
        line.push_str(&format!(", {} failed fetches", report.fetch_errors));
    }
    if report.cancelled {
        line.push_str(", stopped before the run finished");
    }
    line
}
