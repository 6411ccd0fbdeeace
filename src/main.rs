use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use tracegraph::capture::{Capture, CaptureIndex, CookieJar, InMemoryCaptureIndex};
use tracegraph::codegen::{generate, render_plan, render_python};
use tracegraph::config::{Config, OracleKind, OutputFormat};
use tracegraph::graph::{render_dot, render_tree, BuildRequest, BuildSession, StepEvent};
use tracegraph::oracle::tape::{DecisionTape, DecisionTapeWriter};
use tracegraph::oracle::{
    HeuristicOracle, OpenAiOracle, Oracle, RecordingOracle, ReplayOracle,
};
use tracegraph::util;

#[derive(Parser, Debug)]
#[command(
    name = "tracegraph",
    version,
    about = "Reconstruct the minimal request sequence behind a browser action"
)]
struct Cli {
    /// Data directory for logs and config (default ~/.tracegraph)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Mirror logs to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the dependency graph for a target request and emit replay code
    Build(BuildArgs),
    /// List the requests kept from a HAR capture
    Requests {
        #[arg(long)]
        har: PathBuf,
        /// Keep static resources (images, scripts, ...)
        #[arg(long)]
        keep_static: bool,
    },
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// HAR file recorded while performing the action
    #[arg(long)]
    har: PathBuf,
    /// URL of the request that performs the action
    #[arg(long)]
    target: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Cookie jar (JSON list of {name, value} or a name -> value map)
    #[arg(long)]
    cookies: Option<PathBuf>,
    /// Known input value, as name=value (repeatable)
    #[arg(long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,
    #[arg(long)]
    max_steps: Option<usize>,
    #[arg(long, value_enum)]
    oracle: Option<OracleKind>,
    /// Record every oracle answer to this JSONL tape
    #[arg(long, conflicts_with = "replay_tape")]
    record_tape: Option<PathBuf>,
    /// Answer from a previously recorded tape instead of a live oracle
    #[arg(long)]
    replay_tape: Option<PathBuf>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Write the program here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Print the dependency tree to stderr
    #[arg(long)]
    print_graph: bool,
    /// Write a Graphviz rendering of the graph
    #[arg(long)]
    dot: Option<PathBuf>,
    /// Write the graph as JSON
    #[arg(long)]
    graph_json: Option<PathBuf>,
    /// Print build progress after every step
    #[arg(long)]
    trace_steps: bool,
    /// Keep static resources when loading the HAR
    #[arg(long)]
    keep_static: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file.and(std::io::stderr))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file)
            .with_ansi(false) // Disable ANSI colors in log file
            .init();
    }
    Ok(())
}

fn parse_inputs(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut inputs = BTreeMap::new();
    for item in raw {
        let Some((name, value)) = item.split_once('=') else {
            bail!("invalid --input {item:?}: expected NAME=VALUE");
        };
        inputs.insert(name.trim().to_string(), value.to_string());
    }
    Ok(inputs)
}

fn make_oracle(
    args: &BuildArgs,
    config: &Config,
    index: Arc<dyn CaptureIndex>,
    inputs: &BTreeMap<String, String>,
) -> Result<Arc<dyn Oracle>> {
    if let Some(path) = &args.replay_tape {
        let tape = DecisionTape::read_jsonl_from_path(path)
            .with_context(|| format!("failed to read decision tape {}", path.display()))?;
        return Ok(Arc::new(ReplayOracle::new(&tape)));
    }

    let kind = args.oracle.unwrap_or(config.oracle.kind);
    let oracle: Arc<dyn Oracle> = match kind {
        OracleKind::Heuristic => {
            Arc::new(HeuristicOracle::new(index).with_inputs(inputs.clone()))
        }
        OracleKind::Openai => Arc::new(
            OpenAiOracle::new(config.oracle.openai.clone(), index)
                .context("failed to configure the OpenAI oracle")?,
        ),
    };

    match &args.record_tape {
        Some(path) => {
            let writer = DecisionTapeWriter::create(path, oracle.name())
                .with_context(|| format!("failed to create decision tape {}", path.display()))?;
            Ok(Arc::new(RecordingOracle::new(oracle, Arc::new(writer))))
        }
        None => Ok(oracle),
    }
}

async fn build(args: BuildArgs, config: Config) -> Result<()> {
    let mut filter = config.capture.filter();
    if args.keep_static {
        filter.skip_static = false;
    }
    let capture = Capture::from_har_path(&args.har, &filter)
        .with_context(|| format!("failed to load capture {}", args.har.display()))?;
    let cookies = match &args.cookies {
        Some(path) => CookieJar::from_path(path)
            .with_context(|| format!("failed to load cookies {}", path.display()))?,
        None => CookieJar::new(),
    };
    let inputs = parse_inputs(&args.inputs)?;
    let index: Arc<dyn CaptureIndex> = Arc::new(InMemoryCaptureIndex::new(capture));
    let oracle = make_oracle(&args, &config, index.clone(), &inputs)?;

    let mut request = BuildRequest::new(&args.target)
        .with_method(&args.method)
        .with_cookies(cookies)
        .with_max_steps(args.max_steps.unwrap_or(config.max_steps));
    request.inputs = inputs;

    let mut session = BuildSession::new(request, index)?;
    let outcome = if args.trace_steps {
        loop {
            let event = session.advance(oracle.as_ref()).await;
            if matches!(event, StepEvent::NodeResolved(_) | StepEvent::Closed(_)) {
                eprintln!("{}", session.progress());
            }
            if let StepEvent::Closed(_) = event {
                break;
            }
        }
        session
            .outcome()
            .context("build session did not close")?
    } else {
        session.run(oracle.as_ref()).await
    };

    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    if !outcome.is_complete() {
        eprintln!(
            "warning: build incomplete after {} steps; {} request(s) unresolved",
            outcome.steps,
            outcome.pending.len()
        );
    }

    let dag = session.into_dag();
    if args.print_graph {
        eprint!("{}", render_tree(&dag));
    }
    if let Some(path) = &args.dot {
        fs::write(path, render_dot(&dag))
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    if let Some(path) = &args.graph_json {
        let json = serde_json::to_string_pretty(&dag.snapshot())?;
        fs::write(path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let program = generate(&dag);
    for warning in &program.warnings {
        eprintln!("warning: {warning}");
    }
    let rendered = match args.format.unwrap_or(config.output) {
        OutputFormat::Python => render_python(&program),
        OutputFormat::Json => program.to_json()? + "\n",
        OutputFormat::Plan => render_plan(&program),
    };
    match &args.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

fn list_requests(har: PathBuf, keep_static: bool, config: &Config) -> Result<()> {
    let mut filter = config.capture.filter();
    if keep_static {
        filter.skip_static = false;
    }
    let capture = Capture::from_har_path(&har, &filter)
        .with_context(|| format!("failed to load capture {}", har.display()))?;
    for record in &capture.records {
        println!(
            "{}\t{}\t{}\t{}",
            record.id, record.response.status, record.request.method, record.request.url
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());
    init_logging(cli.verbose)?;

    let config = Config::load();
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Command::Build(args) => build(args, config).await,
        Command::Requests { har, keep_static } => list_requests(har, keep_static, &config),
    }
}
