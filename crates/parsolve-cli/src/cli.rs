use clap::{Args, Parser, Subcommand};
use parsolve::engine::config::{BackendKind, ErrorPolicy};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Parsolve Contributors",
    version,
    about = "parsolve - Solve batches of cone-constrained least-squares problems in parallel across threads or isolated worker processes.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a batch of problems and solve it through one backend.
    Solve(SolveArgs),
    /// Solve the same batch with several backends, check that they agree, and compare wall times.
    Compare(CompareArgs),
    /// Construct one workspace per problem, then solve each of them repeatedly.
    Amortize(AmortizeArgs),
    /// Serve one isolated-process request on stdin/stdout.
    #[command(hide = true)]
    Worker,
}

/// Options shared by every batch-running subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Problem Overrides ---
    /// Number of problems in the batch.
    #[arg(short = 'n', long, value_name = "INT")]
    pub count: Option<usize>,

    /// Rows per problem; columns are a tenth of that.
    #[arg(short = 'm', long, value_name = "INT")]
    pub size: Option<usize>,

    /// Seed of the first problem; the rest use consecutive seeds.
    #[arg(long, value_name = "INT")]
    pub first_seed: Option<u64>,

    /// Constraint set: 'free', 'non-negative', or 'box:LOWER,UPPER'.
    #[arg(long, value_name = "CONE")]
    pub cone: Option<String>,

    // --- Dispatch Overrides ---
    /// Upper bound on simultaneously active workers.
    #[arg(short, long, value_name = "INT")]
    pub workers: Option<usize>,

    /// What to do when a task fails: 'collect-all' or 'fail-fast'.
    #[arg(long, value_name = "POLICY")]
    pub on_error: Option<ErrorPolicy>,

    /// Kill isolated worker processes that run longer than this.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Print solver iteration messages. All workers funnel through one lock to print,
    /// which costs parallel throughput.
    #[arg(long)]
    pub trace_solver: bool,

    // --- Solver Overrides ---
    /// Iteration budget per solve.
    #[arg(long, value_name = "INT")]
    pub max_iters: Option<usize>,

    /// Absolute convergence tolerance.
    #[arg(long, value_name = "FLOAT")]
    pub eps_abs: Option<f64>,

    /// Relative convergence tolerance.
    #[arg(long, value_name = "FLOAT")]
    pub eps_rel: Option<f64>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S dispatch.workers=8
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SolveArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Execution backend: 'sequential', 'shared-thread', or 'isolated-process'.
    #[arg(short, long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Print the summary as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Backends to run, in order; the first one is the reference.
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub backends: Vec<BackendKind>,

    /// Largest per-component deviation still counted as agreement.
    #[arg(long, value_name = "FLOAT")]
    pub tolerance: Option<f64>,

    /// Print the comparison as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AmortizeArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Backend used for construction and solving; must share memory.
    #[arg(short, long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Solves per workspace after construction.
    #[arg(short, long, value_name = "INT")]
    pub repeats: Option<usize>,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}
