use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use analyze_migration::{dump_desc, dump_state, extract, write_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DumpKind {
    /// Decoded device state.
    State,
    /// The JSON device description carried by the stream.
    Desc,
}

#[derive(Debug, Parser)]
#[command(name = "analyze-migration")]
#[command(about = "Decode a QEMU migration stream saved to a file")]
struct Cli {
    /// Migration stream file (e.g. from `migrate "exec:cat > mig"`).
    #[arg(short, long)]
    file: PathBuf,

    #[arg(short, long, value_enum, default_value_t = DumpKind::State)]
    dump: DumpKind,

    /// Include RAM page contents in the state dump.
    #[arg(short, long)]
    memory: bool,

    /// Write desc.json, state.json and RAM block files instead of printing.
    #[arg(short = 'x', long)]
    extract: bool,

    /// Target directory for --extract.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.extract {
        let report = extract(&cli.file, &cli.output_dir, cli.memory)?;
        for path in &report.written {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let value = match cli.dump {
        DumpKind::State => dump_state(&cli.file, cli.memory)?,
        DumpKind::Desc => dump_desc(&cli.file)?,
    };
    write_json(io::stdout().lock(), &value)
}
