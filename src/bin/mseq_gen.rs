use anyhow::Context;
use clap::Parser;
use sigstream::code_table::CodeTable;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Writes a maximum-length sequence code table (f32 LE, I/Q pairs)")]
struct Args {
    /// Shift register length; the table holds 2 * (2^nbits - 1) values.
    #[arg(long, default_value_t = 8)]
    nbits: u32,

    #[arg(long, default_value = "m_sequence.bin")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let table = CodeTable::from_mls(args.nbits)?;
    table
        .write(&args.out)
        .with_context(|| format!("write {}", args.out.display()))?;
    tracing::info!(path = %args.out.display(), entries = table.len(), "wrote code table");
    Ok(())
}
