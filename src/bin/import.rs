use std::{env, fs::File, io::BufReader};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use stammbaum::{
    ancestors::import::{import_rows, read_rows},
    config::AppConfig,
    db,
};

const USAGE: &str = "Usage: import <file.csv> [--tab] [--family <key>]";

struct Options {
    path: String,
    delimiter: u8,
    family: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut path = None;
    let mut delimiter = b',';
    let mut family = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tab" => delimiter = b'\t',
            "--family" => {
                family = Some(args.next().context("--family needs a value")?.to_lowercase());
            }
            other if other.starts_with("--") => bail!("unknown option {other}\n{USAGE}"),
            other => path = Some(other.to_string()),
        }
    }
    let path = path.context(USAGE)?;
    Ok(Options {
        path,
        delimiter,
        family,
    })
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let options = parse_args(env::args().skip(1))?;
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "import",
        database_url = %config.redacted_database_url(),
        file = %options.path,
        "loaded backend configuration"
    );
    if let Some(family) = options.family.as_deref() {
        if !config.is_known_family(family) {
            bail!("unknown family {family}, expected one of {:?}", config.family_trees);
        }
    }

    let file = File::open(&options.path)
        .with_context(|| format!("failed to open {}", options.path))?;
    let rows = read_rows(BufReader::new(file), options.delimiter)
        .with_context(|| format!("failed to parse {}", options.path))?;

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let summary = import_rows(
        &mut conn,
        rows,
        &config.family_trees,
        options.family.as_deref(),
    )
    .context("import failed")?;

    println!(
        "Imported {} new and {} existing persons, {} relations ({} rows skipped).",
        summary.created, summary.updated, summary.relations, summary.skipped
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
