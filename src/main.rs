use anyhow::Context;
use clap::{ArgAction, Parser};
use dmarc_import::batch;
use dmarc_import::config::Config;
use dmarc_import::store::{MemoryStore, MysqlStore, ReportStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Import DMARC aggregate reports (raw, zipped or gzipped XML).
#[derive(Parser)]
#[command(version)]
struct Args {
	/// Path to the configuration file, created with defaults if missing.
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// More logging, repeat for even more.
	#[arg(short, long, action = ArgAction::Count)]
	verbose: u8,

	/// Worker threads, overrides the `import.jobs` setting.
	#[arg(short, long)]
	jobs: Option<usize>,

	/// Decode and check the reports without touching the database.
	#[arg(long)]
	dry_run: bool,

	/// Report files to import.
	#[arg(required = true)]
	report: Vec<PathBuf>,
}

fn init_tracing(verbose: u8) {
	let level = match verbose {
		0 => "info",
		1 => "debug",
		_ => "trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	init_tracing(args.verbose);

	let config = Config::load_or_create(&args.config)?;
	let jobs = args.jobs.unwrap_or(config.import.jobs);

	let store: Box<dyn ReportStore> = if args.dry_run {
		tracing::info!("dry run, nothing will be stored");
		Box::new(MemoryStore::new())
	} else {
		let store = MysqlStore::connect(&config.database).with_context(|| {
			format!(
				"could not connect to database `{}` on {}:{}",
				config.database.database, config.database.host, config.database.port
			)
		})?;
		Box::new(store)
	};

	let summary = batch::import_paths(store.as_ref(), &args.report, jobs);
	tracing::info!("{summary}");

	Ok(())
}
