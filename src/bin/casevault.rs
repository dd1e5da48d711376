//! casevault CLI
//!
//! Minimal front-end over the cataloguing engine.
//!
//! Usage:
//!   casevault create --case case.db
//!   casevault ingest --case case.db disk.img --hash-files --record-unallocated
//!   casevault info --case case.db

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::error;

use casevault_core::domain::ImageFormat;
use casevault_core::infrastructure::database::PostgresConfig;
use casevault_core::{Case, CaseLocation, IngestOptions, IngestStatus};

#[derive(Parser)]
#[command(name = "casevault", version, about = "Disk-image cataloguing engine")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Args, Clone)]
struct LocationArgs {
	/// Path of the single-user case database.
	#[arg(long, value_name = "PATH", conflicts_with = "pg_database")]
	case: Option<PathBuf>,

	/// Name of the multi-user case database.
	#[arg(long, value_name = "NAME")]
	pg_database: Option<String>,

	#[arg(long, default_value = "localhost", requires = "pg_database")]
	pg_host: String,

	#[arg(long, default_value_t = 5432, requires = "pg_database")]
	pg_port: u16,

	#[arg(long, default_value = "postgres", requires = "pg_database")]
	pg_user: String,

	#[arg(long, default_value = "", requires = "pg_database", env = "CASEVAULT_PG_PASSWORD")]
	pg_password: String,
}

impl LocationArgs {
	fn resolve(&self) -> Result<CaseLocation> {
		if let Some(path) = &self.case {
			return Ok(CaseLocation::Sqlite(path.clone()));
		}
		if let Some(database) = &self.pg_database {
			return Ok(CaseLocation::Postgres(PostgresConfig {
				host: self.pg_host.clone(),
				port: self.pg_port,
				database: database.clone(),
				user: self.pg_user.clone(),
				password: self.pg_password.clone(),
			}));
		}
		anyhow::bail!("either --case or --pg-database is required")
	}
}

#[derive(Subcommand)]
enum Command {
	/// Create a new case database.
	Create {
		#[command(flatten)]
		location: LocationArgs,
	},

	/// Catalogue one image into a case.
	Ingest {
		#[command(flatten)]
		location: LocationArgs,

		/// Image part paths, in order.
		#[arg(required = true, value_name = "IMAGE")]
		parts: Vec<PathBuf>,

		/// Sector size in bytes.
		#[arg(long, default_value_t = 512)]
		sector_size: u32,

		/// Record layout ranges for non-resident attributes.
		#[arg(long)]
		record_block_map: bool,

		/// Hash file content with MD5.
		#[arg(long)]
		hash_files: bool,

		/// Skip the synthetic orphan directory on FAT volumes.
		#[arg(long)]
		skip_fat_orphans: bool,

		/// Sweep unallocated space into virtual files.
		#[arg(long)]
		record_unallocated: bool,

		/// Minimum bytes per unallocated file (0: one per file system,
		/// negative: one per contiguous run).
		#[arg(long, default_value_t = -1)]
		min_chunk_bytes: i64,

		/// Maximum bytes per unallocated file (negative: unbounded).
		#[arg(long, default_value_t = -1)]
		max_chunk_bytes: i64,

		/// Opaque device identifier stored with the image.
		#[arg(long)]
		device_id: Option<String>,

		/// Timezone for interpreting on-disk timestamps.
		#[arg(long, default_value = "")]
		timezone: String,

		/// Only write the image row, skip the file-system walk.
		#[arg(long)]
		skip_file_systems: bool,

		/// Also write a cache copy of the image while reading.
		#[arg(long, value_name = "PATH")]
		image_writer: Option<PathBuf>,

		/// Known-files hash index to consult.
		#[arg(long, value_name = "PATH")]
		known_files: Option<PathBuf>,

		/// Known-bad hash index to consult.
		#[arg(long, value_name = "PATH")]
		known_bad: Option<PathBuf>,
	},

	/// Print catalogue counts for a case.
	Info {
		#[command(flatten)]
		location: LocationArgs,

		/// Emit the counts as JSON.
		#[arg(long)]
		json: bool,
	},
}

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	match run().await {
		Ok(code) => code,
		Err(err) => {
			error!("{err:#}");
			ExitCode::from(1)
		}
	}
}

async fn run() -> Result<ExitCode> {
	let cli = Cli::parse();
	match cli.command {
		Command::Create { location } => {
			Case::create(&location.resolve()?)
				.await
				.context("creating case")?;
			println!("case created");
			Ok(ExitCode::SUCCESS)
		}

		Command::Ingest {
			location,
			parts,
			sector_size,
			record_block_map,
			hash_files,
			skip_fat_orphans,
			record_unallocated,
			min_chunk_bytes,
			max_chunk_bytes,
			device_id,
			timezone,
			skip_file_systems,
			image_writer,
			known_files,
			known_bad,
		} => {
			let mut case = Case::open(&location.resolve()?).await.context("opening case")?;
			if let Some(path) = &known_files {
				case.attach_known_files(path).context("loading known-files index")?;
			}
			if let Some(path) = &known_bad {
				case.attach_known_bad(path).context("loading known-bad index")?;
			}

			let mut driver = case.begin_ingest();
			driver.configure(IngestOptions {
				record_block_map,
				hash_files,
				skip_fat_orphans,
				record_unallocated,
				min_chunk_bytes,
				max_chunk_bytes,
				device_id,
				timezone,
				add_file_systems: !skip_file_systems,
				image_writer_path: image_writer,
			})?;

			let status = driver
				.start(&parts, ImageFormat::Detect, sector_size)
				.await
				.context("ingesting image")?;

			for issue in driver.error_list() {
				eprintln!(
					"[{:?}] {}{}",
					issue.kind,
					issue.message,
					issue
						.context
						.as_deref()
						.map(|c| format!(" ({c})"))
						.unwrap_or_default()
				);
			}

			match status {
				IngestStatus::CriticalError => {
					eprintln!("image was not catalogued");
				}
				_ => {
					let image_id = driver.commit().await.context("committing ingest")?;
					println!("image catalogued as object {image_id}");
				}
			}
			Ok(ExitCode::from(status.exit_code() as u8))
		}

		Command::Info { location, json } => {
			let case = Case::open(&location.resolve()?).await.context("opening case")?;
			let summary = case.summary().await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&summary)?);
			} else {
				println!("images:         {}", summary.images);
				println!("volume systems: {}", summary.volume_systems);
				println!("volumes:        {}", summary.volumes);
				println!("file systems:   {}", summary.file_systems);
				println!("files:          {}", summary.files);
				println!("layout ranges:  {}", summary.layout_ranges);
			}
			Ok(ExitCode::SUCCESS)
		}
	}
}
