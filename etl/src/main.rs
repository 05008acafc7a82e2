//! Batchload CLI - stage CSV/XML/JSON records in SQLite and export aggregates
//!
//! # Main Commands
//!
//! ```bash
//! batchload run --config batchload.json       # Full pipeline from a config file
//! batchload run -i a.csv -i b.xml --database stage.db
//! batchload init-config > batchload.json      # Print an example config
//! ```
//!
//! # Debug Commands (for development)
//!
//! ```bash
//! batchload extract input.json --dimensions city --measures sales
//! ```

use batchload::config::DATABASE_ENV;
use batchload::logs::LOG_BROADCASTER;
use batchload::{
    open_source, run_pipeline, PipelineConfig, PipelineReport, RecordSource, SchemaConfig,
    SourceConfig, SourceFormat,
};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "batchload")]
#[command(about = "Stage tabular files in SQLite and export basic and grouped results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: sources → staging table → basic and advanced outputs
    Run {
        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input file (repeatable, read in order)
        #[arg(short, long = "input")]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Staging SQLite file
        #[arg(long, env = DATABASE_ENV)]
        database: Option<PathBuf>,

        /// Output for the basic query
        #[arg(long)]
        basic_output: Option<PathBuf>,

        /// Output for the advanced query
        #[arg(long)]
        advanced_output: Option<PathBuf>,

        /// Rows per committed transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// CSV input delimiter
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output delimiter
        #[arg(long)]
        output_delimiter: Option<char>,

        /// Remove outputs before writing instead of appending
        #[arg(long)]
        fresh: bool,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Print normalized records of one input as TSV
    Extract {
        /// Input file
        input: PathBuf,

        /// Input format (detected from the extension if not specified)
        #[arg(short, long)]
        format: Option<SourceFormat>,

        /// CSV delimiter
        #[arg(short, long, default_value = ",")]
        delimiter: char,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show an example pipeline config
    InitConfig {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Schema flags shared by `run` and `extract`.
///
/// Explicit names win over the prefix/count rule.
#[derive(Args, Debug, Clone)]
struct SchemaArgs {
    /// Dimension names, comma separated
    #[arg(long, value_delimiter = ',')]
    dimensions: Vec<String>,

    /// Measure names, comma separated
    #[arg(long, value_delimiter = ',')]
    measures: Vec<String>,

    /// Read dimension and measure names from this CSV header
    #[arg(long)]
    heading: Option<PathBuf>,

    #[arg(long, default_value = "D")]
    dim_prefix: String,

    #[arg(long)]
    dim_count: Option<i64>,

    #[arg(long, default_value = "M")]
    measure_prefix: String,

    #[arg(long)]
    measure_count: Option<i64>,
}

impl SchemaArgs {
    /// `None` when no schema flag was given.
    fn to_config(&self) -> Option<SchemaConfig> {
        if !self.dimensions.is_empty() {
            return Some(SchemaConfig::Explicit {
                dimensions: self.dimensions.clone(),
                measures: self.measures.clone(),
            });
        }
        if let Some(path) = &self.heading {
            return Some(SchemaConfig::CsvHeading {
                path: path.clone(),
                dimension_prefix: self.dim_prefix.clone(),
                measure_prefix: self.measure_prefix.clone(),
            });
        }
        if self.dim_count.is_none() && self.measure_count.is_none() {
            return None;
        }
        Some(SchemaConfig::Rule {
            dimension_prefix: self.dim_prefix.clone(),
            dimension_count: self.dim_count.unwrap_or(3),
            measure_prefix: self.measure_prefix.clone(),
            measure_count: self.measure_count.unwrap_or(3),
        })
    }

    fn to_config_or_default(&self) -> SchemaConfig {
        self.to_config().unwrap_or_else(|| SchemaConfig::Rule {
            dimension_prefix: self.dim_prefix.clone(),
            dimension_count: 3,
            measure_prefix: self.measure_prefix.clone(),
            measure_count: 3,
        })
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            inputs,
            schema,
            database,
            basic_output,
            advanced_output,
            batch_size,
            delimiter,
            output_delimiter,
            fresh,
            json,
        } => {
            let overrides = RunOverrides {
                inputs,
                schema,
                database,
                basic_output,
                advanced_output,
                batch_size,
                delimiter,
                output_delimiter,
                fresh,
            };
            cmd_run(config.as_deref(), overrides, json).await
        }

        Commands::Extract {
            input,
            format,
            delimiter,
            schema,
            limit,
        } => cmd_extract(&input, format, delimiter, &schema, limit),

        Commands::InitConfig { output } => cmd_init_config(output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Command-line values layered over a config file.
struct RunOverrides {
    inputs: Vec<PathBuf>,
    schema: SchemaArgs,
    database: Option<PathBuf>,
    basic_output: Option<PathBuf>,
    advanced_output: Option<PathBuf>,
    batch_size: Option<usize>,
    delimiter: Option<char>,
    output_delimiter: Option<char>,
    fresh: bool,
}

fn build_config(
    config_path: Option<&Path>,
    o: RunOverrides,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => {
            eprintln!("📄 Config: {}", path.display());
            let mut config = PipelineConfig::from_file(path)?;
            if let Some(schema) = o.schema.to_config() {
                config.schema = schema;
            }
            if !o.inputs.is_empty() {
                config.sources = o.inputs.into_iter().map(SourceConfig::new).collect();
            }
            if let Some(database) = o.database {
                config.database = database;
            }
            config
        }
        None => {
            if o.inputs.is_empty() {
                return Err("no inputs: pass --config or at least one --input".into());
            }
            let database = o
                .database
                .ok_or_else(|| format!("no staging database: pass --database or set {}", DATABASE_ENV))?;
            PipelineConfig::new(
                o.schema.to_config_or_default(),
                o.inputs.into_iter().map(SourceConfig::new).collect(),
                database,
                "basic_results.tsv",
                "advanced_results.tsv",
            )
        }
    };

    if let Some(path) = o.basic_output {
        config.basic_output = path;
    }
    if let Some(path) = o.advanced_output {
        config.advanced_output = path;
    }
    if let Some(n) = o.batch_size {
        config.batch_size = n;
    }
    if let Some(d) = o.delimiter {
        config.csv_delimiter = d;
    }
    if let Some(d) = o.output_delimiter {
        config.output_delimiter = d;
    }
    config.fresh_outputs |= o.fresh;

    config.validate()?;
    Ok(config)
}

async fn cmd_run(
    config_path: Option<&Path>,
    overrides: RunOverrides,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(config_path, overrides)?;

    eprintln!("🗄️  Staging: {} (table {})", config.database.display(), config.table);
    eprintln!("   Sources: {}", config.sources.len());
    eprintln!("   Batch size: {}", config.batch_size);

    let report = run_pipeline(&config).await?;
    print_report(&report);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    eprintln!("\n✨ Done!");
    Ok(())
}

fn print_report(report: &PipelineReport) {
    eprintln!("\n📊 Results:");
    eprintln!("   Rows read: {}", report.load.rows_read);
    eprintln!("   Inserted: {}", report.load.inserted);
    if report.load.skipped > 0 {
        eprintln!("   ⚠️  Skipped: {}", report.load.skipped);
        for skip in &report.load.skip_samples {
            eprintln!("     - {}", skip);
        }
    }
    eprintln!("   Commits: {}", report.load.commits);
    eprintln!(
        "   💾 Basic: {} rows → {}",
        report.basic_rows,
        report.basic_output.display()
    );
    eprintln!(
        "   💾 Advanced: {} rows → {}",
        report.advanced_rows,
        report.advanced_output.display()
    );
    eprintln!("   Took {} ms", report.elapsed_ms());
}

fn cmd_extract(
    input: &Path,
    format: Option<SourceFormat>,
    delimiter: char,
    schema_args: &SchemaArgs,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Extracting: {}", input.display());

    // Keep stdout for records only
    LOG_BROADCASTER.set_echo(false);

    if !delimiter.is_ascii() {
        return Err(format!("delimiter {:?} is not a single byte", delimiter).into());
    }
    let delimiter = delimiter as u8;

    let schema = schema_args.to_config_or_default().build(delimiter)?;
    eprintln!("   Columns: {}", schema.all_names().join(", "));

    let source = open_source(input, format, delimiter)?;
    eprintln!("   Format: {}", source.format().as_str());

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(io::stdout().lock());
    writer.write_record(schema.all_names())?;

    let mut count = 0;
    for record in source.records(&schema)?.take(limit.unwrap_or(usize::MAX)) {
        writer.write_record(record?.values())?;
        count += 1;
    }
    writer.flush()?;

    eprintln!("✅ Extracted {} records", count);
    Ok(())
}

fn cmd_init_config(output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&PipelineConfig::example())?;
    match output {
        Some(p) => {
            fs::write(p, &json)?;
            eprintln!("💾 Config written to: {}", p.display());
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}
