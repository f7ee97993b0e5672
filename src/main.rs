use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;

use metafri::config::{
    parse_categories, ContactMode, PipelineConfig, DEFAULT_CONTACT_THRESHOLD,
    DEFAULT_GENERATED_NEIGHBOURS, DEFAULT_MAX_QUERY_LENGTH,
};
use metafri::external_predictor::ExternalPredictorFactory;
use metafri::pipeline::run_pipeline;
use metafri::predictor::ModelConfig;
use metafri::search::MmseqsSearch;
use metafri::target_db::{init_data_root, model_config_path};

/// metafri - structure-aware function annotation of metagenomic proteins
///
/// Queries with a structural homolog are annotated from an aligned contact
/// map, the rest from sequence alone
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Only report warnings and errors
    #[clap(long = "quiet", global = true)]
    quiet: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Annotate the query batch found in a work directory
    Run(RunArgs),

    /// Create the data-root folder layout
    Init {
        /// Data root to populate
        #[clap(short = 'd', long = "data-root")]
        data_root: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Work directory holding exactly one .faa/.faa.gz batch
    #[clap(short = 'w', long = "work-dir")]
    work_dir: PathBuf,

    /// Data root with search databases, structures and trained models
    #[clap(short = 'd', long = "data-root")]
    data_root: PathBuf,

    /// Target collection to search against
    #[clap(short = 't', long = "target-db", default_value = "pdb100")]
    target_db: String,

    /// Queries longer than this are skipped
    #[clap(short = 'm', long = "max-length", default_value_t = DEFAULT_MAX_QUERY_LENGTH)]
    max_length: usize,

    /// Function categories, processed in the given order
    #[clap(short = 'c', long = "categories", default_value = "mf,bp,cc,ec")]
    categories: String,

    /// Contact distance threshold in Angstrom
    #[clap(long = "contact-threshold", default_value_t = DEFAULT_CONTACT_THRESHOLD)]
    contact_threshold: f32,

    /// Sequence neighbours linked around unmatched query residues (0 = structure only)
    #[clap(long = "generated-contact", default_value_t = DEFAULT_GENERATED_NEIGHBOURS)]
    generated_contact: usize,

    /// Discard search hits below this identity
    #[clap(long = "min-identity", default_value = "0.0")]
    min_identity: f32,

    /// mmseqs binary (looked up on PATH if omitted)
    #[clap(long = "mmseqs")]
    mmseqs: Option<PathBuf>,

    /// Threads for the search
    #[clap(long = "threads", default_value = "8")]
    threads: usize,

    /// Model runner executable speaking the JSON line protocol
    #[clap(long = "predictor-command", default_value = "metafri-model-runner")]
    predictor_command: PathBuf,
}

fn run(args: RunArgs) -> Result<()> {
    let config = PipelineConfig::new(&args.work_dir, &args.data_root, &args.target_db)
        .with_categories(parse_categories(&args.categories)?)
        .with_max_query_length(args.max_length)
        .with_contact_threshold(args.contact_threshold)
        .with_contact_mode(ContactMode::from_neighbours(args.generated_contact))
        .with_min_identity(args.min_identity);
    config.validate()?;

    let models = ModelConfig::load(&model_config_path(&config.data_root))?;
    let factory = ExternalPredictorFactory::new(models, args.predictor_command);
    let search = MmseqsSearch::locate(args.mmseqs, args.threads)?;

    let summary = run_pipeline(&config, &search, &factory)?;

    info!(
        "Done: {} queries ({} excluded by length), {} aligned, {} sequence-only; {} units run, {} skipped",
        summary.processed,
        summary.excluded.len(),
        summary.aligned,
        summary.unaligned,
        summary.executed().count(),
        summary.skipped().count()
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let result = match args.command {
        Commands::Run(run_args) => run(run_args),
        Commands::Init { data_root } => init_data_root(&data_root).map(|has_models| {
            info!("Data root ready at {}", data_root.display());
            if !has_models {
                warn!(
                    "No model configuration at {}; place trained models there before running",
                    model_config_path(&data_root).display()
                );
            }
        }),
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}
