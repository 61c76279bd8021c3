use std::sync::Arc;

use clap::Parser;
use kdam::{BarExt, tqdm};
use notevec::{
    DataDir,
    EmbeddingService,
    IndexingService,
    LocalEmbedder,
    Result,
    VectorStore,
    cli::{Cli, Command, IndexArgs, RelatedArgs, SearchArgs},
    data_dir::DataDirSource,
    embedder::{DEFAULT_MODEL_ID, Embedder, MODEL_ENV_VAR},
    notes,
    search,
    similarity::SimilarityResult,
    vector_store::StoreStats,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("NOTEVEC_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let store = VectorStore::open(&data_dir.vectors_db())?;

    match &cli.command {
        Command::Index(args) => {
            let embedder = load_embedder(&cli, &data_dir)?;
            cmd_index(embedder, store, args).await?;
        }
        Command::Search(args) => {
            let embedder = load_embedder(&cli, &data_dir)?;
            cmd_search(embedder, &store, args).await?;
        }
        Command::Related(args) => {
            cmd_related(&store, args).await?;
        }
        Command::Remove { id } => {
            if store.remove(id).await? {
                println!("Removed '{id}'");
            } else {
                println!("No embedding stored for '{id}'");
            }
        }
        Command::Status { json } => {
            cmd_status(&cli, &data_dir, &store, *json).await?;
        }
        Command::Clear => {
            store.clear().await?;
            println!("Cleared all embeddings");
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// The one embedder instance shared by everything this process runs.
fn load_embedder(
    cli: &Cli,
    data_dir: &DataDir,
) -> Result<Arc<LocalEmbedder>> {
    let cache_dir = data_dir.models_dir();
    let embedder = match &cli.model {
        Some(model) => LocalEmbedder::with_model_id(model, cache_dir),
        None => LocalEmbedder::new(cache_dir),
    }?;
    Ok(Arc::new(embedder))
}

fn model_name(cli: &Cli) -> String {
    cli.model
        .clone()
        .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

async fn cmd_index(
    embedder: Arc<LocalEmbedder>,
    store: VectorStore,
    args: &IndexArgs,
) -> Result<()> {
    let notes = notes::scan_notes(args.path.clone()).await?;
    info!(count = notes.len(), path = %args.path.display(), "loaded notes");

    let embeddings = Arc::new(EmbeddingService::new(embedder.clone()));
    embeddings.initialize().await?;
    let service = IndexingService::new(embeddings, store);

    let mut bar = tqdm!(desc = "Indexing", unit = " notes");
    let report = service
        .sync(&notes, &args.options(), |done, total, name| {
            bar.total = total;
            if let Some(name) = name {
                bar.set_description(name);
            }
            let _ = bar.update_to(done);
        })
        .await?;
    eprintln!();

    println!(
        "Indexed {} note(s): {} new, {} changed, {} removed, {} failed",
        report.index.processed,
        report.added,
        report.changed,
        report.removed,
        report.index.failed
    );
    if let Some(error) = service.status().last_error {
        println!("Last error: {error}");
    }

    embedder.dispose().await;
    Ok(())
}

async fn cmd_search(
    embedder: Arc<LocalEmbedder>,
    store: &VectorStore,
    args: &SearchArgs,
) -> Result<()> {
    let embeddings = EmbeddingService::new(embedder);
    let options = args.options();
    let results =
        search::semantic_search(&embeddings, store, &args.query, &options)
            .await?;
    print_results(&args.query, &results, args.json)
}

async fn cmd_related(store: &VectorStore, args: &RelatedArgs) -> Result<()> {
    let results =
        search::related_notes(store, &args.id, &args.options()).await?;
    print_results(&args.id, &results, args.json)
}

fn print_results(
    query: &str,
    results: &[SimilarityResult],
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", search::format_json(query, results)?);
    } else {
        print!("{}", search::format_human(results));
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    data_dir: String,
    data_dir_source: DataDirSource,
    model: String,
    #[serde(flatten)]
    stats: StoreStats,
}

async fn cmd_status(
    cli: &Cli,
    data_dir: &DataDir,
    store: &VectorStore,
    json: bool,
) -> Result<()> {
    let output = StatusOutput {
        data_dir: data_dir.root().display().to_string(),
        data_dir_source: data_dir.source(),
        model: model_name(cli),
        stats: store.stats().await?,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "Data directory: {} (from {})",
            output.data_dir,
            output.data_dir_source.as_str()
        );
        println!("Model: {}", output.model);
        println!("Notes: {}", output.stats.total_count);
        println!("Dimensions: {}", output.stats.dimensions);
        println!(
            "Estimated size: {} bytes",
            output.stats.estimated_storage_bytes
        );
        match output.stats.last_updated {
            Some(ms) => println!("Last updated: {ms} (ms since epoch)"),
            None => println!("Last updated: never"),
        }
    }
    Ok(())
}
