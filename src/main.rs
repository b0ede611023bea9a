use clap::Parser;
use docrag::{
    ConfigDb,
    DataDir,
    DocumentId,
    EngineConfig,
    Error,
    RetrievalEngine,
    config::KEYS as CONFIG_KEYS,
    error,
    mcp,
    search::{self, SearchParams},
    walker,
};
use kdam::{BarExt, tqdm};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, IngestArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCRAG_LOG") {
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

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    if let Command::Config { action } = &cli.command {
        return cmd_config(&config_db, action);
    }
    if let Command::Mcp = cli.command {
        return mcp::run_mcp(data_dir, config_db);
    }

    let config = EngineConfig::resolve(&config_db)?;
    let engine = RetrievalEngine::open(&data_dir.index_db(), config)?;

    match cli.command {
        Command::Ingest(args) => cmd_ingest(&engine, &args)?,
        Command::Search(args) => {
            let params = SearchParams {
                query: args.query.clone(),
                count: args.count,
                documents: args
                    .documents
                    .iter()
                    .map(|id| DocumentId::from(id.as_str()))
                    .collect(),
                min_score: args.min_score,
            };
            let results = search::execute_search(&engine, &params)?;
            if args.json {
                println!("{}", search::render_json(&results, &args.query)?);
            } else {
                print!("{}", search::render_human(&results));
            }
        }
        Command::Delete { document_id } => {
            let id = DocumentId::from(document_id);
            if engine.remove(&id)? {
                println!("Deleted {id}");
            } else {
                println!("No document with id {id}; nothing to delete");
            }
        }
        Command::List { json } => cmd_list(&engine, json)?,
        Command::Stats { json } => cmd_stats(&engine, &data_dir, json)?,
        Command::Rebuild => {
            let outcome = engine.rebuild()?;
            println!(
                "Rebuilt generation {} ({} chunks, dimension {}{})",
                outcome.generation,
                outcome.chunk_count,
                outcome.dimension,
                if outcome.degraded { ", hash fallback" } else { "" }
            );
        }
        Command::Health { json } => {
            let report = engine.health();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Status: {}",
                    if report.healthy { "healthy" } else { "unhealthy" }
                );
                println!("Generation: {}", report.generation);
                println!(
                    "Documents: {} ({} chunks)",
                    report.document_count, report.chunk_count
                );
                println!("Embedding dimension: {}", report.embedding_dimension);
                if report.degraded {
                    println!("Embeddings: hash fallback (degraded)");
                }
                let formats: Vec<&str> =
                    report.supported_formats.iter().map(|t| t.as_str()).collect();
                println!("Formats: {}", formats.join(", "));
                for problem in &report.problems {
                    println!("  problem: {problem}");
                }
            }
            if !report.healthy {
                return Err(Error::CorruptIndex(report.problems.join("; ")));
            }
        }
        Command::Config { .. } | Command::Mcp | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_ingest(engine: &RetrievalEngine, args: &IngestArgs) -> error::Result<()> {
    let files = walker::collect_inputs(&args.paths)?;
    if files.is_empty() {
        eprintln!("No supported files found.");
        return Ok(());
    }

    let mut bar = (files.len() > 1 && !args.json).then(|| {
        tqdm!(total = files.len(), desc = "Ingesting", unit = " file")
    });

    let mut outcomes = Vec::with_capacity(files.len());
    let mut first_error = None;
    for file in &files {
        match engine.ingest_path(&file.absolute_path, args.type_hint.as_deref()) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                tracing::error!(
                    path = %file.relative_path.display(),
                    error = %e,
                    "ingestion failed"
                );
                first_error.get_or_insert(e);
            }
        }
        if let Some(bar) = bar.as_mut() {
            bar.update(1)?;
        }
    }
    if bar.is_some() {
        eprintln!();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!(
                "{} {} ({}, {} chunks{})",
                outcome.document_id,
                outcome.filename,
                outcome.source_type,
                outcome.chunk_count,
                if outcome.degraded { ", hash fallback" } else { "" }
            );
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn cmd_list(engine: &RetrievalEngine, json: bool) -> error::Result<()> {
    let documents = engine.list_documents();
    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
    } else if documents.is_empty() {
        println!("No documents ingested.");
    } else {
        for doc in &documents {
            println!(
                "{}  {:<5} {:>4} chunks  {:>9} bytes  {}",
                doc.id,
                doc.source_type.as_str(),
                doc.chunk_count,
                doc.raw_byte_length,
                doc.filename
            );
        }
    }
    Ok(())
}

fn cmd_stats(
    engine: &RetrievalEngine,
    data_dir: &DataDir,
    json: bool,
) -> error::Result<()> {
    let stats = engine.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Data directory: {}", data_dir.root().display());
    println!("Generation: {}", stats.generation);
    println!("Documents: {}", stats.document_count);
    for (source_type, count) in &stats.by_source_type {
        println!("  {source_type}: {count}");
    }
    println!("Chunks: {}", stats.chunk_count);
    match stats.embedding_mode {
        Some(mode) => println!("Embedding: {mode} (dimension {})", stats.dimension),
        None => println!("Embedding: not fitted (dimension {})", stats.dimension),
    }
    println!("Vocabulary: {} terms", stats.vocabulary_size);
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: &ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let config = EngineConfig::resolve(config_db)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                for key in CONFIG_KEYS {
                    if let Some(value) = config.get(key) {
                        println!("{key} = {value}");
                    }
                }
            }
        }
        ConfigAction::Get { key } => match config_db.get_setting(key)? {
            Some(value) => println!("{value}"),
            None => {
                let config = EngineConfig::resolve(config_db)?;
                let value = config.get(key).ok_or_else(|| Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                })?;
                println!("{value} (default)");
            }
        },
        ConfigAction::Set { key, value } => {
            let mut config = EngineConfig::resolve(config_db)?;
            config.set(key, value)?;
            config.validate()?;
            config_db.set_setting(key, value.trim())?;
            println!("{key} = {}", value.trim());
        }
        ConfigAction::Unset { key } => {
            if config_db.remove_setting(key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
    }
    Ok(())
}
