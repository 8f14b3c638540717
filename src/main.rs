use holocron::answer::Answer;
use holocron::app::App;
use holocron::cli::{Cli, Commands, ConfigAction};
use holocron::config::{Config, ConfigValidator};
use holocron::corpus::Corpus;
use holocron::error::{HolocronError, Result};
use holocron::ingest::IngestReport;
use holocron::patterns::DEFAULT_ATTRIBUTES;
use holocron::progress::{ProgressKind, ProgressRegistry};
use holocron::retrieval::SearchHit;
use holocron::server::{self, AppState};
use holocron::store::VectorStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { corpus } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ingest(config, corpus)
        }
        Commands::Query { query, limit, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_query(config, &query, limit, json)
        }
        Commands::Ask {
            question,
            offline,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(config, &question, offline, json)
        }
        Commands::Serve { host, port } => {
            let mut config = load_config(cli.config, cli.profile)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_serve(config)
        }
        Commands::Status => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_status(&config)
        }
        Commands::Config { action } => cmd_config(cli.config, cli.profile, action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "holocron=debug" } else { "holocron=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| HolocronError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| HolocronError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn cmd_ingest(config: Config, corpus: Option<PathBuf>) -> Result<()> {
    let corpus_path = match corpus {
        Some(path) => path,
        None => config.storage.corpus_path()?,
    };
    let retries = config.ingest.read_retries;
    let backoff = Duration::from_millis(config.ingest.retry_backoff_ms);
    let app = App::open(config)?;
    let pipeline = app.pipeline();

    println!("Ingesting {} ...", corpus_path.display());

    let registry = ProgressRegistry::new(app.config.server.progress_buffer);
    let mut events = registry.open("cli");
    let emitter = registry.emitter("cli");

    let report: IngestReport = runtime()?.block_on(async {
        let printer = tokio::spawn(async move {
            let mut last_decile = 0;
            while let Some(event) = events.recv().await {
                match event.kind {
                    ProgressKind::Embedding => {
                        let decile = event.progress.unwrap_or(0) / 10;
                        if decile > last_decile {
                            last_decile = decile;
                            println!("  [{:>3}%] {}", decile * 10, event.message);
                        }
                    }
                    ProgressKind::EntitySkipped => println!("  ⚠ {}", event.message),
                    _ => println!("  {}", event.message),
                }
            }
        });

        let result = pipeline
            .run_from_file(&corpus_path, retries, backoff, &emitter)
            .await;
        drop(emitter);
        registry.remove("cli");
        // The printer ends on the terminal event or when the channel closes
        let _ = printer.await;
        result
    })?;

    println!(
        "✓ Indexed {}/{} entities into '{}' ({}D, {})",
        report.indexed,
        report.total,
        report.table.name,
        report.table.dimension,
        report.table.embedding_model
    );
    if report.failed > 0 {
        println!("  {} entities skipped:", report.failed);
        for failure in &report.failures {
            println!("    {} - {}", failure.id, failure.error);
        }
    }
    println!("  Took {:.1}s", report.duration_ms as f64 / 1000.0);
    Ok(())
}

fn cmd_query(config: Config, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let app = App::open(config)?;
    let searcher = app.searcher()?;
    let limit = limit.unwrap_or_else(|| searcher.default_limit());

    let hits = runtime()?.block_on(searcher.search(query, limit))?;

    if json {
        println!("{}", to_json(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results for: {}", query);
        return Ok(());
    }
    let kind = if searcher.patterns().is_attribute_query(query) {
        "attribute"
    } else {
        "semantic"
    };
    println!("{} results ({} query):\n", hits.len(), kind);
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let label = hit
        .metadata
        .name
        .as_deref()
        .or(hit.metadata.title.as_deref())
        .unwrap_or(&hit.id);
    println!(
        "{:>2}. {} [{}] relevance {:.3}",
        rank, label, hit.id, hit.relevance
    );
    let preview: String = hit.content.chars().take(160).collect();
    let ellipsis = if hit.content.chars().count() > 160 {
        "..."
    } else {
        ""
    };
    println!("    {}{}\n", preview, ellipsis);
}

fn cmd_ask(config: Config, question: &str, offline: bool, json: bool) -> Result<()> {
    let app = App::open(config)?;
    let searcher = Arc::new(app.searcher()?);
    let answerer = app.answerer(searcher);

    if !offline && !answerer.has_llm() {
        tracing::info!("LLM not configured; showing retrieved context only");
    }

    let answer: Answer = runtime()?.block_on(answerer.ask(question, offline))?;

    if json {
        println!("{}", to_json(&answer)?);
        return Ok(());
    }

    if let Some(text) = &answer.answer {
        println!("{}\n", text);
        println!("Sources:");
    } else {
        println!("Context for: {}\n", answer.question);
    }
    for (i, hit) in answer.context.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn cmd_serve(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| HolocronError::InvalidConfigValue {
            path: "server.host".to_string(),
            message: format!("{}", e),
        })?;
    let corpus_path = config.storage.corpus_path()?;
    let retries = config.ingest.read_retries;
    let backoff = Duration::from_millis(config.ingest.retry_backoff_ms);
    let auto_ingest = config.ingest.auto_ingest;

    let app = App::open(config)?;

    runtime()?.block_on(async move {
        let corpus = Corpus::load_with_retry(&corpus_path, retries, backoff).await?;
        tracing::info!(
            "Loaded {} entities from {}",
            corpus.entity_count(),
            corpus_path.display()
        );

        let state = AppState::new(&app, corpus)?;
        let table = app.index.table_name().to_string();
        if app.index.store().is_populated(&table)? {
            // Warm the graph so the first query is fast
            if let Err(e) = app.index.get().await {
                tracing::warn!("Failed to load index '{}': {}", table, e);
            }
        } else if auto_ingest {
            tracing::info!("Index '{}' is empty; starting ingestion", table);
            if let Err(e) = state.start_ingest(None) {
                tracing::warn!("Could not start ingestion: {}", e.message);
            }
        } else {
            tracing::warn!(
                "Index '{}' is empty; run 'holocron ingest' or POST /api/ingest",
                table
            );
        }

        server::serve(state, addr).await
    })
}

fn cmd_status(config: &Config) -> Result<()> {
    let index_path = config.storage.index_path()?;
    let table_name = &config.indexing.table_name;

    println!("Holocron Status");
    println!("===============");
    println!("\nIndex: {}", index_path.display());
    println!(
        "Embedding: {} ({})",
        config.embedding.provider, config.embedding.model
    );

    if !index_path.exists() {
        println!("\nNo index yet. Run 'holocron ingest' to build it.");
        return Ok(());
    }

    let store = VectorStore::open(&index_path, config.indexing.hnsw_params())?;
    let stats = store.stats()?;
    println!(
        "\nTables: {} ({} records, {:.1} MB of vectors)",
        stats.table_count,
        stats.record_count,
        stats.vector_bytes as f64 / (1024.0 * 1024.0)
    );

    match store.table_info(table_name)? {
        Some(info) => {
            println!("\nTable '{}':", info.name);
            println!("  Records:   {}", info.record_count);
            println!("  Dimension: {}", info.dimension);
            println!("  Model:     {}", info.embedding_model);
            println!("  Built:     {}", info.created_at);
            if let Some(hash) = &info.corpus_hash {
                println!("  Corpus:    {}", &hash[..hash.len().min(12)]);
            }
        }
        None => println!("\nTable '{}' does not exist", table_name),
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = toml::Value::try_from(&config)?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    HolocronError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config_dir = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&config_dir).map_err(|e| HolocronError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", config_dir),
            })?;

            let attributes_path = config_dir.join("attributes.toml");
            if force || !attributes_path.exists() {
                std::fs::write(&attributes_path, DEFAULT_ATTRIBUTES).map_err(|e| {
                    HolocronError::Io {
                        source: e,
                        context: format!("Failed to write {:?}", attributes_path),
                    }
                })?;
            }

            let mut config = Config::default();
            config.patterns.attributes_file = Some(attributes_path);
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("✓ Attribute vocabulary installed (attributes.toml)");
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::debug!(
            "Config file not found, using defaults. Run 'holocron config init' to create one."
        );
        let mut config = Config::default();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
