use std::time::Duration;

use clap::Parser;
use docnrt::{
    ConfigDb,
    DataDir,
    IndexConfig,
    NrtIndex,
    cli::{self, Cli, Command, ConfigAction},
    config,
    error::{self, Error},
    ingestion,
    mcp,
    paginate::Page,
};
use tracing_subscriber::EnvFilter;

/// How long a one-shot command waits for its writes to become visible.
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCNRT_LOG") {
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
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Ingest(args) => {
            let extensions = match &args.extensions {
                Some(raw) => config::parse_extensions(raw),
                None => config::extensions(&config_db)?,
            };
            let root = match args.path {
                Some(path) => path,
                None => data_dir.doc_dir(&config_db)?,
            };
            let index = open_index(&config_db, &data_dir)?;
            let report = ingestion::ingest_dir(&index, &root, &extensions)?;
            index.close()?;

            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "Indexed {} file(s), skipped {}",
                    report.indexed, report.skipped
                );
            }
        }
        Command::Search(args) => {
            let request = args.to_request()?;
            let index = open_index(&config_db, &data_dir)?;
            let page = index.search_request(&request, args.page.page())?;
            print_page(&page, &args.page)?;
        }
        Command::Query(args) => {
            let index = open_index(&config_db, &data_dir)?;
            let (page_index, page_size) = args
                .page
                .page()
                .unwrap_or((1, docnrt::index::DEFAULT_UNPAGED_LIMIT));
            let page = index.search_text(&args.query, page_index, page_size)?;
            print_page(&page, &args.page)?;
        }
        Command::Term(args) => {
            let terms = args.to_terms()?;
            let index = open_index(&config_db, &data_dir)?;
            let page = index.search_terms(&terms, args.page.page())?;
            print_page(&page, &args.page)?;
        }
        Command::Range(args) => {
            let index = open_index(&config_db, &data_dir)?;
            let page = index.search_range(
                &args.field,
                &args.lower,
                &args.upper,
                args.page.page(),
            )?;
            print_page(&page, &args.page)?;
        }
        Command::Delete { id } => {
            let index = open_index(&config_db, &data_dir)?;
            let generation = index.delete_by_id(&id)?;
            index.wait_for_generation(generation, VISIBILITY_TIMEOUT)?;
            index.close()?;
            println!("Deleted '{id}' (generation {generation})");
        }
        Command::DeleteAll => {
            let index = open_index(&config_db, &data_dir)?;
            let generation = index.delete_all()?;
            index.close()?;
            println!("Deleted all documents (generation {generation})");
        }
        Command::Stats { json } => {
            let index = open_index(&config_db, &data_dir)?;
            let stats = index.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Data directory: {}", data_dir.root().display());
                println!("Generation: {}", stats.generation);
                println!("Documents: {}", stats.num_docs);
                println!("Max doc: {}", stats.max_doc);
                println!("Deleted (unmerged): {}", stats.deleted_docs);
            }
        }
        Command::Config { action } => config_command(&config_db, action)?,
        Command::Mcp => mcp::run_mcp(data_dir, config_db)?,
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn open_index(
    config_db: &ConfigDb,
    data_dir: &DataDir,
) -> error::Result<NrtIndex> {
    let index_dir = data_dir.index_dir(config_db)?;
    let config = IndexConfig::from_config_db(config_db, Some(index_dir))?;
    NrtIndex::open(config)
}

fn config_command(
    config_db: &ConfigDb,
    action: ConfigAction,
) -> error::Result<()> {
    match action {
        ConfigAction::Get { key: Some(key) } => {
            if !config::keys::ALL.contains(&key.as_str()) {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            match config_db.get_setting(&key)? {
                Some(value) => println!("{value}"),
                None => println!("(default)"),
            }
        }
        ConfigAction::Get { key: None } => {
            let stored = config_db.list_settings()?;
            for key in config::keys::ALL {
                let value = stored
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("(default)");
                println!("{key}\t{value}");
            }
        }
        ConfigAction::Set { key, value } => {
            config::check_setting(&key, &value)?;
            config_db.set_setting(&key, &value)?;
            // Reject combinations that would keep the index from opening.
            if let Err(e) = IndexConfig::from_config_db(config_db, None) {
                config_db.remove_setting(&key)?;
                return Err(e);
            }
            println!("Set {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if config_db.remove_setting(&key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> error::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Config(format!("failed to encode JSON: {e}")))?;
    println!("{text}");
    Ok(())
}

fn print_page(page: &Page, args: &cli::PageArgs) -> error::Result<()> {
    if args.json {
        return print_json(page);
    }
    if args.files {
        for hit in &page.hits {
            println!("{}", hit.document.path);
        }
        return Ok(());
    }
    if page.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in page.hits.iter().enumerate() {
        let rank = (page.page_index - 1) * page.page_size + i + 1;
        println!(
            "{rank:>4}. {:.3}  {}  {}",
            hit.score,
            hit.document.id.as_deref().unwrap_or("-"),
            hit.document.path
        );
    }
    Ok(())
}
