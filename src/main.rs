use clap::Parser;
use rowsift::{
    cli::{Cli, Command, MaintenanceArgs, SearchArgs},
    config::{Manifest, resolve_manifest_path},
    data_dir::DataDir,
    engine::{Engines, SearchEngine},
    error,
    query::Scope,
    store::Store,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("ROWSIFT_LOG") {
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

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let manifest_path = resolve_manifest_path(cli.manifest.as_deref());
    let manifest = Manifest::load(&manifest_path)?;
    let store = Store::open(&data_dir.store_db())?;
    let engines = manifest.apply(&store)?;
    tracing::debug!(
        manifest = %manifest_path.display(),
        engines = ?engines.slugs(),
        "loaded manifest"
    );

    match cli.command {
        Command::Rebuild(args) => cmd_rebuild(&store, &engines, &args)?,
        Command::Prune(args) => cmd_prune(&store, &engines, &args)?,
        Command::Search(args) => cmd_search(&store, &engines, &args)?,
        Command::Status(args) => cmd_status(&store, &engines, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn selected_engines(
    engines: &Engines,
    args: &MaintenanceArgs,
) -> error::Result<Vec<SearchEngine>> {
    match &args.engine {
        Some(slug) => Ok(vec![engines.get(slug)?]),
        None => Ok(engines.all()),
    }
}

fn cmd_rebuild(
    store: &Store,
    engines: &Engines,
    args: &MaintenanceArgs,
) -> error::Result<()> {
    for engine in selected_engines(engines, args)? {
        let summary = engine.rebuild(store)?;
        println!(
            "Rebuilt '{}': {} indexed, {} stale removed, {} duplicates removed",
            engine.slug(),
            summary.indexed,
            summary.stale_removed,
            summary.duplicates_removed
        );
    }
    Ok(())
}

fn cmd_prune(
    store: &Store,
    engines: &Engines,
    args: &MaintenanceArgs,
) -> error::Result<()> {
    for engine in selected_engines(engines, args)? {
        let removed = engine.prune_orphans(store)?;
        println!("Pruned '{}': {removed} orphaned entries removed", engine.slug());
    }
    Ok(())
}

fn cmd_search(
    store: &Store,
    engines: &Engines,
    args: &SearchArgs,
) -> error::Result<()> {
    let engine = engines.get(&args.engine)?;
    let mut search = engine
        .search(store, &args.query)
        .exclude(args.exclude.iter().map(|t| Scope::from(t.as_str())))
        .ranking(!args.no_rank);
    if !args.models.is_empty() {
        search = search.models(args.models.iter().map(|t| Scope::from(t.as_str())));
    }
    let hits = search.slice(0..args.count)?;

    if args.json {
        let items: Vec<_> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                serde_json::json!({
                    "rank": i + 1,
                    "score": hit.rank,
                    "entity_type": hit.entity_type(),
                    "object_id": hit.object_id(),
                    "title": hit.title(),
                    "description": hit.entry.description,
                    "url": hit.entry.url,
                    "meta": hit.entry.meta,
                })
            })
            .collect();
        let output = serde_json::json!({
            "query": args.query,
            "engine": engine.slug(),
            "result_count": items.len(),
            "results": items,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        let score = hit
            .rank
            .map(|r| format!("[{r:.3}] "))
            .unwrap_or_default();
        println!(
            "{:>3}. {score}{}:{} {}",
            i + 1,
            hit.entity_type(),
            hit.object_id(),
            hit.title()
        );
    }
    Ok(())
}

fn cmd_status(store: &Store, engines: &Engines, json: bool) -> error::Result<()> {
    let mut rows = Vec::new();
    for engine in engines.all() {
        rows.push((
            engine.slug().to_string(),
            engine.backend().name(),
            engine.registered_types(),
            engine.entry_count(store)?,
            engine.needs_rebuild(store)?,
        ));
    }

    if json {
        let engines: Vec<_> = rows
            .iter()
            .map(|(slug, backend, types, entries, rebuild)| {
                serde_json::json!({
                    "engine": slug,
                    "backend": backend,
                    "registered_types": types,
                    "entries": entries,
                    "rebuild_required": rebuild,
                })
            })
            .collect();
        let output = serde_json::json!({
            "entity_types": store.entity_types(),
            "engines": engines,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Entity types: {}", store.entity_types().join(", "));
    for (slug, backend, types, entries, rebuild) in &rows {
        println!();
        println!("Engine:     {slug}");
        println!("Backend:    {backend}");
        println!("Registered: {}", types.join(", "));
        println!("Entries:    {entries}");
        if *rebuild {
            println!("Status:     rebuild required");
        }
    }
    Ok(())
}
