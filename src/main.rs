//! Folio - novel source plugin runtime
//!
//! Command-line front end: manage installed source plugins and fetch
//! content through them.

use folio_reader::core::{self, Config, ConfigOverrides};
use folio_reader::plugin::{
    FsPluginStorage, HttpClient, HttpFetch, PluginManifestEntry, PluginStorages, PluginStore, RepositoryResolver,
    Sandbox, SearchOrchestrator, SourceFacade,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Novel source plugin runtime")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List plugins offered by the configured repositories
    Available,
    /// Install a plugin from the configured repositories
    Install { id: String },
    /// Install every available update
    Update,
    /// Remove a plugin with its files and stored data
    Uninstall { id: String },
    /// List installed plugins
    Installed,
    /// Search every installed plugin
    Search { query: String },
    /// Show a novel's metadata and chapters
    Novel { plugin: String, path: String },
    /// Show a chapter's markup
    Chapter { plugin: String, path: String },
    /// Show one page of a novel's chapter list
    Page { plugin: String, path: String, page: String },
    /// Resolve a path to an absolute URL
    Resolve {
        plugin: String,
        path: String,
        /// Resolve as a chapter path instead of a novel path
        #[arg(long)]
        chapter: bool,
    },
}

struct App {
    config: Config,
    http: Arc<dyn HttpFetch>,
    store: Arc<PluginStore>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        for dir in [&config.storage.data_dir, &config.plugins.plugin_dir] {
            if !dir.exists() {
                info!("Creating directory: {:?}", dir);
                std::fs::create_dir_all(dir)
                    .map_err(|e| anyhow!("Failed to create directory {:?}: {}", dir, e))?;
            }
        }

        let client = HttpClient::new(&config.network, &config.plugins)?;
        let storages = PluginStorages::open(&config.storage)?;
        let sandbox = Sandbox::new(client.client().clone(), &config.plugins, storages.clone());
        let http: Arc<dyn HttpFetch> = Arc::new(client);

        let store = Arc::new(PluginStore::new(
            Arc::new(sandbox),
            Arc::new(FsPluginStorage::new(&config.plugins.plugin_dir)),
            storages,
            http.clone(),
        ));

        Ok(Self { config, http, store })
    }

    async fn available(&self) -> Vec<PluginManifestEntry> {
        let resolver = RepositoryResolver::new(self.http.clone());
        let available = resolver.fetch_available_plugins(&self.config.repositories).await;
        for warning in &available.warnings {
            warn!(repository = warning.index, url = %warning.url, "{}", warning.report);
        }
        available.plugins
    }

    async fn preload(&self) -> Result<()> {
        let ids = self.store.installed_ids().await?;
        let loaded = self.store.preload_all(&ids).await;
        info!(installed = ids.len(), loaded, "Installed plugins loaded");
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Folio v{}", folio_reader::VERSION);
    info!(
        plugin_dir = ?config.plugins.plugin_dir,
        data_dir = ?config.storage.data_dir,
        repositories = config.repositories.len(),
        "Plugin configuration"
    );

    let app = App::new(config)?;
    run(&app, cli.command).await
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Available => print_json(&app.available().await),
        Command::Install { id } => {
            let available = app.available().await;
            let entry = available
                .iter()
                .find(|entry| entry.id == id)
                .ok_or_else(|| anyhow!("No configured repository offers plugin {}", id))?;
            match app.store.install(entry).await? {
                Some(plugin) => print_json(plugin.info()),
                None => Err(anyhow!("Plugin {} did not load; nothing was installed", id)),
            }
        }
        Command::Update => {
            let available = app.available().await;
            print_json(&app.store.update_all(&available).await)
        }
        Command::Uninstall { id } => {
            app.store.uninstall(&id).await?;
            println!("Uninstalled {}", id);
            Ok(())
        }
        Command::Installed => {
            let mut infos = Vec::new();
            for id in app.store.installed_ids().await? {
                match app.store.load_async(&id).await {
                    Some(plugin) => infos.push(plugin.info().clone()),
                    None => warn!(plugin = %id, "Installed plugin failed to load"),
                }
            }
            print_json(&infos)
        }
        Command::Search { query } => {
            app.preload().await?;
            let orchestrator = SearchOrchestrator::new(app.store.clone(), &app.config.search);
            let sources = orchestrator.installed_sources().await;
            orchestrator.search(&query, sources).await;
            print_json(&orchestrator.snapshot())
        }
        Command::Novel { plugin, path } => {
            let facade = SourceFacade::new(app.store.clone());
            print_json(&facade.fetch_novel(&plugin, &path).await?)
        }
        Command::Chapter { plugin, path } => {
            let facade = SourceFacade::new(app.store.clone());
            println!("{}", facade.fetch_chapter(&plugin, &path).await?);
            Ok(())
        }
        Command::Page { plugin, path, page } => {
            let facade = SourceFacade::new(app.store.clone());
            print_json(&facade.fetch_page(&plugin, &path, &page).await?)
        }
        Command::Resolve { plugin, path, chapter } => {
            let facade = SourceFacade::new(app.store.clone());
            println!("{}", facade.resolve_url(&plugin, &path, !chapter).await);
            Ok(())
        }
    }
}
