use anyhow::Result;
use clap::Parser;
use notes_hub_core::auth::{IdentityResolver, TokenIdentityResolver, TrustedUserResolver};
use notes_hub_core::{DocumentService, HubConfig, Mutation};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = HubConfig::from_env()?;
    cli.apply_overrides(&mut config);

    let identity: Arc<dyn IdentityResolver> = match &config.jwt_secret {
        Some(secret) => Arc::new(TokenIdentityResolver::new(secret)),
        None => Arc::new(TrustedUserResolver),
    };
    let service = DocumentService::open(&config, identity).await?;
    let result = run(&service, &cli).await;
    service.shutdown().await?;
    result
}

async fn run(service: &DocumentService, cli: &Cli) -> Result<()> {
    let ctx = cli.request_context();
    match &cli.command {
        Commands::Create { title, parent } => print(&service.create(&ctx, title, *parent).await?),
        Commands::List => print(&service.get(&ctx).await?),
        Commands::Sidebar { parent } => print(&service.get_sidebar(&ctx, *parent).await?),
        Commands::Trash => print(&service.get_trash(&ctx).await?),
        Commands::Search => print(&service.get_search(&ctx).await?),
        Commands::Show { id } => print(&service.get_by_id(&ctx, *id).await?),
        Commands::Update { id, .. } => {
            let fields = cli.command.update_fields().unwrap_or_default();
            print(&service.update(&ctx, *id, fields).await?)
        }
        Commands::RemoveIcon { id } => print(&service.remove_icon(&ctx, *id).await?),
        Commands::Remove { id } => print(&service.remove(&ctx, *id).await?),
        Commands::Archive { id } => finish(service.archive(&ctx, *id).await?).await,
        Commands::Restore { id } => finish(service.restore(&ctx, *id).await?).await,
    }
}

/// Print the patched document, then wait for the subtree to catch up so the
/// process does not exit mid-propagation.
async fn finish(mutation: Mutation) -> Result<()> {
    print(&mutation.document)?;
    let job = mutation.propagation.job_id();
    let report = mutation.propagation.wait().await?;
    info!(
        %job,
        visited = report.visited,
        patched = report.patched,
        truncated = report.truncated,
        superseded = report.superseded,
        "subtree updated"
    );
    Ok(())
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
