//! The Marvel catalog: resources, templates and prompts served by this
//! process, and the wiring that turns a [`Config`] into a ready server.

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::mcp::handler::ToolRegistry;
use crate::mcp::prompts::{Prompt, PromptArgument, PromptRegistry, PromptTemplate};
use crate::mcp::resources::{
    Availability, FileBackend, Resource, ResourceBackend, ResourceRegistry, ResourceTemplate,
};
use crate::mcp::server::McpServer;
use crate::mcp::templates::{KeyFormat, NamingOverrides};
use crate::tools;

pub const TIMELINE_URI: &str = "mcp://marvel/timeline";
pub const HEROES_URI: &str = "mcp://marvel/heroes";
pub const ENEMIES_URI: &str = "mcp://marvel/enemies";
pub const HERO_TEMPLATE: &str = "mcp://marvel/heroes/{name}";
pub const MOVIE_TEMPLATE: &str = "mcp://marvel/movies/{title}";

/// Storage key of the enemy list. Its presence decides whether it is listed.
pub const ENEMIES_FILE: &str = "marvel_enemies.md";

fn markdown(uri: &str, name: &str, description: &str) -> Resource {
    Resource {
        uri: uri.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        mime_type: "text/markdown".to_string(),
    }
}

/// Hero file names that do not follow the normalized form.
pub fn hero_overrides() -> NamingOverrides {
    NamingOverrides::new().with("spider_man", "spider-man")
}

/// Build the resource registry over `backend`.
pub fn build_resources(backend: Arc<dyn ResourceBackend>) -> Result<ResourceRegistry> {
    let mut resources = ResourceRegistry::new(backend);

    resources.add_static(
        markdown(TIMELINE_URI, "MCU Timeline", "Chronology of the Marvel Cinematic Universe"),
        "mcu_timeline.md",
        Availability::Always,
    )?;
    resources.add_static(
        markdown(HEROES_URI, "Hero Catalog", "Overview of every hero in the catalog"),
        "marvel_heroes.md",
        Availability::Always,
    )?;
    resources.add_static(
        markdown(ENEMIES_URI, "Enemy List", "Known enemies, published by an operator"),
        ENEMIES_FILE,
        Availability::WhenPresent,
    )?;

    resources.add_template(
        ResourceTemplate {
            uri_template: HERO_TEMPLATE.to_string(),
            name: "Hero Sheet".to_string(),
            description: "Details of one hero by identifier (e.g. iron_man, hulk)".to_string(),
            mime_type: "text/plain".to_string(),
        },
        KeyFormat::new("source_files/hero_", ".txt"),
        hero_overrides(),
    )?;
    resources.add_template(
        ResourceTemplate {
            uri_template: MOVIE_TEMPLATE.to_string(),
            name: "Movie Sheet".to_string(),
            description: "Details of one movie by short title (e.g. thor_2011, avengers_2012)"
                .to_string(),
            mime_type: "text/plain".to_string(),
        },
        KeyFormat::new("source_files/movie_", ".txt"),
        NamingOverrides::new(),
    )?;

    Ok(resources)
}

pub fn build_prompts() -> Result<PromptRegistry> {
    let mut prompts = PromptRegistry::new();
    prompts.register(
        Prompt {
            name: "analyse_combat".to_string(),
            description: "Analyse a fight between two heroes.".to_string(),
            arguments: vec![
                PromptArgument::required("hero1", "First hero"),
                PromptArgument::required("hero2", "Second hero"),
            ],
        },
        PromptTemplate::new(
            "Using your tools and resources, compare the strengths of {{hero1}} and {{hero2}} and predict the winner.",
        ),
    )?;
    Ok(prompts)
}

/// Assemble a server from the configuration.
pub fn build_server(config: &Config) -> Result<McpServer> {
    let backend = Arc::new(FileBackend::new(&config.data_dir));
    let resources = build_resources(backend)?;
    let prompts = build_prompts()?;

    let mut registry = ToolRegistry::new();
    tools::register_all_tools(&mut registry, config)?;

    info!(
        "Catalog ready: {} tools, {} prompts, {} templates (data dir {:?})",
        registry.tool_count(),
        prompts.len(),
        resources.list_templates().resource_templates.len(),
        config.data_dir
    );

    Ok(McpServer::new(
        registry,
        prompts,
        resources,
        config.server_options(),
    ))
}
