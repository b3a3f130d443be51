//! MCP tool implementations.
//!
//! - `combat` - Combat simulation and power estimate (2 tools)
//! - `database` - Read-only SQL over the Marvel database (1 tool)

pub mod combat;
pub mod database;

use crate::config::Config;
use crate::error::Result;
use crate::mcp::handler::ToolRegistry;

/// Register all tools with the registry.
pub fn register_all_tools(registry: &mut ToolRegistry, config: &Config) -> Result<()> {
    // Combat tools (2)
    registry.register(combat::SimulateCombatTool::new(config.combat_round_delay()))?;
    registry.register(combat::CalculatePowerLevelTool)?;

    // Database tools (1)
    registry.register(database::QueryMarvelDbTool::new(config.database_path()))?;
    Ok(())
}
