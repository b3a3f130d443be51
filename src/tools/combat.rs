//! Combat tools: the multi-round combat simulation and the power estimate.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::handler::{get_string_arg, structured_result, ToolContext, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

/// Number of rounds in a simulated combat.
pub const COMBAT_ROUNDS: u32 = 3;

/// Simulates a three-round combat, reporting progress after each round.
pub struct SimulateCombatTool {
    round_delay: Duration,
}

impl SimulateCombatTool {
    pub fn new(round_delay: Duration) -> Self {
        Self { round_delay }
    }
}

fn round_commentary(round: u32, hero1: &str, hero2: &str) -> String {
    let action = match round {
        1 => format!("{} takes the lead with a surprise attack!", hero1),
        2 => format!("{} strikes back hard!", hero2),
        _ => "The fight reaches its climax!".to_string(),
    };
    format!("Round {} complete: {}", round, action)
}

#[async_trait]
impl ToolHandler for SimulateCombatTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "simulate_combat".to_string(),
            description: "Simulate a three-round combat between two heroes, streaming progress after each round.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hero1": {
                        "type": "string",
                        "description": "Name of the first fighter"
                    },
                    "hero2": {
                        "type": "string",
                        "description": "Name of the second fighter"
                    }
                },
                "required": ["hero1", "hero2"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "winner": { "type": "string" },
                    "loser": { "type": "string" },
                    "rounds": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["winner", "loser", "rounds"]
            })),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, ctx: ToolContext) -> Result<ToolResult> {
        let hero1 = get_string_arg(&args, "hero1")?;
        let hero2 = get_string_arg(&args, "hero2")?;
        debug!("Combat started: {} vs {}", hero1, hero2);

        let mut rounds = Vec::with_capacity(COMBAT_ROUNDS as usize);
        for round in 1..=COMBAT_ROUNDS {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.round_delay) => {}
            }

            let commentary = round_commentary(round, &hero1, &hero2);
            ctx.progress
                .emit(f64::from(round), f64::from(COMBAT_ROUNDS), commentary.clone())
                .await?;
            rounds.push(commentary);
        }

        let text = format!(
            "COMBAT OVER!\n\nAfter a hard-fought {} rounds, {} defeats {} thanks to superior endurance!",
            COMBAT_ROUNDS, hero1, hero2
        );
        Ok(structured_result(
            text,
            json!({ "winner": hero1, "loser": hero2, "rounds": rounds }),
        ))
    }
}

/// Estimates a hero's power from their name.
pub struct CalculatePowerLevelTool;

/// `min(100, 10 × characters in the name)`.
pub fn power_level(hero: &str) -> u32 {
    let chars = u32::try_from(hero.chars().count()).unwrap_or(u32::MAX);
    chars.saturating_mul(10).min(100)
}

#[async_trait]
impl ToolHandler for CalculatePowerLevelTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "calculate_power_level".to_string(),
            description: "Estimate a hero's power level on a 0-100 scale.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hero_name": {
                        "type": "string",
                        "description": "Name of the hero"
                    }
                },
                "required": ["hero_name"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "hero": { "type": "string" },
                    "power": { "type": "integer", "minimum": 0, "maximum": 100 }
                },
                "required": ["hero", "power"]
            })),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: ToolContext) -> Result<ToolResult> {
        let hero = get_string_arg(&args, "hero_name")?;
        let power = power_level(&hero);
        Ok(structured_result(
            format!("Estimated power of {}: {}/100", hero, power),
            json!({ "hero": hero, "power": power }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::progress::{ProgressEmitter, ProgressParams, ProgressToken};
    use crate::mcp::transport::{Message, MessageChannel};
    use tokio_util::sync::CancellationToken;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn test_power_level() {
        assert_eq!(power_level("Thor"), 40);
        assert_eq!(power_level("Hulk"), 40);
        assert_eq!(power_level("Captain America"), 100);
        assert_eq!(power_level(""), 0);
        assert_eq!(power_level("Éva"), 30);
    }

    #[tokio::test]
    async fn test_power_tool_result() {
        let result = CalculatePowerLevelTool
            .execute(args(&[("hero_name", "Thor")]), ToolContext::default())
            .await
            .unwrap();
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["hero"], "Thor");
        assert_eq!(structured["power"], 40);
    }

    #[tokio::test]
    async fn test_combat_reports_each_round() {
        let (channel, mut peer) = MessageChannel::pair(16, Duration::from_secs(1));
        let ctx = ToolContext::new(
            ProgressEmitter::new(ProgressToken::String("c".into()), channel.sink),
            CancellationToken::new(),
        );

        let result = SimulateCombatTool::new(Duration::from_millis(1))
            .execute(args(&[("hero1", "Thor"), ("hero2", "Loki")]), ctx)
            .await
            .unwrap();

        let structured = result.structured_content.unwrap();
        assert_eq!(structured["winner"], "Thor");
        assert_eq!(structured["loser"], "Loki");
        assert_eq!(structured["rounds"].as_array().unwrap().len(), 3);

        let mut progress = Vec::new();
        while let Ok(Message::Notification(n)) = peer.rx.try_recv() {
            let params: ProgressParams = serde_json::from_value(n.params.unwrap()).unwrap();
            assert_eq!(params.total, Some(3.0));
            progress.push(params.progress);
        }
        assert_eq!(progress, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_combat_without_token() {
        let result = SimulateCombatTool::new(Duration::from_millis(1))
            .execute(args(&[("hero1", "Thor"), ("hero2", "Loki")]), ToolContext::default())
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_combat_stops_when_cancelled() {
        let ctx = ToolContext::default();
        let cancel = ctx.cancel.clone();
        let handle = tokio::spawn(async move {
            SimulateCombatTool::new(Duration::from_secs(60))
                .execute(args(&[("hero1", "Thor"), ("hero2", "Loki")]), ctx)
                .await
        });

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_round_commentary() {
        assert!(round_commentary(1, "Thor", "Loki").contains("Thor takes the lead"));
        assert!(round_commentary(2, "Thor", "Loki").contains("Loki strikes back"));
        assert!(round_commentary(3, "Thor", "Loki").starts_with("Round 3 complete"));
    }
}
