use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::model::LineupSnapshot;
use crate::store::FeatureStore;

#[derive(Debug, Clone, PartialEq)]
pub struct LineupFeatures {
    pub team_name: String,
    /// JSON object of starting player name -> position, in starting order.
    pub lineup: String,
    pub player_ids: Vec<Option<String>>,
    pub slots: Vec<Option<String>>,
    pub formation: Option<String>,
    pub received_at: DateTime<Utc>,
}

pub fn flatten_lineup(snapshot: &LineupSnapshot) -> LineupFeatures {
    // A repeated name keeps its first slot in key order and takes the later position.
    let mut positions = Map::new();
    for player in &snapshot.starting {
        let position = player
            .position
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null);
        positions.insert(player.name.clone(), position);
    }

    LineupFeatures {
        team_name: snapshot.name.clone(),
        lineup: Value::Object(positions).to_string(),
        player_ids: snapshot
            .starting
            .iter()
            .map(|p| p.opta_id.clone())
            .collect(),
        slots: snapshot.starting.iter().map(|p| p.slot.clone()).collect(),
        // Every starter of one sheet carries the same formation.
        formation: snapshot
            .starting
            .first()
            .and_then(|p| p.formation.clone()),
        received_at: snapshot.received_at,
    }
}

/// `Ok(None)` when the team has no sheet at or before `cutoff`.
pub fn resolve_lineup<S: FeatureStore + ?Sized>(
    store: &S,
    team_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<Option<LineupFeatures>> {
    let snapshot = store
        .latest_lineup(team_id, cutoff)
        .with_context(|| format!("lineup lookup for team {team_id}"))?;
    Ok(snapshot
        .filter(|s| s.received_at <= cutoff)
        .map(|s| flatten_lineup(&s)))
}
