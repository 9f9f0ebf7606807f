use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{Game, LineupSnapshot, OddsQuote};

pub const GAMES_COLLECTION: &str = "games";
pub const ODDS_COLLECTION: &str = "market_odds";
pub const LINEUPS_COLLECTION: &str = "team_sheets";

/// Read-only access to the game, odds and lineup collections.
pub trait FeatureStore: Sync {
    /// Games in store order, optionally capped.
    fn all_games(&self, limit: Option<usize>) -> Result<Vec<Game>>;

    /// Every odds quote for the game received at or before `cutoff`, any market.
    fn odds_before(&self, game_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<OddsQuote>>;

    /// The latest team sheet received at or before `cutoff`.
    fn latest_lineup(&self, team_id: &str, cutoff: DateTime<Utc>)
    -> Result<Option<LineupSnapshot>>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub games: Vec<Game>,
    pub odds: Vec<OddsQuote>,
    pub lineups: Vec<LineupSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_game(mut self, game: Game) -> Self {
        self.games.push(game);
        self
    }

    pub fn with_quote(mut self, quote: OddsQuote) -> Self {
        self.odds.push(quote);
        self
    }

    pub fn with_lineup(mut self, lineup: LineupSnapshot) -> Self {
        self.lineups.push(lineup);
        self
    }
}

impl FeatureStore for MemoryStore {
    fn all_games(&self, limit: Option<usize>) -> Result<Vec<Game>> {
        let take = limit.unwrap_or(self.games.len());
        Ok(self.games.iter().take(take).cloned().collect())
    }

    fn odds_before(&self, game_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<OddsQuote>> {
        Ok(self
            .odds
            .iter()
            .filter(|q| q.game_id == game_id && q.received_at <= cutoff)
            .cloned()
            .collect())
    }

    fn latest_lineup(
        &self,
        team_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<LineupSnapshot>> {
        let mut best: Option<&LineupSnapshot> = None;
        for lineup in &self.lineups {
            if lineup.team_id != team_id || lineup.received_at > cutoff {
                continue;
            }
            if best.is_some_and(|b| lineup.received_at <= b.received_at) {
                continue;
            }
            best = Some(lineup);
        }
        Ok(best.cloned())
    }
}
