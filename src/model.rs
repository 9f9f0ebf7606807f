use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::document::{Document, ProjectionError};

/// Decimal price of a fair two-way market.
pub const FAIR_TWO_WAY_PRICE: f64 = 2.0;

#[derive(Debug, Error, PartialEq)]
#[error("outcome label {0} is outside {{0.0, 0.5, 1.0}}")]
pub struct OutcomeError(pub f64);

/// Maps the stored outcome (1.0 home win, 0.5 draw, 0.0 away win) onto class
/// codes 0.0 (home), 1.0 (draw), 2.0 (away).
pub fn remap_outcome(raw: f64) -> Result<f64, OutcomeError> {
    if raw == 1.0 {
        Ok(0.0)
    } else if raw == 0.5 {
        Ok(1.0)
    } else if raw == 0.0 {
        Ok(2.0)
    } else {
        Err(OutcomeError(raw))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Game {
    pub game_id: String,
    pub game_opta_id: Option<String>,
    pub game_date: DateTime<Utc>,
    pub home_team_id: String,
    pub home_team_opta_id: Option<String>,
    pub away_team_id: String,
    pub away_team_opta_id: Option<String>,
    pub tgt_gd: Option<f64>,
    pub tgt_outcome: Option<f64>,
}

impl Game {
    pub fn from_document(doc: &Document) -> Result<Self, ProjectionError> {
        Ok(Self {
            game_id: doc.str_field("gameId")?,
            game_opta_id: doc.opt_str_field("game_optaId")?,
            game_date: doc.datetime_field("gameDate")?,
            home_team_id: doc.str_field("homeTeamId")?,
            home_team_opta_id: doc.opt_str_field("homeTeam_optaId")?,
            away_team_id: doc.str_field("awayTeamId")?,
            away_team_opta_id: doc.opt_str_field("awayTeam_optaId")?,
            tgt_gd: doc.opt_f64_field("tgt_gd")?,
            tgt_outcome: doc.opt_f64_field("tgt_outcome")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketType {
    OneXTwo,
    Asian,
    Total,
    Other(String),
}

impl MarketType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1x2" => Self::OneXTwo,
            "asian" => Self::Asian,
            "total" => Self::Total,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::OneXTwo => "1x2",
            Self::Asian => "asian",
            Self::Total => "total",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OddsQuote {
    pub game_id: String,
    pub market: MarketType,
    pub received_at: DateTime<Utc>,
    pub odds1: Option<f64>,
    pub odds_x: Option<f64>,
    pub odds2: Option<f64>,
    pub line_id: Option<String>,
}

impl OddsQuote {
    pub fn from_document(doc: &Document) -> Result<Self, ProjectionError> {
        Ok(Self {
            game_id: doc.str_field("ra_game_id")?,
            market: MarketType::parse(&doc.str_field("market_type")?),
            received_at: doc.datetime_field("received_at")?,
            odds1: doc.opt_f64_field("odds1")?,
            odds_x: doc.opt_f64_field("oddsX")?,
            odds2: doc.opt_f64_field("odds2")?,
            line_id: doc.opt_str_field("line_id")?,
        })
    }

    /// Distance of a two-way quote from the fair price on both sides.
    pub fn fair_price_delta(&self) -> Option<f64> {
        let (Some(side1), Some(side2)) = (self.odds1, self.odds2) else {
            return None;
        };
        let delta = (side1 - FAIR_TWO_WAY_PRICE).abs() + (side2 - FAIR_TWO_WAY_PRICE).abs();
        (!delta.is_nan()).then_some(delta)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineupPlayer {
    pub name: String,
    pub position: Option<String>,
    pub opta_id: Option<String>,
    pub slot: Option<String>,
    pub formation: Option<String>,
}

impl LineupPlayer {
    pub fn from_document(doc: &Document) -> Result<Self, ProjectionError> {
        Ok(Self {
            name: doc.str_field("name")?,
            position: doc.opt_str_field("position")?,
            opta_id: doc.opt_str_field("opta_id")?,
            slot: doc.opt_str_field("slot")?,
            formation: doc.opt_str_field("formation")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineupSnapshot {
    pub team_id: String,
    pub name: String,
    pub received_at: DateTime<Utc>,
    pub starting: Vec<LineupPlayer>,
}

impl LineupSnapshot {
    pub fn from_document(doc: &Document) -> Result<Self, ProjectionError> {
        let starting = doc
            .array_field("starting")?
            .iter()
            .map(LineupPlayer::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            team_id: doc.str_field("ra_team_id")?,
            name: doc.str_field("name")?,
            received_at: doc.datetime_field("received_at")?,
            starting,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        Game, LineupSnapshot, MarketType, OddsQuote, OutcomeError, remap_outcome,
    };
    use crate::document::{Document, ProjectionError};

    #[test]
    fn outcome_remap_covers_domain() {
        assert_eq!(remap_outcome(1.0), Ok(0.0));
        assert_eq!(remap_outcome(0.5), Ok(1.0));
        assert_eq!(remap_outcome(0.0), Ok(2.0));
        assert_eq!(remap_outcome(2.0), Err(OutcomeError(2.0)));
        assert!(remap_outcome(f64::NAN).is_err());
    }

    #[test]
    fn game_projection_reads_source_keys() {
        let doc = Document::from_value(json!({
            "gameId": "g1",
            "game_optaId": 99,
            "gameDate": "2023-08-12T14:00:00Z",
            "homeTeamId": "h",
            "homeTeam_optaId": "1",
            "awayTeamId": "a",
            "awayTeam_optaId": null,
            "tgt_gd": 2,
            "tgt_outcome": 1.0
        }))
        .unwrap();
        let game = Game::from_document(&doc).unwrap();
        assert_eq!(game.game_id, "g1");
        assert_eq!(game.game_opta_id.as_deref(), Some("99"));
        assert_eq!(game.away_team_opta_id, None);
        assert_eq!(game.tgt_gd, Some(2.0));
        assert_eq!(game.tgt_outcome, Some(1.0));
    }

    #[test]
    fn game_without_date_is_a_missing_field() {
        let doc = Document::from_value(json!({
            "gameId": "g1", "homeTeamId": "h", "awayTeamId": "a"
        }))
        .unwrap();
        assert_eq!(
            Game::from_document(&doc),
            Err(ProjectionError::MissingField {
                field: "gameDate".to_string()
            })
        );
    }

    #[test]
    fn quote_delta_needs_both_prices() {
        let doc = Document::from_value(json!({
            "ra_game_id": "g1",
            "market_type": "asian",
            "received_at": "2023-08-12T10:00:00Z",
            "odds1": 1.6,
            "odds2": 2.3,
            "line_id": 0
        }))
        .unwrap();
        let mut quote = OddsQuote::from_document(&doc).unwrap();
        assert_eq!(quote.market, MarketType::Asian);
        assert_eq!(quote.line_id.as_deref(), Some("0"));
        assert!((quote.fair_price_delta().unwrap() - 0.7).abs() < 1e-9);
        quote.odds2 = None;
        assert_eq!(quote.fair_price_delta(), None);
    }

    #[test]
    fn lineup_projection_keeps_starting_order() {
        let doc = Document::from_value(json!({
            "ra_team_id": "t1",
            "name": "Home FC",
            "received_at": "2023-08-12T12:00:00Z",
            "starting": [
                {"name": "B", "position": "GK", "opta_id": "20", "slot": 1, "formation": "4-4-2"},
                {"name": "A", "position": "DF", "opta_id": "10", "slot": 2, "formation": "4-4-2"}
            ]
        }))
        .unwrap();
        let snapshot = LineupSnapshot::from_document(&doc).unwrap();
        let names = snapshot
            .starting
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(snapshot.starting[0].slot.as_deref(), Some("1"));
    }
}
