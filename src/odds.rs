use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::model::{MarketType, OddsQuote};
use crate::store::FeatureStore;

/// Pre-game prices for the three markets; a market without quotes stays `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OddsFeatures {
    pub pre_game_odds_1: Option<f64>,
    pub pre_game_odds_x: Option<f64>,
    pub pre_game_odds_2: Option<f64>,
    pub pre_game_ah_home: Option<f64>,
    pub pre_game_ah_away: Option<f64>,
    pub ah_line_id: Option<String>,
    pub pre_game_total_home: Option<f64>,
    pub pre_game_total_away: Option<f64>,
    pub total_line_id: Option<String>,
}

pub const RESOLVED_MARKETS: [MarketType; 3] =
    [MarketType::OneXTwo, MarketType::Asian, MarketType::Total];

impl OddsFeatures {
    pub fn from_latest(latest: &HashMap<MarketType, OddsQuote>) -> Self {
        let mut out = Self::default();
        if let Some(q) = latest.get(&MarketType::OneXTwo) {
            out.pre_game_odds_1 = q.odds1;
            out.pre_game_odds_x = q.odds_x;
            out.pre_game_odds_2 = q.odds2;
        }
        if let Some(q) = latest.get(&MarketType::Asian) {
            out.pre_game_ah_home = q.odds1;
            out.pre_game_ah_away = q.odds2;
            out.ah_line_id = q.line_id.clone();
        }
        if let Some(q) = latest.get(&MarketType::Total) {
            out.pre_game_total_home = q.odds1;
            out.pre_game_total_away = q.odds2;
            out.total_line_id = q.line_id.clone();
        }
        out
    }
}

/// Drops every Asian handicap line except the one(s) closest to an even
/// two-way price. Other markets pass through untouched.
pub fn keep_even_asian_lines(quotes: Vec<OddsQuote>) -> Vec<OddsQuote> {
    let min_delta = quotes
        .iter()
        .filter(|q| q.market == MarketType::Asian)
        .filter_map(OddsQuote::fair_price_delta)
        .min_by(f64::total_cmp);

    quotes
        .into_iter()
        .filter(|q| {
            if q.market != MarketType::Asian {
                return true;
            }
            match (q.fair_price_delta(), min_delta) {
                (Some(delta), Some(min)) => delta == min,
                _ => false,
            }
        })
        .collect()
}

/// Latest quote per market; on equal timestamps the earlier quote wins.
pub fn latest_per_market(quotes: Vec<OddsQuote>) -> HashMap<MarketType, OddsQuote> {
    let mut latest: HashMap<MarketType, OddsQuote> = HashMap::new();
    for quote in quotes {
        match latest.get(&quote.market) {
            Some(current) if current.received_at >= quote.received_at => {}
            _ => {
                latest.insert(quote.market.clone(), quote);
            }
        }
    }
    latest
}

/// Even-line filter, then latest-per-market, over quotes at or before `cutoff`.
pub fn select_odds(quotes: Vec<OddsQuote>, cutoff: DateTime<Utc>) -> HashMap<MarketType, OddsQuote> {
    let eligible = quotes
        .into_iter()
        .filter(|q| q.received_at <= cutoff)
        .collect::<Vec<_>>();
    latest_per_market(keep_even_asian_lines(eligible))
}

/// One grouped store lookup per game covering all markets.
pub fn resolve_odds<S: FeatureStore + ?Sized>(
    store: &S,
    game_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<(OddsFeatures, Vec<MarketType>)> {
    let quotes = store
        .odds_before(game_id, cutoff)
        .with_context(|| format!("odds lookup for game {game_id}"))?;
    let latest = select_odds(quotes, cutoff);
    let missing = RESOLVED_MARKETS
        .iter()
        .filter(|m| !latest.contains_key(*m))
        .cloned()
        .collect();
    Ok((OddsFeatures::from_latest(&latest), missing))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::{OddsFeatures, keep_even_asian_lines, latest_per_market, resolve_odds, select_odds};
    use crate::document::parse_datetime;
    use crate::model::{MarketType, OddsQuote};
    use crate::store::MemoryStore;

    fn kickoff() -> DateTime<Utc> {
        parse_datetime("2023-08-12T14:00:00Z").unwrap()
    }

    fn quote(market: &str, mins_before: i64, odds1: f64, odds2: f64, line: &str) -> OddsQuote {
        OddsQuote {
            game_id: "g1".to_string(),
            market: MarketType::parse(market),
            received_at: kickoff() - Duration::minutes(mins_before),
            odds1: Some(odds1),
            odds_x: None,
            odds2: Some(odds2),
            line_id: Some(line.to_string()),
        }
    }

    #[test]
    fn even_asian_line_wins_over_unbalanced_line() {
        let kept = keep_even_asian_lines(vec![
            quote("asian", 10, 1.6, 2.3, "-0.25"),
            quote("asian", 10, 1.9, 1.9, "0"),
            quote("total", 10, 1.6, 2.3, "2.5"),
        ]);
        assert_eq!(kept.len(), 2);
        let asian = kept
            .iter()
            .find(|q| q.market == MarketType::Asian)
            .unwrap();
        assert_eq!(asian.line_id.as_deref(), Some("0"));
    }

    #[test]
    fn total_market_keeps_unbalanced_lines() {
        let kept = keep_even_asian_lines(vec![
            quote("total", 10, 1.9, 1.9, "2.5"),
            quote("total", 5, 1.5, 2.6, "3.5"),
        ]);
        assert_eq!(kept.len(), 2);
        let latest = latest_per_market(kept);
        assert_eq!(latest[&MarketType::Total].line_id.as_deref(), Some("3.5"));
    }

    #[test]
    fn tied_even_lines_fall_back_to_latest() {
        let latest = select_odds(
            vec![
                quote("asian", 30, 1.95, 1.95, "0"),
                quote("asian", 5, 1.95, 1.95, "0"),
                quote("asian", 1, 1.5, 2.7, "-0.5"),
            ],
            kickoff(),
        );
        let asian = &latest[&MarketType::Asian];
        assert_eq!(asian.received_at, kickoff() - Duration::minutes(5));
    }

    #[test]
    fn latest_quote_before_cutoff_is_selected() {
        // t1 < t2 <= cutoff < t3
        let latest = select_odds(
            vec![
                quote("1x2", 60, 2.0, 3.8, ""),
                quote("1x2", -10, 2.6, 2.9, ""),
                quote("1x2", 0, 2.2, 3.4, ""),
            ],
            kickoff(),
        );
        assert_eq!(latest[&MarketType::OneXTwo].odds1, Some(2.2));
    }

    #[test]
    fn equal_timestamps_keep_first_quote() {
        let latest = latest_per_market(vec![
            quote("1x2", 5, 2.0, 3.0, ""),
            quote("1x2", 5, 9.0, 9.0, ""),
        ]);
        assert_eq!(latest[&MarketType::OneXTwo].odds1, Some(2.0));
    }

    #[test]
    fn asian_quotes_without_prices_are_dropped() {
        let mut broken = quote("asian", 1, 1.9, 1.9, "0");
        broken.odds2 = None;
        let latest = select_odds(vec![quote("asian", 10, 1.7, 2.2, "-0.25"), broken], kickoff());
        assert_eq!(
            latest[&MarketType::Asian].line_id.as_deref(),
            Some("-0.25")
        );
    }

    #[test]
    fn missing_markets_are_reported_and_null() {
        let store = MemoryStore::new()
            .with_quote(quote("1x2", 10, 2.0, 3.8, "1x2"))
            .with_quote(quote("asian", 10, 1.9, 1.9, "0"));
        let (features, missing) = resolve_odds(&store, "g1", kickoff()).unwrap();
        assert_eq!(missing, vec![MarketType::Total]);
        assert_eq!(features.pre_game_total_home, None);
        assert_eq!(features.pre_game_total_away, None);
        assert_eq!(features.total_line_id, None);
        assert_eq!(features.pre_game_ah_home, Some(1.9));
        assert_eq!(features.ah_line_id.as_deref(), Some("0"));
        assert_eq!(features.pre_game_odds_1, Some(2.0));
    }

    #[test]
    fn total_columns_carry_total_prices() {
        let latest = latest_per_market(vec![
            quote("asian", 10, 1.9, 1.9, "0"),
            quote("total", 10, 1.8, 2.05, "2.5"),
        ]);
        let features = OddsFeatures::from_latest(&latest);
        assert_eq!(features.pre_game_total_home, Some(1.8));
        assert_eq!(features.pre_game_total_away, Some(2.05));
        assert_eq!(features.total_line_id.as_deref(), Some("2.5"));
    }
}
