use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::lineup::{LineupFeatures, resolve_lineup};
use crate::model::{Game, MarketType, remap_outcome};
use crate::odds::{OddsFeatures, resolve_odds};
use crate::store::FeatureStore;

pub const BASE_COLUMNS: [&str; 9] = [
    "gameId",
    "game_optaId",
    "gameDate",
    "homeTeamId",
    "homeTeam_optaId",
    "awayTeamId",
    "awayTeam_optaId",
    "tgt_gd",
    "tgt_outcome",
];

pub const ODDS_COLUMNS: [&str; 9] = [
    "preGameOdds1",
    "preGameOddsX",
    "preGameOdds2",
    "preGameAhHome",
    "preGameAhAway",
    "LineId",
    "preGameTotalHome",
    "preGameTotalAway",
    "totalLineId",
];

pub const HOME_LINEUP_COLUMNS: [&str; 6] = [
    "homeTeamName",
    "homeTeamLineup",
    "homeTeamLineupIds",
    "homeTeamLineupSlots",
    "homeTeamFormation",
    "home_team_lineup_received_at",
];

pub const AWAY_LINEUP_COLUMNS: [&str; 6] = [
    "awayTeamName",
    "awayTeamLineup",
    "awayTeamLineupIds",
    "awayTeamLineupSlots",
    "awayTeamFormation",
    "away_team_lineup_received_at",
];

/// Columns stored as floating point; every other column is text.
pub const NUMERIC_COLUMNS: [&str; 9] = [
    "tgt_gd",
    "tgt_outcome",
    "preGameOdds1",
    "preGameOddsX",
    "preGameOdds2",
    "preGameAhHome",
    "preGameAhAway",
    "preGameTotalHome",
    "preGameTotalAway",
];

pub const MAX_PARALLELISM: usize = 32;

/// Games between two progress log lines.
pub const PROGRESS_EVERY: usize = 500;

/// Clamps a requested worker count to `1..=MAX_PARALLELISM`.
pub fn bounded_parallelism(requested: usize) -> usize {
    requested.clamp(1, MAX_PARALLELISM)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateOptions {
    pub limit: Option<usize>,
    /// Worker threads for the per-game fan-out; `None` or 1 runs sequentially.
    pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Float(f64),
    Timestamp(DateTime<Utc>),
    TextList(Vec<Option<String>>),
}

impl Cell {
    fn text(v: &Option<String>) -> Self {
        v.clone().map(Self::Text).unwrap_or(Self::Null)
    }

    fn float(v: Option<f64>) -> Self {
        v.map(Self::Float).unwrap_or(Self::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form used for spreadsheet cells and Parquet string columns.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Float(v) => Some(v.to_string()),
            Self::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::TextList(items) => Some(serde_json::to_string(items).unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Outcome already remapped to 0.0 home / 1.0 draw / 2.0 away.
    pub game: Game,
    pub odds: OddsFeatures,
    pub home: Option<LineupFeatures>,
    pub away: Option<LineupFeatures>,
}

impl FeatureRow {
    pub fn cells(&self) -> Vec<Cell> {
        let g = &self.game;
        let o = &self.odds;
        let mut out = vec![
            Cell::Text(g.game_id.clone()),
            Cell::text(&g.game_opta_id),
            Cell::Timestamp(g.game_date),
            Cell::Text(g.home_team_id.clone()),
            Cell::text(&g.home_team_opta_id),
            Cell::Text(g.away_team_id.clone()),
            Cell::text(&g.away_team_opta_id),
            Cell::float(g.tgt_gd),
            Cell::float(g.tgt_outcome),
            Cell::float(o.pre_game_odds_1),
            Cell::float(o.pre_game_odds_x),
            Cell::float(o.pre_game_odds_2),
            Cell::float(o.pre_game_ah_home),
            Cell::float(o.pre_game_ah_away),
            Cell::text(&o.ah_line_id),
            Cell::float(o.pre_game_total_home),
            Cell::float(o.pre_game_total_away),
            Cell::text(&o.total_line_id),
        ];
        out.extend(lineup_cells(self.home.as_ref()));
        out.extend(lineup_cells(self.away.as_ref()));
        out
    }
}

fn lineup_cells(lineup: Option<&LineupFeatures>) -> [Cell; 6] {
    match lineup {
        None => std::array::from_fn(|_| Cell::Null),
        Some(l) => [
            Cell::Text(l.team_name.clone()),
            Cell::Text(l.lineup.clone()),
            Cell::TextList(l.player_ids.clone()),
            Cell::TextList(l.slots.clone()),
            Cell::text(&l.formation),
            Cell::Timestamp(l.received_at),
        ],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissKind {
    Odds(MarketType),
    HomeLineup { team_id: String },
    AwayLineup { team_id: String },
}

impl fmt::Display for MissKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Odds(market) => write!(f, "no {market} odds"),
            Self::HomeLineup { team_id } => write!(f, "no home lineup for team {team_id}"),
            Self::AwayLineup { team_id } => write!(f, "no away lineup for team {team_id}"),
        }
    }
}

/// A feature left null because nothing qualified at the game date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionMiss {
    pub game_id: String,
    pub kind: MissKind,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    pub misses: Vec<ResolutionMiss>,
}

impl FeatureTable {
    pub fn columns() -> Vec<&'static str> {
        let mut out = Vec::with_capacity(30);
        out.extend(BASE_COLUMNS);
        out.extend(ODDS_COLUMNS);
        out.extend(HOME_LINEUP_COLUMNS);
        out.extend(AWAY_LINEUP_COLUMNS);
        out
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Loads every game and joins its odds and both lineups as of the game date.
pub fn aggregate<S: FeatureStore + ?Sized>(
    store: &S,
    opts: &AggregateOptions,
) -> Result<FeatureTable> {
    let mut games = store.all_games(opts.limit).context("load games")?;
    for game in &mut games {
        if let Some(raw) = game.tgt_outcome {
            let mapped =
                remap_outcome(raw).with_context(|| format!("game {}", game.game_id))?;
            game.tgt_outcome = Some(mapped);
        }
    }

    let total = games.len();
    let done = AtomicUsize::new(0);
    let run_one = |game: &Game| -> Result<(FeatureRow, Vec<ResolutionMiss>)> {
        let built = build_row(store, game)?;
        let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
        if progress_due(finished, total) {
            info!(done = finished, total, "aggregation progress");
        }
        Ok(built)
    };
    let results = match opts.parallelism.map(bounded_parallelism) {
        Some(threads) if threads > 1 => with_game_pool(threads, || {
            games
                .par_iter()
                .map(run_one)
                .collect::<Result<Vec<_>>>()
        }),
        _ => games.iter().map(run_one).collect::<Result<Vec<_>>>(),
    }?;

    let mut table = FeatureTable {
        rows: Vec::with_capacity(results.len()),
        misses: Vec::new(),
    };
    for (row, misses) in results {
        table.rows.push(row);
        table.misses.extend(misses);
    }
    info!(
        games = table.rows.len(),
        misses = table.misses.len(),
        "aggregated feature rows"
    );
    Ok(table)
}

fn build_row<S: FeatureStore + ?Sized>(
    store: &S,
    game: &Game,
) -> Result<(FeatureRow, Vec<ResolutionMiss>)> {
    let cutoff = game.game_date;
    let mut misses = Vec::new();

    let (odds, missing_markets) = resolve_odds(store, &game.game_id, cutoff)
        .with_context(|| format!("game {} odds", game.game_id))?;
    for market in missing_markets {
        misses.push(MissKind::Odds(market));
    }
    let home = resolve_lineup(store, &game.home_team_id, cutoff)
        .with_context(|| format!("game {} home lineup", game.game_id))?;
    if home.is_none() {
        misses.push(MissKind::HomeLineup {
            team_id: game.home_team_id.clone(),
        });
    }
    let away = resolve_lineup(store, &game.away_team_id, cutoff)
        .with_context(|| format!("game {} away lineup", game.game_id))?;
    if away.is_none() {
        misses.push(MissKind::AwayLineup {
            team_id: game.away_team_id.clone(),
        });
    }

    for kind in &misses {
        warn!(game_id = %game.game_id, "unresolved feature: {kind}");
    }
    debug!(game_id = %game.game_id, misses = misses.len(), "resolved game features");

    let misses = misses
        .into_iter()
        .map(|kind| ResolutionMiss {
            game_id: game.game_id.clone(),
            kind,
        })
        .collect();
    Ok((
        FeatureRow {
            game: game.clone(),
            odds,
            home,
            away,
        },
        misses,
    ))
}

fn progress_due(done: usize, total: usize) -> bool {
    done % PROGRESS_EVERY == 0 && done < total
}

fn with_game_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Cell, FeatureTable, PROGRESS_EVERY, bounded_parallelism, progress_due};

    #[test]
    fn column_order_is_base_odds_home_away() {
        let cols = FeatureTable::columns();
        assert_eq!(cols.len(), 30);
        assert_eq!(cols[0], "gameId");
        assert_eq!(cols[8], "tgt_outcome");
        assert_eq!(cols[9], "preGameOdds1");
        assert_eq!(cols[17], "totalLineId");
        assert_eq!(cols[18], "homeTeamName");
        assert_eq!(cols[29], "away_team_lineup_received_at");
    }

    #[test]
    fn cells_render_lists_as_json() {
        let cell = Cell::TextList(vec![Some("1".to_string()), None]);
        assert_eq!(cell.render().as_deref(), Some(r#"["1",null]"#));
        assert_eq!(Cell::Null.render(), None);
        assert_eq!(Cell::Float(1.5).render().as_deref(), Some("1.5"));
    }

    #[test]
    fn parallelism_is_clamped() {
        assert_eq!(bounded_parallelism(0), 1);
        assert_eq!(bounded_parallelism(4), 4);
        assert_eq!(bounded_parallelism(500), 32);
    }

    #[test]
    fn progress_logs_on_interval_but_not_at_the_end() {
        assert!(!progress_due(1, 10_000));
        assert!(progress_due(PROGRESS_EVERY, 10_000));
        assert!(progress_due(PROGRESS_EVERY * 3, 10_000));
        assert!(!progress_due(PROGRESS_EVERY, PROGRESS_EVERY));
    }
}
