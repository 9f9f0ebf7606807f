use chrono::{DateTime, Duration, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use pregame_features::aggregate::{AggregateOptions, aggregate};
use pregame_features::document::Document;
use pregame_features::model::{Game, LineupPlayer, LineupSnapshot, MarketType, OddsQuote};
use pregame_features::odds::select_odds;
use pregame_features::sqlite_store::{Collection, SqliteStore};
use pregame_features::store::MemoryStore;

fn season_start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_691_848_800, 0).unwrap_or_default()
}

fn sample_store(games: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    for idx in 0..games {
        let kickoff = season_start() + Duration::days(idx as i64);
        let game_id = format!("g{idx}");
        let home = format!("t{}", idx % 20);
        let away = format!("t{}", (idx + 7) % 20);
        store = store.with_game(Game {
            game_id: game_id.clone(),
            game_opta_id: Some(format!("{}", 2_360_000 + idx)),
            game_date: kickoff,
            home_team_id: home.clone(),
            home_team_opta_id: None,
            away_team_id: away,
            away_team_opta_id: None,
            tgt_gd: Some(0.0),
            tgt_outcome: Some([1.0, 0.5, 0.0][idx % 3]),
        });
        for step in 0..12_i64 {
            let received_at = kickoff - Duration::hours(24 - step * 2);
            let market = ["1x2", "asian", "total"][(step % 3) as usize];
            let skew = (step as f64) * 0.05;
            store = store.with_quote(OddsQuote {
                game_id: game_id.clone(),
                market: MarketType::parse(market),
                received_at,
                odds1: Some(1.8 + skew),
                odds_x: (market == "1x2").then_some(3.3),
                odds2: Some(2.1 - skew),
                line_id: (market != "1x2").then(|| format!("{}", step as f64 * 0.25)),
            });
        }
        store = store.with_lineup(LineupSnapshot {
            team_id: home,
            name: format!("Team {}", idx % 20),
            received_at: kickoff - Duration::minutes(75),
            starting: (1..=11)
                .map(|slot| LineupPlayer {
                    name: format!("Player {idx}-{slot}"),
                    position: Some("MF".to_string()),
                    opta_id: Some(format!("p{slot}")),
                    slot: Some(slot.to_string()),
                    formation: Some("4-3-3".to_string()),
                })
                .collect(),
        });
    }
    store
}

fn bench_document_projection(c: &mut Criterion) {
    c.bench_function("odds_document_projection", |b| {
        b.iter(|| {
            let mut parsed = 0usize;
            for line in MARKET_ODDS_JSONL.lines() {
                let doc = Document::parse(black_box(line)).unwrap();
                if OddsQuote::from_document(&doc).is_ok() {
                    parsed += 1;
                }
            }
            black_box(parsed);
        })
    });
}

fn bench_odds_selection(c: &mut Criterion) {
    let quotes: Vec<OddsQuote> = (0..400)
        .map(|idx| OddsQuote {
            game_id: "g".to_string(),
            market: MarketType::parse(["1x2", "asian", "total"][idx % 3]),
            received_at: season_start() - Duration::minutes(idx as i64),
            odds1: Some(1.5 + (idx % 17) as f64 * 0.05),
            odds_x: None,
            odds2: Some(2.5 - (idx % 13) as f64 * 0.05),
            line_id: Some(format!("{}", (idx % 9) as f64 * 0.25)),
        })
        .collect();
    c.bench_function("odds_selection", |b| {
        b.iter(|| {
            let latest = select_odds(black_box(quotes.clone()), season_start());
            black_box(latest.len());
        })
    });
}

fn bench_aggregate_sequential(c: &mut Criterion) {
    let store = sample_store(380);
    c.bench_function("aggregate_sequential", |b| {
        b.iter(|| {
            let table = aggregate(black_box(&store), &AggregateOptions::default()).unwrap();
            black_box(table.len());
        })
    });
}

fn bench_aggregate_parallel(c: &mut Criterion) {
    let store = sample_store(380);
    let opts = AggregateOptions {
        limit: None,
        parallelism: Some(4),
    };
    c.bench_function("aggregate_parallel", |b| {
        b.iter(|| {
            let table = aggregate(black_box(&store), &opts).unwrap();
            black_box(table.len());
        })
    });
}

fn bench_sqlite_ingest(c: &mut Criterion) {
    c.bench_function("sqlite_ingest_fixtures", |b| {
        b.iter(|| {
            let store = SqliteStore::in_memory().unwrap();
            store
                .insert_jsonl(Collection::Games, black_box(GAMES_JSONL))
                .unwrap();
            store
                .insert_jsonl(Collection::MarketOdds, black_box(MARKET_ODDS_JSONL))
                .unwrap();
            store
                .insert_jsonl(Collection::TeamSheets, black_box(TEAM_SHEETS_JSONL))
                .unwrap();
            black_box(store.count(Collection::MarketOdds).unwrap());
        })
    });
}

criterion_group!(
    perf,
    bench_document_projection,
    bench_odds_selection,
    bench_aggregate_sequential,
    bench_aggregate_parallel,
    bench_sqlite_ingest
);
criterion_main!(perf);

static GAMES_JSONL: &str = include_str!("../tests/fixtures/games.jsonl");
static MARKET_ODDS_JSONL: &str = include_str!("../tests/fixtures/market_odds.jsonl");
static TEAM_SHEETS_JSONL: &str = include_str!("../tests/fixtures/team_sheets.jsonl");
