use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::document::Document;
use crate::model::{Game, LineupSnapshot, OddsQuote};
use crate::store::{FeatureStore, GAMES_COLLECTION, LINEUPS_COLLECTION, ODDS_COLLECTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Games,
    MarketOdds,
    TeamSheets,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Games, Self::MarketOdds, Self::TeamSheets];

    pub fn name(self) -> &'static str {
        match self {
            Self::Games => GAMES_COLLECTION,
            Self::MarketOdds => ODDS_COLLECTION,
            Self::TeamSheets => LINEUPS_COLLECTION,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionIngest {
    pub inserted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Document collections kept as JSON text in SQLite, one file per database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteStore {
    /// Registers the connection for `db_name` on the host registered as `host_alias`.
    pub fn connect(cfg: &StoreConfig, host_alias: &str, db_name: &str) -> Result<Self> {
        let host = cfg.host(host_alias)?;
        if host.is_in_memory() {
            return Self::in_memory();
        }
        let store = Self::open(&host.db_file(db_name))?;
        info!(host = host_alias, db = db_name, "registered feature store connection");
        Ok(store)
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .context("enable sqlite wal")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: ":memory:".to_string(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", collection.name());
        let n = conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .with_context(|| format!("count {}", collection.name()))?;
        Ok(n as usize)
    }

    /// Validates each document through its model projection before storing it.
    pub fn insert_documents(
        &self,
        collection: Collection,
        docs: &[Document],
    ) -> Result<CollectionIngest> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin ingest transaction")?;
        let mut summary = CollectionIngest::default();
        for (idx, doc) in docs.iter().enumerate() {
            match insert_document(&tx, collection, doc) {
                Ok(()) => summary.inserted += 1,
                Err(err) => {
                    summary.skipped += 1;
                    summary.errors.push(format!("document {idx}: {err:#}"));
                }
            }
        }
        tx.commit().context("commit ingest transaction")?;
        debug!(
            collection = collection.name(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            "stored documents"
        );
        Ok(summary)
    }

    /// One JSON document per non-blank line.
    pub fn insert_jsonl(&self, collection: Collection, raw: &str) -> Result<CollectionIngest> {
        let mut docs = Vec::new();
        let mut parse_errors = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match Document::parse(line) {
                Ok(doc) => docs.push(doc),
                Err(err) => parse_errors.push(format!("line {}: {err:#}", idx + 1)),
            }
        }
        let mut summary = self.insert_documents(collection, &docs)?;
        summary.skipped += parse_errors.len();
        summary.errors.extend(parse_errors);
        Ok(summary)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id TEXT NOT NULL UNIQUE,
            game_date TEXT NOT NULL,
            doc TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS market_odds (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            ra_game_id TEXT NOT NULL,
            market_type TEXT NOT NULL,
            received_at TEXT NOT NULL,
            doc TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_market_odds_game ON market_odds(ra_game_id, received_at);

        CREATE TABLE IF NOT EXISTS team_sheets (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            ra_team_id TEXT NOT NULL,
            received_at TEXT NOT NULL,
            doc TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_team_sheets_team ON team_sheets(ra_team_id, received_at);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

// Fixed-width UTC text so that string comparison in SQL orders by time.
fn sortable_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn insert_document(
    tx: &rusqlite::Transaction<'_>,
    collection: Collection,
    doc: &Document,
) -> Result<()> {
    let raw = doc.to_json();
    match collection {
        Collection::Games => {
            let game = Game::from_document(doc)?;
            tx.execute(
                r#"
                INSERT INTO games (game_id, game_date, doc) VALUES (?1, ?2, ?3)
                ON CONFLICT(game_id) DO UPDATE SET
                    game_date = excluded.game_date,
                    doc = excluded.doc
                "#,
                params![game.game_id, sortable_time(game.game_date), raw],
            )
            .context("upsert game")?;
        }
        Collection::MarketOdds => {
            let quote = OddsQuote::from_document(doc)?;
            tx.execute(
                "INSERT INTO market_odds (ra_game_id, market_type, received_at, doc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    quote.game_id,
                    quote.market.as_str(),
                    sortable_time(quote.received_at),
                    raw
                ],
            )
            .context("insert market odds")?;
        }
        Collection::TeamSheets => {
            let sheet = LineupSnapshot::from_document(doc)?;
            tx.execute(
                "INSERT INTO team_sheets (ra_team_id, received_at, doc) VALUES (?1, ?2, ?3)",
                params![sheet.team_id, sortable_time(sheet.received_at), raw],
            )
            .context("insert team sheet")?;
        }
    }
    Ok(())
}

fn decode<T>(
    raw: &str,
    project: impl Fn(&Document) -> Result<T, crate::document::ProjectionError>,
) -> Result<T> {
    let doc = Document::parse(raw)?;
    Ok(project(&doc)?)
}

impl FeatureStore for SqliteStore {
    fn all_games(&self, limit: Option<usize>) -> Result<Vec<Game>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM games ORDER BY seq ASC LIMIT ?1")
            .context("prepare load games query")?;
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))
            .context("query load games")?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.context("decode game row")?;
            out.push(decode(&raw, Game::from_document).context("project game document")?);
        }
        Ok(out)
    }

    fn odds_before(&self, game_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<OddsQuote>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT doc FROM market_odds
                WHERE ra_game_id = ?1 AND received_at <= ?2
                ORDER BY seq ASC
                "#,
            )
            .context("prepare odds query")?;
        let rows = stmt
            .query_map(params![game_id, sortable_time(cutoff)], |row| {
                row.get::<_, String>(0)
            })
            .context("query odds")?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.context("decode odds row")?;
            out.push(decode(&raw, OddsQuote::from_document).context("project odds document")?);
        }
        Ok(out)
    }

    fn latest_lineup(
        &self,
        team_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<LineupSnapshot>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                r#"
                SELECT doc FROM team_sheets
                WHERE ra_team_id = ?1 AND received_at <= ?2
                ORDER BY received_at DESC, seq ASC
                LIMIT 1
                "#,
                params![team_id, sortable_time(cutoff)],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("query latest team sheet")?;
        raw.map(|raw| decode(&raw, LineupSnapshot::from_document))
            .transpose()
            .context("project team sheet document")
    }
}
