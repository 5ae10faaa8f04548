//! SQLite schema
//!
//! Every invariant the engine relies on is a schema constraint, so a
//! second process (or a bug) talking to the same database cannot break it:
//! - one review per (reviewer, publication), never by the author
//! - one reference per experiment
//! - citation edges are a set without self-loops
//! - status / grade / reason columns only hold known values
//! - deleting an experiment cascades to everything it owns

use rusqlite::Connection;

use crate::Result;

/// Connection pragmas applied on open.
pub(crate) const PRAGMAS: &str = "PRAGMA foreign_keys=ON;\
     PRAGMA synchronous=NORMAL;\
     PRAGMA busy_timeout=5000;";

const TABLES: &str = "CREATE TABLE IF NOT EXISTS experiments (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       uuid TEXT NOT NULL UNIQUE,\
       name TEXT NOT NULL UNIQUE,\
       problem TEXT NOT NULL,\
       config TEXT,\
       created_at INTEGER NOT NULL,\
       updated_at INTEGER NOT NULL\
     );\
     CREATE TABLE IF NOT EXISTS agents (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       name TEXT NOT NULL,\
       provider TEXT NOT NULL,\
       model TEXT NOT NULL,\
       thinking TEXT NOT NULL,\
       tools TEXT NOT NULL DEFAULT '[]',\
       created_at INTEGER NOT NULL,\
       updated_at INTEGER NOT NULL,\
       UNIQUE(experiment_id, name)\
     );\
     CREATE TABLE IF NOT EXISTS publications (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       author_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,\
       title TEXT NOT NULL CHECK (length(trim(title)) > 0),\
       abstract TEXT NOT NULL DEFAULT '',\
       content TEXT NOT NULL CHECK (length(trim(content)) > 0),\
       status TEXT NOT NULL DEFAULT 'SUBMITTED' \
         CHECK (status IN ('SUBMITTED', 'PUBLISHED', 'REJECTED')),\
       reference TEXT NOT NULL,\
       created_at INTEGER NOT NULL,\
       updated_at INTEGER NOT NULL,\
       UNIQUE(experiment_id, reference)\
     );\
     CREATE TABLE IF NOT EXISTS reviews (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,\
       author_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,\
       grade TEXT NOT NULL \
         CHECK (grade IN ('STRONG_ACCEPT', 'ACCEPT', 'REJECT', 'STRONG_REJECT')),\
       content TEXT NOT NULL,\
       created_at INTEGER NOT NULL,\
       updated_at INTEGER NOT NULL,\
       UNIQUE(author_id, publication_id)\
     );\
     CREATE TRIGGER IF NOT EXISTS reviews_no_self_review \
       BEFORE INSERT ON reviews \
       WHEN NEW.author_id = (SELECT author_id FROM publications WHERE id = NEW.publication_id) \
     BEGIN \
       SELECT RAISE(ABORT, 'self review'); \
     END;\
     CREATE TABLE IF NOT EXISTS citations (\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       from_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,\
       to_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,\
       created_at INTEGER NOT NULL,\
       PRIMARY KEY (from_id, to_id),\
       CHECK (from_id <> to_id)\
     );\
     CREATE TABLE IF NOT EXISTS solutions (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,\
       publication_id INTEGER REFERENCES publications(id) ON DELETE CASCADE,\
       reason TEXT NOT NULL \
         CHECK (reason IN ('NO_PREVIOUS', 'PREVIOUS_WRONG', 'PREVIOUS_IMPROVED', 'NEW_APPROACH')),\
       created_at INTEGER NOT NULL\
     );\
     CREATE TABLE IF NOT EXISTS advisors (\
       experiment_id INTEGER NOT NULL,\
       agent_name TEXT NOT NULL,\
       created_at INTEGER NOT NULL,\
       PRIMARY KEY (experiment_id, agent_name),\
       FOREIGN KEY (experiment_id, agent_name) \
         REFERENCES agents(experiment_id, name) ON DELETE CASCADE\
     );\
     CREATE TABLE IF NOT EXISTS ledger (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       agent_id INTEGER REFERENCES agents(id) ON DELETE SET NULL,\
       step INTEGER,\
       model TEXT NOT NULL,\
       input_tokens INTEGER NOT NULL DEFAULT 0,\
       output_tokens INTEGER NOT NULL DEFAULT 0,\
       cached_tokens INTEGER NOT NULL DEFAULT 0,\
       thinking_tokens INTEGER NOT NULL DEFAULT 0,\
       cost_nanos INTEGER NOT NULL DEFAULT 0,\
       created_at INTEGER NOT NULL\
     );\
     CREATE TABLE IF NOT EXISTS resolutions (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,\
       publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,\
       rationale TEXT NOT NULL,\
       created_at INTEGER NOT NULL\
     );\
     CREATE INDEX IF NOT EXISTS idx_agents_experiment ON agents(experiment_id);\
     CREATE INDEX IF NOT EXISTS idx_publications_status ON publications(experiment_id, status);\
     CREATE INDEX IF NOT EXISTS idx_reviews_publication ON reviews(publication_id);\
     CREATE INDEX IF NOT EXISTS idx_citations_to ON citations(to_id);\
     CREATE INDEX IF NOT EXISTS idx_solutions_agent ON solutions(agent_id, created_at, id);\
     CREATE INDEX IF NOT EXISTS idx_ledger_experiment ON ledger(experiment_id);\
     CREATE INDEX IF NOT EXISTS idx_resolutions_experiment ON resolutions(experiment_id, created_at, id);";

/// Create all tables, triggers and indexes. Safe to call on every open.
pub(crate) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(TABLES)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 9);
    }

    #[test]
    fn test_citation_self_loop_rejected_by_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        create_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO experiments (uuid, name, problem, created_at, updated_at) VALUES ('u', 'e', 'p', 0, 0);\
             INSERT INTO agents (experiment_id, name, provider, model, thinking, created_at, updated_at) \
               VALUES (1, 'a1', 'x', 'm', 'low', 0, 0);\
             INSERT INTO publications (experiment_id, author_id, title, content, reference, created_at, updated_at) \
               VALUES (1, 1, 't', 'c', 'ab12', 0, 0);",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO citations (experiment_id, from_id, to_id, created_at) VALUES (1, 1, 1, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
