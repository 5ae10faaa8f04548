//! Row mappers and shared SELECT prefixes.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

use crate::experiment::{
    AgentConfig, AgentRecord, Cost, ExperimentRecord, LedgerEntry, PublicationRecord,
    ResolutionRecord, ReviewRecord, SolutionRecord, TokenUsage, UsageSource,
};
use crate::Error;

pub(crate) const EXPERIMENT_SELECT: &str =
    "SELECT id, uuid, name, problem, config, created_at, updated_at FROM experiments";

pub(crate) const AGENT_SELECT: &str = "SELECT id, experiment_id, name, provider, model, thinking, \
     tools, created_at, updated_at FROM agents";

pub(crate) const PUBLICATION_SELECT: &str = "SELECT p.id, p.experiment_id, p.author_id, \
     a.name AS author, p.title, p.abstract, p.content, p.status, p.reference, p.created_at, \
     p.updated_at FROM publications p JOIN agents a ON a.id = p.author_id";

pub(crate) const REVIEW_SELECT: &str = "SELECT r.id, r.experiment_id, r.publication_id, \
     p.reference, r.author_id, a.name AS author, r.grade, r.content, r.created_at, r.updated_at \
     FROM reviews r JOIN publications p ON p.id = r.publication_id \
     JOIN agents a ON a.id = r.author_id";

pub(crate) const SOLUTION_SELECT: &str = "SELECT s.id, s.experiment_id, s.agent_id, \
     a.name AS agent, s.publication_id, p.reference, s.reason, s.created_at \
     FROM solutions s JOIN agents a ON a.id = s.agent_id \
     LEFT JOIN publications p ON p.id = s.publication_id";

pub(crate) const RESOLUTION_SELECT: &str = "SELECT r.id, r.experiment_id, p.reference, \
     r.rationale, r.created_at FROM resolutions r JOIN publications p ON p.id = r.publication_id";

pub(crate) const LEDGER_SELECT: &str = "SELECT id, experiment_id, agent_id, step, model, \
     input_tokens, output_tokens, cached_tokens, thinking_tokens, cost_nanos, created_at \
     FROM ledger";

/// Current time as stored (UTC microseconds).
pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn conversion_error(idx: usize, ty: Type, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    Utc.timestamp_micros(micros).single().ok_or_else(|| {
        conversion_error(
            idx,
            Type::Integer,
            Error::Other(format!("timestamp out of range: {micros}")),
        )
    })
}

fn parsed<T: FromStr<Err = Error>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

#[allow(clippy::cast_sign_loss)]
fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(value.max(0) as u64)
}

pub(crate) fn experiment(row: &Row<'_>) -> rusqlite::Result<ExperimentRecord> {
    let uuid: String = row.get(1)?;
    let uuid = uuid::Uuid::parse_str(&uuid)
        .map_err(|e| conversion_error(1, Type::Text, Error::Other(e.to_string())))?;
    let config: Option<String> = row.get(4)?;
    let config = config
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| conversion_error(4, Type::Text, Error::Serialization(e)))?;

    let mut builder = ExperimentRecord::builder(row.get::<_, String>(2)?, row.get::<_, String>(3)?)
        .id(row.get(0)?)
        .uuid(uuid)
        .created_at(timestamp(row, 5)?)
        .updated_at(timestamp(row, 6)?);
    if let Some(config) = config {
        builder = builder.config(config);
    }
    Ok(builder.build())
}

pub(crate) fn agent(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    let tools: String = row.get(6)?;
    let tools = serde_json::from_str(&tools)
        .map_err(|e| conversion_error(6, Type::Text, Error::Serialization(e)))?;
    Ok(AgentRecord {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        name: row.get(2)?,
        config: AgentConfig {
            provider: row.get(3)?,
            model: row.get(4)?,
            thinking: parsed(row, 5)?,
            tools,
        },
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
    })
}

pub(crate) fn publication(row: &Row<'_>) -> rusqlite::Result<PublicationRecord> {
    Ok(PublicationRecord {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        author_id: row.get(2)?,
        author: row.get(3)?,
        title: row.get(4)?,
        abstract_text: row.get(5)?,
        content: row.get(6)?,
        status: parsed(row, 7)?,
        reference: row.get(8)?,
        created_at: timestamp(row, 9)?,
        updated_at: timestamp(row, 10)?,
    })
}

pub(crate) fn review(row: &Row<'_>) -> rusqlite::Result<ReviewRecord> {
    Ok(ReviewRecord {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        publication_id: row.get(2)?,
        reference: row.get(3)?,
        author_id: row.get(4)?,
        author: row.get(5)?,
        grade: parsed(row, 6)?,
        content: row.get(7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

pub(crate) fn solution(row: &Row<'_>) -> rusqlite::Result<SolutionRecord> {
    Ok(SolutionRecord {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        agent_id: row.get(2)?,
        agent: row.get(3)?,
        publication_id: row.get(4)?,
        reference: row.get(5)?,
        reason: parsed(row, 6)?,
        created_at: timestamp(row, 7)?,
    })
}

pub(crate) fn resolution(row: &Row<'_>) -> rusqlite::Result<ResolutionRecord> {
    Ok(ResolutionRecord {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        reference: row.get(2)?,
        rationale: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

pub(crate) fn ledger_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let step: Option<i64> = row.get(3)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        source: UsageSource {
            agent_id: row.get(2)?,
            step: step.and_then(|s| u64::try_from(s).ok()),
            model: row.get(4)?,
        },
        usage: TokenUsage {
            input: count(row, 5)?,
            output: count(row, 6)?,
            cached: count(row, 7)?,
            thinking: count(row, 8)?,
        },
        cost: Cost::from_nanos(row.get(9)?),
        created_at: timestamp(row, 10)?,
    })
}
