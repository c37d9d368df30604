//! Note queries and the synchronous render passes that read them.
//!
//! Render passes never await. Each read goes through the cache and either
//! yields rows or interrupts the pass; [`render`] and [`run_query`] drive a
//! pass to completion with [`resolve`].

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::application::error::AppError;
use crate::cache::{CacheError, CacheSource, Domain, Interrupt, Outcome, Param, resolve};
use crate::infra::db::{QueryRows, SqliteExecutor};
use crate::infra::error::InfraError;

pub const NOTE_BY_ID: &str = "select * from notes where id = ?1";
pub const NOTES_BY_TITLE: &str = "select * from notes where title like ?1 order by id desc";
pub const ALL_NOTES: &str = "select * from notes order by id desc";

const EXCERPT_CHARS: usize = 60;

pub type NoteOutcome = Outcome<QueryRows, InfraError>;
pub type RenderResult = Result<String, Interrupt<InfraError>>;

/// Typed note reads bound to one SQLite source.
#[derive(Debug, Clone)]
pub struct NoteQueries {
    source: CacheSource<SqliteExecutor>,
}

impl NoteQueries {
    pub fn new(executor: SqliteExecutor) -> Self {
        Self {
            source: CacheSource::new("notes-db", executor),
        }
    }

    pub fn source(&self) -> &CacheSource<SqliteExecutor> {
        &self.source
    }

    pub fn note(&self, domain: &Domain, id: i64) -> Result<NoteOutcome, CacheError> {
        domain.query(&self.source, NOTE_BY_ID, &[Param::Int(id)])
    }

    /// Newest first; `search` narrows to titles containing it.
    pub fn list(&self, domain: &Domain, search: Option<&str>) -> Result<NoteOutcome, CacheError> {
        match normalized_search(search) {
            Some(text) => domain.query(
                &self.source,
                NOTES_BY_TITLE,
                &[Param::Text(format!("%{text}%"))],
            ),
            None => domain.query(&self.source, ALL_NOTES, &[]),
        }
    }

    /// Arbitrary SQL with an untyped parameter list, which must be a JSON array.
    pub fn query_json(
        &self,
        domain: &Domain,
        sql: &str,
        params: Option<&Value>,
    ) -> Result<NoteOutcome, CacheError> {
        let params = params.cloned().map(Param::from);
        domain.table(&self.source)?.query_dynamic(sql, params.as_ref())
    }
}

/// Sidebar-style listing of every matching note.
pub fn render_note_list(
    queries: &NoteQueries,
    domain: &Domain,
    search: Option<&str>,
) -> RenderResult {
    let notes = queries.list(domain, search)?.into_ready()?;

    if notes.is_empty() {
        return Ok(match normalized_search(search) {
            Some(text) => format!("Couldn't find any notes titled \"{text}\"."),
            None => "No notes created yet!".to_owned(),
        });
    }

    let mut lines = Vec::with_capacity(notes.len());
    for row in &notes.rows {
        let mut line = format!(
            "- [{}] {}",
            row.get("id").map(display_value).unwrap_or_default(),
            text_field(row, "title").unwrap_or("Untitled")
        );
        if let Some(updated) = text_field(row, "updated_at") {
            line.push_str(&format!("  ({updated})"));
        }
        if let Some(body) = text_field(row, "body") {
            let excerpt = excerpt(body);
            if !excerpt.is_empty() {
                line.push_str(&format!("\n    {excerpt}"));
            }
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

pub fn render_note(queries: &NoteQueries, domain: &Domain, id: i64) -> RenderResult {
    let rows = queries.note(domain, id)?.into_ready()?;
    let Some(note) = rows.first() else {
        return Ok(format!("Note {id} does not exist."));
    };

    let mut out = format!("# {}", text_field(note, "title").unwrap_or("Untitled"));
    if let Some(updated) = text_field(note, "updated_at") {
        out.push_str(&format!("\nLast updated on {updated}"));
    }
    out.push_str("\n\n");
    out.push_str(text_field(note, "body").unwrap_or_default());
    Ok(out)
}

/// The list followed by the selected note, when there is one.
pub fn render_app(
    queries: &NoteQueries,
    domain: &Domain,
    search: Option<&str>,
    selected: Option<i64>,
) -> RenderResult {
    let list = render_note_list(queries, domain, search)?;
    match selected {
        Some(id) => {
            let note = render_note(queries, domain, id)?;
            Ok(format!("{list}\n\n{note}"))
        }
        None => Ok(list),
    }
}

pub async fn render(
    queries: &NoteQueries,
    domain: &Domain,
    search: Option<&str>,
    selected: Option<i64>,
) -> Result<String, AppError> {
    let max_passes = domain.config().max_passes;
    let output = resolve(|| render_app(queries, domain, search, selected), max_passes).await?;
    Ok(output)
}

pub async fn run_query(
    queries: &NoteQueries,
    domain: &Domain,
    sql: &str,
    params: Option<&Value>,
) -> Result<Arc<QueryRows>, AppError> {
    let max_passes = domain.config().max_passes;
    let rows = resolve(
        || queries.query_json(domain, sql, params)?.into_ready(),
        max_passes,
    )
    .await?;
    Ok(rows)
}

fn normalized_search(search: Option<&str>) -> Option<&str> {
    search.map(str::trim).filter(|text| !text.is_empty())
}

fn text_field<'a>(row: &'a Map<String, Value>, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn excerpt(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or_default().trim();
    let mut chars = first_line.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
