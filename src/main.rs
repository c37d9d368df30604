use std::process;

use notes_query_cache::{
    application::{
        error::AppError,
        notes::{self, NoteQueries},
    },
    cache::{CacheConfig, Domain},
    config,
    infra::{
        db::{self, SqliteExecutor},
        telemetry,
    },
};
use sqlx::SqlitePool;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let pool = db::connect(
        &settings.database.url,
        settings.database.max_connections.get(),
    )
    .await?;

    match cli_args.command {
        config::Command::Init => run_init(&pool).await,
        config::Command::Query(args) => run_query(pool, &settings, args).await,
        config::Command::Render(args) => run_render(pool, &settings, args).await,
    }
}

async fn run_init(pool: &SqlitePool) -> Result<(), AppError> {
    db::ensure_schema(pool).await?;
    info!("notes schema ready");
    Ok(())
}

async fn run_query(
    pool: SqlitePool,
    settings: &config::Settings,
    args: config::QueryArgs,
) -> Result<(), AppError> {
    let params = args
        .params
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|err| AppError::validation(format!("--params is not valid JSON: {err}")))?;

    let (queries, domain) = open_domain(pool, settings);
    let rows = notes::run_query(&queries, &domain, &args.sql, params.as_ref()).await?;
    domain.end();

    let output = serde_json::to_string_pretty(&rows.rows)
        .map_err(|err| AppError::unexpected(format!("failed to encode rows: {err}")))?;
    println!("{output}");
    Ok(())
}

async fn run_render(
    pool: SqlitePool,
    settings: &config::Settings,
    args: config::RenderArgs,
) -> Result<(), AppError> {
    let (queries, domain) = open_domain(pool, settings);
    let output = notes::render(&queries, &domain, args.search.as_deref(), args.note).await?;
    info!(
        domain = %domain.id(),
        tables = domain.table_count(),
        "render complete"
    );
    domain.end();

    println!("{output}");
    Ok(())
}

fn open_domain(pool: SqlitePool, settings: &config::Settings) -> (NoteQueries, Domain) {
    let cache_config = CacheConfig::from(&settings.cache);
    let queries = NoteQueries::new(SqliteExecutor::new(pool, cache_config.date_mode));
    let domain = Domain::begin(&cache_config);
    (queries, domain)
}
