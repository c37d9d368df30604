//! Domain registry.
//!
//! A [`Domain`] is one cache lifetime, typically one render or request. It
//! owns one [`CacheTable`] per [`CacheIdentity`] requested within it, and all
//! of them are released together when the last clone of the domain is dropped.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;
use tracing::debug;
use uuid::Uuid;

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{DateMode, Param};
use super::reader::Outcome;
use super::table::{CacheTable, Executor};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Distinguishes independent caches within one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    id: u64,
    label: &'static str,
}

impl CacheIdentity {
    fn next(label: &'static str) -> Self {
        Self {
            id: NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed),
            label,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

/// An executor paired with the identity its tables are registered under.
pub struct CacheSource<X: Executor> {
    identity: CacheIdentity,
    executor: Arc<X>,
}

impl<X: Executor> CacheSource<X> {
    pub fn new(label: &'static str, executor: X) -> Self {
        Self::from_arc(label, Arc::new(executor))
    }

    pub fn from_arc(label: &'static str, executor: Arc<X>) -> Self {
        Self {
            identity: CacheIdentity::next(label),
            executor,
        }
    }

    pub fn identity(&self) -> CacheIdentity {
        self.identity
    }

    pub fn executor(&self) -> &Arc<X> {
        &self.executor
    }
}

impl<X: Executor> Clone for CacheSource<X> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<X: Executor> fmt::Debug for CacheSource<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSource")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Start a new domain that renders dates in `date_mode`.
pub fn begin_domain(date_mode: DateMode) -> Domain {
    Domain::begin(&CacheConfig::with_date_mode(date_mode))
}

/// One cache lifetime. Clones share the same tables.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

struct DomainInner {
    id: Uuid,
    config: CacheConfig,
    tables: DashMap<CacheIdentity, Arc<dyn Any + Send + Sync>>,
}

impl Domain {
    pub fn begin(config: &CacheConfig) -> Self {
        let id = Uuid::new_v4();
        counter!("notes_cache_domain_begin_total").increment(1);
        debug!(domain = %id, date_mode = ?config.date_mode, "query cache domain started");
        Self {
            inner: Arc::new(DomainInner {
                id,
                config: config.clone(),
                tables: DashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn date_mode(&self) -> DateMode {
        self.inner.config.date_mode
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get or create the table bound to `source` within this domain.
    pub fn table<X: Executor>(
        &self,
        source: &CacheSource<X>,
    ) -> Result<Arc<CacheTable<X>>, CacheError> {
        let table = self
            .inner
            .tables
            .entry(source.identity())
            .or_insert_with(|| {
                Arc::new(CacheTable::new(
                    Arc::clone(source.executor()),
                    &self.inner.config,
                )) as Arc<dyn Any + Send + Sync>
            })
            .value()
            .clone();

        table
            .downcast::<CacheTable<X>>()
            .map_err(|_| CacheError::IdentityConflict {
                identity: source.identity().to_string(),
            })
    }

    /// Shorthand for `self.table(source)?.query(operation, params)`.
    pub fn query<X: Executor>(
        &self,
        source: &CacheSource<X>,
        operation: &str,
        params: &[Param],
    ) -> Result<Outcome<X::Output, X::Error>, CacheError> {
        self.table(source)?.query(operation, params)
    }

    pub fn table_count(&self) -> usize {
        self.inner.tables.len()
    }

    /// End the domain, releasing its tables once no other clone is alive.
    pub fn end(self) {
        debug!(
            domain = %self.inner.id,
            tables = self.inner.tables.len(),
            "query cache domain ended"
        );
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.inner.id)
            .field("date_mode", &self.inner.config.date_mode)
            .field("tables", &self.inner.tables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;
    use futures::future::{self, BoxFuture};
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("never fails")]
    struct Never;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Executor for Counting {
        type Output = ();
        type Error = Never;

        fn execute(
            &self,
            _operation: &str,
            _params: &[Param],
        ) -> BoxFuture<'static, Result<(), Never>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            future::ready(Ok(())).boxed()
        }
    }

    #[test]
    fn same_source_returns_the_same_table() {
        let domain = begin_domain(DateMode::Utc);
        let source = CacheSource::new("notes", Counting::default());

        let first = domain.table(&source).unwrap();
        let second = domain.table(&source.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(domain.table_count(), 1);
    }

    #[test]
    fn distinct_sources_get_distinct_tables() {
        let domain = begin_domain(DateMode::Utc);
        let executor = Arc::new(Counting::default());
        let left = CacheSource::from_arc("left", Arc::clone(&executor));
        let right = CacheSource::from_arc("right", executor);

        assert_ne!(left.identity(), right.identity());
        let left_table = domain.table(&left).unwrap();
        let right_table = domain.table(&right).unwrap();
        assert!(!Arc::ptr_eq(&left_table, &right_table));
        assert_eq!(domain.table_count(), 2);
    }

    #[test]
    fn tables_inherit_the_domain_date_mode() {
        let domain = begin_domain(DateMode::Local(chrono_tz::Asia::Tokyo));
        let source = CacheSource::new("notes", Counting::default());
        let table = domain.table(&source).unwrap();
        assert_eq!(table.date_mode(), DateMode::Local(chrono_tz::Asia::Tokyo));
    }

    #[test]
    fn domains_do_not_share_records() {
        let source = CacheSource::new("notes", Counting::default());
        let first = begin_domain(DateMode::Utc);
        let second = begin_domain(DateMode::Utc);

        first.query(&source, "get-note", &[Param::Int(5)]).unwrap();
        second.query(&source, "get-note", &[Param::Int(5)]).unwrap();
        first.query(&source, "get-note", &[Param::Int(5)]).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(source.executor().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn ending_a_domain_releases_its_tables() {
        let domain = begin_domain(DateMode::Utc);
        let source = CacheSource::new("notes", Counting::default());
        let table = domain.table(&source).unwrap();
        assert_eq!(Arc::strong_count(&table), 2);

        domain.end();
        assert_eq!(Arc::strong_count(&table), 1);
    }

    #[test]
    fn identity_displays_label_and_id() {
        let source = CacheSource::new("notes", Counting::default());
        let shown = source.identity().to_string();
        assert!(shown.starts_with("notes#"));
        assert_eq!(source.identity().label(), "notes");
    }
}
