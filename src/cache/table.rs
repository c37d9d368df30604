//! Arity-checked key trie mapping `(operation, params…)` to computation records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use metrics::counter;
use tracing::{debug, trace};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{DateMode, KeyEncoder, KeyToken, Param};
use super::lock::mutex_lock;
use super::reader::{Outcome, read};
use super::record::ComputationRecord;

const SOURCE: &str = "cache::table";

/// The asynchronous data source behind a cache table.
///
/// `execute` must only build the future; it runs while the table is locked
/// and must not query the same table re-entrantly.
pub trait Executor: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn execute(
        &self,
        operation: &str,
        params: &[Param],
    ) -> BoxFuture<'static, Result<Self::Output, Self::Error>>;
}

pub type Record<X> = ComputationRecord<<X as Executor>::Output, <X as Executor>::Error>;

/// Result of [`CacheTable::lookup_or_create`].
#[derive(Debug)]
pub enum Lookup<R> {
    /// A record already existed at this key path.
    Hit(Arc<R>),
    /// The record was just created and its executor triggered.
    Miss(Arc<R>),
}

impl<R> Lookup<R> {
    pub fn record(&self) -> &Arc<R> {
        match self {
            Self::Hit(record) | Self::Miss(record) => record,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss(_))
    }
}

enum Node<R> {
    Leaf(Arc<R>),
    Branch(HashMap<KeyToken, Node<R>>),
}

impl<R> Node<R> {
    fn record_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Branch(children) => children.values().map(Node::record_count).sum(),
        }
    }
}

/// Cache table for one domain and one cache identity.
///
/// The operation identifier is the first trie level and each encoded
/// parameter one more level below it. A single lock serializes lookups, so
/// each distinct key path triggers its executor at most once.
pub struct CacheTable<X: Executor> {
    executor: Arc<X>,
    date_mode: DateMode,
    spawn_executors: bool,
    root: Mutex<Node<Record<X>>>,
}

impl<X: Executor> CacheTable<X> {
    pub fn new(executor: Arc<X>, config: &CacheConfig) -> Self {
        Self {
            executor,
            date_mode: config.date_mode,
            spawn_executors: config.spawn_executors,
            root: Mutex::new(Node::Branch(HashMap::new())),
        }
    }

    pub fn date_mode(&self) -> DateMode {
        self.date_mode
    }

    /// Read the cached result of `operation` with `params`, triggering the
    /// executor on first use.
    pub fn query(
        &self,
        operation: &str,
        params: &[Param],
    ) -> Result<Outcome<X::Output, X::Error>, CacheError> {
        let lookup = self.lookup_or_create(operation, params)?;
        Ok(read(lookup.record()))
    }

    /// Like [`query`](Self::query) for callers holding an untyped parameter
    /// list; anything other than an array is rejected before the trie is touched.
    pub fn query_dynamic(
        &self,
        operation: &str,
        params: Option<&Param>,
    ) -> Result<Outcome<X::Output, X::Error>, CacheError> {
        match params {
            None => self.query(operation, &[]),
            Some(Param::Array(items)) => self.query(operation, items),
            Some(other) => Err(CacheError::invalid_parameter_list(other.kind_name())),
        }
    }

    pub fn lookup_or_create(
        &self,
        operation: &str,
        params: &[Param],
    ) -> Result<Lookup<Record<X>>, CacheError> {
        let mut encoder = KeyEncoder::new(self.date_mode);
        let mut path = Vec::with_capacity(params.len() + 1);
        path.push(KeyToken::Text(operation.to_owned()));
        for param in params {
            path.push(encoder.encode(param)?);
        }

        let mut root = mutex_lock(&self.root, SOURCE, "lookup_or_create");
        if let Some(record) = find(&*root, &path, operation)? {
            counter!("notes_cache_query_hit_total").increment(1);
            trace!(operation, arity = params.len(), "query cache hit");
            return Ok(Lookup::Hit(record));
        }

        // The trie is only touched once the executor has produced its future.
        let record = self.start(operation, params);
        insert(&mut *root, path, Arc::clone(&record));
        Ok(Lookup::Miss(record))
    }

    /// Number of records stored across every operation.
    pub fn record_count(&self) -> usize {
        mutex_lock(&self.root, SOURCE, "record_count").record_count()
    }

    fn start(&self, operation: &str, params: &[Param]) -> Arc<Record<X>> {
        counter!("notes_cache_query_miss_total").increment(1);
        debug!(operation, arity = params.len(), "query cache miss, executor triggered");

        let record = ComputationRecord::start(self.executor.execute(operation, params));
        if self.spawn_executors {
            if let (Ok(runtime), Some(handle)) = (
                tokio::runtime::Handle::try_current(),
                record.pending_handle(),
            ) {
                runtime.spawn(handle);
            }
        }
        record
    }
}

/// Walk `path` without modifying the trie. `None` means no record exists yet.
fn find<R>(
    root: &Node<R>,
    path: &[KeyToken],
    operation: &str,
) -> Result<Option<Arc<R>>, CacheError> {
    let mut node = root;
    for token in path {
        let Node::Branch(children) = node else {
            return Err(CacheError::arity_increased(operation));
        };
        match children.get(token) {
            Some(child) => node = child,
            None => return Ok(None),
        }
    }
    match node {
        Node::Leaf(record) => Ok(Some(Arc::clone(record))),
        Node::Branch(_) => Err(CacheError::arity_decreased(operation)),
    }
}

/// Store `record` at `path`, which [`find`] has already validated.
fn insert<R>(root: &mut Node<R>, path: Vec<KeyToken>, record: Arc<R>) {
    let depth = path.len();
    let mut node = root;
    for (level, token) in path.into_iter().enumerate() {
        let Node::Branch(children) = node else {
            return;
        };
        node = children.entry(token).or_insert_with(|| {
            if level + 1 == depth {
                Node::Leaf(Arc::clone(&record))
            } else {
                Node::Branch(HashMap::new())
            }
        });
    }
}
