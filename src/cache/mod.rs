//! Request-scoped query cache.
//!
//! Lets a synchronous pass (a render) read the result of an asynchronous
//! query as if it were synchronous:
//!
//! - a [`Domain`] is one cache lifetime and owns one [`CacheTable`] per
//!   [`CacheSource`] used within it;
//! - a table maps `(operation, params…)` to a computation record, running the
//!   source's [`Executor`] at most once per distinct key;
//! - reads return [`Outcome::Suspend`] while the record is pending, and
//!   [`resolve`] re-runs a pass once the pending handle settles.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! date_mode = "utc"        # or "local"
//! timezone = "UTC"         # IANA zone used by "local"
//! spawn_executors = true
//! max_passes = 64
//! ```

mod config;
mod consumer;
mod error;
mod keys;
mod lock;
mod reader;
mod record;
mod registry;
mod table;

pub use config::CacheConfig;
pub use consumer::{Interrupt, ResolveError, resolve};
pub use error::CacheError;
pub use keys::{DateMode, KeyEncoder, KeyToken, NumericKind, NumericView, Param, ParamHook};
pub use reader::{Outcome, read};
pub use record::{ComputationRecord, ExecutionError, PendingHandle, RecordStatus};
pub use registry::{CacheIdentity, CacheSource, Domain, begin_domain};
pub use table::{CacheTable, Executor, Lookup, Record};
