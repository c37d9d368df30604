use std::collections::HashMap;

use futures::FutureExt;
use futures::executor::block_on;
use futures::future::{self, BoxFuture};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use notes_query_cache::cache::{CacheConfig, CacheSource, Domain, Executor, Param, resolve};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("odd note id")]
struct OddId;

/// Resolves even ids and rejects odd ones.
struct ParityExecutor;

impl Executor for ParityExecutor {
    type Output = i64;
    type Error = OddId;

    fn execute(
        &self,
        _operation: &str,
        params: &[Param],
    ) -> BoxFuture<'static, Result<i64, OddId>> {
        let id = match params.first() {
            Some(Param::Int(id)) => *id,
            _ => 0,
        };
        future::ready(if id % 2 == 0 { Ok(id) } else { Err(OddId) }).boxed()
    }
}

fn counters(snapshotter: &Snapshotter) -> HashMap<String, u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(composite_key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((composite_key.key().name().to_string(), count)),
            _ => None,
        })
        .collect()
}

#[test]
fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let config = CacheConfig {
            spawn_executors: false,
            ..CacheConfig::default()
        };
        let domain = Domain::begin(&config);
        let source = CacheSource::new("parity", ParityExecutor);

        for id in [2, 2, 4] {
            let value = block_on(resolve(
                || domain.query(&source, "get-note", &[Param::Int(id)])?.into_ready(),
                config.max_passes,
            ))
            .expect("even ids resolve");
            assert_eq!(*value, id);
        }

        let rejected = block_on(resolve(
            || domain.query(&source, "get-note", &[Param::Int(3)])?.into_ready(),
            config.max_passes,
        ));
        assert!(rejected.is_err());
    });

    let counters = counters(&snapshotter);
    let count = |name: &str| counters.get(name).copied().unwrap_or(0);
    assert_eq!(count("notes_cache_domain_begin_total"), 1);
    assert_eq!(count("notes_cache_query_miss_total"), 3);
    assert_eq!(count("notes_cache_query_hit_total"), 4);
    assert_eq!(count("notes_cache_record_resolved_total"), 2);
    assert_eq!(count("notes_cache_record_rejected_total"), 1);
}
