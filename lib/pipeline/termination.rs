use std::fmt;

use tracing::info;

use super::squasher::{SquashError, Squasher};
use crate::block::Ranges;

pub const PARTIALS_WRITTEN_TRAILER: &str = "partials-written";

/// Graceful ways for a run to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every job up to the requested target block completed.
    StopBlockReached,
    /// Nothing was left to compute.
    EndOfInput,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Termination::StopBlockReached => "stop_block_reached",
            Termination::EndOfInput => "end_of_input",
        }
    }
}

/// End-of-stream metadata handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub key: &'static str,
    pub value: String,
}

impl Trailer {
    pub fn partials_written(ranges: &Ranges) -> Self {
        Self {
            key: PARTIALS_WRITTEN_TRAILER,
            value: ranges.to_string(),
        }
    }
}

impl fmt::Display for Trailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnd {
    pub termination: Termination,
    pub trailer: Trailer,
}

/// Settles a finished run. Graceful terminations flush the squasher and yield the
/// partials-written trailer; any other outcome is passed through untouched.
pub async fn on_stream_terminated<E>(
    outcome: Result<Termination, E>,
    squasher: &mut Squasher,
    partials_written: &Ranges,
) -> Result<StreamEnd, E>
where
    E: From<SquashError>,
{
    let termination = outcome?;
    let squashed = squasher.squash_all().await?;

    let mut written = partials_written.clone();
    written.sort();
    let trailer = Trailer::partials_written(&written);
    info!(
        event = "stream_terminated",
        termination = termination.as_str(),
        squashed = squashed.len(),
        partials_written = written.len(),
        "stream ended"
    );
    Ok(StreamEnd {
        termination,
        trailer,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::block::Range;
    use crate::storage::{FileInfo, FileKind, MemoryObjectStore, ObjectStore, StoreStorageState};
    use crate::store::{Store, UpdatePolicy, ValueType};

    #[derive(Debug)]
    enum RunError {
        Squash,
        Io(&'static str),
    }

    impl From<SquashError> for RunError {
        fn from(_: SquashError) -> Self {
            RunError::Squash
        }
    }

    fn ranges(expr: &str) -> Ranges {
        expr.parse().expect("fixture ranges")
    }

    #[test]
    fn trailer_joins_ranges_with_commas() {
        let trailer = Trailer::partials_written(&ranges("10-20,20-30"));
        assert_eq!(trailer.key, "partials-written");
        assert_eq!(trailer.value, "10-20,20-30");
        assert_eq!(trailer.to_string(), "partials-written: 10-20,20-30");
        assert_eq!(Trailer::partials_written(&Ranges::new()).value, "");
    }

    #[tokio::test]
    async fn graceful_end_flushes_squasher_and_sorts_trailer() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let partial = Store::new("totals", ValueType::Int64, UpdatePolicy::Add);
        object_store
            .put(
                &FileInfo::new("0-10".parse().expect("range"), FileKind::Partial).path("totals"),
                partial.to_bytes().expect("encode"),
            )
            .await
            .expect("seed partial");

        let mut squasher = Squasher::new(object_store.clone());
        squasher.register(
            ValueType::Int64,
            UpdatePolicy::Add,
            &StoreStorageState {
                module_name: "totals".to_string(),
                module_initial_block: 0,
                last_completed_range: None,
                missing_completed_ranges: Ranges::new(),
                partials_missing: Ranges::new(),
                partials_present: ranges("0-10"),
            },
        );

        let end = on_stream_terminated::<RunError>(
            Ok(Termination::StopBlockReached),
            &mut squasher,
            &ranges("20-30,0-10"),
        )
        .await
        .expect("graceful end");

        assert_eq!(end.termination, Termination::StopBlockReached);
        assert_eq!(end.trailer.value, "0-10,20-30");
        assert_eq!(squasher.squashed_up_to("totals"), Some(10));
        let complete = Range::new(0, 10).expect("range");
        assert!(object_store
            .keys()
            .contains(&FileInfo::new(complete, FileKind::Complete).path("totals")));
    }

    #[tokio::test]
    async fn errors_pass_through_without_flushing() {
        let object_store = Arc::new(MemoryObjectStore::new());
        let mut squasher = Squasher::new(object_store.clone());
        let err = on_stream_terminated(Err(RunError::Io("connection reset")), &mut squasher, &Ranges::new())
            .await
            .expect_err("error propagates");
        match err {
            RunError::Io(reason) => assert_eq!(reason, "connection reset"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(object_store.keys().is_empty());
    }
}
