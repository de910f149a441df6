//! Reconciles cached artifacts against the block a request must reach.
//!
//! For a store module with save interval `I`, initial block `B0` and target `T`:
//! the furthest complete snapshot ending at or before `T` seeds the module, every
//! `I`-aligned window between its end (or `B0`) and `T` is either already covered by a
//! partial snapshot or must be produced by a job. Map modules reconcile their output
//! segments the same way, without complete snapshots.

use std::cmp::max;

use tracing::debug;

use super::snapshots::{load_map_outputs, load_store_snapshots, Snapshots};
use super::{ObjectStore, StorageError};
use crate::block::{Range, Ranges};

/// Cached-work summary for a store module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStorageState {
    pub module_name: String,
    pub module_initial_block: u64,
    pub last_completed_range: Option<Range>,
    /// Interval-aligned complete snapshots absent between `module_initial_block` and
    /// `last_completed_range`, furthest first. Informational: squashing never needs them.
    pub missing_completed_ranges: Ranges,
    pub partials_missing: Ranges,
    pub partials_present: Ranges,
}

impl StoreStorageState {
    pub fn new(
        module_name: impl Into<String>,
        save_interval: u64,
        module_initial_block: u64,
        work_up_to_block: u64,
        snapshots: &Snapshots,
    ) -> Result<Self, StorageError> {
        let mut out = StoreStorageState {
            module_name: module_name.into(),
            module_initial_block,
            last_completed_range: None,
            missing_completed_ranges: Ranges::new(),
            partials_missing: Ranges::new(),
            partials_present: Ranges::new(),
        };
        if work_up_to_block <= module_initial_block {
            return Ok(out);
        }

        let last_complete = snapshots.last_complete_before(work_up_to_block);
        if let Some(complete) = last_complete {
            if complete.exclusive_end_block() <= module_initial_block {
                return Err(StorageError::Consistency {
                    module: out.module_name,
                    range: complete,
                    initial_block: module_initial_block,
                    reason: "ends at or before the module's initial block",
                });
            }
            if complete.start_block() != module_initial_block {
                return Err(StorageError::Consistency {
                    module: out.module_name,
                    range: complete,
                    initial_block: module_initial_block,
                    reason: "does not start at the module's initial block",
                });
            }
            out.last_completed_range = Some(complete);
            if complete.exclusive_end_block() == work_up_to_block {
                return Ok(out);
            }
            out.missing_completed_ranges =
                missing_completed_ranges(save_interval, module_initial_block, &complete, snapshots)?;
        }

        let parallel_start = max(
            last_complete.map_or(module_initial_block, |range| range.exclusive_end_block()),
            module_initial_block,
        );
        let todo = Range::new(parallel_start, work_up_to_block)?;
        for window in todo.split(save_interval)? {
            if snapshots.partials.contains_range(&window) {
                out.partials_present.push(window);
            } else {
                out.partials_missing.push(window);
            }
        }

        debug!(
            event = "store_storage_state_computed",
            module = %out.module_name,
            initial_range = %out
                .last_completed_range
                .map_or_else(|| "None".to_string(), |range| range.to_string()),
            partials_missing = out.partials_missing.len(),
            partials_present = out.partials_present.len(),
            missing_completed_ranges = %out.missing_completed_ranges,
            "reconciled store snapshots"
        );
        Ok(out)
    }

    /// Missing partial windows bucketed into job-sized requests.
    pub fn batch_requests(&self, subrequest_split_size: u64) -> Ranges {
        self.partials_missing.merged_buckets(subrequest_split_size)
    }

    /// Ranges already available, reported to clients as progress before any job runs.
    pub fn initial_progress_ranges(&self) -> Ranges {
        let mut out = Ranges::new();
        if let Some(complete) = self.last_completed_range {
            out.push(complete);
        }
        for range in &self.partials_present {
            out.push(*range);
        }
        out.sort();
        out.merged()
    }

    /// Block up to which the module can be loaded without running any job.
    pub fn ready_up_to_block(&self) -> u64 {
        self.last_completed_range
            .map_or(self.module_initial_block, |range| range.exclusive_end_block())
    }
}

/// Interval boundaries `b` with `initial_block < b < complete.end` lacking a complete
/// snapshot `[initial_block, b)`, reported furthest first.
fn missing_completed_ranges(
    save_interval: u64,
    initial_block: u64,
    complete: &Range,
    snapshots: &Snapshots,
) -> Result<Ranges, StorageError> {
    if save_interval == 0 {
        return Err(crate::block::RangeError::ZeroInterval.into());
    }

    let mut out = Ranges::new();
    let mut boundary = (complete.exclusive_end_block() - 1) / save_interval * save_interval;
    while boundary > initial_block {
        if !snapshots.has_complete(initial_block, boundary) {
            out.push(Range::new(initial_block, boundary)?);
        }
        boundary -= save_interval;
    }
    Ok(out)
}

/// Cached-work summary for a map module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapStorageState {
    pub module_name: String,
    pub module_initial_block: u64,
    pub segments_present: Ranges,
    pub segments_missing: Ranges,
}

impl MapStorageState {
    pub fn new(
        module_name: impl Into<String>,
        save_interval: u64,
        module_initial_block: u64,
        work_up_to_block: u64,
        outputs: &Ranges,
    ) -> Result<Self, StorageError> {
        let mut out = MapStorageState {
            module_name: module_name.into(),
            module_initial_block,
            segments_present: Ranges::new(),
            segments_missing: Ranges::new(),
        };
        if work_up_to_block <= module_initial_block {
            return Ok(out);
        }

        for window in Range::new(module_initial_block, work_up_to_block)?.split(save_interval)? {
            if outputs.contains_range(&window) {
                out.segments_present.push(window);
            } else {
                out.segments_missing.push(window);
            }
        }
        Ok(out)
    }

    pub fn batch_requests(&self, subrequest_split_size: u64) -> Ranges {
        self.segments_missing.merged_buckets(subrequest_split_size)
    }

    pub fn initial_progress_ranges(&self) -> Ranges {
        self.segments_present.merged()
    }

    /// End of the leading run of present segments.
    pub fn ready_up_to_block(&self) -> u64 {
        let mut ready = self.module_initial_block;
        for segment in &self.segments_present {
            if segment.start_block() != ready {
                break;
            }
            ready = segment.exclusive_end_block();
        }
        ready
    }
}

/// Per-module reconciliation result consumed by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStorageState {
    Store(StoreStorageState),
    Map(MapStorageState),
}

impl ModuleStorageState {
    pub fn name(&self) -> &str {
        match self {
            ModuleStorageState::Store(state) => &state.module_name,
            ModuleStorageState::Map(state) => &state.module_name,
        }
    }

    /// Interval-aligned windows that still need a job.
    pub fn missing(&self) -> &Ranges {
        match self {
            ModuleStorageState::Store(state) => &state.partials_missing,
            ModuleStorageState::Map(state) => &state.segments_missing,
        }
    }

    pub fn batch_requests(&self, subrequest_split_size: u64) -> Ranges {
        match self {
            ModuleStorageState::Store(state) => state.batch_requests(subrequest_split_size),
            ModuleStorageState::Map(state) => state.batch_requests(subrequest_split_size),
        }
    }

    pub fn initial_progress_ranges(&self) -> Ranges {
        match self {
            ModuleStorageState::Store(state) => state.initial_progress_ranges(),
            ModuleStorageState::Map(state) => state.initial_progress_ranges(),
        }
    }

    pub fn ready_up_to_block(&self) -> u64 {
        match self {
            ModuleStorageState::Store(state) => state.ready_up_to_block(),
            ModuleStorageState::Map(state) => state.ready_up_to_block(),
        }
    }
}

pub async fn fetch_store_state(
    object_store: &dyn ObjectStore,
    module: &str,
    save_interval: u64,
    initial_block: u64,
    work_up_to_block: u64,
) -> Result<StoreStorageState, StorageError> {
    let snapshots = load_store_snapshots(object_store, module).await?;
    StoreStorageState::new(
        module,
        save_interval,
        initial_block,
        work_up_to_block,
        &snapshots,
    )
}

pub async fn fetch_map_state(
    object_store: &dyn ObjectStore,
    module: &str,
    save_interval: u64,
    initial_block: u64,
    work_up_to_block: u64,
) -> Result<MapStorageState, StorageError> {
    let outputs = load_map_outputs(object_store, module).await?;
    MapStorageState::new(
        module,
        save_interval,
        initial_block,
        work_up_to_block,
        &outputs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `"50-60,p70-80"`: bare ranges are complete snapshots, `p` marks partials.
    fn snapshots(listing: &str) -> Snapshots {
        let mut out = Snapshots::default();
        for part in listing.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            match part.strip_prefix('p') {
                Some(partial) => out.partials.push(partial.parse().expect("partial range")),
                None => out.completes.push(part.parse().expect("complete range")),
            }
        }
        out.sort();
        out
    }

    fn rs(expr: &str) -> Ranges {
        expr.parse().expect("fixture ranges should parse")
    }

    #[test]
    fn store_state_table() {
        // (name, interval, init, snapshots, target, last completed, missing, present)
        let cases = [
            ("simple", 10, 50, "", 100, "", "50-60,60-70,70-80,80-90,90-100", ""),
            ("in-bound of interval", 10, 1, "", 11, "", "1-10,10-11", ""),
            ("nothing to work for", 10, 55, "", 55, "", "", ""),
            ("target before module init", 10, 50, "", 10, "", "", ""),
            ("complete at target", 10, 0, "0-20,p20-30", 20, "0-20", "", ""),
            ("10 blocks already processed", 10, 50, "50-60,p70-80", 90, "50-60", "60-70,80-90", "70-80"),
            ("40 blocks already processed", 10, 50, "50-60,p60-70,p70-80", 100, "50-60", "80-90,90-100", "60-70,70-80"),
            ("multiple complete", 10, 50, "50-60,50-70,50-80,p80-90", 100, "50-80", "90-100", "80-90"),
            ("off bounds", 10, 55, "", 92, "", "55-60,60-70,70-80,80-90,90-92", ""),
            ("just above init", 10, 55, "", 60, "", "55-60", ""),
            ("just above init, off bound", 10, 55, "", 59, "", "55-59", ""),
            ("complete ends at target", 10, 55, "55-60,p60-70,p70-80", 60, "55-60", "", ""),
            ("complete past off-bound target", 10, 55, "55-60,p60-70", 59, "", "55-59", ""),
            ("partials reach target", 10, 50, "50-60,p60-70,p70-80,p80-90", 90, "50-60", "", "60-70,70-80,80-90"),
            ("partials reach target, off bound", 10, 50, "50-60,p60-70,p70-80,p80-90", 92, "50-60", "90-92", "60-70,70-80,80-90"),
        ];

        for (name, interval, init, listing, target, last, missing, present) in cases {
            let state = StoreStorageState::new("mod", interval, init, target, &snapshots(listing))
                .unwrap_or_else(|err| panic!("{name}: unexpected error {err}"));
            let want_last = (!last.is_empty()).then(|| last.parse::<Range>().expect("range"));
            assert_eq!(state.last_completed_range, want_last, "{name}: last completed");
            assert_eq!(state.partials_missing.to_string(), rs(missing).to_string(), "{name}: missing");
            assert_eq!(state.partials_present.to_string(), rs(present).to_string(), "{name}: present");
        }
    }

    #[test]
    fn complete_before_initial_block_is_a_consistency_error() {
        let err = StoreStorageState::new("mod", 10, 50, 100, &snapshots("30-40"))
            .expect_err("snapshot predates module");
        match err {
            StorageError::Consistency {
                module,
                range,
                initial_block,
                reason,
            } => {
                assert_eq!(module, "mod");
                assert_eq!(range.to_string(), "30-40");
                assert_eq!(initial_block, 50);
                assert_eq!(reason, "ends at or before the module's initial block");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn complete_not_starting_at_initial_block_is_a_consistency_error() {
        let err = StoreStorageState::new("mod", 10, 50, 100, &snapshots("50-60,60-80"))
            .expect_err("60-80 cannot seed the module");
        assert!(matches!(
            &err,
            StorageError::Consistency { range, reason, .. }
                if range.to_string() == "60-80"
                    && *reason == "does not start at the module's initial block"
        ));
        assert_eq!(
            err.to_string(),
            "module mod: complete snapshot 60-80 does not start at the module's initial block 50"
        );
    }

    #[test]
    fn reconciling_a_satisfied_target_is_idempotent() {
        let state = StoreStorageState::new("mod", 100, 0, 500, &snapshots("0-100,0-500"))
            .expect("reconcile");
        assert_eq!(state.last_completed_range, Some("0-500".parse().expect("range")));
        assert!(state.partials_missing.is_empty());
        assert!(state.missing_completed_ranges.is_empty());
        assert!(state.batch_requests(1_000).is_empty());
    }

    #[test]
    fn missing_completed_ranges_walks_back_from_last_complete() {
        let cases = [
            ("0-100,0-200,0-300,0-500", "0-400"),
            ("0-100,0-200,0-500", "0-400,0-300"),
            ("0-100,0-300,0-500", "0-400,0-200"),
            ("0-100,0-200,0-300,0-400,0-500", ""),
        ];
        for (listing, want) in cases {
            let state = StoreStorageState::new("mod", 100, 0, 600, &snapshots(listing))
                .expect("reconcile");
            assert_eq!(state.missing_completed_ranges.to_string(), want, "completes {listing}");
            assert_eq!(state.partials_missing.to_string(), "500-600");
        }
    }

    #[test]
    fn batch_requests_and_progress() {
        let state = StoreStorageState::new("mod", 10, 50, 130, &snapshots("50-60,p70-80"))
            .expect("reconcile");
        assert_eq!(state.batch_requests(30).to_string(), "60-70,80-110,110-130");
        assert_eq!(state.initial_progress_ranges().to_string(), "50-60,70-80");
        assert_eq!(state.ready_up_to_block(), 60);

        let fresh = StoreStorageState::new("mod", 10, 50, 80, &Snapshots::default())
            .expect("reconcile");
        assert!(fresh.initial_progress_ranges().is_empty());
        assert_eq!(fresh.ready_up_to_block(), 50);
    }

    #[test]
    fn map_state_splits_segments_from_initial_block() {
        let outputs = rs("50-60,70-80");
        let state = MapStorageState::new("map", 10, 50, 95, &outputs).expect("reconcile map");
        assert_eq!(state.segments_present.to_string(), "50-60,70-80");
        assert_eq!(state.segments_missing.to_string(), "60-70,80-90,90-95");
        assert_eq!(state.ready_up_to_block(), 60);

        let module_state = ModuleStorageState::Map(state);
        assert_eq!(module_state.name(), "map");
        assert_eq!(module_state.batch_requests(100).to_string(), "60-70,80-95");
    }

    #[tokio::test]
    async fn fetch_store_state_reads_listing() {
        let store = crate::storage::MemoryObjectStore::new();
        for key in [
            "mod/states/0000000050-0000000060.kv",
            "mod/states/0000000070-0000000080.partial",
        ] {
            store.put(key, Vec::new()).await.expect("seed key");
        }

        let state = fetch_store_state(&store, "mod", 10, 50, 90).await.expect("fetch state");
        assert_eq!(state.partials_missing.to_string(), "60-70,80-90");
        assert_eq!(state.partials_present.to_string(), "70-80");
    }
}
