//! Post-job handling of store output: squashing partials into complete snapshots and
//! settling the end of a run.

mod squasher;
mod termination;

pub use squasher::{SquashError, Squasher};
pub use termination::{
    on_stream_terminated, StreamEnd, Termination, Trailer, PARTIALS_WRITTEN_TRAILER,
};
