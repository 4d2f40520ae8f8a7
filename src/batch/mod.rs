mod planner;

pub use planner::{plan, PartitionError, PlannedBatch};
