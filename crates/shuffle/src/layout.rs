use serde::{Deserialize, Serialize};

/// Spill kind of solution-set buckets.
pub const SOLUTION_SET_SPILL: &str = "solution_set";
/// Spill kind of external sort runs.
pub const SORT_SPILL: &str = "sort";

pub fn spill_dir(job_id: u64, partition: u32, kind: &str) -> String {
    format!("spill/{job_id}/{partition}/{kind}")
}

pub fn solution_bucket_path(job_id: u64, partition: u32, bucket: usize, generation: u64) -> String {
    format!(
        "{}/bucket-{bucket}-{generation}.jsonl",
        spill_dir(job_id, partition, SOLUTION_SET_SPILL)
    )
}

pub fn sort_round_dir(job_id: u64, partition: u32, round: u32) -> String {
    format!("{}/round-{round}", spill_dir(job_id, partition, SORT_SPILL))
}

pub fn sort_run_path(job_id: u64, partition: u32, round: u32, run: usize) -> String {
    format!("{}/run-{run}.jsonl", sort_round_dir(job_id, partition, round))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillRunMeta {
    pub file: String,
    pub records: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_scoped_by_job_partition_and_kind() {
        assert_eq!(
            solution_bucket_path(7, 2, 13, 1),
            "spill/7/2/solution_set/bucket-13-1.jsonl"
        );
        assert_eq!(sort_run_path(7, 2, 4, 0), "spill/7/2/sort/round-4/run-0.jsonl");
    }
}
