use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use kaspa_consensus_core::block::Block;
use kaspa_consensus_core::header::Header;
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;

use super::constants::MAX_JOBS;
use super::hasher::KaspaDiff;
use super::stratum_context::StratumContext;

/// A block template pinned to a job slot, as handed to the miner in `mining.notify`.
#[derive(Clone)]
pub struct Job {
    pub block: Block,
    /// Pre-PoW header digest (timestamp/nonce zeroed) computed when the job was created.
    pub pre_pow_hash: kaspa_hashes::Hash,
    /// The full monotonic job id this job was stored under. `add_job` overwrites
    /// whatever value is passed in here with the id it actually assigns; callers
    /// construct `Job` with `counter: 0` as a placeholder.
    pub counter: u64,
}

/// Per-connection mining state: the job ring, current stratum difficulty and
/// template bookkeeping needed to validate a submitted share.
///
/// One instance is created per accepted connection and lives in `StratumContext::state`.
pub struct MiningState {
    jobs: Mutex<HashMap<u64, Job>>,
    job_counter: AtomicU64,
    last_header: Mutex<Option<Header>>,
    big_diff: Mutex<BigUint>,
    stratum_diff: Mutex<Option<KaspaDiff>>,
    initialized: AtomicBool,
    use_big_job: AtomicBool,
    connect_time: Instant,
}

impl MiningState {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            job_counter: AtomicU64::new(0),
            last_header: Mutex::new(None),
            big_diff: Mutex::new(BigUint::zero()),
            stratum_diff: Mutex::new(None),
            initialized: AtomicBool::new(false),
            use_big_job: AtomicBool::new(false),
            connect_time: Instant::now(),
        }
    }

    pub fn max_jobs(&self) -> u32 {
        MAX_JOBS as u32
    }

    /// Store a job at the next ring slot and return the full monotonic job id.
    ///
    /// The slot the job is stored at is `counter mod MAX_JOBS`; the id handed
    /// back to the miner (and expected again in `mining.submit`) is the
    /// un-modded counter, matching the write side's wraparound.
    pub fn add_job(&self, mut job: Job) -> u64 {
        let counter = self.job_counter.fetch_add(1, Ordering::AcqRel) + 1;
        job.counter = counter;
        let idx = counter % MAX_JOBS;
        self.jobs.lock().insert(idx, job);
        counter
    }

    /// Look up a job by the id the miner submitted.
    ///
    /// The slot is found via `id mod MAX_JOBS`, but the slot alone isn't enough:
    /// once more than `MAX_JOBS` jobs have been issued, a slot gets reused by a
    /// newer job. The requested id must also match the stored job's own counter
    /// for the lookup to count as a hit; otherwise the id is stale and this
    /// returns `None` even though the slot is occupied.
    pub fn get_job(&self, id: u64) -> Option<Job> {
        let job = self.jobs.lock().get(&(id % MAX_JOBS)).cloned()?;
        if job.counter == id { Some(job) } else { None }
    }

    pub fn current_job_counter(&self) -> u64 {
        self.job_counter.load(Ordering::Acquire)
    }

    pub fn get_stored_job_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.jobs.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_last_header(&self) -> Option<Header> {
        self.last_header.lock().clone()
    }

    pub fn set_last_header(&self, header: Header) {
        *self.last_header.lock() = Some(header);
    }

    pub fn big_diff(&self) -> BigUint {
        self.big_diff.lock().clone()
    }

    pub fn set_big_diff(&self, diff: BigUint) {
        *self.big_diff.lock() = diff;
    }

    pub fn stratum_diff(&self) -> Option<KaspaDiff> {
        self.stratum_diff.lock().clone()
    }

    pub fn set_stratum_diff(&self, diff: KaspaDiff) {
        *self.stratum_diff.lock() = Some(diff);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub fn use_big_job(&self) -> bool {
        self.use_big_job.load(Ordering::Acquire)
    }

    pub fn set_use_big_job(&self, value: bool) {
        self.use_big_job.store(value, Ordering::Release);
    }

    pub fn connect_time(&self) -> Instant {
        self.connect_time
    }
}

impl Default for MiningState {
    fn default() -> Self {
        Self::new()
    }
}

/// Accessor mirroring the upstream Go bridge's `GetMiningState(ctx)` helper.
#[allow(non_snake_case)]
pub fn GetMiningState(ctx: &Arc<StratumContext>) -> Arc<MiningState> {
    ctx.state.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_jobs_and_is_uninitialized() {
        let state = MiningState::new();
        assert_eq!(state.current_job_counter(), 0);
        assert!(state.get_stored_job_ids().is_empty());
        assert!(!state.is_initialized());
        assert!(!state.use_big_job());
        assert!(state.stratum_diff().is_none());
        assert_eq!(state.max_jobs(), MAX_JOBS as u32);
    }

    #[test]
    fn flags_and_diff_round_trip() {
        let state = MiningState::new();
        state.set_initialized(true);
        state.set_use_big_job(true);
        assert!(state.is_initialized());
        assert!(state.use_big_job());

        let mut diff = KaspaDiff::new();
        diff.set_diff_value(4096.0);
        state.set_stratum_diff(diff.clone());
        assert_eq!(state.stratum_diff().unwrap().diff_value, diff.diff_value);

        let big = BigUint::from(123_456_789u64);
        state.set_big_diff(big.clone());
        assert_eq!(state.big_diff(), big);
    }

    #[test]
    fn get_job_on_empty_ring_is_a_miss() {
        let state = MiningState::new();
        assert!(state.get_job(0).is_none());
        assert!(state.get_job(MAX_JOBS).is_none());
    }

    fn dummy_job() -> Job {
        let block = Block::from_arcs(Arc::new(Header::default()), Arc::new(Vec::new()));
        Job { block, pre_pow_hash: kaspa_hashes::Hash::default(), counter: 0 }
    }

    #[test]
    fn get_job_rejects_stale_id_whose_slot_was_overwritten() {
        let state = MiningState::new();

        // Fill the ring exactly once: job ids 1..=MAX_JOBS.
        for _ in 0..MAX_JOBS {
            state.add_job(dummy_job());
        }

        // Job id 1 occupies slot (1 % MAX_JOBS) == 1.
        assert!(state.get_job(1).is_some());

        // One more round overwrites every slot, including slot 1 (now holding
        // job id MAX_JOBS + 1). The old id 1 must now be reported as a miss,
        // not silently matched against the job that replaced it.
        for _ in 0..MAX_JOBS {
            state.add_job(dummy_job());
        }

        assert!(state.get_job(1).is_none());
        assert_eq!(state.get_job(MAX_JOBS + 1).unwrap().counter, MAX_JOBS + 1);
    }
}
