use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One recurring poll job of a stream.
#[derive(Debug)]
pub struct PollingJob {
    pub generation: u64,
    pub cancel: CancellationToken,
    pub handle: Option<JoinHandle<()>>,
}

/// Handed out by [`PollingRegistry::claim`]; identifies the job a cycle runs
/// for so results of a stopped job can be told apart from a newer one.
#[derive(Clone, Debug)]
pub struct Ticket {
    pub stream_id: Uuid,
    pub generation: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryState {
    jobs: HashMap<Uuid, PollingJob>,
    next_generation: u64,
}

/// Polling jobs of one platform, keyed by stream. Owned by its scheduler.
#[derive(Clone, Debug, Default)]
pub struct PollingRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl PollingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job for `stream_id`. Returns `None` if one already exists.
    pub fn claim(&self, stream_id: Uuid) -> Option<Ticket> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&stream_id) {
            return None;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        let cancel = CancellationToken::new();
        state.jobs.insert(
            stream_id,
            PollingJob {
                generation,
                cancel: cancel.clone(),
                handle: None,
            },
        );

        Some(Ticket {
            stream_id,
            generation,
            cancel,
        })
    }

    /// Stores the task driving the job. Returns `false` when the job was
    /// removed in the meantime.
    pub fn attach(&self, ticket: &Ticket, handle: JoinHandle<()>) -> bool {
        let mut state = self.state.lock();
        match state.jobs.get_mut(&ticket.stream_id) {
            Some(job) if job.generation == ticket.generation => {
                job.handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Removes and cancels the job of `stream_id`.
    pub fn remove(&self, stream_id: Uuid) -> Option<PollingJob> {
        let job = self.state.lock().jobs.remove(&stream_id)?;
        job.cancel.cancel();
        Some(job)
    }

    /// Runs `f` under the registry lock if the ticket's job is still the
    /// active one, so nothing a stopped job computed is published after its
    /// removal.
    pub fn with_active<R>(&self, ticket: &Ticket, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.lock();
        let active = state
            .jobs
            .get(&ticket.stream_id)
            .is_some_and(|job| job.generation == ticket.generation);
        active.then(f)
    }

    pub fn contains(&self, stream_id: Uuid) -> bool {
        self.state.lock().jobs.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and cancels every job.
    pub fn drain(&self) -> Vec<PollingJob> {
        let jobs = self
            .state
            .lock()
            .jobs
            .drain()
            .map(|(_, job)| job)
            .collect::<Vec<_>>();
        for job in &jobs {
            job.cancel.cancel();
        }
        jobs
    }
}
