use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Registry entry for one destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// A start call is in flight; no job id yet.
    Starting,
    Active(String),
    /// A stop call for this job is in flight.
    Stopping(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum StopConflict {
    /// Another start or stop owns the destination right now.
    Busy,
    NoActiveJob,
}

/// In-process map of destination id to its current egress job.
///
/// Every transition goes through a reservation taken under the lock, so two
/// callers can never both create (or both stop) a job for one destination.
#[derive(Clone, Debug, Default)]
pub struct EgressRegistry {
    slots: Arc<Mutex<HashMap<Uuid, Slot>>>,
}

impl EgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `destination_id` for a start. Returns `None` while any job or
    /// operation is registered for it.
    pub fn reserve_start(&self, destination_id: Uuid) -> Option<StartReservation> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&destination_id) {
            return None;
        }
        slots.insert(destination_id, Slot::Starting);

        Some(StartReservation {
            registry: self.clone(),
            destination_id,
            committed: false,
        })
    }

    /// Claims the active job of `destination_id` for a stop.
    ///
    /// `persisted_job_id` is consulted only when the registry has no entry,
    /// which is the case after a restart.
    pub fn reserve_stop(
        &self,
        destination_id: Uuid,
        persisted_job_id: Option<&str>,
    ) -> Result<StopReservation, StopConflict> {
        let mut slots = self.slots.lock();
        let job_id = match slots.get(&destination_id) {
            Some(Slot::Active(job_id)) => job_id.clone(),
            Some(Slot::Starting | Slot::Stopping(_)) => return Err(StopConflict::Busy),
            None => persisted_job_id
                .map(str::to_owned)
                .ok_or(StopConflict::NoActiveJob)?,
        };
        slots.insert(destination_id, Slot::Stopping(job_id.clone()));

        Ok(StopReservation {
            registry: self.clone(),
            destination_id,
            job_id,
            completed: false,
        })
    }

    pub fn slot(&self, destination_id: Uuid) -> Option<Slot> {
        self.slots.lock().get(&destination_id).cloned()
    }

    /// Job id known in-process for the destination, if any.
    pub fn active_job(&self, destination_id: Uuid) -> Option<String> {
        match self.slots.lock().get(&destination_id)? {
            Slot::Active(job_id) | Slot::Stopping(job_id) => Some(job_id.clone()),
            Slot::Starting => None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    /// Frees the destination if `job_id` is its idle active job, or if
    /// nothing is registered. Fails while any operation is in flight.
    pub fn release_ended(&self, destination_id: Uuid, job_id: &str) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(&destination_id) {
            None => true,
            Some(Slot::Active(active)) if active == job_id => {
                slots.remove(&destination_id);
                true
            }
            Some(_) => false,
        }
    }

    /// Drops whatever is registered for the destination.
    pub fn forget(&self, destination_id: Uuid) {
        self.slots.lock().remove(&destination_id);
    }
}

/// Pending start. Dropping it without [`commit`](Self::commit) frees the slot.
#[must_use]
#[derive(Debug)]
pub struct StartReservation {
    registry: EgressRegistry,
    destination_id: Uuid,
    committed: bool,
}

impl StartReservation {
    pub fn commit(mut self, job_id: String) {
        self.registry
            .slots
            .lock()
            .insert(self.destination_id, Slot::Active(job_id));
        self.committed = true;
    }
}

impl Drop for StartReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots.lock();
        if slots.get(&self.destination_id) == Some(&Slot::Starting) {
            slots.remove(&self.destination_id);
        }
    }
}

/// Pending stop. Dropping it without [`complete`](Self::complete) puts the
/// job back as active so the stop can be retried.
#[must_use]
#[derive(Debug)]
pub struct StopReservation {
    registry: EgressRegistry,
    destination_id: Uuid,
    job_id: String,
    completed: bool,
}

impl StopReservation {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn complete(mut self) {
        self.registry.slots.lock().remove(&self.destination_id);
        self.completed = true;
    }
}

impl Drop for StopReservation {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut slots = self.registry.slots.lock();
        if matches!(slots.get(&self.destination_id), Some(Slot::Stopping(_))) {
            slots.insert(
                self.destination_id,
                Slot::Active(std::mem::take(&mut self.job_id)),
            );
        }
    }
}
