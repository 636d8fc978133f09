//! In-memory conference state store.
//!
//! Maps each conversation to its `ConferenceState`. Records live in a fixed
//! number of shards, each a `RwLock<HashMap<..>>` of independently locked
//! records, so unrelated conversations never contend on the same mutex and
//! the shard lock is only held long enough to find or insert a record.
//!
//! All writes go through [`ConvoStateStore::upsert`] or
//! [`ConvoStateStore::update_existing`], which run a synchronous mutator under
//! the record's mutex. Readers receive owned [`ConvoVideoState`] snapshots.
//!
//! Empty records are evicted by the janitor. An evicted record is marked
//! retired before it leaves the map; a mutator that was already waiting on
//! its mutex sees the flag and re-resolves the conversation.

use crate::errors::ConvoError;
use crate::observability::metrics;
use common::types::{ConversationId, ParticipantId};
use ring::rand::{self, SystemRandom};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, error};

/// Number of shards in the store.
const SHARD_COUNT: usize = 16;

/// Per-participant connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// Join accepted, media connection not yet confirmed.
    Connecting,
    /// Media server confirmed the connection.
    Connected,
}

/// Live entry for a participant that is not ABSENT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    pub state: ParticipantState,
    /// Incremented on every state-changing event for this participant.
    pub sequence: u64,
    /// Sequence embedded in the most recently issued token.
    pub last_token_sequence: u64,
}

/// State of one conversation's conference.
#[derive(Debug)]
pub struct ConferenceState {
    conversation_id: ConversationId,
    capacity: usize,
    epoch: u64,
    pub(crate) participants: HashMap<ParticipantId, ParticipantEntry>,
    /// Highest sequence any participant reached on going ABSENT. Joins start
    /// above it, so a rejoin keeps counting upward without remembering who
    /// left.
    sequence_floor: u64,
    last_activity: Instant,
    retired: bool,
}

impl ConferenceState {
    fn new(conversation_id: ConversationId, capacity: usize, epoch: u64) -> Self {
        Self {
            conversation_id,
            capacity,
            epoch,
            participants: HashMap::new(),
            sequence_floor: 0,
            last_activity: Instant::now(),
            retired: false,
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Random identifier of this record's incarnation.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn participant(&self, participant: &ParticipantId) -> Option<&ParticipantEntry> {
        self.participants.get(participant)
    }

    pub fn participant_mut(
        &mut self,
        participant: &ParticipantId,
    ) -> Option<&mut ParticipantEntry> {
        self.participants.get_mut(participant)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }

    /// Sequence to assign to a participant entering CONNECTING from ABSENT.
    #[must_use]
    pub fn next_join_sequence(&self) -> u64 {
        self.sequence_floor.saturating_add(1)
    }

    /// Insert a CONNECTING entry. The caller has checked capacity.
    pub fn insert_connecting(&mut self, participant: ParticipantId, sequence: u64) {
        self.participants.insert(
            participant,
            ParticipantEntry {
                state: ParticipantState::Connecting,
                sequence,
                last_token_sequence: sequence,
            },
        );
    }

    /// Move a participant to ABSENT, advancing its sequence once more so
    /// tokens minted before the removal can never match again.
    pub fn remove_participant(&mut self, participant: &ParticipantId) -> Option<ParticipantEntry> {
        let entry = self.participants.remove(participant)?;
        self.sequence_floor = self.sequence_floor.max(entry.sequence.saturating_add(1));
        Some(entry)
    }

    /// Owned read view of this conference.
    #[must_use]
    pub fn snapshot(&self) -> ConvoVideoState {
        let mut participants: Vec<ParticipantView> = self
            .participants
            .iter()
            .map(|(id, entry)| ParticipantView {
                participant_id: id.clone(),
                state: entry.state,
            })
            .collect();
        participants.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

        ConvoVideoState {
            conversation_id: self.conversation_id.clone(),
            participants,
        }
    }

    fn is_evictable(&self, idle_ttl: Duration, now: Instant) -> bool {
        self.participants.is_empty() && now.duration_since(self.last_activity) >= idle_ttl
    }
}

/// Participant as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub participant_id: ParticipantId,
    pub state: ParticipantState,
}

/// Snapshot of a conversation's conference. No participants means no active
/// conference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoVideoState {
    pub conversation_id: ConversationId,
    pub participants: Vec<ParticipantView>,
}

impl ConvoVideoState {
    #[must_use]
    pub fn empty(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            participants: Vec::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.participants
            .iter()
            .any(|p| &p.participant_id == participant)
    }
}

type Record = Arc<Mutex<ConferenceState>>;
type Shard = RwLock<HashMap<ConversationId, Record>>;

/// Sharded map from conversation to conference state.
pub struct ConvoStateStore {
    shards: Vec<Shard>,
    capacity: usize,
    max_conferences: usize,
    live: AtomicUsize,
    rng: SystemRandom,
}

impl ConvoStateStore {
    /// Create a store whose conferences admit `capacity` participants and
    /// which holds at most `max_conferences` records.
    #[must_use]
    pub fn new(capacity: usize, max_conferences: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            capacity,
            max_conferences,
            live: AtomicUsize::new(0),
            rng: SystemRandom::new(),
        }
    }

    /// Number of conference records currently held.
    #[must_use]
    pub fn conference_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Snapshot of one conversation. Absent conversations read as empty.
    pub async fn get(&self, conversation_id: &ConversationId) -> ConvoVideoState {
        match self.lookup(conversation_id).await {
            Some(record) => record.lock().await.snapshot(),
            None => ConvoVideoState::empty(conversation_id.clone()),
        }
    }

    /// One snapshot per requested id, in request order.
    pub async fn batch_get(&self, conversation_ids: &[ConversationId]) -> Vec<ConvoVideoState> {
        let mut states = Vec::with_capacity(conversation_ids.len());
        for conversation_id in conversation_ids {
            states.push(self.get(conversation_id).await);
        }
        states
    }

    /// Atomically read-modify-write a conversation, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoError::Storage`] if a new record is needed and the
    /// store is at its conference limit, and [`ConvoError::Internal`] if a
    /// new record's epoch cannot be generated.
    pub async fn upsert<R>(
        &self,
        conversation_id: &ConversationId,
        mutator: impl FnOnce(&mut ConferenceState) -> R,
    ) -> Result<R, ConvoError> {
        let mut guard = loop {
            let record = self.get_or_create(conversation_id).await?;
            let guard = record.lock_owned().await;
            if !guard.retired {
                break guard;
            }
            debug!(target: "convo.store", conversation_id = %conversation_id, "Record retired while waiting, re-resolving");
        };
        Ok(Self::apply(&mut guard, mutator))
    }

    /// Atomically read-modify-write a conversation only if it has a record.
    ///
    /// Returns `None` without calling `mutator` when no record exists.
    pub async fn update_existing<R>(
        &self,
        conversation_id: &ConversationId,
        mutator: impl FnOnce(&mut ConferenceState) -> R,
    ) -> Option<R> {
        let record = self.lookup(conversation_id).await?;
        let mut guard = record.lock_owned().await;
        // A retired record is empty, so there is nothing to update
        if guard.retired {
            return None;
        }
        Some(Self::apply(&mut guard, mutator))
    }

    /// Remove empty conferences idle for at least `idle_ttl`.
    ///
    /// Records whose mutex is held are skipped this round. Returns the
    /// number of records evicted.
    pub async fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        for shard in &self.shards {
            let mut map = shard.write().await;
            map.retain(|_, record| match record.try_lock() {
                Ok(mut state) if state.is_evictable(idle_ttl, now) => {
                    state.retired = true;
                    evicted += 1;
                    false
                }
                _ => true,
            });
        }

        if evicted > 0 {
            self.live.fetch_sub(evicted, Ordering::SeqCst);
            metrics::set_conferences_active(self.conference_count());
        }
        evicted
    }

    fn apply<R>(
        guard: &mut OwnedMutexGuard<ConferenceState>,
        mutator: impl FnOnce(&mut ConferenceState) -> R,
    ) -> R {
        let result = mutator(guard);
        guard.last_activity = Instant::now();
        result
    }

    #[allow(clippy::indexing_slicing)] // index is reduced modulo shards.len()
    fn shard_for(&self, conversation_id: &ConversationId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    async fn lookup(&self, conversation_id: &ConversationId) -> Option<Record> {
        let shard = self.shard_for(conversation_id).read().await;
        shard.get(conversation_id).map(Arc::clone)
    }

    async fn get_or_create(&self, conversation_id: &ConversationId) -> Result<Record, ConvoError> {
        if let Some(record) = self.lookup(conversation_id).await {
            return Ok(record);
        }

        let mut shard = self.shard_for(conversation_id).write().await;
        // Another task may have created it between the read and write lock
        if let Some(record) = shard.get(conversation_id) {
            return Ok(Arc::clone(record));
        }

        let max = self.max_conferences;
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|n| {
                error!(target: "convo.store", live = n, max = max, "Conference limit reached");
                ConvoError::Storage(format!("conference limit {max} reached"))
            })?;

        let epoch = match self.new_epoch() {
            Ok(epoch) => epoch,
            Err(e) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        let record = Arc::new(Mutex::new(ConferenceState::new(
            conversation_id.clone(),
            self.capacity,
            epoch,
        )));
        shard.insert(conversation_id.clone(), Arc::clone(&record));
        metrics::set_conferences_active(self.conference_count());

        debug!(target: "convo.store", conversation_id = %conversation_id, "Created conference record");
        Ok(record)
    }

    fn new_epoch(&self) -> Result<u64, ConvoError> {
        let bytes: [u8; 8] = rand::generate(&self.rng)
            .map_err(|_| {
                error!(target: "convo.store", "CSPRNG failure generating conference epoch");
                ConvoError::Internal
            })?
            .expose();
        Ok(u64::from_be_bytes(bytes))
    }
}
