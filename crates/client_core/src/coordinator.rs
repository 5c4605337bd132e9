//! Optimistic mutation coordination.
//!
//! Every `submit_*` call applies its effect to the [`LocalMirror`] first and
//! returns a [`MutationTicket`]; the remote call then runs on its own task and
//! either confirms the change with the server's entity or rolls it back.
//!
//! Mutations on different identifiers never interact. On the same identifier
//! the newest submission supersedes the pending one: it takes over the pending
//! rollback point instead of capturing a new one, and only the current owner
//! of an identifier's pending record may revert the mirror. A superseded
//! mutation that later succeeds moves that rollback point to what the server
//! confirmed; one that later fails changes nothing.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use shared::{
    domain::{Item, ItemId},
    protocol::{ItemChanges, NewItem},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    error::{MutationError, RemoteError},
    mirror::LocalMirror,
    projection::{project, ViewQuery},
    remote::RemoteStore,
    types::{MutationEvent, MutationKind, PendingMutation},
};

const EVENT_CAPACITY: usize = 256;

/// Handle on a mutation whose remote call is in flight.
///
/// Dropping the ticket does not cancel the mutation.
pub struct MutationTicket<T> {
    kind: MutationKind,
    id: ItemId,
    token: u64,
    coordinator: Arc<MutationCoordinator>,
    handle: JoinHandle<Result<T, MutationError>>,
}

impl<T> MutationTicket<T> {
    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Identifier the mutation was submitted under (temporary for creates).
    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// Waits for the remote call to settle. A task that panicked or was
    /// cancelled is rolled back here, if it still owns its pending record.
    pub async fn outcome(self) -> Result<T, MutationError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    id = %self.id,
                    kind = %self.kind,
                    error = %err,
                    "mutation task did not finish"
                );
                let settlement = {
                    let mut state = self.coordinator.state.lock().await;
                    state.settle(&self.id, self.token, None)
                };
                if matches!(settlement, Settlement::RolledBack) {
                    debug!(id = %self.id, kind = %self.kind, "aborted mutation rolled back");
                }
                Err(MutationError::Aborted {
                    kind: self.kind,
                    id: self.id,
                })
            }
        }
    }
}

struct CoordinatorState {
    mirror: LocalMirror,
    pending: HashMap<ItemId, PendingMutation>,
    next_token: u64,
    /// Bumped whenever a confirmed or reverted value is written to the mirror.
    writes: u64,
    /// Number of `refresh` calls waiting on the remote listing.
    refreshes: usize,
    /// Last write per identifier, kept only while a refresh is in flight.
    written_during_refresh: HashMap<ItemId, u64>,
}

enum Settlement {
    Confirmed,
    RolledBack,
    Superseded,
}

impl CoordinatorState {
    fn reject_pending_create(&self, id: &ItemId) -> Result<(), MutationError> {
        match self.pending.get(id) {
            Some(record) if record.kind == MutationKind::Create => {
                Err(MutationError::CreatePending { id: id.clone() })
            }
            _ => Ok(()),
        }
    }

    /// Installs a pending record for `id`, inheriting the rollback point of
    /// the record it supersedes. Returns the new record's token and the kind
    /// of the superseded mutation, if any.
    fn begin(
        &mut self,
        id: &ItemId,
        kind: MutationKind,
        rollback: Option<Item>,
    ) -> (u64, Option<MutationKind>) {
        self.next_token += 1;
        let token = self.next_token;
        let (rollback, superseded) = match self.pending.remove(id) {
            Some(previous) => (previous.rollback, Some(previous.kind)),
            None => (rollback, None),
        };
        self.pending.insert(
            id.clone(),
            PendingMutation {
                kind,
                rollback,
                token,
            },
        );
        (token, superseded)
    }

    fn note_write(&mut self, id: &ItemId) {
        self.writes += 1;
        if self.refreshes > 0 {
            self.written_during_refresh.insert(id.clone(), self.writes);
        }
    }

    fn begin_refresh(&mut self) -> u64 {
        self.refreshes += 1;
        self.writes
    }

    fn end_refresh(&mut self) {
        self.refreshes = self.refreshes.saturating_sub(1);
        if self.refreshes == 0 {
            self.written_during_refresh.clear();
        }
    }

    /// Whether the listing a refresh started at `since` may overwrite `id`.
    fn keeps_local(&self, id: &ItemId, since: u64) -> bool {
        self.pending.contains_key(id)
            || self
                .written_during_refresh
                .get(id)
                .is_some_and(|written| *written > since)
    }

    /// `confirmed` is the server state after a successful call (the entity,
    /// or `None` once deleted) and is absent when the call failed.
    fn settle(
        &mut self,
        id: &ItemId,
        token: u64,
        confirmed: Option<Option<Item>>,
    ) -> Settlement {
        let owns = self
            .pending
            .get(id)
            .is_some_and(|record| record.token == token);
        if !owns {
            if let (Some(record), Some(state)) = (self.pending.get_mut(id), confirmed) {
                record.rollback = state;
            }
            return Settlement::Superseded;
        }

        let Some(record) = self.pending.remove(id) else {
            return Settlement::Superseded;
        };
        self.note_write(id);
        match confirmed {
            Some(Some(item)) if &item.id == id => {
                self.mirror.apply_confirmed(item);
                Settlement::Confirmed
            }
            Some(Some(item)) => {
                self.note_write(&item.id);
                self.mirror.replace(id, item);
                Settlement::Confirmed
            }
            Some(None) => {
                self.mirror.remove(id);
                Settlement::Confirmed
            }
            None => {
                self.mirror.revert(id, record.rollback);
                Settlement::RolledBack
            }
        }
    }

    fn is_pending_delete(&self, id: &ItemId) -> bool {
        self.pending
            .get(id)
            .is_some_and(|record| record.kind == MutationKind::Delete)
    }
}

pub struct MutationCoordinator {
    remote: Arc<dyn RemoteStore>,
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<MutationEvent>,
}

impl MutationCoordinator {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Arc<Self> {
        Self::with_mirror(remote, LocalMirror::new())
    }

    pub fn with_mirror(remote: Arc<dyn RemoteStore>, mirror: LocalMirror) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            remote,
            state: Mutex::new(CoordinatorState {
                mirror,
                pending: HashMap::new(),
                next_token: 0,
                writes: 0,
                refreshes: 0,
                written_during_refresh: HashMap::new(),
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    /// Pulls the server collection into the mirror. Identifiers with a pending
    /// mutation, or whose mutation settled while the listing was in flight,
    /// keep their local state. Returns the mirror size.
    pub async fn refresh(&self) -> Result<usize, RemoteError> {
        let since = self.state.lock().await.begin_refresh();
        let listing = self.remote.list().await;

        let mut state = self.state.lock().await;
        let refreshed = listing.map(|items| {
            let local: HashSet<ItemId> = state
                .mirror
                .iter()
                .map(|item| item.id.clone())
                .chain(items.iter().map(|item| item.id.clone()))
                .filter(|id| state.keeps_local(id, since))
                .collect();
            state.mirror.reconcile(items, |id| local.contains(id));
            debug!(
                items = state.mirror.len(),
                pending = state.pending.len(),
                "mirror refreshed"
            );
            state.mirror.len()
        });
        state.end_refresh();
        refreshed
    }

    /// Writes an entity the server vouches for. While a mutation is pending on
    /// that identifier the visible entry is left alone and the entity becomes
    /// the rollback point instead. Returns whether anything changed.
    pub async fn apply_confirmed(&self, item: Item) -> bool {
        let mut state = self.state.lock().await;
        if let Some(record) = state.pending.get_mut(&item.id) {
            let changed = record.rollback.as_ref() != Some(&item);
            record.rollback = Some(item);
            return changed;
        }
        state.note_write(&item.id);
        state.mirror.apply_confirmed(item)
    }

    pub async fn items(&self) -> Vec<Item> {
        self.state.lock().await.mirror.to_vec()
    }

    pub async fn item(&self, id: &ItemId) -> Option<Item> {
        self.state.lock().await.mirror.get(id).cloned()
    }

    pub async fn pending_kind(&self, id: &ItemId) -> Option<MutationKind> {
        self.state.lock().await.pending.get(id).map(|record| record.kind)
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn view(&self, query: &ViewQuery) -> Vec<Item> {
        let state = self.state.lock().await;
        project(state.mirror.iter(), |id| state.is_pending_delete(id), query)
    }

    pub async fn submit_create(
        self: &Arc<Self>,
        new_item: NewItem,
    ) -> Result<MutationTicket<Item>, MutationError> {
        new_item.validate()?;

        let now = Utc::now();
        let id = ItemId::temporary();
        let optimistic = Item {
            id: id.clone(),
            title: new_item.title.trim().to_string(),
            description: new_item.description.clone(),
            completed: false,
            priority: new_item.priority,
            due_date: new_item.due_date,
            created_at: now,
            updated_at: now,
        };

        let token = {
            let mut state = self.state.lock().await;
            state.mirror.apply_optimistic(optimistic);
            state.begin(&id, MutationKind::Create, None).0
        };
        self.publish(MutationEvent::Applied {
            kind: MutationKind::Create,
            id: id.clone(),
        });

        let coordinator = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let result = coordinator.remote.create(&new_item).await;
            coordinator
                .finish(MutationKind::Create, task_id, token, result, |item| {
                    Some(item.clone())
                })
                .await
        });
        Ok(MutationTicket {
            kind: MutationKind::Create,
            id,
            token,
            coordinator: Arc::clone(self),
            handle,
        })
    }

    /// Overlays `changes` onto `baseline` and shows the result at once.
    /// `baseline` is what the entry reverts to if the server refuses, unless
    /// this call supersedes a pending mutation, whose rollback point is kept.
    pub async fn submit_update(
        self: &Arc<Self>,
        id: ItemId,
        changes: ItemChanges,
        baseline: Item,
    ) -> Result<MutationTicket<Item>, MutationError> {
        if baseline.id != id {
            return Err(MutationError::BaselineMismatch {
                id,
                baseline_id: baseline.id,
            });
        }
        let next = changes.apply_to(&baseline)?;

        let (token, superseded) = {
            let mut state = self.state.lock().await;
            state.reject_pending_create(&id)?;
            if !state.mirror.contains(&id) {
                return Err(MutationError::UnknownItem { id });
            }
            let begun = state.begin(&id, MutationKind::Update, Some(baseline));
            state.mirror.apply_optimistic(next);
            begun
        };
        self.announce(MutationKind::Update, &id, superseded);

        let coordinator = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let result = coordinator.remote.update(&task_id, &changes).await;
            coordinator
                .finish(MutationKind::Update, task_id, token, result, |item| {
                    Some(item.clone())
                })
                .await
        });
        Ok(MutationTicket {
            kind: MutationKind::Update,
            id,
            token,
            coordinator: Arc::clone(self),
            handle,
        })
    }

    /// Flips the completed flag of `item`.
    pub async fn submit_toggle(
        self: &Arc<Self>,
        item: Item,
    ) -> Result<MutationTicket<Item>, MutationError> {
        let changes = ItemChanges::completed(!item.completed);
        self.submit_update(item.id.clone(), changes, item).await
    }

    /// Hides the entry from every view until the server answers. The entry
    /// stays in the mirror so a failed delete can bring it back.
    pub async fn submit_delete(
        self: &Arc<Self>,
        id: ItemId,
    ) -> Result<MutationTicket<()>, MutationError> {
        let (token, superseded) = {
            let mut state = self.state.lock().await;
            state.reject_pending_create(&id)?;
            let Some(current) = state.mirror.get(&id).cloned() else {
                return Err(MutationError::UnknownItem { id });
            };
            state.begin(&id, MutationKind::Delete, Some(current))
        };
        self.announce(MutationKind::Delete, &id, superseded);

        let coordinator = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let result = coordinator.remote.delete(&task_id).await;
            coordinator
                .finish(MutationKind::Delete, task_id, token, result, |_| None)
                .await
        });
        Ok(MutationTicket {
            kind: MutationKind::Delete,
            id,
            token,
            coordinator: Arc::clone(self),
            handle,
        })
    }

    async fn finish<T>(
        &self,
        kind: MutationKind,
        id: ItemId,
        token: u64,
        result: Result<T, RemoteError>,
        confirmed_state: impl FnOnce(&T) -> Option<Item>,
    ) -> Result<T, MutationError> {
        let confirmed = result.as_ref().ok().map(confirmed_state);
        let settlement = {
            let mut state = self.state.lock().await;
            state.settle(&id, token, confirmed.clone())
        };

        match (settlement, result) {
            (Settlement::RolledBack, Err(source)) => {
                warn!(%id, %kind, error = %source, "optimistic mutation rolled back");
                self.publish(MutationEvent::RolledBack {
                    kind,
                    id: id.clone(),
                    error: source.clone(),
                });
                Err(MutationError::Remote { kind, id, source })
            }
            (Settlement::Confirmed, Ok(value)) => {
                debug!(%id, %kind, "optimistic mutation confirmed");
                self.publish(MutationEvent::Confirmed {
                    kind,
                    id,
                    item: confirmed.flatten(),
                });
                Ok(value)
            }
            (_, Ok(value)) => {
                debug!(%id, %kind, "superseded mutation confirmed");
                Ok(value)
            }
            (_, Err(source)) => {
                debug!(%id, %kind, error = %source, "superseded mutation failed");
                Err(MutationError::Remote { kind, id, source })
            }
        }
    }

    fn announce(&self, kind: MutationKind, id: &ItemId, superseded: Option<MutationKind>) {
        if let Some(previous) = superseded {
            debug!(%id, %previous, next = %kind, "pending mutation superseded");
            self.publish(MutationEvent::Superseded {
                previous,
                next: kind,
                id: id.clone(),
            });
        }
        self.publish(MutationEvent::Applied {
            kind,
            id: id.clone(),
        });
    }

    fn publish(&self, event: MutationEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
