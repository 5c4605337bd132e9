use shared::domain::{Item, ItemId};

/// Client-held copy of the remote collection, in insertion order.
///
/// Entries mid-delete stay here until the server confirms; hiding them is the
/// projection's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMirror {
    entries: Vec<Item>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut mirror = Self::new();
        for item in items {
            mirror.upsert(item);
        }
        mirror
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.entries.iter().find(|item| &item.id == id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.position(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Item> {
        self.entries.clone()
    }

    pub fn apply_optimistic(&mut self, item: Item) {
        self.upsert(item);
    }

    /// Writes a server-confirmed entity. Returns `false` when the entry
    /// already held exactly this value.
    pub fn apply_confirmed(&mut self, item: Item) -> bool {
        match self.position(&item.id) {
            Some(index) if self.entries[index] == item => false,
            Some(index) => {
                self.entries[index] = item;
                true
            }
            None => {
                self.entries.push(item);
                true
            }
        }
    }

    /// Swaps the entry stored under `old_id` for `item`, keeping its position.
    /// If `item.id` is already present elsewhere, that entry wins the position
    /// and the `old_id` entry is dropped.
    pub fn replace(&mut self, old_id: &ItemId, item: Item) {
        match (self.position(old_id), self.position(&item.id)) {
            (Some(old), Some(existing)) if old != existing => {
                self.entries[existing] = item;
                self.entries.remove(old);
            }
            (Some(old), _) => self.entries[old] = item,
            (None, _) => self.upsert(item),
        }
    }

    /// Restores `snapshot`, or removes the entry when there is none.
    pub fn revert(&mut self, id: &ItemId, snapshot: Option<Item>) {
        match snapshot {
            Some(item) => self.replace(id, item),
            None => {
                self.remove(id);
            }
        }
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<Item> {
        let index = self.position(id)?;
        Some(self.entries.remove(index))
    }

    /// Adopts the server listing, except for identifiers `keep_local` selects:
    /// those keep their local state, absence included, and the ones the server
    /// does not list (optimistic creates) are appended in their current order.
    pub fn reconcile(&mut self, server_items: Vec<Item>, keep_local: impl Fn(&ItemId) -> bool) {
        let mut next = LocalMirror::new();
        for item in server_items {
            if !keep_local(&item.id) {
                next.upsert(item);
            } else if let Some(local) = self.get(&item.id) {
                next.upsert(local.clone());
            }
        }
        for local in &self.entries {
            if keep_local(&local.id) && !next.contains(&local.id) {
                next.entries.push(local.clone());
            }
        }
        *self = next;
    }

    fn position(&self, id: &ItemId) -> Option<usize> {
        self.entries.iter().position(|item| &item.id == id)
    }

    fn upsert(&mut self, item: Item) {
        match self.position(&item.id) {
            Some(index) => self.entries[index] = item,
            None => self.entries.push(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::domain::Priority;

    use super::*;

    fn item(id: &str, title: &str) -> Item {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("timestamp");
        Item {
            id: ItemId::from(id),
            title: title.to_string(),
            description: None,
            completed: false,
            priority: Priority::Medium,
            due_date: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn ids(mirror: &LocalMirror) -> Vec<&str> {
        mirror.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn confirmed_application_is_idempotent() {
        let mut mirror = LocalMirror::from_items([item("1", "a"), item("2", "b")]);
        let confirmed = item("2", "b2");
        assert!(mirror.apply_confirmed(confirmed.clone()));
        let after_first = mirror.clone();
        assert!(!mirror.apply_confirmed(confirmed));
        assert_eq!(mirror, after_first);
    }

    #[test]
    fn replace_keeps_position_of_temporary_entry() {
        let mut mirror =
            LocalMirror::from_items([item("1", "a"), item("tmp-x", "b"), item("3", "c")]);
        mirror.replace(&ItemId::from("tmp-x"), item("42", "b"));
        assert_eq!(ids(&mirror), vec!["1", "42", "3"]);
    }

    #[test]
    fn replace_collapses_onto_existing_server_entry() {
        let mut mirror = LocalMirror::from_items([item("42", "b"), item("tmp-x", "b")]);
        mirror.replace(&ItemId::from("tmp-x"), item("42", "b-confirmed"));
        assert_eq!(ids(&mirror), vec!["42"]);
        assert_eq!(
            mirror.get(&ItemId::from("42")).map(|i| i.title.as_str()),
            Some("b-confirmed")
        );
    }

    #[test]
    fn revert_restores_snapshot_or_removes_entry() {
        let mut mirror = LocalMirror::from_items([item("1", "edited"), item("tmp-y", "new")]);
        mirror.revert(&ItemId::from("1"), Some(item("1", "original")));
        mirror.revert(&ItemId::from("tmp-y"), None);
        assert_eq!(mirror, LocalMirror::from_items([item("1", "original")]));
    }

    #[test]
    fn reconcile_prefers_local_entries_for_pending_ids() {
        let mut mirror = LocalMirror::from_items([
            item("1", "local edit"),
            item("2", "b"),
            item("tmp-z", "new"),
        ]);
        let server = vec![item("1", "server"), item("3", "c")];
        mirror.reconcile(server, |id| id.as_str() == "1" || id.is_temporary());

        assert_eq!(ids(&mirror), vec!["1", "3", "tmp-z"]);
        assert_eq!(
            mirror.get(&ItemId::from("1")).map(|i| i.title.as_str()),
            Some("local edit")
        );
    }

    #[test]
    fn reconcile_keeps_local_absence_for_selected_ids() {
        let mut mirror = LocalMirror::from_items([item("1", "a")]);
        let server = vec![item("1", "a"), item("7", "deleted locally")];
        mirror.reconcile(server, |id| id.as_str() == "7");

        assert_eq!(ids(&mirror), vec!["1"]);
    }
}
