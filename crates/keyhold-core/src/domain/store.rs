//! PolicyStore: registered policy lists and master-list construction.
//!
//! The store is the local source of truth for which rules *should* be
//! installed on the host.  For each [`Category`] it keeps:
//!
//! - a map from [`ListId`] to [`PolicyList`], ordered by ID;
//! - a next-ID counter that only ever increases.
//!
//! # Master list
//!
//! The host never sees individual lists.  It sees one *master* list per
//! category: the concatenation of every registered list in ascending ID
//! order (oldest registration first).  The master list is rebuilt on every
//! call to [`PolicyStore::master_policy_list`] and never cached, so it can
//! never disagree with the current registration set.
//!
//! ```text
//! id 1: [A, B]      ─┐
//! id 3: [C]          ├─►  master = [A, B, C, D]
//! id 4: [D]         ─┘
//! ```
//!
//! # Concurrency
//!
//! The store has no locks of its own.  The agent's commit service serialises
//! every read-modify-push sequence per category and only ever touches the
//! store synchronously.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::category::Category;
use crate::domain::rule::Rule;

/// Handle identifying a registered policy list within its category.
///
/// IDs start at 1 and are never reused, even after the list is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListId(u64);

impl ListId {
    pub fn new(raw: u64) -> Self {
        ListId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered, ID-tagged set of rules registered and removed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyList {
    pub id: ListId,
    pub rules: Vec<Rule>,
}

/// State for one category.
#[derive(Debug)]
struct Partition {
    lists: BTreeMap<ListId, PolicyList>,
    next_id: u64,
}

impl Default for Partition {
    fn default() -> Self {
        Self {
            lists: BTreeMap::new(),
            next_id: 1,
        }
    }
}

/// Per-category collection of policy lists.
///
/// Construct one per agent and hand it to the commit service; there is no
/// global instance.
#[derive(Debug, Default)]
pub struct PolicyStore {
    partitions: [Partition; 2],
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rules` as a new list under `category` and returns its ID.
    ///
    /// Never fails.  `rules` may be empty; an empty list contributes nothing
    /// to the master list but still consumes an ID.
    pub fn add_policy_list(&mut self, category: Category, rules: Vec<Rule>) -> ListId {
        let partition = self.partition_mut(category);
        let id = ListId(partition.next_id);
        partition.next_id += 1;
        trace!(%category, list_id = %id, rules = rules.len(), "policy list registered");
        partition.lists.insert(id, PolicyList { id, rules });
        id
    }

    /// Removes the list `id` from `category`.
    ///
    /// Returns `false` (and leaves the store unchanged) if no such list is
    /// registered.
    pub fn remove_policy_list(&mut self, category: Category, id: ListId) -> bool {
        let removed = self.partition_mut(category).lists.remove(&id).is_some();
        trace!(%category, list_id = %id, removed, "policy list unregistered");
        removed
    }

    /// Builds the master list for `category`: every registered list's rules,
    /// concatenated in ascending ID order.
    pub fn master_policy_list(&self, category: Category) -> Vec<Rule> {
        self.partition(category)
            .lists
            .values()
            .flat_map(|list| list.rules.iter().cloned())
            .collect()
    }

    /// Returns the list registered under `id`, if any.
    pub fn get(&self, category: Category, id: ListId) -> Option<&PolicyList> {
        self.partition(category).lists.get(&id)
    }

    pub fn contains(&self, category: Category, id: ListId) -> bool {
        self.partition(category).lists.contains_key(&id)
    }

    /// IDs currently registered under `category`, ascending.
    pub fn list_ids(&self, category: Category) -> Vec<ListId> {
        self.partition(category).lists.keys().copied().collect()
    }

    /// Number of lists currently registered under `category`.
    pub fn len(&self, category: Category) -> usize {
        self.partition(category).lists.len()
    }

    pub fn is_empty(&self, category: Category) -> bool {
        self.partition(category).lists.is_empty()
    }

    fn partition(&self, category: Category) -> &Partition {
        &self.partitions[category.index()]
    }

    fn partition_mut(&mut self, category: Category) -> &mut Partition {
        &mut self.partitions[category.index()]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{EventKind, KeyId, Modifiers, Propagation};

    fn key(c: char) -> Rule {
        Rule::keydown(Propagation::Suppress, KeyId::Char(c), Modifiers::NONE)
    }

    fn button(code: u32) -> Rule {
        Rule::new(
            Propagation::Propagate,
            EventKind::PointerDown,
            Modifiers::NONE,
            KeyId::Code(code),
        )
    }

    #[test]
    fn test_new_store_is_empty_in_every_category() {
        let store = PolicyStore::new();
        for category in Category::ALL {
            assert!(store.is_empty(category));
            assert!(store.master_policy_list(category).is_empty());
        }
    }

    #[test]
    fn test_first_id_is_one_and_ids_increase() {
        // Arrange
        let mut store = PolicyStore::new();

        // Act
        let first = store.add_policy_list(Category::Keyboard, vec![key('a')]);
        let second = store.add_policy_list(Category::Keyboard, vec![key('b')]);

        // Assert
        assert_eq!(first, ListId::new(1));
        assert_eq!(second, ListId::new(2));
    }

    #[test]
    fn test_ids_are_never_reused_after_removal() {
        // Arrange
        let mut store = PolicyStore::new();
        let first = store.add_policy_list(Category::Keyboard, vec![key('a')]);
        let second = store.add_policy_list(Category::Keyboard, vec![key('b')]);

        // Act – remove the newest list, then register again
        assert!(store.remove_policy_list(Category::Keyboard, second));
        assert!(store.remove_policy_list(Category::Keyboard, first));
        let third = store.add_policy_list(Category::Keyboard, vec![key('c')]);

        // Assert
        assert_eq!(third, ListId::new(3));
    }

    #[test]
    fn test_categories_have_independent_counters() {
        let mut store = PolicyStore::new();
        store.add_policy_list(Category::Keyboard, vec![key('a')]);
        store.add_policy_list(Category::Keyboard, vec![key('b')]);

        let pointer_id = store.add_policy_list(Category::Pointer, vec![button(1)]);

        assert_eq!(pointer_id, ListId::new(1));
        assert_eq!(store.len(Category::Keyboard), 2);
        assert_eq!(store.len(Category::Pointer), 1);
    }

    #[test]
    fn test_master_list_concatenates_in_registration_order() {
        // Arrange – contents deliberately out of alphabetical order
        let mut store = PolicyStore::new();
        store.add_policy_list(Category::Keyboard, vec![key('z'), key('y')]);
        store.add_policy_list(Category::Keyboard, vec![key('a')]);

        // Act
        let master = store.master_policy_list(Category::Keyboard);

        // Assert – insertion order preserved, not sorted by content
        assert_eq!(master, vec![key('z'), key('y'), key('a')]);
    }

    #[test]
    fn test_master_list_omits_removed_list() {
        let mut store = PolicyStore::new();
        let first = store.add_policy_list(Category::Keyboard, vec![key('x')]);
        store.add_policy_list(Category::Keyboard, vec![key('y')]);

        store.remove_policy_list(Category::Keyboard, first);

        assert_eq!(store.master_policy_list(Category::Keyboard), vec![key('y')]);
    }

    #[test]
    fn test_master_list_is_per_category() {
        let mut store = PolicyStore::new();
        store.add_policy_list(Category::Keyboard, vec![key('x')]);
        store.add_policy_list(Category::Pointer, vec![button(3)]);

        assert_eq!(store.master_policy_list(Category::Keyboard), vec![key('x')]);
        assert_eq!(store.master_policy_list(Category::Pointer), vec![button(3)]);
    }

    #[test]
    fn test_empty_list_consumes_id_but_adds_no_rules() {
        let mut store = PolicyStore::new();

        let id = store.add_policy_list(Category::Pointer, Vec::new());

        assert!(store.contains(Category::Pointer, id));
        assert!(store.master_policy_list(Category::Pointer).is_empty());
    }

    #[test]
    fn test_remove_unknown_id_returns_false_and_leaves_store_unchanged() {
        // Arrange
        let mut store = PolicyStore::new();
        store.add_policy_list(Category::Keyboard, vec![key('x')]);

        // Act
        let removed = store.remove_policy_list(Category::Keyboard, ListId::new(999));

        // Assert
        assert!(!removed);
        assert_eq!(store.len(Category::Keyboard), 1);
        assert_eq!(store.master_policy_list(Category::Keyboard), vec![key('x')]);
    }

    #[test]
    fn test_remove_id_from_other_category_is_not_found() {
        let mut store = PolicyStore::new();
        let id = store.add_policy_list(Category::Keyboard, vec![key('x')]);

        assert!(!store.remove_policy_list(Category::Pointer, id));
        assert!(store.contains(Category::Keyboard, id));
    }

    #[test]
    fn test_remove_twice_reports_absent_the_second_time() {
        let mut store = PolicyStore::new();
        let id = store.add_policy_list(Category::Keyboard, vec![key('x')]);

        assert!(store.remove_policy_list(Category::Keyboard, id));
        assert!(!store.remove_policy_list(Category::Keyboard, id));
    }

    #[test]
    fn test_list_ids_are_ascending() {
        let mut store = PolicyStore::new();
        let a = store.add_policy_list(Category::Keyboard, vec![key('a')]);
        let b = store.add_policy_list(Category::Keyboard, vec![key('b')]);
        let c = store.add_policy_list(Category::Keyboard, vec![key('c')]);
        store.remove_policy_list(Category::Keyboard, b);

        assert_eq!(store.list_ids(Category::Keyboard), vec![a, c]);
        assert_eq!(store.get(Category::Keyboard, c).unwrap().rules, vec![key('c')]);
    }

    /// Replays a fixed add/remove script and checks the master list against
    /// a naive model after every step.
    #[test]
    fn test_master_list_matches_model_over_operation_sequence() {
        let mut store = PolicyStore::new();
        let mut model: Vec<(ListId, Vec<Rule>)> = Vec::new();

        let script: &[(bool, usize)] = &[
            (true, 0),
            (true, 1),
            (true, 2),
            (false, 1),
            (true, 3),
            (false, 0),
            (true, 4),
            (false, 2),
            (true, 5),
        ];
        let mut ids: Vec<ListId> = Vec::new();

        for &(is_add, n) in script {
            if is_add {
                let rules = vec![key((b'a' + n as u8) as char), button(n as u32)];
                let id = store.add_policy_list(Category::Keyboard, rules.clone());
                ids.push(id);
                model.push((id, rules));
            } else {
                let id = ids[n];
                store.remove_policy_list(Category::Keyboard, id);
                model.retain(|(mid, _)| *mid != id);
            }

            let expected: Vec<Rule> = model.iter().flat_map(|(_, r)| r.clone()).collect();
            assert_eq!(store.master_policy_list(Category::Keyboard), expected);
        }
    }
}
