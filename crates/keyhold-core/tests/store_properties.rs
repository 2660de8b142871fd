//! Integration tests for the policy store's public contract.
//!
//! These exercise `keyhold_core` the way the agent uses it: register lists,
//! remove some, and frame the resulting master list for the host.

use keyhold_core::protocol::{decode_command, encode_command, HostCommand};
use keyhold_core::{Category, EventKind, KeyId, ListId, Modifiers, PolicyStore, Propagation, Rule};

fn rule(c: char) -> Rule {
    Rule::keydown(Propagation::Suppress, KeyId::Char(c), Modifiers::NONE)
}

#[test]
fn test_ids_stay_unique_across_many_add_remove_rounds() {
    let mut store = PolicyStore::new();
    let mut seen = std::collections::HashSet::new();

    for round in 0..50 {
        let id = store.add_policy_list(Category::Keyboard, vec![rule('a')]);
        assert!(seen.insert(id), "id {id} reused in round {round}");
        if round % 3 != 0 {
            store.remove_policy_list(Category::Keyboard, id);
        }
    }

    assert_eq!(store.len(Category::Keyboard), 17);
}

#[test]
fn test_master_list_reflects_interleaved_categories() {
    let mut store = PolicyStore::new();
    let k1 = store.add_policy_list(Category::Keyboard, vec![rule('x')]);
    let p1 = store.add_policy_list(
        Category::Pointer,
        vec![Rule::new(
            Propagation::Propagate,
            EventKind::PointerMove,
            Modifiers::NONE,
            KeyId::Code(0),
        )],
    );
    store.add_policy_list(Category::Keyboard, vec![rule('y'), rule('z')]);

    store.remove_policy_list(Category::Pointer, p1);

    assert_eq!(k1, ListId::new(1));
    assert!(store.master_policy_list(Category::Pointer).is_empty());
    assert_eq!(
        store.master_policy_list(Category::Keyboard),
        vec![rule('x'), rule('y'), rule('z')]
    );
}

#[test]
fn test_master_list_frames_for_host_without_reordering() {
    // Arrange
    let mut store = PolicyStore::new();
    store.add_policy_list(Category::Keyboard, vec![rule('m'), rule('b')]);
    store.add_policy_list(Category::Keyboard, vec![rule('a')]);
    let master = store.master_policy_list(Category::Keyboard);

    // Act
    let cmd = HostCommand::InstallPolicy {
        category: Category::Keyboard,
        rules: master.clone(),
    };
    let bytes = encode_command(&cmd, 5).unwrap();
    let (_, decoded, _) = decode_command(&bytes).unwrap();

    // Assert
    match decoded {
        HostCommand::InstallPolicy { category, rules } => {
            assert_eq!(category, Category::Keyboard);
            assert_eq!(rules, master);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
