//! Order-insensitive equality helpers for emitted batches.
//!
//! Emission order within a batch is deterministic but not part of the
//! contract, so tests compare batches as multisets.

use crate::message::{MessagesToEmit, RegistryMessage, TcpRouteMapping, TcpRouteMappings};

fn same_multiset<T: PartialEq>(left: &[T], right: &[T]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut remaining: Vec<&T> = right.iter().collect();
    for item in left {
        match remaining.iter().position(|candidate| *candidate == item) {
            Some(found) => {
                remaining.swap_remove(found);
            }
            None => return false,
        }
    }
    true
}

/// Multiset equality on registry messages.
pub fn same_messages(left: &[RegistryMessage], right: &[RegistryMessage]) -> bool {
    same_multiset(left, right)
}

/// Multiset equality on TCP mappings.
pub fn same_mappings(left: &[TcpRouteMapping], right: &[TcpRouteMapping]) -> bool {
    same_multiset(left, right)
}

/// Multiset equality across all four registry batches.
pub fn same_messages_to_emit(left: &MessagesToEmit, right: &MessagesToEmit) -> bool {
    same_messages(&left.registration_messages, &right.registration_messages)
        && same_messages(&left.unregistration_messages, &right.unregistration_messages)
        && same_messages(
            &left.internal_registration_messages,
            &right.internal_registration_messages,
        )
        && same_messages(
            &left.internal_unregistration_messages,
            &right.internal_unregistration_messages,
        )
}

/// Multiset equality across both TCP batches.
pub fn same_tcp_route_mappings(left: &TcpRouteMappings, right: &TcpRouteMappings) -> bool {
    same_mappings(&left.registrations, &right.registrations)
        && same_mappings(&left.unregistrations, &right.unregistrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiset_ignores_order_but_not_counts() {
        let a = RegistryMessage {
            uris: vec!["a".into()],
            ..Default::default()
        };
        let b = RegistryMessage {
            uris: vec!["b".into()],
            ..Default::default()
        };

        assert!(same_messages(
            &[a.clone(), b.clone()],
            &[b.clone(), a.clone()]
        ));
        assert!(!same_messages(&[a.clone(), a.clone()], &[a.clone(), b]));
        assert!(!same_messages(&[a.clone()], &[a.clone(), a]));
    }
}
