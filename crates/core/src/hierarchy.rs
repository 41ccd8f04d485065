//! Type matcher: ancestor closure of an event type.
//!
//! Publish-time matching looks up handlers for every type an event "is":
//! its own type, every declared supertype (transitively) and the root.

use std::collections::HashSet;

use crate::types::TypeKey;

/// Collect the full ancestor set of `key`, including `key` itself and the root.
///
/// Pure function of its input. Traversal keeps a visited set, so diamond
/// hierarchies are walked once and accidental cycles terminate.
pub fn ancestor_types(key: TypeKey) -> HashSet<TypeKey> {
    let mut visited = HashSet::new();
    let mut stack = vec![key];

    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        for parent in current.supertypes() {
            if !visited.contains(&parent) {
                stack.push(parent);
            }
        }
    }

    visited.insert(TypeKey::root());
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnyEvent;
    use proptest::prelude::*;

    // Interface1 <- Interface2
    // Interface1 <- Parent1 <- Child1 (+ ChildIface), Child1b
    // Interface2 <- Parent2 <- Child2
    struct Interface1;
    struct Interface2;
    struct ChildIface;
    struct Parent1;
    struct Parent2;
    struct Child1;
    struct Child1b;
    struct Child2;

    crate::event_type!(Interface1);
    crate::event_type!(Interface2: Interface1);
    crate::event_type!(ChildIface);
    crate::event_type!(Parent1: Interface1);
    crate::event_type!(Parent2: Interface2);
    crate::event_type!(Child1: Parent1, ChildIface);
    crate::event_type!(Child1b: Parent1);
    crate::event_type!(Child2: Parent2);

    // Diamond: Bottom -> (Left, Right) -> Top
    struct Top;
    struct Left;
    struct Right;
    struct Bottom;

    crate::event_type!(Top);
    crate::event_type!(Left: Top);
    crate::event_type!(Right: Top);
    crate::event_type!(Bottom: Left, Right);

    // Cycle: CycleA -> CycleB -> CycleA
    struct CycleA;
    struct CycleB;

    crate::event_type!(CycleA: CycleB);
    crate::event_type!(CycleB: CycleA);

    fn keys(list: &[TypeKey]) -> HashSet<TypeKey> {
        list.iter().copied().collect()
    }

    fn all_keys() -> Vec<TypeKey> {
        vec![
            TypeKey::of::<Interface1>(),
            TypeKey::of::<Interface2>(),
            TypeKey::of::<ChildIface>(),
            TypeKey::of::<Parent1>(),
            TypeKey::of::<Parent2>(),
            TypeKey::of::<Child1>(),
            TypeKey::of::<Child1b>(),
            TypeKey::of::<Child2>(),
            TypeKey::of::<Bottom>(),
            TypeKey::of::<CycleA>(),
            TypeKey::root(),
        ]
    }

    #[test]
    fn root_has_only_itself() {
        assert_eq!(ancestor_types(TypeKey::root()), keys(&[TypeKey::of::<AnyEvent>()]));
    }

    #[test]
    fn child_collects_superclasses_and_interfaces() {
        let expected = keys(&[
            TypeKey::of::<Child1>(),
            TypeKey::of::<Parent1>(),
            TypeKey::of::<Interface1>(),
            TypeKey::of::<ChildIface>(),
            TypeKey::root(),
        ]);
        assert_eq!(ancestor_types(TypeKey::of::<Child1>()), expected);
    }

    #[test]
    fn interface_inheritance_is_transitive() {
        let expected = keys(&[
            TypeKey::of::<Child2>(),
            TypeKey::of::<Parent2>(),
            TypeKey::of::<Interface2>(),
            TypeKey::of::<Interface1>(),
            TypeKey::root(),
        ]);
        assert_eq!(ancestor_types(TypeKey::of::<Child2>()), expected);
    }

    #[test]
    fn sibling_types_do_not_leak() {
        let set = ancestor_types(TypeKey::of::<Child1b>());
        assert!(!set.contains(&TypeKey::of::<ChildIface>()));
        assert!(!set.contains(&TypeKey::of::<Child1>()));
    }

    #[test]
    fn diamond_is_walked_once() {
        let expected = keys(&[
            TypeKey::of::<Bottom>(),
            TypeKey::of::<Left>(),
            TypeKey::of::<Right>(),
            TypeKey::of::<Top>(),
            TypeKey::root(),
        ]);
        assert_eq!(ancestor_types(TypeKey::of::<Bottom>()), expected);
    }

    #[test]
    fn cycles_terminate() {
        let expected = keys(&[TypeKey::of::<CycleA>(), TypeKey::of::<CycleB>(), TypeKey::root()]);
        assert_eq!(ancestor_types(TypeKey::of::<CycleA>()), expected);
    }

    proptest! {
        /// Property: the ancestor set of any ancestor is contained in the original set,
        /// and recomputing gives the same answer.
        #[test]
        fn ancestor_sets_are_closed_and_idempotent(idx in 0usize..11) {
            let key = all_keys()[idx];
            let set = ancestor_types(key);

            prop_assert!(set.contains(&key));
            prop_assert!(set.contains(&TypeKey::root()));
            prop_assert_eq!(&ancestor_types(key), &set);

            for ancestor in &set {
                prop_assert!(ancestor_types(*ancestor).is_subset(&set));
            }
        }
    }
}
