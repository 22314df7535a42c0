use iapkit::store::AnnotationRef;
use iapkit::validation::{validate_store, ValidateOptions};
use proptest::prelude::*;

mod proptest_helpers;

use proptest_helpers::{arb_puts, arb_store, build_store, CLASS_NAMES, SLICE_KEYS};

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn puts_and_removals_keep_ordinals_dense(
        puts in arb_puts(30),
        removals in prop::collection::vec((0..SLICE_KEYS.len(), 0..CLASS_NAMES.len(), 1u32..6), 0..10),
    ) {
        let mut store = build_store(&puts);
        let before = store.annotation_count();
        let mut removed = 0;
        for (slice, class, number) in removals {
            let target = AnnotationRef::new(CLASS_NAMES[class], number);
            if store.remove(SLICE_KEYS[slice], &target).is_ok() {
                removed += 1;
            }
        }
        prop_assert_eq!(store.annotation_count(), before - removed);

        let report = validate_store(&store, None, &ValidateOptions::default());
        prop_assert!(report.is_ok(), "{}", report);
        for (_, _, list) in store.iter() {
            let numbers: Vec<u32> = list.iter().map(|a| a.number).collect();
            let expected: Vec<u32> = (1..=list.len() as u32).collect();
            prop_assert_eq!(numbers, expected);
        }
    }

    #[test]
    fn rename_there_and_back_is_identity(store in arb_store(20), class in 0..CLASS_NAMES.len()) {
        let name = CLASS_NAMES[class];
        let mut renamed = store.clone();
        renamed.rename_class(name, "renamed").expect("rename");
        prop_assert!(renamed.registry().id_of(name).is_none());
        prop_assert_eq!(
            renamed.registry().id_of("renamed"),
            store.registry().id_of(name)
        );
        for slice in SLICE_KEYS {
            prop_assert_eq!(
                renamed.annotations(slice, "renamed").len(),
                store.annotations(slice, name).len()
            );
        }
        renamed.rename_class("renamed", name).expect("rename back");
        prop_assert_eq!(renamed, store);
    }

    #[test]
    fn delete_class_removes_exactly_its_annotations(store in arb_store(20), class in 0..CLASS_NAMES.len()) {
        let name = CLASS_NAMES[class];
        let expected: usize = SLICE_KEYS.iter().map(|s| store.annotations(s, name).len()).sum();
        let mut pruned = store.clone();
        let removed = pruned.delete_class(name).expect("delete");
        prop_assert_eq!(removed, expected);
        prop_assert_eq!(pruned.annotation_count(), store.annotation_count() - expected);
        let report = validate_store(&pruned, None, &ValidateOptions::default());
        prop_assert!(report.is_ok_strict(), "{}", report);
    }
}
