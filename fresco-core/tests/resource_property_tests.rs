//! Property-Based Tests for DataResource combinators
//!
//! For any list of resources, combining them SHALL yield `Loading` if any
//! input is loading, otherwise the first error in input order, otherwise the
//! transformed values in input order.

use fresco_core::{combine2, combine_data_resources, DataResource};
use fresco_test_utils::generators::arb_data_resource;
use proptest::prelude::*;

fn resource_strategy() -> impl Strategy<Value = DataResource<i64>> {
    arb_data_resource(any::<i64>())
}

proptest! {
    #[test]
    fn prop_any_loading_yields_loading(
        mut resources in prop::collection::vec(resource_strategy(), 0..16),
        at in any::<prop::sample::Index>(),
    ) {
        let idx = at.index(resources.len() + 1);
        resources.insert(idx, DataResource::Loading);
        let combined = combine_data_resources(resources, |values| values.len());
        prop_assert!(combined.is_loading());
    }

    #[test]
    fn prop_first_error_wins_without_loading(
        resources in prop::collection::vec(resource_strategy(), 0..16),
    ) {
        let resources: Vec<_> = resources.into_iter().filter(|r| !r.is_loading()).collect();
        let expected_error = resources.iter().find_map(|r| r.error().cloned());
        let combined = combine_data_resources(resources.clone(), |values| values);

        match expected_error {
            Some(e) => prop_assert_eq!(combined, DataResource::Error(e)),
            None => {
                let values: Vec<i64> = resources.into_iter().filter_map(|r| r.into_data()).collect();
                prop_assert_eq!(combined, DataResource::Data(values));
            }
        }
    }

    #[test]
    fn prop_combine2_matches_list_form(a in resource_strategy(), b in resource_strategy()) {
        let pairwise = combine2(a.clone(), b.clone(), |x: i64, y: i64| x.wrapping_add(y));
        let listed = combine_data_resources(vec![a, b], |values| {
            values[0].wrapping_add(values[1])
        });
        prop_assert_eq!(pairwise, listed);
    }
}
