// Label subset matching used by the event router.

use std::collections::HashSet;

/// Returns true iff every label in `pool_labels` is present in `event_labels`.
pub fn is_subset(pool_labels: &[String], event_labels: &[String]) -> bool {
    let event_set: HashSet<&str> = event_labels.iter().map(String::as_str).collect();
    pool_labels.iter().all(|label| event_set.contains(label.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_labels_always_match() {
        assert!(is_subset(&[], &["linux".to_string()]));
        assert!(is_subset(&[], &[]));
    }

    #[test]
    fn subset_matches() {
        let pool = vec!["linux".to_string(), "x64".to_string()];
        let event = vec!["linux".to_string(), "x64".to_string(), "self-hosted".to_string()];
        assert!(is_subset(&pool, &event));
    }

    #[test]
    fn missing_label_does_not_match() {
        let pool = vec!["linux".to_string(), "x64".to_string()];
        let event = vec!["windows".to_string()];
        assert!(!is_subset(&pool, &event));
    }

    proptest::proptest! {
        #[test]
        fn subset_is_reflexive(labels in proptest::collection::vec("[a-z]{1,8}", 0..6)) {
            proptest::prop_assert!(is_subset(&labels, &labels));
        }

        #[test]
        fn adding_labels_to_event_never_breaks_a_match(
            pool in proptest::collection::vec("[a-z]{1,8}", 0..4),
            extra in proptest::collection::vec("[a-z]{1,8}", 0..4),
        ) {
            let mut event = pool.clone();
            event.extend(extra);
            proptest::prop_assert!(is_subset(&pool, &event));
        }
    }
}
