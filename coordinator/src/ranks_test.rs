use super::{RankError, RankSelection};

#[test]
pub fn mixed_list_membership_and_count() {
    let selection = RankSelection::parse("0,3-5").unwrap();

    assert!(selection.contains(0));
    assert!(!selection.contains(2));
    assert!(selection.contains(4));
    assert!(selection.contains(5));
    assert!(!selection.contains(6));
    assert_eq!(selection.count(16), 4);
}

#[test]
pub fn range_count_is_inclusive() {
    // 3-7 is five ranks, not four
    assert_eq!(RankSelection::parse("3-7").unwrap().count(0), 5);
    assert_eq!(RankSelection::parse("0,2,5-7,9").unwrap().count(0), 6);
}

#[test]
pub fn singleton_range_counts_once() {
    let selection = RankSelection::parse("4-4").unwrap();

    assert_eq!(selection.count(0), 1);
    assert!(selection.contains(4));
    assert!(!selection.contains(3));
}

#[test]
pub fn descending_range_keeps_lower_bound_only() {
    let selection = RankSelection::parse("7-3").unwrap();

    assert_eq!(selection.count(0), 1);
    assert!(selection.contains(7));
    assert!(!selection.contains(3));
    assert!(!selection.contains(5));
}

#[test]
pub fn overlapping_tokens_are_not_double_counted() {
    let selection = RankSelection::parse("5-9,0,7-12,0,13").unwrap();

    // 0 and 5..=13
    assert_eq!(selection.count(0), 10);
    assert!(selection.contains(13));
    assert!(!selection.contains(4));
}

#[test]
pub fn unordered_tokens_and_whitespace() {
    let selection = RankSelection::parse(" 9, 1-2 ,4 ").unwrap();

    assert_eq!(selection.count(0), 4);
    assert_eq!(selection.expression(), Some("9, 1-2 ,4"));
    assert_eq!(selection.first_within(10), Some(1));
}

#[test]
pub fn malformed_tokens_are_rejected() {
    for expression in ["", "a", "1,,2", "3-", "-3", "1-2-3", "1,x-4", "-1", "2.5"] {
        assert!(
            matches!(
                RankSelection::parse(expression),
                Err(RankError::InvalidRangeExpression { .. })
            ),
            "{expression:?} should be rejected"
        );
    }
}

#[test]
pub fn all_selects_everything() {
    let selection = RankSelection::from_option(None).unwrap();

    assert!(selection.is_all());
    assert!(selection.contains(0));
    assert!(selection.contains(u32::MAX));
    assert_eq!(selection.count(12), 12);
    assert_eq!(selection.first_within(12), Some(0));
    assert_eq!(selection.first_within(0), None);
    assert_eq!(selection.expression(), None);
}

#[test]
pub fn count_within_clips_to_task_count() {
    let selection = RankSelection::parse("1,3-10,20").unwrap();

    assert_eq!(selection.count(0), 10);
    assert_eq!(selection.count_within(6), 4);
    assert_eq!(selection.count_within(1), 0);
    assert_eq!(selection.first_within(1), None);
    assert_eq!(selection.first_within(2), Some(1));
}

#[test]
pub fn full_range_does_not_overflow() {
    let selection = RankSelection::parse(&format!("0-{}", u32::MAX)).unwrap();

    assert_eq!(selection.count(0), u64::from(u32::MAX) + 1);
}
