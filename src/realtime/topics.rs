use super::error::RealtimeError;
use std::collections::BTreeSet;

/// Longest category identifier accepted.
pub const MAX_CATEGORY_LEN: usize = 64;

/// Current subscription intent of a channel.
///
/// Ordered so that pushes to the server are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet(BTreeSet<String>);

impl TopicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add categories. Returns true if the set changed.
    pub fn union<I>(&mut self, categories: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.0.len();
        self.0.extend(categories);
        self.0.len() != before
    }

    /// Remove categories. Returns true if the set changed.
    pub fn difference<'a, I>(&mut self, categories: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut changed = false;
        for category in categories {
            changed |= self.0.remove(category);
        }
        changed
    }

    pub fn contains(&self, category: &str) -> bool {
        self.0.contains(category)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Check a category identifier.
///
/// Accepts 1..=64 ASCII alphanumerics plus `-`, `_`, `.` and `:`.
pub fn validate_category(category: &str) -> Result<(), RealtimeError> {
    if category.is_empty() {
        return Err(RealtimeError::InvalidArgument(
            "category must not be empty".to_string(),
        ));
    }
    if category.len() > MAX_CATEGORY_LEN {
        return Err(RealtimeError::InvalidArgument(format!(
            "category exceeds {} characters",
            MAX_CATEGORY_LEN
        )));
    }
    if let Some(bad) = category
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(RealtimeError::InvalidArgument(format!(
            "category {:?} contains invalid character {:?}",
            category, bad
        )));
    }
    Ok(())
}

/// Validate every category before anything is mutated.
pub(crate) fn validate_all<I, S>(categories: I) -> Result<Vec<String>, RealtimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    categories
        .into_iter()
        .map(|c| {
            let c = c.as_ref();
            validate_category(c).map(|_| c.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_union_and_difference() {
        let mut set = TopicSet::new();
        assert!(set.union(vec!["bitcoin".to_string(), "defi".to_string()]));
        assert!(!set.union(vec!["bitcoin".to_string()]));
        assert_eq!(set.to_vec(), vec!["bitcoin", "defi"]);

        assert!(set.difference(&["defi".to_string()]));
        assert!(!set.difference(&["nft".to_string()]));
        assert_eq!(set.to_vec(), vec!["bitcoin"]);
        assert!(set.contains("bitcoin"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_to_vec_is_sorted() {
        let mut set = TopicSet::new();
        set.union(vec!["nft".into(), "all".into(), "defi".into()]);
        assert_eq!(set.to_vec(), vec!["all", "defi", "nft"]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["all", "defi", "nft"]);
    }

    #[test]
    fn test_validate_category_accepts_common_names() {
        for name in ["all", "bitcoin", "layer-2", "web3_gaming", "tag:eth", "v1.2"] {
            assert!(validate_category(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_validate_category_rejects_malformed() {
        let too_long = "a".repeat(MAX_CATEGORY_LEN + 1);
        for name in ["", " bitcoin", "bit coin", "defi\n", "nft/art", too_long.as_str()] {
            assert!(
                matches!(validate_category(name), Err(RealtimeError::InvalidArgument(_))),
                "{:?} should be rejected",
                name
            );
        }
        assert!(validate_category(&"a".repeat(MAX_CATEGORY_LEN)).is_ok());
    }

    #[test]
    fn test_validate_all_fails_without_partial_result() {
        let result = validate_all(["ok", "also-ok", "not ok"]);
        assert!(result.is_err());
        assert_eq!(validate_all(["a", "b"]).unwrap(), vec!["a", "b"]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Vec<String>),
        Remove(Vec<String>),
    }

    fn category() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["all", "bitcoin", "defi", "nft", "eth", "ai"])
            .prop_map(str::to_string)
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(category(), 0..4).prop_map(Op::Add),
            prop::collection::vec(category(), 0..4).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_set_algebra(ops in prop::collection::vec(op(), 0..30)) {
            let mut topics = TopicSet::new();
            let mut model: BTreeSet<String> = BTreeSet::new();
            for op in ops {
                match op {
                    Op::Add(cats) => {
                        topics.union(cats.clone());
                        model.extend(cats);
                    }
                    Op::Remove(cats) => {
                        topics.difference(&cats);
                        for c in &cats {
                            model.remove(c);
                        }
                    }
                }
            }
            prop_assert_eq!(topics.to_vec(), model.into_iter().collect::<Vec<_>>());
        }
    }
}
