//! Classification of waste categories into the facts that drive routing.
//!
//! Category names come from a free-text master table, so classification is
//! by case-insensitive substring rather than by id.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryFacts {
    pub is_precursor: bool,
    pub is_recall: bool,
    pub is_recall_and_precursor: bool,
    pub is_food_product: bool,
    /// At least one contributing category is neither precursor nor recall.
    pub includes_standard: bool,
}

impl CategoryFacts {
    /// Classifies a single category name.
    ///
    /// A recall that is also a precursor sets all three flags, so callers
    /// test `is_recall_and_precursor` first. `food_product` is only honoured
    /// when the recall is not precursor-tainted.
    pub fn classify(category_name: &str, food_product: bool) -> Self {
        let name = category_name.to_lowercase();
        let is_precursor = name.contains("prekursor") || name.contains("oot");
        let is_recall = name.contains("recall");
        let is_recall_and_precursor = is_recall && name.contains("prekursor");

        Self {
            is_precursor,
            is_recall,
            is_recall_and_precursor,
            is_food_product: food_product && is_recall && !is_recall_and_precursor,
            includes_standard: !(is_precursor || is_recall),
        }
    }

    /// Merges the facts of several categories. Each flag is true if any
    /// contributor sets it. Used when a signing event links many requests.
    pub fn aggregate<'a, I>(categories: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        categories
            .into_iter()
            .map(|(name, food)| Self::classify(name, food))
            .fold(Self::default(), |acc, f| Self {
                is_precursor: acc.is_precursor || f.is_precursor,
                is_recall: acc.is_recall || f.is_recall,
                is_recall_and_precursor: acc.is_recall_and_precursor || f.is_recall_and_precursor,
                is_food_product: acc.is_food_product || f.is_food_product,
                includes_standard: acc.includes_standard || f.includes_standard,
            })
    }

    pub fn is_standard(&self) -> bool {
        !(self.is_precursor || self.is_recall || self.is_recall_and_precursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precursor_names() {
        for name in ["Prekursor & OOT", "prekursor", "OOT sisa produksi"] {
            let f = CategoryFacts::classify(name, false);
            assert!(f.is_precursor, "{name}");
            assert!(!f.is_recall && !f.is_recall_and_precursor && !f.includes_standard);
        }
    }

    #[test]
    fn recall_and_precursor_sets_every_flag() {
        let f = CategoryFacts::classify("Recall & Prekursor", true);
        assert!(f.is_recall_and_precursor);
        assert!(f.is_precursor);
        assert!(f.is_recall);
        assert!(!f.is_food_product);
    }

    #[test]
    fn oot_recall_is_not_a_combined_category() {
        let f = CategoryFacts::classify("Recall OOT", true);
        assert!(f.is_precursor && f.is_recall);
        assert!(!f.is_recall_and_precursor);
        assert!(f.is_food_product);
    }

    #[test]
    fn food_flag_only_applies_to_recall() {
        assert!(CategoryFacts::classify("Recall", true).is_food_product);
        assert!(!CategoryFacts::classify("Recall", false).is_food_product);
        assert!(!CategoryFacts::classify("Hormon", true).is_food_product);
    }

    #[test]
    fn standard_category() {
        let f = CategoryFacts::classify("Lain-lain", false);
        assert!(f.is_standard());
        assert!(f.includes_standard);
    }

    #[test]
    fn aggregate_is_a_union() {
        let f = CategoryFacts::aggregate([("Recall", true), ("Hormon", false), ("Prekursor & OOT", false)]);
        assert!(f.is_recall);
        assert!(f.is_food_product);
        assert!(f.is_precursor);
        assert!(f.includes_standard);
        assert!(!f.is_recall_and_precursor);

        assert_eq!(CategoryFacts::aggregate([]), CategoryFacts::default());
    }
}
