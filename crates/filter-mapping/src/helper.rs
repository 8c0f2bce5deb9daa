//! Helper utilities shared by the extractor and the classifier

use std::collections::HashSet;

/// Returns `base`, or `base_N` for the first N >= 2 that is not taken.
///
/// # Example
///
/// ```
/// use filter_mapping::helper::find_new_name;
/// use std::collections::HashSet;
///
/// let taken: HashSet<String> = ["Count".to_string()].into_iter().collect();
/// assert_eq!(find_new_name(&taken, "Count"), "Count_2");
/// assert_eq!(find_new_name(&taken, "Sum of Total"), "Sum of Total");
/// ```
pub fn find_new_name(taken: &HashSet<String>, base: &str) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }

    let mut i = 2;
    loop {
        let new_name = format!("{}_{}", base, i);
        if !taken.contains(&new_name) {
            return new_name;
        }
        i += 1;
    }
}

/// Label of the bucket holding the outputs of the `ordinal`-th summarizing stage
///
/// ```
/// use filter_mapping::helper::summaries_label;
///
/// assert_eq!(summaries_label(1), "Summaries");
/// assert_eq!(summaries_label(2), "Summaries (2)");
/// ```
pub fn summaries_label(ordinal: usize) -> String {
    if ordinal <= 1 {
        "Summaries".to_string()
    } else {
        format!("Summaries ({})", ordinal)
    }
}
