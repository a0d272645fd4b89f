//! Reorders task ids of the form `<prefix>.<number>` into numeric order
//! within each common prefix, leaving every non-dotted id exactly where it
//! was. A pure function so it can be fuzzed and property-tested in
//! isolation from the scheduler that calls it.

/// Splits `id` into `(prefix, numeric_suffix)` if it has the dotted-child
/// shape, e.g. `"TEST-004.2"` -> `("TEST-004", 2)`.
fn dotted_parts(id: &str) -> Option<(&str, u64)> {
    let (prefix, suffix) = id.rsplit_once('.')?;
    if prefix.is_empty() || suffix.is_empty() {
        return None;
    }
    let number: u64 = suffix.parse().ok()?;
    Some((prefix, number))
}

/// Reorders `ids` in place: dotted ids sharing a common prefix are sorted
/// ascending by their numeric suffix (locale-agnostic, since ids are plain
/// ASCII identifiers); the positions occupied by dotted ids are reused for
/// the sorted sequence, and non-dotted ids never move.
pub fn reorder_dotted_children(ids: &[String]) -> Vec<String> {
    let parsed: Vec<Option<(&str, u64)>> = ids.iter().map(|id| dotted_parts(id)).collect();

    let dotted_positions: Vec<usize> = parsed
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.map(|_| i))
        .collect();

    let mut dotted_items: Vec<(usize, &str, u64, &String)> = dotted_positions
        .iter()
        .map(|&i| {
            let (prefix, number) = parsed[i].unwrap();
            (i, prefix, number, &ids[i])
        })
        .collect();

    dotted_items.sort_by(|a, b| a.1.cmp(b.1).then(a.2.cmp(&b.2)));

    let mut result = ids.to_vec();
    for (slot, item) in dotted_positions.iter().zip(dotted_items.iter()) {
        result[*slot] = item.3.clone();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sorts_dotted_children_numerically_within_prefix() {
        let input = ids(&["T-1.10", "T-1.2", "T-1.1"]);
        let out = reorder_dotted_children(&input);
        assert_eq!(out, ids(&["T-1.1", "T-1.2", "T-1.10"]));
    }

    #[test]
    fn non_dotted_ids_keep_their_positions() {
        let input = ids(&["T-1", "T-2.5", "T-2.1", "T-3"]);
        let out = reorder_dotted_children(&input);
        assert_eq!(out, ids(&["T-1", "T-2.1", "T-2.5", "T-3"]));
    }

    #[test]
    fn all_dotted_positions_sort_by_prefix_then_number() {
        let input = ids(&["A.3", "B.1", "A.1", "B.2"]);
        let out = reorder_dotted_children(&input);
        // All four positions hold dotted ids, so the whole subsequence is
        // sorted by (prefix, number) and reinserted into the same slots.
        assert_eq!(out, ids(&["A.1", "A.3", "B.1", "B.2"]));
    }

    #[test]
    fn running_twice_is_idempotent() {
        let input = ids(&["T-1.10", "T-1.2", "solo", "T-2.3", "T-2.1"]);
        let once = reorder_dotted_children(&input);
        let twice = reorder_dotted_children(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn non_numeric_suffix_is_treated_as_non_dotted() {
        let input = ids(&["T-1.alpha", "T-1.2"]);
        let out = reorder_dotted_children(&input);
        assert_eq!(out, input);
    }
}
