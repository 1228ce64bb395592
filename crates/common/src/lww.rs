//! The Last-Writer-Wins comparison rule (§4.4), shared by the in-memory
//! document state in `sync-core` and the persistence layer in
//! `sync-capabilities` so both apply the exact same total order.

/// The ordering triple a field record is compared on: `(timestamp, clock,
/// writer_id)`. Lexicographic on the writer id only breaks ties where
/// timestamp and clock are both equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteKey<'a> {
    pub timestamp: i64,
    pub clock: u64,
    pub writer_id: &'a str,
}

/// `true` iff `candidate` strictly wins over `existing` under LWW (§4.4
/// rule 1-3). A `None` existing record always loses to any candidate.
/// Equal triples (identical writer re-applying the same write) never win —
/// "ties with equal writer id resolve to no change" — which is exactly what
/// makes re-applying a delta idempotent (invariant 6, §8).
#[must_use]
pub fn candidate_wins(existing: Option<WriteKey<'_>>, candidate: WriteKey<'_>) -> bool {
    let Some(existing) = existing else {
        return true;
    };
    match candidate.timestamp.cmp(&existing.timestamp) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => match candidate.clock.cmp(&existing.clock) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate.writer_id > existing.writer_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(timestamp: i64, clock: u64, writer_id: &'a str) -> WriteKey<'a> {
        WriteKey { timestamp, clock, writer_id }
    }

    #[test]
    fn higher_timestamp_always_wins() {
        assert!(candidate_wins(Some(key(100, 5, "a")), key(101, 0, "z")));
        assert!(!candidate_wins(Some(key(101, 5, "z")), key(100, 99, "a")));
    }

    #[test]
    fn equal_timestamp_falls_back_to_clock() {
        assert!(candidate_wins(Some(key(100, 1, "a")), key(100, 2, "a")));
        assert!(!candidate_wins(Some(key(100, 2, "a")), key(100, 1, "a")));
    }

    #[test]
    fn equal_timestamp_and_clock_falls_back_to_writer_id() {
        assert!(candidate_wins(Some(key(100, 1, "alpha")), key(100, 1, "beta")));
        assert!(!candidate_wins(Some(key(100, 1, "beta")), key(100, 1, "alpha")));
    }

    #[test]
    fn exact_tie_is_no_change_idempotent() {
        assert!(!candidate_wins(Some(key(100, 1, "alpha")), key(100, 1, "alpha")));
    }

    #[test]
    fn anything_beats_no_existing_record() {
        assert!(candidate_wins(None, key(0, 0, "")));
    }

    #[test]
    fn ordering_is_total_regardless_of_application_order() {
        let writes = [key(100, 1, "alpha"), key(100, 1, "beta"), key(99, 5, "z")];
        // Apply in every permutation; the final winner must always be the same.
        use itertools_like_permutations::permutations;
        for perm in permutations(&writes) {
            let mut current: Option<WriteKey<'_>> = None;
            for candidate in perm {
                if candidate_wins(current, candidate) {
                    current = Some(candidate);
                }
            }
            assert_eq!(current, Some(key(100, 1, "beta")));
        }
    }

    /// Tiny local permutation generator so the totality test (invariant 1,
    /// §8) doesn't need an extra dev-dependency for 3! = 6 orderings.
    mod itertools_like_permutations {
        pub fn permutations<T: Copy>(items: &[T]) -> Vec<Vec<T>> {
            if items.is_empty() {
                return vec![vec![]];
            }
            let mut result = Vec::new();
            for i in 0..items.len() {
                let mut rest = items.to_vec();
                let head = rest.remove(i);
                for mut tail in permutations(&rest) {
                    tail.insert(0, head);
                    result.push(tail);
                }
            }
            result
        }
    }
}
