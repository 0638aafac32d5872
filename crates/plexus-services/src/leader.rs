use plexus_crypto::ContentHasher;
use plexus_types::PeerId;

/// Pick the leader among `candidates`.
///
/// Every candidate gets a score from a domain-separated BLAKE3 hash of its
/// id; the highest score wins and ties fall back to id order. The result
/// depends only on the set of candidates, never on their order or on
/// duplicates, so peers that observe the same set agree without talking.
/// Returns `None` for an empty set.
pub fn leader<'a, I>(candidates: I) -> Option<PeerId>
where
    I: IntoIterator<Item = &'a PeerId>,
{
    candidates
        .into_iter()
        .max_by(|a, b| score(a).cmp(&score(b)).then_with(|| a.cmp(b)))
        .cloned()
}

fn score(peer: &PeerId) -> u64 {
    ContentHasher::ELECTION.score(peer.as_str().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peers(ids: &[&str]) -> Vec<PeerId> {
        ids.iter().map(|id| PeerId::new(*id).unwrap()).collect()
    }

    #[test]
    fn empty_set_has_no_leader() {
        assert_eq!(leader(&Vec::<PeerId>::new()), None);
    }

    #[test]
    fn single_candidate_leads() {
        let set = peers(&["QmOnly"]);
        assert_eq!(leader(&set), Some(set[0].clone()));
    }

    #[test]
    fn duplicates_do_not_change_the_result() {
        let set = peers(&["a", "b", "c"]);
        let doubled = peers(&["c", "a", "b", "a", "c"]);
        assert_eq!(leader(&set), leader(&doubled));
    }

    proptest! {
        #[test]
        fn order_independent_and_member(
            ids in prop::collection::vec("[A-Za-z0-9]{1,12}", 1..16),
            rotate in 0usize..16,
        ) {
            let set: Vec<PeerId> = ids.iter().map(|id| PeerId::new(id.as_str()).unwrap()).collect();
            let mut shuffled = set.clone();
            shuffled.reverse();
            let len = shuffled.len();
            shuffled.rotate_left(rotate % len);

            let chosen = leader(&set).unwrap();
            prop_assert_eq!(leader(&shuffled), Some(chosen.clone()));
            prop_assert!(set.contains(&chosen));
        }
    }
}
