use crate::nucleation::Nucleus;
use std::cmp::Ordering;

/// Orders candidates by creation time, then lexicographically by their center.
pub fn canonical_order<const D: usize>(a: &Nucleus<D>, b: &Nucleus<D>) -> Ordering {
    a.seeded_time.total_cmp(&b.seeded_time).then_with(|| {
        a.center
            .iter()
            .zip(b.center.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    })
}

fn is_same_site<const D: usize>(a: &Nucleus<D>, b: &Nucleus<D>) -> bool {
    a.seeded_time == b.seeded_time && a.center == b.center
}

/// Extends the list of accepted nuclei by the admissible candidates.
///
/// Accepted nuclei are never removed and candidates that coincide with one of them are
/// dropped. A remaining candidate is rejected if it lies within `min_distance` of an accepted
/// nucleus or of any other candidate that precedes it in [canonical order](canonical_order),
/// whether or not that candidate is accepted itself. The result only depends on the set of
/// candidates, not on the order in which they are supplied.
///
/// New nuclei are appended in canonical order and indexed by their position in the returned
/// list.
pub fn filter_candidates<const D: usize>(
    accepted: &[Nucleus<D>],
    mut candidates: Vec<Nucleus<D>>,
    min_distance: f64,
) -> Vec<Nucleus<D>> {
    candidates.retain(|candidate| {
        !accepted
            .iter()
            .any(|nucleus| is_same_site(nucleus, candidate))
    });
    candidates.sort_by(canonical_order);
    candidates.dedup_by(|a, b| is_same_site(a, b));

    let is_admissible = |i: usize| {
        let candidate = &candidates[i];
        let near_accepted = accepted
            .iter()
            .any(|nucleus| nucleus.distance_to(&candidate.center) <= min_distance);
        // Sorted and deduplicated, so exactly the candidates before `i` precede it
        let near_earlier = candidates[..i]
            .iter()
            .any(|other| other.distance_to(&candidate.center) <= min_distance);
        !near_accepted && !near_earlier
    };
    let admissible: Vec<usize> = (0..candidates.len()).filter(|&i| is_admissible(i)).collect();

    let mut nuclei = accepted.to_vec();
    for i in admissible {
        let mut nucleus = candidates[i].clone();
        nucleus.index = nuclei.len();
        nuclei.push(nucleus);
    }
    nuclei
}
