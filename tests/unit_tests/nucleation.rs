use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, Vector2};
use phasefield::comm::{run_threaded, CommError, Communicator, SelfCommunicator};
use phasefield::mesh::{Partition, UniformGrid};
use phasefield::nucleation::{
    filter_candidates, NucleationCoordinator, NucleationParameters, NucleationReport, Nucleus, NucleusRecord,
};
use proptest::prelude::*;
use util::distance;

fn grid() -> UniformGrid<2> {
    UniformGrid::from_extents([10.0, 10.0], [10, 10]).unwrap()
}

fn nucleus(x: f64, y: f64, t: f64) -> Nucleus<2> {
    Nucleus {
        index: 0,
        center: Vector2::new(x, y),
        radius: 2.5,
        seeded_time: t,
        seeding_duration: 10.0,
    }
}

fn parameters() -> NucleationParameters {
    NucleationParameters {
        seeding_duration: Some(10.0),
        seed: Some(7),
        ..NucleationParameters::default()
    }
}

#[test]
fn default_parameters() {
    let params = NucleationParameters::default();
    assert_eq!(params.radius, 2.5);
    assert_eq!(params.min_distance(), 10.0);
    assert_eq!(params.seeding_duration(1e-3), 10.0);
    assert_eq!(params.reference_concentration, 0.3);
    params.validate(1).unwrap();
    assert!(params.validate(0).is_err());

    let params: NucleationParameters = serde_json::from_str(r#"{ "radius": 1.0, "min_distance": 3.0 }"#).unwrap();
    assert_eq!(params.min_distance(), 3.0);
    assert!(serde_json::from_str::<NucleationParameters>(r#"{ "radius_": 1.0 }"#).is_err());
}

#[test]
fn seeding_window_is_open() {
    let n = nucleus(5.0, 5.0, 0.0);
    assert!(!n.is_seeding_at(0.0));
    assert!(n.is_seeding_at(5.0));
    assert!(!n.is_seeding_at(10.0));
    assert!(!n.is_seeding_at(11.0));
}

#[test]
fn nucleus_is_seeded_with_tanh_profile() {
    let grid = grid();
    let partition = Partition::serial(&grid);
    let mut coordinator = NucleationCoordinator::<2>::new(parameters(), 1e-3, 0);
    assert!(coordinator.propose_local_candidate(Vector2::new(5.0, 5.0), 0.0));
    assert_eq!(coordinator.synchronize(&SelfCommunicator).unwrap(), 1);

    let mut n = DVector::from_element(grid.num_vertices(), -1.0);
    let num_seeded = coordinator.seed(&grid, &partition, 5.0, &mut n);

    // Vertices within two radii of the center
    let expected_count = (0..grid.num_vertices())
        .filter(|&v| (grid.vertex_position(v) - Vector2::new(5.0, 5.0)).norm() <= 5.0)
        .count();
    assert_eq!(num_seeded, expected_count);

    let center = grid.vertex_index([5, 5]);
    assert_scalar_eq!(n[center], 0.5 * (1.0 + (6.25f64).tanh()), comp = abs, tol = 1e-15);
    assert!(n[center] > 0.999);
    let inside = grid.vertex_index([5, 7]);
    assert_scalar_eq!(n[inside], 0.5 * (1.0 + (1.25f64).tanh()), comp = abs, tol = 1e-15);
    let outside = grid.vertex_index([5, 9]);
    assert!(n[outside] < 0.01);
    assert_eq!(n[grid.vertex_index([0, 0])], -1.0);

    // Nothing is seeded outside of the seeding window
    let mut m = DVector::zeros(grid.num_vertices());
    assert_eq!(coordinator.seed(&grid, &partition, 0.0, &mut m), 0);
    assert_eq!(coordinator.seed(&grid, &partition, 10.0, &mut m), 0);
    assert_eq!(m, DVector::zeros(grid.num_vertices()));
}

#[test]
fn earlier_candidate_wins() {
    let late = nucleus(1.0, 0.0, 5.0);
    let early = nucleus(0.0, 0.0, 0.0);
    let nuclei = filter_candidates(&[], vec![late, early.clone()], 10.0);
    assert_eq!(nuclei.len(), 1);
    assert_eq!(nuclei[0].center, early.center);
    assert_eq!(nuclei[0].seeded_time, 0.0);
}

#[test]
fn accepted_nuclei_are_kept() {
    let accepted = filter_candidates(&[], vec![nucleus(0.0, 0.0, 1.0)], 10.0);
    // An earlier candidate close to an accepted nucleus cannot replace it
    let nuclei = filter_candidates(&accepted, vec![nucleus(2.0, 0.0, 0.5), nucleus(20.0, 0.0, 2.0)], 10.0);
    assert_eq!(nuclei.len(), 2);
    assert_eq!(nuclei[0], accepted[0]);
    assert_eq!(nuclei[1].center, Vector2::new(20.0, 0.0));
    assert_eq!(nuclei[1].index, 1);
    // Resending the same candidates changes nothing
    let again = filter_candidates(&nuclei, vec![nucleus(0.0, 0.0, 1.0), nucleus(20.0, 0.0, 2.0)], 10.0);
    assert_eq!(again, nuclei);
}

#[test]
fn resent_rejected_candidate_blocks_later_candidate() {
    let accepted = filter_candidates(&[], vec![nucleus(0.0, 0.0, 0.0), nucleus(3.0, 0.0, 1.0)], 4.0);
    assert_eq!(accepted.len(), 1);
    // The rejected candidate is sent again together with a newer one close to it
    let nuclei = filter_candidates(&accepted, vec![nucleus(3.0, 0.0, 1.0), nucleus(6.0, 0.0, 2.0)], 4.0);
    assert_eq!(nuclei, accepted);
}

#[test]
fn nucleation_probability() {
    let grid = grid();
    let params = NucleationParameters {
        cutoff_time: Some(1.0),
        ..parameters()
    };
    let coordinator = NucleationCoordinator::<2>::new(params, 1e-3, 0);
    let p = coordinator.nucleation_probability(&grid, 0.5, 0.15, 0.0);
    assert_scalar_eq!(p, 0.01 * 0.5 / 100.0, comp = abs, tol = 1e-18);

    assert_eq!(coordinator.nucleation_probability(&grid, 1.5, 0.15, 0.0), 0.0);
    assert_eq!(coordinator.nucleation_probability(&grid, 0.5, 0.15, 0.1), 0.0);
    assert_eq!(coordinator.nucleation_probability(&grid, 0.5, 0.0, 0.0), 0.0);
    assert_eq!(coordinator.nucleation_probability(&grid, 0.5, -0.1, 0.0), 0.0);
}

#[test]
fn local_candidates_keep_their_distance() {
    let mut coordinator = NucleationCoordinator::<2>::new(parameters(), 1e-3, 0);
    assert!(coordinator.propose_local_candidate(Vector2::new(0.0, 0.0), 0.0));
    assert!(!coordinator.propose_local_candidate(Vector2::new(1.0, 0.0), 0.1));
    // Exactly the minimum distance is accepted locally
    assert!(coordinator.propose_local_candidate(Vector2::new(10.0, 0.0), 0.2));
    assert_eq!(coordinator.local_candidates().len(), 2);
    assert_eq!(coordinator.local_candidates()[1].index, 1);
    assert_eq!(coordinator.local_candidates()[1].seeding_duration, 10.0);
}

#[test]
fn candidate_generation_is_reproducible() {
    let grid = UniformGrid::from_extents([20.0, 20.0], [20, 20]).unwrap();
    let partition = Partition::serial(&grid);
    let params = NucleationParameters {
        prefactor: 200.0,
        ..parameters()
    };
    let c = DVector::from_element(grid.num_vertices(), 0.3);
    let n = DVector::zeros(grid.num_vertices());

    let generate = || {
        let mut coordinator = NucleationCoordinator::<2>::new(params.clone(), 1e-3, 0);
        coordinator.generate_local_candidates(&grid, &partition, 0.0, &c, &[&n]);
        coordinator.local_candidates().to_vec()
    };
    let first = generate();
    assert!(!first.is_empty());
    assert_eq!(first, generate());
    for (i, a) in first.iter().enumerate() {
        for b in &first[i + 1..] {
            assert!(distance(&a.center, &b.center) >= 10.0);
        }
    }
}

#[test]
fn certain_nucleation_starts_at_first_owned_vertex() {
    let grid = grid();
    let partition = grid.partition(2, 1);
    let params = NucleationParameters {
        prefactor: 1000.0,
        ..parameters()
    };
    let c = DVector::from_element(grid.num_vertices(), 0.3);
    let mut transformed = DVector::zeros(grid.num_vertices());
    let mut coordinator = NucleationCoordinator::<2>::new(params, 1e-3, 1);

    // Transformed vertices do not nucleate
    transformed[partition.vertices.start] = 1.0;
    coordinator.generate_local_candidates(&grid, &partition, 0.0, &c, &[&transformed]);
    let first = &coordinator.local_candidates()[0];
    assert_eq!(first.center, grid.vertex_position(partition.vertices.start + 1));
}

#[test]
fn nucleation_step_seeds_target_order_parameter() {
    let grid = grid();
    let partition = Partition::serial(&grid);
    let params = NucleationParameters {
        prefactor: 1000.0,
        order_parameter: 1,
        last_increment: Some(3),
        ..parameters()
    };
    let c = DVector::from_element(grid.num_vertices(), 0.3);
    let mut order_parameters = vec![DVector::zeros(grid.num_vertices()); 2];
    let mut coordinator = NucleationCoordinator::<2>::new(params, 1e-3, 0);

    let comm = SelfCommunicator;
    let report = coordinator
        .step(&comm, &grid, &partition, 1, 0.5, &c, &mut order_parameters)
        .unwrap();
    assert!(report.new_local_candidates > 0);
    assert_eq!(report.new_nuclei, coordinator.nuclei().len());
    // Seeding starts strictly after the creation time
    assert_eq!(report.seeded_vertices, 0);

    let report = coordinator
        .step(&comm, &grid, &partition, 2, 0.55, &c, &mut order_parameters)
        .unwrap();
    assert!(report.seeded_vertices > 0);
    assert_eq!(order_parameters[0], DVector::zeros(grid.num_vertices()));
    assert!(order_parameters[1].max() > 0.99);

    let report = coordinator
        .step(&comm, &grid, &partition, 4, 0.6, &c, &mut order_parameters)
        .unwrap();
    assert_eq!(report, NucleationReport::default());
}

#[test]
fn candidates_are_synchronized_across_workers() {
    let results = run_threaded(3, |comm| {
        let rank = comm.rank();
        let mut coordinator = NucleationCoordinator::<2>::new(parameters(), 1e-3, rank);
        coordinator.propose_local_candidate(Vector2::new(20.0 * rank as f64, 0.0), 0.0);
        if rank == 1 {
            // Conflicts with the earlier candidate of rank 0
            coordinator.propose_local_candidate(Vector2::new(0.5, 0.0), 1.0);
        }
        let first = coordinator.synchronize(&comm).unwrap();
        let second = coordinator.synchronize(&comm).unwrap();
        (first, second, coordinator.nuclei().to_vec())
    });

    let expected = results[0].2.clone();
    assert_eq!(expected.len(), 3);
    assert_eq!(expected[0].center, Vector2::new(0.0, 0.0));
    for (index, nucleus) in expected.iter().enumerate() {
        assert_eq!(nucleus.index, index);
    }
    for (first, second, nuclei) in results {
        assert_eq!(first, 3);
        assert_eq!(second, 0);
        assert_eq!(nuclei, expected);
    }
}

#[test]
fn record_with_wrong_dimension_is_rejected() {
    let record = NucleusRecord::from(&nucleus(1.0, 2.0, 0.0));
    assert_eq!(record.center, vec![1.0, 2.0]);
    let n = record.clone().into_nucleus::<2>(4, 0).unwrap();
    assert_eq!(n.index, 4);
    assert_eq!(n.center, Vector2::new(1.0, 2.0));

    let err = record.into_nucleus::<3>(0, 2).unwrap_err();
    assert!(matches!(
        err,
        CommError::SizeMismatch {
            source: 2,
            expected: 3,
            actual: 2
        }
    ));
}

fn candidate_strategy() -> impl Strategy<Value = Vec<Nucleus<2>>> {
    prop::collection::vec((0..40u32, 0..40u32, 0..4u32), 0..25).prop_map(|sites| {
        sites
            .into_iter()
            .map(|(x, y, t)| nucleus(0.5 * x as f64, 0.5 * y as f64, t as f64))
            .collect()
    })
}

proptest! {
    #[test]
    fn filter_is_independent_of_candidate_order(candidates in candidate_strategy(), rotation in 0..25usize) {
        let reference = filter_candidates(&[], candidates.clone(), 5.0);

        let mut permuted = candidates;
        permuted.reverse();
        if !permuted.is_empty() {
            let k = rotation % permuted.len();
            permuted.rotate_left(k);
        }
        prop_assert_eq!(filter_candidates(&[], permuted, 5.0), reference);
    }

    #[test]
    fn filtered_nuclei_are_well_separated(candidates in candidate_strategy()) {
        let nuclei = filter_candidates(&[], candidates.clone(), 5.0);
        prop_assert!(candidates.is_empty() || !nuclei.is_empty());
        for (i, a) in nuclei.iter().enumerate() {
            prop_assert_eq!(a.index, i);
            for b in &nuclei[i + 1..] {
                prop_assert!((a.center - b.center).norm() > 5.0);
            }
        }
    }
}
