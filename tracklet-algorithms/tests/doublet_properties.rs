#![allow(clippy::uninlined_format_args)]
use proptest::prelude::*;
use tracklet_algorithms::{Cutflow, DoubletBuilder, DoubletConfig, DoubletTable, Granularity};
use tracklet_core::{decode_hit, CellId, CellIdLayout, DecodedHit, Error, SimHit};

fn hit(layer: u32, module: u32, position: [f64; 3]) -> DecodedHit {
    let layout = CellIdLayout::standard();
    let raw = layout.encode(&CellId::new(3, 0, layer, module, 0)).unwrap();
    decode_hit(&SimHit::new(0, 0, Some(layer), position, raw), &layout).unwrap()
}

/// Two lower hits at r=100 and three upper hits at r=102, all in the x-z plane.
fn scenario_hits() -> Vec<DecodedHit> {
    vec![
        hit(0, 0, [100.0, 0.0, 0.0]),
        hit(0, 0, [100.0, 0.0, 5.0]),
        hit(1, 0, [102.0, 0.0, 0.1]),
        hit(1, 0, [102.0, 0.0, 5.1]),
        hit(1, 0, [102.0, 0.0, 50.0]),
    ]
}

#[test]
fn test_scenario_raw_candidates() {
    let table = DoubletBuilder::new(DoubletConfig::new())
        .unwrap()
        .build(&scenario_hits())
        .unwrap();
    assert_eq!(table.len(), 6);
    assert_eq!(table.cutflow.total, 6);
    assert_eq!(table.groups_visited, 1);
}

#[test]
fn test_scenario_dz_cut() {
    // Intercepts: (0, 0.1) -> -5, (5, 5.1) -> 0, every other pairing beyond 250.
    let tight = DoubletBuilder::new(DoubletConfig::new().with_cuts(2.0, 1.0))
        .unwrap()
        .build(&scenario_hits())
        .unwrap();
    assert_eq!(tight.cutflow.dz, 1);
    assert_eq!(tight.cutflow.dr, 6);
    assert_eq!(tight.len(), 1);
    assert!(tight.doublets[0].intercept_rz.abs() < 1e-9);

    let loose = DoubletBuilder::new(DoubletConfig::new().with_cuts(6.0, 1.0))
        .unwrap()
        .build(&scenario_hits())
        .unwrap();
    assert_eq!(loose.cutflow.dz, 2);
    assert_eq!(loose.cutflow.all, 2);
    assert_eq!(loose.len(), 2);
}

#[test]
fn test_scenario_pass_through_records_flags() {
    let mut config = DoubletConfig::new().with_cuts(2.0, 1.0).pass_through();
    config.propagate_signal = true;
    let table = DoubletBuilder::new(config)
        .unwrap()
        .build(&scenario_hits())
        .unwrap();
    assert_eq!(table.len(), 6);
    assert_eq!(table.doublets.iter().filter(|d| d.cuts.all()).count(), 1);
    assert!(table.doublets.iter().all(|d| d.ends.is_some()));
}

#[test]
fn test_fine_granularity_splits_modules() {
    let hits = vec![
        hit(0, 0, [100.0, 0.0, 0.0]),
        hit(0, 1, [100.0, 1.0, 0.0]),
        hit(1, 0, [102.0, 0.0, 0.0]),
        hit(1, 1, [102.0, 1.0, 0.0]),
    ];
    let coarse = DoubletBuilder::new(DoubletConfig::new())
        .unwrap()
        .build(&hits)
        .unwrap();
    let fine = DoubletBuilder::new(DoubletConfig::new().with_granularity(Granularity::Fine))
        .unwrap()
        .build(&hits)
        .unwrap();
    assert_eq!(coarse.len(), 4);
    assert_eq!(fine.len(), 2);
    assert!(fine.doublets.iter().all(|d| d.lower.module == d.upper.module));
}

#[test]
fn test_no_upper_hits_is_empty_result() {
    let hits = vec![hit(0, 0, [100.0, 0.0, 0.0]), hit(0, 0, [100.0, 1.0, 0.0])];
    let err = DoubletBuilder::new(DoubletConfig::new())
        .unwrap()
        .build(&hits)
        .unwrap_err();
    assert!(matches!(err, Error::EmptyResult { .. }), "{}", err);
}

fn arb_hit() -> impl Strategy<Value = DecodedHit> {
    (0u32..4, 0u32..2, 10.0f64..500.0, -3.1f64..3.1, -500.0f64..500.0).prop_map(
        |(layer, module, r, phi, z)| hit(layer, module, [r * phi.cos(), r * phi.sin(), z]),
    )
}

fn fingerprint(result: &Result<DoubletTable, Error>) -> Option<(Vec<[u64; 8]>, Cutflow)> {
    let table = result.as_ref().ok()?;
    let mut rows: Vec<[u64; 8]> = table
        .doublets
        .iter()
        .map(|d| {
            let ends = d.ends.unwrap();
            [
                ends[0].x.to_bits(),
                ends[0].y.to_bits(),
                ends[0].z.to_bits(),
                ends[1].x.to_bits(),
                ends[1].y.to_bits(),
                ends[1].z.to_bits(),
                d.intercept_rz.to_bits(),
                d.dr.to_bits(),
            ]
        })
        .collect();
    rows.sort_unstable();
    Some((rows, table.cutflow))
}

proptest! {
    #[test]
    fn prop_order_independence(
        (hits, shuffled) in prop::collection::vec(arb_hit(), 0..24)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
    ) {
        let config = DoubletConfig::new().with_cuts(50.0, 20.0).pass_through().with_propagate_signal(true);
        let builder = DoubletBuilder::new(config).unwrap();
        let a = builder.build(&hits);
        let b = builder.build(&shuffled);
        prop_assert_eq!(a.is_err(), b.is_err());
        prop_assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn prop_join_cardinality(m in 1usize..8, n in 1usize..8) {
        let mut hits = Vec::new();
        for i in 0..m {
            hits.push(hit(2, 0, [100.0, i as f64, 0.0]));
        }
        for j in 0..n {
            hits.push(hit(3, 0, [105.0, j as f64, 10.0]));
        }
        let table = DoubletBuilder::new(DoubletConfig::new()).unwrap().build(&hits).unwrap();
        prop_assert_eq!(table.cutflow.total, (m * n) as u64);
        prop_assert_eq!(table.len(), m * n);
    }

    #[test]
    fn prop_cutflow_monotonic(
        hits in prop::collection::vec(arb_hit(), 2..32),
        dz in 0.1f64..1000.0,
        dr in 0.1f64..500.0,
        dphi in 0.01f64..3.2,
    ) {
        let config = DoubletConfig::new().with_cuts(dz, dr).with_dphi_cut(dphi).pass_through();
        let Ok(table) = DoubletBuilder::new(config).unwrap().build(&hits) else {
            return Ok(());
        };
        for (_, flow) in &table.group_cutflows {
            prop_assert!(flow.dr_and_dz <= flow.dr);
            prop_assert!(flow.dr_and_dz <= flow.dz);
            prop_assert!(flow.dr <= flow.total);
            prop_assert!(flow.dz <= flow.total);
            prop_assert!(flow.all <= flow.dr_and_dz);
            prop_assert!(flow.all <= flow.dphi);
        }
        let summed = table.group_cutflows.iter().fold(Cutflow::default(), |mut acc, (_, f)| {
            acc.merge(f);
            acc
        });
        prop_assert_eq!(summed, table.cutflow);
    }
}
