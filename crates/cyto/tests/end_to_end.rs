//! End-to-end scenarios through the dispatcher surface.

use cyto::numeric::condition::ConditionOp;
use cyto::{
    Backend, BinSpec, Condition, CoreDispatcher, DispatchOptions, ExecuteOptions, FieldData,
    FieldMap, Method, OperationId, Payload, PoolOptions,
};
use std::time::Duration;

fn dispatcher(accelerator: bool) -> CoreDispatcher {
    CoreDispatcher::new(DispatchOptions {
        accelerator,
        pool: PoolOptions {
            workers: 2,
            default_timeout: Duration::from_secs(10),
            ..PoolOptions::default()
        },
        ..DispatchOptions::default()
    })
}

#[tokio::test]
async fn tiny_ttest_scenario() {
    let d = dispatcher(false);
    let diff = d
        .compute_differential(
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![3.0, 4.0, 5.0, 6.0, 7.0],
            Method::TTest,
        )
        .await
        .unwrap();
    assert_eq!(diff.mean_a, 3.0);
    assert_eq!(diff.mean_b, 5.0);
    assert_eq!(diff.n_a, 5);
    assert_eq!(diff.n_b, 5);
    assert!((diff.log2_fold_change - (3.01f64 / 5.01).log2()).abs() < 1e-9);
    assert!((diff.log2_fold_change + 0.735).abs() < 0.005);
    // Welch at df = 8 yields t = -2, p = 0.0805.
    assert!((diff.statistic + 2.0).abs() < 1e-9);
    assert!((diff.p_value - 0.0805).abs() < 0.005);
    d.terminate().await;
}

#[tokio::test]
async fn spearman_with_ties_scenario() {
    let d = dispatcher(false);
    let corr = d
        .compute_correlation(
            vec![1.0, 1.0, 2.0, 3.0, 4.0],
            vec![10.0, 20.0, 20.0, 30.0, 40.0],
            Method::Spearman,
        )
        .await
        .unwrap();
    assert_eq!(corr.method, Method::Spearman);
    assert_eq!(corr.n, 5);
    // Tie-averaged ranks on both sides: rho = 35/38.
    assert!((corr.r - 0.921_052_6).abs() < 1e-6);
    d.terminate().await;
}

#[tokio::test]
async fn histogram_auto_bins_scenario() {
    let d = dispatcher(false);
    let hist = d
        .compute_histogram(
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 9.0],
            Some(BinSpec::Auto),
        )
        .await
        .unwrap();
    assert_eq!(hist.bins, 5);
    assert_eq!(hist.edges.len(), 6);
    assert_eq!(hist.counts.iter().sum::<u32>(), 14);
    d.terminate().await;
}

#[tokio::test]
async fn filter_top_percent_scenario() {
    let d = dispatcher(false);
    let mut fields = FieldMap::default();
    fields.insert(
        "x".to_string(),
        FieldData::numeric((0..100).map(|i| i as f32).collect()),
    );
    let payload = Payload {
        cell_indices: Some((0..100).collect()),
        conditions: Some(vec![Condition {
            id: "c1".into(),
            field: "x".into(),
            op: ConditionOp::TopPercent(10.0),
            negate: false,
        }]),
        fields: Some(fields),
        ..Payload::default()
    };
    let env = d
        .execute(OperationId::FilterCells, payload, ExecuteOptions::default())
        .await
        .unwrap();
    let filter = env.output.as_filter().unwrap();
    assert_eq!(filter.filtered, (90..100).collect::<Vec<u32>>());
    assert_eq!(filter.filtered_count, 10);
    d.terminate().await;
}

#[tokio::test]
async fn envelope_carries_trailer() {
    let d = dispatcher(false);
    let env = d
        .execute(
            OperationId::ComputeStats,
            Payload::with_values(vec![1.0, 2.0, 3.0]),
            ExecuteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(env.compute.op, OperationId::ComputeStats);
    assert_eq!(env.compute.selected_backend, Backend::Worker);
    assert_eq!(env.compute.actual_backend, Backend::Worker);
    assert!(!env.compute.fallback_used);
    assert!(env.compute.elapsed_ms >= 0.0);
    d.terminate().await;
}

#[tokio::test]
async fn catalog_introspection_covers_every_operation() {
    let listing = cyto::catalog::introspect();
    let ops = listing.as_array().unwrap();
    assert_eq!(ops.len(), OperationId::ALL.len());
    for op in ops {
        assert!(op["id"].is_string());
        assert!(op["payloadFields"]["required"].is_array());
        assert!(op["resultFields"].as_array().is_some());
    }
}

#[tokio::test]
async fn dispatcher_from_config_string() {
    let config = cyto::from_toml_str(
        r#"
        [pool]
        workers = 1

        [dispatch]
        accelerator = false
        "#,
    )
    .unwrap();
    let d = CoreDispatcher::from_config(&config);
    let stats = d.compute_stats(vec![2.0, 4.0]).await.unwrap();
    assert_eq!(stats.mean, 3.0);
    let status = d.get_status().await;
    assert_eq!(status.worker.workers, 1);
    d.terminate().await;
}
