// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fs;
use std::sync::Arc;

use serde_json::json;

use crate::backends::stub::{stub_context, Probe};
use crate::config::{BundleDescription, SubgraphDescription, TensorRef};
use crate::engine::{BundlePredictor, SubgraphState, BUNDLE_DELEGATE};
use crate::errors::{NetworkError, PredictorError};
use crate::memory::Buffer;
use crate::network::Network;
use crate::tensor::{Direction, NetworkMetadata};
use crate::traits::Predictor;

/// Integration tests for bundles built from stub and local subgraphs
#[cfg(test)]
mod tests {
    use super::*;

    fn meta(delegate: &str, inputs: &[usize], outputs: &[usize]) -> String {
        let ports = |prefix: &str, sizes: &[usize]| {
            sizes
                .iter()
                .enumerate()
                .map(|(i, size)| json!({ "name": format!("{prefix}{i}"), "dtype": "uint8", "shape": [size] }))
                .collect::<Vec<_>>()
        };
        json!({
            "delegate": delegate,
            "inputs": ports("in", inputs),
            "outputs": ports("out", outputs),
        })
        .to_string()
    }

    fn stub(options: &str, inputs: Vec<TensorRef>, input_sizes: &[usize], output_sizes: &[usize]) -> SubgraphDescription {
        SubgraphDescription {
            inputs,
            ..SubgraphDescription::default()
        }
        .with_model_data(b"stub", meta(&format!("stub {options}"), input_sizes, output_sizes))
    }

    fn bundle(graph: Vec<SubgraphDescription>, outputs: Vec<TensorRef>, parallel_limit: usize) -> Vec<u8> {
        serde_json::to_vec(&BundleDescription {
            inputs: Vec::new(),
            outputs,
            graph,
            parallel_limit,
        })
        .unwrap()
    }

    /// a -> b -> c, each adding 1 to four bytes.
    fn chain(options: [&str; 3], parallel_limit: usize) -> Vec<u8> {
        bundle(
            vec![
                stub(options[0], vec![TensorRef::external(0)], &[4], &[4]),
                stub(options[1], vec![TensorRef::subgraph_output(0, 0)], &[4], &[4]),
                stub(options[2], vec![TensorRef::subgraph_output(1, 0)], &[4], &[4]),
            ],
            vec![TensorRef::subgraph_output(2, 0)],
            parallel_limit,
        )
    }

    fn load_bundle(probe: &Arc<Probe>, limit: Option<usize>, description: &[u8]) -> BundlePredictor {
        let mut predictor = BundlePredictor::new(stub_context(probe, limit));
        let mut metadata = NetworkMetadata::with_delegate(BUNDLE_DELEGATE);
        predictor.load_model(description, &mut metadata).unwrap();
        predictor
    }

    fn bundle_network(probe: &Arc<Probe>, limit: Option<usize>, description: &[u8]) -> Network {
        let network = Network::new(stub_context(probe, limit));
        network.load_model(description, None).unwrap();
        network
    }

    fn failed_subgraphs(result: Result<(), NetworkError>) -> Vec<usize> {
        match result {
            Err(NetworkError::Predictor(PredictorError::SubgraphsFailed { failed })) => failed,
            other => panic!("expected failed subgraphs, got {other:?}"),
        }
    }

    #[test]
    fn test_chain_shares_buffers_between_subgraphs() {
        let probe = Probe::new();
        let predictor = load_bundle(&probe, None, &chain(["name=a add=1", "name=b add=1", "name=c add=1"], 0));

        assert_eq!(predictor.subgraph_count(), 3);
        assert_eq!(predictor.parallel_limit(), 0);
        assert_eq!(predictor.dependencies(0), Some(&[][..]));
        assert_eq!(predictor.dependencies(2), Some(&[1][..]));

        let b_out = predictor.subgraph(1).unwrap().outputs()[0].buffer().unwrap();
        let c_in = predictor.subgraph(2).unwrap().inputs()[0].buffer().unwrap();
        assert!(c_in.ptr_eq(&b_out));
        assert!(b_out.address().is_some());
        assert_eq!(c_in.address(), b_out.address());
    }

    #[tokio::test]
    async fn test_chain_runs_in_dependency_order() {
        let probe = Probe::new();
        let network = bundle_network(&probe, None, &chain(["name=a add=1", "name=b add=1", "name=c add=1"], 0));
        assert_eq!(network.inputs().len(), 1);
        assert_eq!(network.outputs().len(), 1);

        network.inputs()[0].assign(&[1, 2, 3, 4]).unwrap();
        network.predict().await.unwrap();

        assert_eq!(network.outputs()[0].to_vec().unwrap(), vec![4, 5, 6, 7]);
        assert_eq!(
            probe.events(),
            vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
        );
    }

    #[tokio::test]
    async fn test_failed_subgraph_short_circuits_dependents() {
        for limit in [0, 1] {
            let probe = Probe::new();
            let network = bundle_network(&probe, None, &chain(["name=a fail", "name=b", "name=c"], limit));
            network.inputs()[0].assign(&[0; 4]).unwrap();

            assert_eq!(failed_subgraphs(network.predict().await), vec![0, 1, 2]);
            assert_eq!(probe.calls("a"), 1);
            assert_eq!(probe.calls("b"), 0);
            assert_eq!(probe.calls("c"), 0);
        }
    }

    #[tokio::test]
    async fn test_independent_subgraphs_survive_a_failure() {
        for limit in [0, 1] {
            let probe = Probe::new();
            let predictor = load_bundle(
                &probe,
                None,
                &bundle(
                    vec![
                        stub("name=a fail", vec![TensorRef::external(0)], &[2], &[2]),
                        stub("name=b", vec![TensorRef::subgraph_output(0, 0)], &[2], &[2]),
                        stub("name=c", vec![TensorRef::external(0)], &[2], &[2]),
                    ],
                    vec![TensorRef::subgraph_output(1, 0), TensorRef::subgraph_output(2, 0)],
                    limit,
                ),
            );
            predictor.get_tensor(0, Direction::Input).unwrap().assign(&[1, 2]).unwrap();
            // Bind once through the primary so the sibling sees the data too.
            let input = predictor.get_tensor(0, Direction::Input).unwrap();
            input.set_buffer(Some(&input.buffer().unwrap())).unwrap();

            let result = predictor.predict().await;
            assert!(matches!(
                result,
                Err(PredictorError::SubgraphsFailed { ref failed }) if failed == &vec![0, 1]
            ));
            assert_eq!(probe.calls("c"), 1);
            assert_eq!(
                predictor.subgraph_states(),
                vec![SubgraphState::Failed, SubgraphState::Skipped, SubgraphState::Succeeded]
            );
        }
    }

    #[tokio::test]
    async fn test_bundle_input_feeds_sibling_subgraphs() {
        let probe = Probe::new();
        let network = bundle_network(
            &probe,
            None,
            &bundle(
                vec![
                    stub("name=a add=1", vec![TensorRef::external(0)], &[3], &[3]),
                    stub("name=b add=2", vec![TensorRef::external(0)], &[3], &[3]),
                ],
                vec![TensorRef::subgraph_output(0, 0), TensorRef::subgraph_output(1, 0)],
                0,
            ),
        );
        let inputs = network.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].sibling_count(), 1);

        let data = Buffer::new();
        data.assign(&[10, 20, 30]).unwrap();
        inputs[0].set_buffer(Some(&data)).unwrap();
        network.predict().await.unwrap();

        assert_eq!(network.outputs()[0].to_vec().unwrap(), vec![11, 21, 31]);
        assert_eq!(network.outputs()[1].to_vec().unwrap(), vec![12, 22, 32]);
        // One registration per subgraph network reading it.
        assert_eq!(data.network_count(), 2);
    }

    fn independent(count: usize, options: &str, limit: usize) -> Vec<u8> {
        bundle(
            (0..count)
                .map(|i| stub(&format!("name=s{i} {options}"), vec![TensorRef::external(0)], &[1], &[1]))
                .collect(),
            (0..count).map(|i| TensorRef::subgraph_output(i, 0)).collect(),
            limit,
        )
    }

    #[tokio::test]
    async fn test_parallel_limit_bounds_concurrency() {
        let probe = Probe::new();
        let network = bundle_network(&probe, None, &independent(4, "delay=30", 2));
        network.inputs()[0].assign(&[1]).unwrap();
        network.predict().await.unwrap();
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.started().len(), 4);
    }

    #[tokio::test]
    async fn test_unbounded_limit_runs_everything_at_once() {
        let probe = Probe::new();
        let network = bundle_network(&probe, None, &independent(4, "delay=30", 0));
        network.inputs()[0].assign(&[1]).unwrap();
        network.predict().await.unwrap();
        assert_eq!(probe.peak(), 4);
    }

    #[tokio::test]
    async fn test_sequential_runs_in_declaration_order() {
        let probe = Probe::new();
        let network = bundle_network(&probe, None, &independent(4, "delay=5", 1));
        network.inputs()[0].assign(&[1]).unwrap();
        network.predict().await.unwrap();
        assert_eq!(probe.peak(), 1);
        assert_eq!(probe.started(), vec!["s0", "s1", "s2", "s3"]);
    }

    #[test]
    fn test_effective_parallel_limit() {
        let probe = Probe::new();
        assert_eq!(load_bundle(&probe, Some(1), &independent(3, "", 0)).parallel_limit(), 1);
        assert_eq!(load_bundle(&probe, Some(0), &independent(3, "", 1)).parallel_limit(), 0);
        assert_eq!(load_bundle(&probe, None, &independent(3, "", 2)).parallel_limit(), 2);
        assert_eq!(load_bundle(&probe, None, &independent(1, "", 4)).parallel_limit(), 1);
    }

    #[tokio::test]
    async fn test_huge_parallel_limit_is_clamped() {
        let probe = Probe::new();
        let description = independent(3, "delay=5", usize::MAX);
        assert_eq!(
            load_bundle(&probe, None, &description).parallel_limit(),
            tokio::sync::Semaphore::MAX_PERMITS
        );
        assert_eq!(
            load_bundle(&probe, Some(usize::MAX), &independent(3, "", 0)).parallel_limit(),
            tokio::sync::Semaphore::MAX_PERMITS
        );

        let network = bundle_network(&probe, None, &description);
        network.inputs()[0].assign(&[1]).unwrap();
        network.predict().await.unwrap();
        assert_eq!(probe.peak(), 3);
    }

    #[tokio::test]
    async fn test_reference_without_index_reads_first_output() {
        let probe = Probe::new();
        let description = bundle(
            vec![
                stub("name=a add=1", vec![TensorRef::external(0)], &[2], &[2]),
                stub("name=b add=1", vec![TensorRef::default()], &[2], &[2]),
            ],
            vec![TensorRef {
                subgraph: 1,
                ..TensorRef::default()
            }],
            1,
        );
        let network = bundle_network(&probe, None, &description);
        network.inputs()[0].assign(&[1, 2]).unwrap();
        network.predict().await.unwrap();
        assert_eq!(network.outputs()[0].to_vec().unwrap(), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_offset_shares_part_of_producer_output() {
        let probe = Probe::new();
        let predictor = load_bundle(
            &probe,
            None,
            &bundle(
                vec![
                    stub("name=a", vec![TensorRef::external(0)], &[8], &[8]),
                    stub("name=b", vec![TensorRef::subgraph_output(0, 0).with_offset(4)], &[4], &[4]),
                ],
                vec![TensorRef::subgraph_output(1, 0)],
                0,
            ),
        );

        let a_out = predictor.subgraph(0).unwrap().outputs()[0].buffer().unwrap();
        let b_in = predictor.subgraph(1).unwrap().inputs()[0].buffer().unwrap();
        assert!(!b_in.ptr_eq(&a_out));
        assert_eq!(b_in.size(), 4);
        assert_eq!(b_in.offset(), 4);
        let parent = a_out.address().unwrap().as_ptr() as usize;
        assert_eq!(b_in.address().unwrap().as_ptr() as usize, parent + 4);

        let input = predictor.get_tensor(0, Direction::Input).unwrap();
        input.assign(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        predictor.predict().await.unwrap();
        let output = predictor.get_tensor(0, Direction::Output).unwrap();
        assert_eq!(output.to_vec().unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_offset_outside_producer_output_fails_load() {
        let probe = Probe::new();
        let network = Network::new(stub_context(&probe, None));
        let description = bundle(
            vec![
                stub("name=a", vec![TensorRef::external(0)], &[8], &[8]),
                stub("name=b", vec![TensorRef::subgraph_output(0, 0).with_offset(6)], &[4], &[4]),
            ],
            vec![TensorRef::subgraph_output(1, 0)],
            0,
        );
        assert!(matches!(
            network.load_model(&description, None),
            Err(NetworkError::Predictor(PredictorError::Subgraph { index: 1, .. }))
        ));
        assert!(!network.is_loaded());
    }

    #[test]
    fn test_hardware_only_links_skip_cpu_access() {
        let probe = Probe::new();
        let predictor = load_bundle(&probe, None, &chain(["name=a cpu=0", "name=b cpu=0", "name=c"], 0));

        let a_to_b = predictor.subgraph(0).unwrap().outputs()[0].buffer().unwrap();
        let b_to_c = predictor.subgraph(1).unwrap().outputs()[0].buffer().unwrap();
        let exposed = predictor.subgraph(2).unwrap().outputs()[0].buffer().unwrap();
        assert!(!a_to_b.cpu_access());
        assert!(b_to_c.cpu_access());
        assert!(exposed.cpu_access());
    }

    #[test]
    fn test_invalid_bundles_are_rejected() {
        let probe = Probe::new();
        let network = Network::new(stub_context(&probe, None));

        let forward = bundle(
            vec![
                stub("name=a", vec![TensorRef::subgraph_output(1, 0)], &[1], &[1]),
                stub("name=b", vec![TensorRef::external(0)], &[1], &[1]),
            ],
            vec![TensorRef::subgraph_output(0, 0)],
            0,
        );
        assert!(matches!(
            network.load_model(&forward, None),
            Err(NetworkError::Predictor(PredictorError::Validation(_)))
        ));

        let gap = bundle(
            vec![stub("name=a", vec![TensorRef::external(1)], &[1], &[1])],
            vec![TensorRef::subgraph_output(0, 0)],
            0,
        );
        assert!(matches!(
            network.load_model(&gap, None),
            Err(NetworkError::Predictor(PredictorError::InvalidBundle(_)))
        ));

        let rejected = bundle(
            vec![
                stub("name=a", vec![TensorRef::external(0)], &[1], &[1]),
                stub("name=b reject", vec![TensorRef::subgraph_output(0, 0)], &[1], &[1]),
            ],
            vec![TensorRef::subgraph_output(1, 0)],
            0,
        );
        assert!(matches!(
            network.load_model(&rejected, None),
            Err(NetworkError::Predictor(PredictorError::Subgraph { index: 1, .. }))
        ));

        assert!(matches!(
            network.load_model(b"{ not json", None),
            Err(NetworkError::Predictor(PredictorError::InvalidBundle(_)))
        ));
    }

    #[test]
    fn test_declared_input_count_must_match() {
        let probe = Probe::new();
        let network = Network::new(stub_context(&probe, None));
        let mut description = BundleDescription::from_json(&independent(2, "", 0)).unwrap();
        description.inputs = vec![TensorRef::external(0), TensorRef::external(1)];

        assert!(matches!(
            network.load_model(&serde_json::to_vec(&description).unwrap(), None),
            Err(NetworkError::Predictor(PredictorError::InvalidBundle(_)))
        ));
    }

    #[test]
    fn test_bundle_does_not_bind_buffers_itself() {
        let probe = Probe::new();
        let predictor = load_bundle(&probe, None, &independent(1, "", 0));
        let buffer = Buffer::new();
        assert!(matches!(
            predictor.attach_buffer(&buffer, 0, Direction::Input),
            Err(PredictorError::Unsupported { predictor: "bundle", .. })
        ));
        assert!(predictor.get_tensor(5, Direction::Output).is_none());
    }

    #[tokio::test]
    async fn test_states_reset_between_inferences() {
        let probe = Probe::new();
        let predictor = load_bundle(&probe, None, &independent(2, "", 0));
        assert_eq!(predictor.subgraph_states(), vec![SubgraphState::Pending; 2]);

        predictor.get_tensor(0, Direction::Input).unwrap().assign(&[3]).unwrap();
        let input = predictor.get_tensor(0, Direction::Input).unwrap();
        input.set_buffer(Some(&input.buffer().unwrap())).unwrap();

        for _ in 0..2 {
            predictor.predict().await.unwrap();
            assert!(predictor.subgraph_states().iter().all(|s| *s == SubgraphState::Succeeded));
        }
        assert_eq!(probe.calls("s0"), 2);
    }

    #[tokio::test]
    async fn test_bundle_directory_with_local_models() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("first.model"), "add 1").unwrap();
        fs::write(dir.path().join("first.json"), meta("local", &[4], &[4])).unwrap();
        fs::write(dir.path().join("second.model"), "# invert\nxor 255").unwrap();
        fs::write(dir.path().join("second.json"), meta("local", &[4], &[4])).unwrap();
        fs::write(
            dir.path().join("bundle.json"),
            json!({
                "inputs": [ { "subgraph": -1, "in": 0 } ],
                "outputs": [ { "subgraph": 1, "out": 0 } ],
                "graph": [
                    { "inputs": [ { "subgraph": -1, "in": 0 } ], "model": "first.model", "meta": "first.json" },
                    { "inputs": [ { "subgraph": 0, "out": 0 } ], "model": "second.model", "meta": "second.json" }
                ]
            })
            .to_string(),
        )
        .unwrap();

        for path in [dir.path().to_path_buf(), dir.path().join("bundle.json")] {
            let network = Network::default();
            network.load_model_file(&path, None).unwrap();
            assert_eq!(network.delegate(), BUNDLE_DELEGATE);

            network.inputs()[0].assign(&[0, 1, 2, 254]).unwrap();
            network.predict().await.unwrap();
            assert_eq!(network.outputs()[0].to_vec().unwrap(), vec![254, 253, 252, 0]);
        }
    }

    #[test]
    fn test_bundle_directory_without_description() {
        let dir = tempfile::tempdir().unwrap();
        let network = Network::default();
        assert!(matches!(
            network.load_model_file(dir.path(), None),
            Err(NetworkError::Predictor(PredictorError::Io { .. }))
        ));
    }
}
