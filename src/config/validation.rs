// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structural validation of bundle descriptions.
//!
//! A bundle is loaded subgraph by subgraph in declaration order, and each
//! subgraph input that reads from another subgraph shares that subgraph's
//! output buffer. A valid description therefore only ever references
//! earlier subgraphs, which also makes the dependency graph acyclic by
//! construction.
//!
//! # Validation Pipeline
//!
//! 1. **Non-empty**: at least one subgraph
//! 2. **Model sources**: every subgraph names a model file or embeds one
//! 3. **Input references**: every subgraph input reads from an earlier
//!    subgraph or from a bundle input named by `in`
//! 4. **Exposed outputs**: every bundle output points at an existing subgraph
//!
//! All problems are collected; validation does not stop at the first one.
//!
//! # Example
//!
//! ```rust
//! use npu_runtime::config::{validate_bundle, BundleDescription, SubgraphDescription, TensorRef};
//! use npu_runtime::errors::ValidationError;
//!
//! let bundle = BundleDescription {
//!     graph: vec![SubgraphDescription {
//!         inputs: vec![TensorRef::subgraph_output(0, 0)],
//!         model: "self.model".to_string(),
//!         ..SubgraphDescription::default()
//!     }],
//!     ..BundleDescription::default()
//! };
//!
//! let errors = validate_bundle(&bundle).unwrap_err();
//! assert_eq!(
//!     errors,
//!     vec![ValidationError::ForwardReference { subgraph: 0, reference: 0 }]
//! );
//! ```

use crate::config::{BundleDescription, TensorRef};
use crate::errors::ValidationError;

/// Validate a bundle description, returning every problem found.
pub fn validate_bundle(bundle: &BundleDescription) -> Result<(), Vec<ValidationError>> {
    if bundle.graph.is_empty() {
        return Err(vec![ValidationError::EmptyBundle]);
    }

    let mut errors = Vec::new();
    let subgraph_count = bundle.graph.len();

    for (index, graph) in bundle.graph.iter().enumerate() {
        if !graph.has_model() {
            errors.push(ValidationError::MissingModel { subgraph: index });
        }
        for (input, reference) in graph.inputs.iter().enumerate() {
            validate_input(index, input, reference, subgraph_count, &mut errors);
        }
    }

    for (output, reference) in bundle.outputs.iter().enumerate() {
        let known = reference
            .source_subgraph()
            .is_some_and(|subgraph| subgraph < subgraph_count);
        if !known {
            errors.push(ValidationError::InvalidOutputSource {
                output,
                reference: reference.subgraph,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_input(
    subgraph: usize,
    input: usize,
    reference: &TensorRef,
    subgraph_count: usize,
    errors: &mut Vec<ValidationError>,
) {
    let location = || format!("subgraph {subgraph} input {input}");

    if reference.subgraph < -1 {
        errors.push(ValidationError::UnknownSubgraph {
            subgraph,
            reference: reference.subgraph,
        });
        return;
    }

    match reference.source_subgraph() {
        None => {
            if reference.input.is_none() {
                errors.push(ValidationError::MissingTensorIndex {
                    location: location(),
                    key: "in",
                });
            }
        }
        Some(producer) if producer >= subgraph_count => {
            errors.push(ValidationError::UnknownSubgraph {
                subgraph,
                reference: reference.subgraph,
            });
        }
        Some(producer) if producer >= subgraph => {
            errors.push(ValidationError::ForwardReference {
                subgraph,
                reference: reference.subgraph,
            });
        }
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubgraphDescription;

    fn subgraph(inputs: Vec<TensorRef>) -> SubgraphDescription {
        SubgraphDescription {
            inputs,
            model: "model".to_string(),
            meta: "meta.json".to_string(),
            ..SubgraphDescription::default()
        }
    }

    fn chain() -> BundleDescription {
        BundleDescription {
            inputs: vec![TensorRef::external(0)],
            outputs: vec![TensorRef::subgraph_output(2, 0)],
            graph: vec![
                subgraph(vec![TensorRef::external(0)]),
                subgraph(vec![TensorRef::subgraph_output(0, 0)]),
                subgraph(vec![TensorRef::subgraph_output(1, 0)]),
            ],
            parallel_limit: 0,
        }
    }

    #[test]
    fn test_valid_chain() {
        assert!(validate_bundle(&chain()).is_ok());
    }

    #[test]
    fn test_empty_bundle() {
        assert_eq!(
            validate_bundle(&BundleDescription::default()),
            Err(vec![ValidationError::EmptyBundle])
        );
    }

    #[test]
    fn test_unknown_and_forward_references() {
        let mut bundle = chain();
        bundle.graph[0].inputs.push(TensorRef::subgraph_output(7, 0));
        bundle.graph[1].inputs.push(TensorRef::subgraph_output(2, 0));
        bundle.graph[2].inputs.push(TensorRef {
            subgraph: -3,
            input: Some(0),
            ..TensorRef::default()
        });

        let errors = validate_bundle(&bundle).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::UnknownSubgraph { subgraph: 0, reference: 7 },
                ValidationError::ForwardReference { subgraph: 1, reference: 2 },
                ValidationError::UnknownSubgraph { subgraph: 2, reference: -3 },
            ]
        );
    }

    #[test]
    fn test_collects_all_errors() {
        let mut bundle = chain();
        bundle.graph[1].model.clear();
        bundle.graph[0].inputs[0].input = None;
        bundle.outputs.push(TensorRef::external(0));

        let errors = validate_bundle(&bundle).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::MissingModel { subgraph: 1 }));
        assert!(errors.contains(&ValidationError::MissingTensorIndex {
            location: "subgraph 0 input 0".to_string(),
            key: "in",
        }));
        assert!(errors.contains(&ValidationError::InvalidOutputSource {
            output: 1,
            reference: -1,
        }));
    }

    #[test]
    fn test_producer_reference_without_index_is_valid() {
        let mut bundle = chain();
        bundle.graph[2].inputs[0].output = None;
        bundle.outputs[0].output = None;
        assert!(validate_bundle(&bundle).is_ok());
    }

    #[test]
    fn test_embedded_model_counts_as_source() {
        let mut bundle = chain();
        bundle.graph[0].model.clear();
        bundle.graph[0].model_data = Some(String::new());
        assert!(validate_bundle(&bundle).is_ok());
    }

    #[test]
    fn test_error_messages_are_readable() {
        let error = ValidationError::ForwardReference {
            subgraph: 1,
            reference: 1,
        };
        assert_eq!(
            error.to_string(),
            "Subgraph 1 reads from subgraph 1; inputs may only come from earlier subgraphs"
        );
    }
}
