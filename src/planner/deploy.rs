//! The `deploy` workflow planner (§4.5 step 2): for every selected
//! instance, in dependency order, schedule whichever of
//! create/configure/start/check its template declares.

use std::collections::BTreeMap;

use daggy::{Dag, NodeIndex};
use petgraph::algo::toposort;

use crate::configurator::TaskRequest;
use crate::instance::{InstanceGraph, InstanceKey};
use crate::job::JobOptions;
use crate::planner::Planner;
use crate::spec::{ConfigurationSpec, Operation};

/// The operations a single deploy pass runs, in the order §4.5 step 2
/// requires them on any one instance.
const DEPLOY_OPERATIONS: [Operation; 4] =
    [Operation::Create, Operation::Configure, Operation::Start, Operation::Check];

#[derive(Debug, Default, Clone, Copy)]
pub struct DeployPlanner;

impl Planner for DeployPlanner {
    fn plan(&self, graph: &InstanceGraph, options: &JobOptions) -> Vec<TaskRequest> {
        let order = topological_order(graph);
        let mut requests = Vec::new();

        for key in order {
            if !options.selects(&key) {
                continue;
            }
            let Some(instance) = graph.get(&key) else { continue };

            let operations: &[Operation] = if options.required_only { &DEPLOY_OPERATIONS[..1] } else { &DEPLOY_OPERATIONS };

            for &operation in operations {
                match instance.template().configurator_for(operation) {
                    Some(class_name) => {
                        let spec = ConfigurationSpec::builder()
                            .name(format!("{}.{}", instance.name(), operation.as_str()))
                            .operation(operation)
                            .class_name(class_name)
                            .installer(key.clone())
                            .build();
                        requests.push(TaskRequest::new(spec, key.clone()));
                    }
                    None if operation == Operation::Create && options.instance.is_some() => {
                        // An explicit single-instance request against a
                        // template that declares no `create` operation
                        // is a resolution failure, not a no-op (§4.5
                        // step 3).
                        let spec = ConfigurationSpec::error_placeholder(
                            instance.name(),
                            operation,
                            format!("{} has no configurator for create", instance.template().type_name()),
                        );
                        requests.push(TaskRequest::new(spec, key.clone()));
                    }
                    None => {}
                }
            }
        }

        requests
    }
}

/// Parent-before-child, required-dependency-before-dependent ordering
/// over the whole graph.
fn topological_order(graph: &InstanceGraph) -> Vec<InstanceKey> {
    let mut dag: Dag<InstanceKey, ()> = Dag::new();
    let mut index_of: BTreeMap<InstanceKey, NodeIndex> = BTreeMap::new();

    for instance in graph.iter() {
        let idx = dag.add_node(instance.key().clone());
        index_of.insert(instance.key().clone(), idx);
    }

    for instance in graph.iter() {
        if let Some(parent) = instance.parent() {
            if let (Some(&p), Some(&c)) = (index_of.get(parent), index_of.get(instance.key())) {
                let _ = dag.add_edge(p, c, ());
            }
        }
        for dep in instance.template().required_dependencies() {
            if let (Some(&d), Some(&c)) = (index_of.get(dep), index_of.get(instance.key())) {
                let _ = dag.add_edge(d, c, ());
            }
        }
    }

    toposort(&dag, None)
        .unwrap_or_default()
        .into_iter()
        .map(|idx| dag[idx].clone())
        .collect()
}
