//! Job graph construction, validation, and ready-set computation.

use gantry_core::GraphError;
use gantry_core::artifact::is_valid_artifact_name;
use gantry_core::condition::CompiledCondition;
use gantry_core::pipeline::{JobDefinition, PipelineDefinition, ReleaseConfig};
use gantry_core::run::{JobRunStatus, SkipReason};
use gantry_core::trigger::TriggerParameters;
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// A node in the job graph.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub name: String,
    pub definition: JobDefinition,
    pub condition: CompiledCondition,
}

/// Result of [`JobGraph::plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub waves: Vec<Vec<usize>>,
    pub skipped: Vec<(usize, SkipReason)>,
}

/// Validated dependency graph of a pipeline's jobs.
///
/// Node indices equal declaration indices; an edge `a -> b` means `b` needs `a`.
#[derive(Debug)]
pub struct JobGraph {
    pipeline: String,
    env: BTreeMap<String, String>,
    graph: DiGraph<JobNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    producers: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    release: Option<ReleaseConfig>,
}

/// What the scheduler should do next, given current statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    /// Jobs whose needs all succeeded and whose condition holds.
    pub ready: Vec<usize>,
    pub skipped: Vec<(usize, SkipReason)>,
    /// Jobs still waiting on unfinished needs.
    pub blocked: Vec<usize>,
}

impl JobGraph {
    /// Build and validate the graph for a pipeline.
    pub fn build(pipeline: &PipelineDefinition) -> Result<Self, GraphError> {
        if pipeline.jobs.is_empty() {
            return Err(GraphError::EmptyPipeline);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for job in &pipeline.jobs {
            if name_to_index.contains_key(&job.name) {
                return Err(GraphError::DuplicateJob(job.name.clone()));
            }
            let condition = match &job.condition {
                Some(expr) => expr
                    .compile()
                    .map_err(|reason| GraphError::MalformedCondition {
                        job: job.name.clone(),
                        reason,
                    })?,
                None => CompiledCondition::always(),
            };
            let idx = graph.add_node(JobNode {
                name: job.name.clone(),
                definition: job.clone(),
                condition,
            });
            name_to_index.insert(job.name.clone(), idx);
        }

        for job in &pipeline.jobs {
            let job_idx = name_to_index[&job.name];
            for dep in &job.needs {
                let dep_idx =
                    name_to_index
                        .get(dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            job: job.name.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.update_edge(*dep_idx, job_idx, ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(cycle) => {
                return Err(GraphError::CycleDetected {
                    cycle: find_cycle(&graph, cycle.node_id()),
                });
            }
        };

        let mut dag = JobGraph {
            pipeline: pipeline.name.clone(),
            env: pipeline.env.clone(),
            graph,
            name_to_index,
            producers: HashMap::new(),
            order,
            release: pipeline.release.clone(),
        };
        dag.validate_artifacts()?;
        dag.validate_release()?;
        Ok(dag)
    }

    fn validate_artifacts(&mut self) -> Result<(), GraphError> {
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            for decl in &node.definition.produces {
                if !is_valid_artifact_name(&decl.name) {
                    return Err(GraphError::InvalidArtifactName {
                        job: node.name.clone(),
                        artifact: decl.name.clone(),
                    });
                }
                if let Some(&first) = self.producers.get(&decl.name) {
                    return Err(GraphError::DuplicateArtifactProducer {
                        artifact: decl.name.clone(),
                        first: self.graph[first].name.clone(),
                        second: node.name.clone(),
                    });
                }
                self.producers.insert(decl.name.clone(), idx);
            }
        }

        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            for artifact in &node.definition.consumes {
                let producer =
                    *self
                        .producers
                        .get(artifact)
                        .ok_or_else(|| GraphError::UnknownArtifact {
                            job: node.name.clone(),
                            artifact: artifact.clone(),
                        })?;
                if producer == idx || !has_path_connecting(&self.graph, producer, idx, None) {
                    return Err(GraphError::UnreachableArtifact {
                        job: node.name.clone(),
                        artifact: artifact.clone(),
                        producer: self.graph[producer].name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_release(&self) -> Result<(), GraphError> {
        let Some(release) = &self.release else {
            return Ok(());
        };
        for job in &release.prerequisites {
            if !self.name_to_index.contains_key(job) {
                return Err(GraphError::UnknownReleasePrerequisite(job.clone()));
            }
        }
        for artifact in &release.artifacts {
            if !self.producers.contains_key(artifact) {
                return Err(GraphError::UnknownReleaseArtifact(artifact.clone()));
            }
        }
        Ok(())
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Variables exported to every job.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn job(&self, index: usize) -> &JobNode {
        &self.graph[NodeIndex::new(index)]
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobNode> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    /// Declaration indices of the jobs `index` needs.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Declaration indices of the jobs that need `index`.
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Outgoing)
    }

    fn neighbors(&self, index: usize, dir: Direction) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), dir)
            .map(|n| n.index())
            .collect();
        out.sort_unstable();
        out
    }

    /// Job index producing `artifact`.
    pub fn producer_of(&self, artifact: &str) -> Option<usize> {
        self.producers.get(artifact).map(|idx| idx.index())
    }

    pub fn release(&self) -> Option<&ReleaseConfig> {
        self.release.as_ref()
    }

    /// Group jobs into levels: every job sits one level after its deepest need.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.len()];
        for &idx in &self.order {
            let d = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| depth[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            depth[idx.index()] = d;
        }

        let max = depth.iter().copied().max().unwrap_or(0);
        let mut levels = vec![Vec::new(); max + 1];
        for (index, d) in depth.into_iter().enumerate() {
            levels[d].push(index);
        }
        levels
    }

    /// Compute the ready set from current statuses.
    ///
    /// `statuses` is indexed by declaration index. Only `Pending` and
    /// `Blocked` jobs are considered. Skips decided in this pass are visible
    /// to later jobs of the same pass, so contagion settles in one call.
    pub fn frontier(&self, statuses: &[JobRunStatus], params: &TriggerParameters) -> Frontier {
        let mut effective = statuses.to_vec();
        let mut frontier = Frontier::default();

        for &idx in &self.order {
            let i = idx.index();
            if !matches!(effective[i], JobRunStatus::Pending | JobRunStatus::Blocked) {
                continue;
            }
            let node = &self.graph[idx];
            let deps = self.dependencies(i);

            // A failed need is reported ahead of a skipped one.
            let reason = deps
                .iter()
                .copied()
                .filter(|&d| effective[d].poisons_dependents())
                .min_by_key(|&d| effective[d] != JobRunStatus::Failed)
                .map(|d| {
                    let job = self.graph[NodeIndex::new(d)].name.clone();
                    match effective[d] {
                        JobRunStatus::Failed => SkipReason::DependencyFailed { job },
                        _ => SkipReason::DependencySkipped { job },
                    }
                })
                .or_else(|| (!node.condition.evaluate(params)).then_some(SkipReason::ConditionFalse));

            if let Some(reason) = reason {
                effective[i] = JobRunStatus::Skipped;
                frontier.skipped.push((i, reason));
            } else if deps.iter().all(|&d| effective[d] == JobRunStatus::Succeeded) {
                frontier.ready.push(i);
            } else {
                frontier.blocked.push(i);
            }
        }

        frontier.ready.sort_unstable();
        frontier.skipped.sort_by_key(|(i, _)| *i);
        frontier.blocked.sort_unstable();
        frontier
    }

    /// Dry run: the waves jobs would be dispatched in if every job succeeded,
    /// and the jobs the trigger would skip.
    pub fn plan(&self, params: &TriggerParameters) -> Plan {
        let mut statuses = vec![JobRunStatus::Pending; self.len()];
        let mut plan = Plan::default();
        loop {
            let frontier = self.frontier(&statuses, params);
            for (i, reason) in frontier.skipped {
                statuses[i] = JobRunStatus::Skipped;
                plan.skipped.push((i, reason));
            }
            if frontier.ready.is_empty() {
                break;
            }
            for &i in &frontier.ready {
                statuses[i] = JobRunStatus::Succeeded;
            }
            plan.waves.push(frontier.ready);
        }
        plan
    }
}

/// Recover one concrete cycle through `start`, following `needs` edges.
/// The returned path begins and ends with the same job.
fn find_cycle(graph: &DiGraph<JobNode, ()>, start: NodeIndex) -> Vec<String> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut queue = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for next in graph.neighbors_directed(current, Direction::Incoming) {
            if next == start {
                let mut path = vec![current];
                let mut cursor = current;
                while cursor != start {
                    match parent.get(&cursor) {
                        Some(&prev) => cursor = prev,
                        None => break,
                    }
                    path.push(cursor);
                }
                path.reverse();
                path.push(start);
                return path.iter().map(|&idx| graph[idx].name.clone()).collect();
            }
            if seen.insert(next) {
                parent.insert(next, current);
                queue.push_back(next);
            }
        }
    }

    vec![graph[start].name.clone()]
}
