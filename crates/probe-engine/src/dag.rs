//! Job id assignment and `needs`-DAG validation.
//!
//! A Kahn's-algorithm walk (unique ids, valid edge endpoints, acyclic) over
//! jobs whose dependency edges are implicit in each job's `needs` field.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{slugify, Job};
use crate::EngineError;

/// Assign an id to every job that doesn't declare one explicitly (slugified
/// from its name, deduplicated with a numeric suffix), failing on explicit
/// id collisions.
pub fn assign_job_ids(mut jobs: Vec<Job>) -> Result<Vec<Job>, EngineError> {
    const MAX_SUFFIX: u32 = 1000;

    let mut seen: HashSet<String> = HashSet::new();
    for job in &mut jobs {
        let id = match job.id.take() {
            Some(id) => {
                if !seen.insert(id.clone()) {
                    return Err(EngineError::DuplicateJobId(id));
                }
                id
            }
            None => {
                let base = slugify(&job.name);
                let mut candidate = base.clone();
                let mut suffix = 1u32;
                while !seen.insert(candidate.clone()) {
                    suffix += 1;
                    if suffix > MAX_SUFFIX {
                        return Err(EngineError::Validation(format!(
                            "could not allocate a unique id for job '{}' after {} attempts",
                            job.name, MAX_SUFFIX
                        )));
                    }
                    candidate = format!("{base}-{suffix}");
                }
                candidate
            }
        };
        job.id = Some(id);
    }
    Ok(jobs)
}

/// Validate every `needs` reference and the graph's acyclicity, returning a
/// topological order (dependency-first) suitable for display or for
/// deciding dispatch order when ties must be broken.
///
/// # Errors
/// - [`EngineError::UnknownJobReference`] if a `needs` entry has no matching
///   job id.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate(jobs: &[Job]) -> Result<Vec<String>, EngineError> {
    let ids: HashSet<&str> = jobs.iter().map(|j| j.id.as_deref().unwrap()).collect();

    for job in jobs {
        for dep in &job.needs {
            if !ids.contains(dep.as_str()) {
                return Err(EngineError::UnknownJobReference {
                    job: job.id.clone().unwrap(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for job in jobs {
        let id = job.id.as_deref().unwrap();
        adjacency.entry(id).or_default();
        in_degree.entry(id).or_insert(0);
    }
    for job in jobs {
        let id = job.id.as_deref().unwrap();
        for dep in &job.needs {
            adjacency.entry(dep.as_str()).or_default().push(id);
            *in_degree.entry(id).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(jobs.len());
    while let Some(id) = queue.pop_front() {
        sorted.push(id.to_owned());
        if let Some(neighbours) = adjacency.get(id) {
            for &neighbour in neighbours {
                let deg = in_degree.get_mut(neighbour).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != jobs.len() {
        let stuck = jobs
            .iter()
            .map(|j| j.id.clone().unwrap())
            .find(|id| !sorted.contains(id))
            .unwrap_or_default();
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(sorted)
}

/// A step that declares `outputs` must declare `id` too, since outputs are
/// published under the step's id. Checked once before a run starts rather
/// than deferred to the first failing publish.
pub fn validate_step_ids(jobs: &[Job]) -> Result<(), EngineError> {
    for job in jobs {
        for step in &job.steps {
            if step.outputs.is_some() && step.id.is_none() {
                return Err(EngineError::MissingStepId(step.uses.clone()));
            }
        }
    }
    Ok(())
}
