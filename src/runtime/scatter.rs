//! Scatter execution
//!
//! A scattered step runs once per element (`dotproduct`) or per combination
//! (`flat_crossproduct`) of its scattered inputs. Every subtask runs
//! concurrently; outputs are gathered into arrays ordered by scatter index.

use crate::error::{Component, CwlError, CwlResult};
use crate::runtime::graph::scatter_subtask;
use crate::runtime::task::{Task, TaskStatus};
use crate::runtime::workflow::run_task;
use crate::runtime::RunContext;
use crate::tree::{ScatterMethod, WorkflowStep};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Parameters of each subtask, in scatter index order.
pub fn plan(
    step: &WorkflowStep,
    params: &IndexMap<String, Value>,
) -> CwlResult<Vec<IndexMap<String, Value>>> {
    let method = match (step.scatter.len(), step.scatter_method) {
        (0, _) => {
            return Err(CwlError::binding(
                Component::ScatterEngine,
                format!("step '{}' has no scatter inputs", step.id),
            ))
        }
        (1, None) => ScatterMethod::DotProduct,
        (1, Some(_)) => {
            return Err(CwlError::binding(
                Component::ScatterEngine,
                format!("step '{}' scatters one input but sets scatterMethod", step.id),
            ))
        }
        (_, None) => {
            return Err(CwlError::binding(
                Component::ScatterEngine,
                format!("step '{}' scatters several inputs without scatterMethod", step.id),
            ))
        }
        (_, Some(ScatterMethod::NestedCrossProduct)) => {
            return Err(CwlError::not_implemented(
                Component::ScatterEngine,
                "scatterMethod nested_crossproduct is not supported",
            ))
        }
        (_, Some(method)) => method,
    };

    let mut arrays = Vec::with_capacity(step.scatter.len());
    for name in &step.scatter {
        match params.get(name) {
            Some(Value::Array(items)) => arrays.push((name.as_str(), items.as_slice())),
            other => {
                return Err(CwlError::binding(
                    Component::ScatterEngine,
                    format!(
                        "scattered input '{}' of step '{}' must be an array, got {}",
                        name,
                        step.id,
                        other.map(Value::type_name).unwrap_or("nothing")
                    ),
                ))
            }
        }
    }

    let with = |indices: &[usize]| {
        let mut combination = params.clone();
        for ((name, items), index) in arrays.iter().zip(indices) {
            combination.insert(name.to_string(), items[*index].clone());
        }
        combination
    };

    match method {
        ScatterMethod::DotProduct => {
            let length = arrays[0].1.len();
            if let Some((name, items)) = arrays.iter().find(|(_, items)| items.len() != length) {
                return Err(CwlError::binding(
                    Component::ScatterEngine,
                    format!(
                        "dotproduct over arrays of unequal length: '{}' has {}, '{}' has {}",
                        arrays[0].0,
                        length,
                        name,
                        items.len()
                    ),
                ));
            }
            Ok((0..length).map(|i| with(&vec![i; arrays.len()])).collect())
        }
        _ => {
            if arrays.iter().any(|(_, items)| items.is_empty()) {
                return Ok(Vec::new());
            }
            // Odometer over the arrays, the last one varying fastest
            let mut indices = vec![0usize; arrays.len()];
            let mut combinations = Vec::new();
            loop {
                combinations.push(with(&indices));
                let mut position = arrays.len();
                loop {
                    if position == 0 {
                        return Ok(combinations);
                    }
                    position -= 1;
                    indices[position] += 1;
                    if indices[position] < arrays[position].1.len() {
                        break;
                    }
                    indices[position] = 0;
                }
            }
        }
    }
}

/// Run a scattered step task and gather its outputs.
pub async fn run_scatter(
    ctx: &Arc<RunContext>,
    task: &Arc<Task>,
) -> CwlResult<IndexMap<String, Value>> {
    let step = task.step.as_ref().ok_or_else(|| {
        CwlError::resolve(Component::ScatterEngine, format!("task '{}' is not a step", task.id))
    })?;
    let combinations = plan(step, &task.parameters())?;

    let mut subtasks = Vec::with_capacity(combinations.len());
    for (offset, params) in combinations.into_iter().enumerate() {
        let subtask = scatter_subtask(&ctx.document, task, offset + 1)?;
        subtask.set_parameters(params);
        subtasks.push(Arc::new(subtask));
    }
    task.set_subtasks(subtasks.clone());
    task.log.info(format!("scattering over {} subtasks", subtasks.len()));

    let handles: Vec<_> = subtasks
        .iter()
        .map(|subtask| tokio::spawn(run_task(Arc::clone(ctx), Arc::clone(subtask))))
        .collect();
    for handle in handles {
        if let Err(e) = handle.await {
            task.log.error(format!("subtask aborted: {}", e));
        }
    }

    let mut cancelled = None;
    for subtask in &subtasks {
        match subtask.status() {
            TaskStatus::Succeeded => {}
            TaskStatus::Failed(e) if e.is_cancelled() => {
                cancelled.get_or_insert(e);
            }
            TaskStatus::Failed(e) => return Err(e),
            _ => {
                subtask.abandon("subtask did not finish");
                cancelled.get_or_insert_with(|| {
                    CwlError::cancelled(Component::ScatterEngine, "subtask did not finish")
                });
            }
        }
    }
    if let Some(e) = cancelled {
        return Err(e);
    }

    let mut outputs = IndexMap::new();
    for output in &task.process.outputs {
        let gathered = subtasks
            .iter()
            .map(|s| s.output(&output.id).unwrap_or(Value::Null))
            .collect();
        outputs.insert(output.id.clone(), Value::Array(gathered));
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn step(scatter: &[&str], method: Option<ScatterMethod>) -> WorkflowStep {
        WorkflowStep {
            id: "#main/s".to_string(),
            run: "#tool".to_string(),
            inputs: vec![],
            outputs: vec![],
            scatter: scatter.iter().map(|s| s.to_string()).collect(),
            scatter_method: method,
            requirements: vec![],
            hints: vec![],
        }
    }

    fn ints(values: &[i64]) -> Value {
        Value::Array(values.iter().map(|v| Value::Int(*v)).collect())
    }

    fn strings(values: &[&str]) -> Value {
        Value::Array(values.iter().map(|v| Value::from(*v)).collect())
    }

    fn params(pairs: Vec<(&str, Value)>) -> IndexMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_single_input() {
        let p = params(vec![("n", ints(&[1, 2, 3])), ("k", Value::Int(9))]);
        let plan = plan(&step(&["n"], None), &p).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2]["n"], Value::Int(3));
        assert_eq!(plan[2]["k"], Value::Int(9));
    }

    #[test]
    fn test_dotproduct() {
        let p = params(vec![("a", ints(&[1, 2])), ("b", strings(&["x", "y"]))]);
        let plan = plan(&step(&["a", "b"], Some(ScatterMethod::DotProduct)), &p).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1]["a"], Value::Int(2));
        assert_eq!(plan[1]["b"], Value::from("y"));

        let unequal = params(vec![("a", ints(&[1, 2, 3])), ("b", strings(&["x"]))]);
        let err = super::plan(&step(&["a", "b"], Some(ScatterMethod::DotProduct)), &unequal)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BindingError);
    }

    #[test]
    fn test_flat_crossproduct_row_major() {
        let p = params(vec![("a", ints(&[1, 2])), ("b", strings(&["x", "y"]))]);
        let plan = plan(&step(&["a", "b"], Some(ScatterMethod::FlatCrossProduct)), &p).unwrap();
        let pairs: Vec<_> = plan
            .iter()
            .map(|c| (c["a"].clone(), c["b"].clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Value::Int(1), Value::from("x")),
                (Value::Int(1), Value::from("y")),
                (Value::Int(2), Value::from("x")),
                (Value::Int(2), Value::from("y")),
            ]
        );
    }

    #[test]
    fn test_empty_arrays() {
        let p = params(vec![("n", ints(&[]))]);
        assert!(plan(&step(&["n"], None), &p).unwrap().is_empty());

        let p = params(vec![("a", ints(&[1])), ("b", strings(&[]))]);
        assert!(plan(&step(&["a", "b"], Some(ScatterMethod::FlatCrossProduct)), &p)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_method_validation() {
        let p = params(vec![("a", ints(&[1])), ("b", ints(&[2]))]);
        let err = plan(&step(&["a", "b"], None), &p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BindingError);

        let err = plan(&step(&["a", "b"], Some(ScatterMethod::NestedCrossProduct)), &p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);

        let err = plan(&step(&["a"], Some(ScatterMethod::DotProduct)), &p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BindingError);

        let scalar = params(vec![("a", Value::Int(1))]);
        let err = plan(&step(&["a"], None), &scalar).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BindingError);
    }
}
