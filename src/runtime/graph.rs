//! Graph resolution
//!
//! Validates a packed document and expands `#main` into the task tree a run
//! executes: one task per workflow step, recursively, with requirements
//! inherited from enclosing steps and workflows. Scattered steps get their
//! subtasks at run time, once the scattered arrays are known.

use crate::error::{Component, CwlError, CwlResult};
use crate::runtime::task::{merge_requirements, Task};
use crate::tree::{PackedDocument, Process, Requirement, WorkflowStep};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Validate `document` and build the task tree rooted at `#main`.
pub fn resolve(document: &PackedDocument) -> CwlResult<Arc<Task>> {
    let main = Arc::clone(document.main()?);
    validate(document, &main, &mut Vec::new())?;
    let task = build_task(
        document,
        Arc::clone(&main),
        main.id.clone(),
        None,
        None,
        main.requirements.clone(),
        main.hints.clone(),
    )?;
    Ok(Arc::new(task))
}

/// Build a task and, unless it is a scattered step, its children.
///
/// `requirements` and `hints` are the task's effective lists: the process's
/// own merged with everything inherited.
pub fn build_task(
    document: &PackedDocument,
    process: Arc<Process>,
    id: String,
    step: Option<Arc<WorkflowStep>>,
    scatter_index: Option<usize>,
    requirements: Vec<Requirement>,
    hints: Vec<Requirement>,
) -> CwlResult<Task> {
    let scattered = scatter_index.is_none()
        && step.as_ref().map(|s| !s.scatter.is_empty()).unwrap_or(false);

    let path = match scatter_index {
        Some(index) => format!("{}-scatter-{}", id, index),
        None => id.clone(),
    };

    let mut children = IndexMap::new();
    if !scattered {
        for child_step in process.steps() {
            let child_process = run_target(document, child_step)?;
            let inherited = merge_requirements(&child_step.requirements, &requirements);
            let inherited_hints = merge_requirements(&child_step.hints, &hints);
            let child = build_task(
                document,
                Arc::clone(&child_process),
                format!("{}/{}", path, child_step.name()),
                Some(Arc::clone(child_step)),
                None,
                merge_requirements(&child_process.requirements, &inherited),
                merge_requirements(&child_process.hints, &inherited_hints),
            )?;
            children.insert(child_step.id.clone(), Arc::new(child));
        }
    }

    Ok(Task::new(
        id,
        process,
        step,
        scatter_index,
        requirements,
        hints,
        children,
    ))
}

/// Build subtask `index` (1-based) of a scattered step task.
pub fn scatter_subtask(document: &PackedDocument, parent: &Task, index: usize) -> CwlResult<Task> {
    build_task(
        document,
        Arc::clone(&parent.process),
        parent.id.clone(),
        parent.step.clone(),
        Some(index),
        parent.requirements.clone(),
        parent.hints.clone(),
    )
}

fn run_target(document: &PackedDocument, step: &WorkflowStep) -> CwlResult<Arc<Process>> {
    document.process(&step.run).cloned().ok_or_else(|| {
        CwlError::resolve(
            Component::GraphResolver,
            format!("step '{}' runs '{}', which is not in the graph", step.id, step.run),
        )
    })
}

/// Check run targets, sources and step ordering of `process` and every
/// process it runs. `stack` holds the processes being expanded.
fn validate(document: &PackedDocument, process: &Process, stack: &mut Vec<String>) -> CwlResult<()> {
    if stack.contains(&process.id) {
        return Err(CwlError::resolve(
            Component::GraphResolver,
            format!("process '{}' runs itself", process.id),
        ));
    }
    if !process.is_workflow() {
        return Ok(());
    }
    stack.push(process.id.clone());

    let output_ids: HashMap<String, String> = output_id_map(process);
    let prefix = format!("{}/", process.id);
    let check_source = |source: &str, owner: &str| -> CwlResult<Option<String>> {
        if let Some(producer) = output_ids.get(source) {
            return Ok(Some(producer.clone()));
        }
        let is_input = source
            .strip_prefix(&prefix)
            .map(|name| process.input(name).is_some())
            .unwrap_or(false);
        if is_input {
            Ok(None)
        } else {
            Err(CwlError::resolve(
                Component::GraphResolver,
                format!("{} references unknown source '{}'", owner, source),
            ))
        }
    };

    let mut dependencies: HashMap<&str, Vec<String>> = HashMap::new();
    for step in process.steps() {
        let mut producers = Vec::new();
        for input in &step.inputs {
            for source in &input.source {
                if let Some(producer) = check_source(source, &step.id)? {
                    producers.push(producer);
                }
            }
        }
        dependencies.insert(step.id.as_str(), producers);
    }
    for output in &process.outputs {
        for source in &output.output_source {
            check_source(source, &format!("output '{}'", output.id))?;
        }
    }
    check_acyclic(&dependencies)?;

    for step in process.steps() {
        let target = run_target(document, step)?;
        validate(document, &target, stack)?;
    }
    stack.pop();
    Ok(())
}

/// Step output id (`<step id>/<name>`) to the id of the producing step.
pub fn output_id_map(process: &Process) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for step in process.steps() {
        for name in &step.outputs {
            map.insert(step.output_id(name), step.id.clone());
        }
    }
    map
}

fn check_acyclic(dependencies: &HashMap<&str, Vec<String>>) -> CwlResult<()> {
    fn visit<'a>(
        step: &'a str,
        dependencies: &'a HashMap<&str, Vec<String>>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> CwlResult<()> {
        if done.contains(step) {
            return Ok(());
        }
        if !visiting.insert(step) {
            return Err(CwlError::resolve(
                Component::GraphResolver,
                format!("step '{}' depends on its own outputs", step),
            ));
        }
        for producer in dependencies.get(step).into_iter().flatten() {
            visit(producer, dependencies, visiting, done)?;
        }
        visiting.remove(step);
        done.insert(step);
        Ok(())
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    let mut steps: Vec<&str> = dependencies.keys().copied().collect();
    steps.sort();
    for step in steps {
        visit(step, dependencies, &mut visiting, &mut done)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::{json, Value as JsonValue};

    fn document(graph: JsonValue) -> PackedDocument {
        PackedDocument::from_json(&json!({"cwlVersion": "v1.0", "$graph": graph})).unwrap()
    }

    fn expression_tool(id: &str) -> JsonValue {
        json!({
            "id": id,
            "class": "ExpressionTool",
            "requirements": [{"class": "InlineJavascriptRequirement"}],
            "expression": "${ return {\"x\": inputs.x}; }",
            "inputs": {"x": "int?"},
            "outputs": {"x": "int?"}
        })
    }

    #[test]
    fn test_builds_tree_with_inherited_requirements() {
        let doc = document(json!([
            {
                "id": "#main",
                "class": "Workflow",
                "requirements": [{"class": "DockerRequirement", "dockerPull": "alpine"}],
                "inputs": {"x": "int"},
                "outputs": {"y": {"type": "int", "outputSource": "B/x"}},
                "steps": {
                    "A": {"run": "#tool", "in": {"x": "x"}, "out": ["x"]},
                    "B": {"run": "#tool", "in": {"x": "A/x"}, "out": ["x"]}
                }
            },
            expression_tool("#tool")
        ]));
        let root = resolve(&doc).unwrap();
        assert_eq!(root.id, "#main");
        let ids: Vec<_> = root.children.values().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["#main/A", "#main/B"]);

        let child = &root.children["#main/A"];
        assert!(child.requirement("DockerRequirement").is_some());
        assert!(child.requirement("InlineJavascriptRequirement").is_some());
        assert!(child.children.is_empty());
    }

    #[test]
    fn test_missing_run_target() {
        let doc = document(json!([{
            "id": "#main",
            "class": "Workflow",
            "inputs": {},
            "outputs": {},
            "steps": {"A": {"run": "#nowhere", "in": {}, "out": []}}
        }]));
        let err = resolve(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResolveError);
        assert!(err.message().contains("#nowhere"));
    }

    #[test]
    fn test_missing_main() {
        let doc = document(json!([expression_tool("#tool")]));
        assert_eq!(resolve(&doc).unwrap_err().kind(), ErrorKind::ResolveError);
    }

    #[test]
    fn test_step_cycle() {
        let doc = document(json!([
            {
                "id": "#main",
                "class": "Workflow",
                "inputs": {},
                "outputs": {},
                "steps": {
                    "A": {"run": "#tool", "in": {"x": "B/x"}, "out": ["x"]},
                    "B": {"run": "#tool", "in": {"x": "A/x"}, "out": ["x"]}
                }
            },
            expression_tool("#tool")
        ]));
        let err = resolve(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResolveError);
    }

    #[test]
    fn test_unknown_source() {
        let doc = document(json!([
            {
                "id": "#main",
                "class": "Workflow",
                "inputs": {},
                "outputs": {},
                "steps": {"A": {"run": "#tool", "in": {"x": "nope"}, "out": ["x"]}}
            },
            expression_tool("#tool")
        ]));
        assert_eq!(resolve(&doc).unwrap_err().kind(), ErrorKind::ResolveError);
    }

    #[test]
    fn test_recursive_process() {
        let doc = document(json!([{
            "id": "#main",
            "class": "Workflow",
            "inputs": {},
            "outputs": {},
            "steps": {"again": {"run": "#main", "in": {}, "out": []}}
        }]));
        assert_eq!(resolve(&doc).unwrap_err().kind(), ErrorKind::ResolveError);
    }

    #[test]
    fn test_scattered_step_has_no_children_until_run() {
        let doc = document(json!([
            {
                "id": "#main",
                "class": "Workflow",
                "inputs": {"xs": "int[]"},
                "outputs": {},
                "steps": {"S": {"run": "#inner", "scatter": "x", "in": {"x": "xs"}, "out": []}}
            },
            {
                "id": "#inner",
                "class": "Workflow",
                "inputs": {"x": "int"},
                "outputs": {},
                "steps": {"T": {"run": "#tool", "in": {"x": "x"}, "out": ["x"]}}
            },
            expression_tool("#tool")
        ]));
        let root = resolve(&doc).unwrap();
        let scattered = &root.children["#main/S"];
        assert!(scattered.is_scatter());
        assert!(scattered.children.is_empty());

        let subtask = scatter_subtask(&doc, scattered, 2).unwrap();
        assert_eq!(subtask.path(), "#main/S-scatter-2");
        let ids: Vec<_> = subtask.children.values().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["#main/S-scatter-2/T"]);
    }
}
