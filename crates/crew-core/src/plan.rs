use crate::model::Plan;
use crate::{CoreError, Result};
use std::collections::BTreeSet;

const FENCE: &str = "```";

pub fn build_decomposition_prompt(goal: &str) -> (String, String) {
    let prompt = format!(
        r#"You are planning work for a team of AI coding agents. Inspect the repository in the current working directory and split the goal below into work items that separate agents can carry out in parallel.

Goal: {goal}

Rules:
- Prefer independent work items; only use depends_on when an item cannot begin before another one finishes
- Every prompt must be concrete enough for an agent to act on without follow-up questions
- List the files each item will change when you can tell
- Produce between 2 and 6 work items for most goals; do not split trivial work
- Number ids sequentially from 1

Reply with exactly one JSON object, without code fences or commentary, shaped like this:

{{
  "goal": "the goal in your own words",
  "work_items": [
    {{
      "id": 1,
      "title": "Short title",
      "prompt": "Complete instructions for the agent",
      "files": ["src/lib.rs"],
      "depends_on": []
    }}
  ],
  "summary": "How and why the goal was split this way"
}}"#
    );

    let schema = r#"{
  "type": "object",
  "required": ["goal", "work_items", "summary"],
  "properties": {
    "goal": { "type": "string" },
    "summary": { "type": "string" },
    "work_items": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["id", "title", "prompt"],
        "properties": {
          "id": { "type": "integer" },
          "title": { "type": "string" },
          "prompt": { "type": "string" },
          "files": { "type": "array", "items": { "type": "string" } },
          "depends_on": { "type": "array", "items": { "type": "integer" } }
        }
      }
    }
  }
}"#
    .to_string();

    (prompt, schema)
}

/// Drops the first and last line when the text opens with a code fence.
fn strip_fence(raw: &str) -> &str {
    let text = raw.trim();
    if !text.starts_with(FENCE) {
        return text;
    }
    let Some(first_newline) = text.find('\n') else {
        return text;
    };
    let Some(last_newline) = text.rfind('\n') else {
        return text;
    };
    if last_newline <= first_newline {
        return text;
    }
    &text[first_newline + 1..last_newline]
}

/// Parses planner output into a [`Plan`]. No partial plan is ever returned.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let body = strip_fence(raw);
    let plan: Plan = serde_json::from_str(body).map_err(|e| {
        CoreError::PlanParse(format!("invalid plan json: {}\n\nraw output:\n{}", e, raw))
    })?;

    if plan.work_items.is_empty() {
        return Err(CoreError::PlanParse("plan contains no work items".into()));
    }

    let mut seen = BTreeSet::new();
    for item in &plan.work_items {
        if !seen.insert(item.id) {
            return Err(CoreError::PlanParse(format!(
                "duplicate work item id: {}",
                item.id
            )));
        }
    }

    Ok(plan)
}
