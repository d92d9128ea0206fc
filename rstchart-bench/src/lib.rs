//! Shared chart fixtures for the rstchart benchmarks.

use rstchart_model::Chart;
use serde_json::json;

/// A flat chart cycling through `width` states on `next`.
pub fn ring_chart(width: usize) -> Chart {
    let states: Vec<_> = (0..width)
        .map(|i| {
            json!({
                "id": format!("s{}", i),
                "transitions": [{"event": "next", "target": format!("s{}", (i + 1) % width)}]
            })
        })
        .collect();
    Chart::from_json(&json!({"name": format!("ring{}", width), "states": states}))
        .expect("ring chart is valid")
}

/// Nested parallel regions with deep history, guards and data updates.
pub fn workflow_chart() -> Chart {
    Chart::from_json(&json!({
        "name": "workflow",
        "data": [{"id": "n", "expr": "0"}],
        "states": [
            {"id": "main", "type": "parallel",
             "transitions": [{"event": "pause", "target": "paused"}],
             "states": [
                {"id": "left", "states": [
                    {"id": "hist", "type": "history", "history": "deep", "transitions": [{"target": "l1"}]},
                    {"id": "l1", "transitions": [{"event": "tick", "target": "l2"}]},
                    {"id": "l2", "transitions": [{"event": "tick", "target": "l1",
                        "actions": [{"action": "assign", "location": "n", "expr": "n + 1"}]}]}
                ]},
                {"id": "right", "states": [
                    {"id": "r1", "transitions": [{"event": "tick", "cond": "n >= 0", "target": "r2"}]},
                    {"id": "r2", "transitions": [{"event": "tick", "target": "r1"}]}
                ]}
             ]},
            {"id": "paused", "transitions": [{"event": "resume", "target": "hist"}]}
        ]
    }))
    .expect("workflow chart is valid")
}
