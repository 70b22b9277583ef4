//! Deterministic textual rendering of the observed-routes table.

use std::collections::HashMap;

/// One row of the observed-routes table: the route itself, whether it matched the
/// whitelist, and the wall-clock ms at which it was recorded.
pub type RouteEntry = (Vec<String>, bool, u64);

/// Render the final report: one sorted line per (src, dst) pair plus a trailing
/// verdict line, with a leading blank line as required by the external-interfaces
/// contract.
pub fn render(routes: &HashMap<(String, String), RouteEntry>) -> String {
    let mut keys: Vec<&(String, String)> = routes.keys().collect();
    keys.sort();

    let mut all_correct = true;
    let mut lines = Vec::with_capacity(keys.len());
    for key in keys {
        let (route, is_correct, _time_ms) = &routes[key];
        let route_str = format!("[{}]", route.join(", "));
        let suffix = if *is_correct { "" } else { " Incorrect Route" };
        lines.push(format!("{} -> {}: {}{}", key.0, key.1, route_str, suffix));
        all_correct &= is_correct;
    }

    let verdict = if all_correct && !routes.is_empty() {
        "SUCCESS: All Routes correct!"
    } else {
        "FAILURE: Not all routes are correct"
    };

    let mut out = String::from("\n");
    for line in &lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(verdict);
    out
}
