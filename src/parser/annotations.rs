//! Directive extraction from the comment block above a function.
//!
//! Recognized directives are `@sync`, `@async` and `@cost low|high`, one per
//! comment line, in any order. Other `@words` (doc tags such as `@param`) are
//! ignored. A recognized directive with a bad argument, or two directives that
//! contradict each other, is an error for that function.

use std::sync::LazyLock;

use regex::Regex;

use super::descriptor::{Annotations, CostHint, SyncPolicy};

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@(sync|async|cost)\b\s*(.*?)\s*$").expect("valid directive regex")
});

/// Fold comment lines (top to bottom) into an annotation set
pub fn extract<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Annotations, String> {
    let mut policy = None;
    let mut cost = None;

    for line in lines {
        let Some(caps) = DIRECTIVE.captures(line.trim()) else {
            continue;
        };
        let arg = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        match &caps[1] {
            "sync" | "async" => {
                if !arg.is_empty() {
                    return Err(format!("unexpected argument '{}' to @{}", arg, &caps[1]));
                }
                let p = if &caps[1] == "sync" {
                    SyncPolicy::Sync
                } else {
                    SyncPolicy::Async
                };
                if policy.is_some_and(|prev| prev != p) {
                    return Err("conflicting @sync and @async directives".to_string());
                }
                policy = Some(p);
            }
            _ => {
                let c = match arg {
                    "low" => CostHint::Low,
                    "high" => CostHint::High,
                    "" => return Err("@cost requires 'low' or 'high'".to_string()),
                    other => {
                        return Err(format!(
                            "invalid @cost value '{}' (expected low or high)",
                            other
                        ))
                    }
                };
                if cost.is_some_and(|prev| prev != c) {
                    return Err("conflicting @cost directives".to_string());
                }
                cost = Some(c);
            }
        }
    }

    Ok(Annotations {
        policy: policy.unwrap_or_default(),
        cost: cost.unwrap_or_default(),
    })
}
