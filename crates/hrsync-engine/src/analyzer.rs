use std::collections::BTreeMap;
use std::sync::Arc;

use hrsync_core::{OTHER_CATEGORY, SchemaMap, SchemaStrategy};
use serde_json::Value;
use tracing::{debug, warn};

const PRIMARY_KEY_KEYWORDS: &[&str] = &[
    "employee id",
    "employee_id",
    "employee code",
    "emp id",
    "emp_id",
    "emp code",
    "staff id",
    "staff code",
];
const PHONE_KEYWORDS: &[&str] = &["phone", "mobile", "contact"];
const ROLE_KEYWORDS: &[&str] = &["role", "designation", "position", "job title"];

const PLACEHOLDER_KEY: &str = "ID";
const PLACEHOLDER_NAME: &str = "Name";

/// Maps raw headers to canonical roles.
///
/// A configured [`SchemaStrategy`] is consulted first; its answer is reconciled against
/// the header row so the result is always a partition. Without a strategy, or when it
/// fails, keyword matching decides.
#[derive(Clone, Default)]
pub struct SchemaAnalyzer {
    strategy: Option<Arc<dyn SchemaStrategy>>,
}

impl SchemaAnalyzer {
    pub fn deterministic() -> Self {
        Self { strategy: None }
    }

    pub fn with_strategy(strategy: Arc<dyn SchemaStrategy>) -> Self {
        Self {
            strategy: Some(strategy),
        }
    }

    pub fn analyze(&self, headers: &[String]) -> SchemaMap {
        let baseline = analyze_headers(headers);
        let Some(strategy) = &self.strategy else {
            return baseline;
        };
        if headers.is_empty() {
            return baseline;
        }
        match strategy.analyze(headers) {
            Ok(candidate) => match reconcile(&candidate, headers, &baseline) {
                Some(map) => {
                    debug!(strategy = strategy.name(), "schema analyzed by strategy");
                    map
                }
                None => {
                    warn!(
                        strategy = strategy.name(),
                        "schema strategy returned a non-object, using keyword analysis"
                    );
                    baseline
                }
            },
            Err(err) => {
                warn!(strategy = strategy.name(), error = %format!("{err:#}"), "schema strategy failed, using keyword analysis");
                baseline
            }
        }
    }
}

/// Keyword analysis. Never fails; an empty header row yields placeholder key/name.
pub fn analyze_headers(headers: &[String]) -> SchemaMap {
    let mut claimed: Vec<&str> = Vec::new();

    let primary_key = pick_primary_key(headers);
    if let Some(pk) = primary_key {
        claimed.push(pk);
    }

    let name = claim(headers, &mut claimed, |h| {
        h.contains("name") && !h.contains("id") && !h.contains("user")
    });
    let email = claim(headers, &mut claimed, |h| {
        h.contains("email") && !h.contains("password")
    });
    let phone = claim(headers, &mut claimed, |h| {
        PHONE_KEYWORDS.iter().any(|kw| h.contains(kw)) && !h.contains("email")
    });
    let messaging = claim(headers, &mut claimed, |h| h.contains("whatsapp"));
    let role = claim(headers, &mut claimed, |h| {
        ROLE_KEYWORDS.iter().any(|kw| h.contains(kw))
    });

    let name = name.or_else(|| {
        headers
            .get(1)
            .map(String::as_str)
            .filter(|header| !claimed.contains(header))
    });
    if let Some(name) = name {
        claimed.push(name);
    }

    let other: Vec<String> = headers
        .iter()
        .filter(|header| !claimed.contains(&header.as_str()))
        .cloned()
        .collect();

    SchemaMap {
        primary_key: primary_key.unwrap_or(PLACEHOLDER_KEY).to_string(),
        employee_name: name.map_or_else(|| name_placeholder(headers), str::to_string),
        email: email.map(str::to_string),
        phone: phone.map(str::to_string),
        messaging_handle: messaging.map(str::to_string),
        role_column: role.map(str::to_string),
        categories: BTreeMap::from([(OTHER_CATEGORY.to_string(), other)]),
    }
}

/// Stand-in name that cannot be mistaken for a real header.
fn name_placeholder(headers: &[String]) -> String {
    if headers.iter().any(|header| header == PLACEHOLDER_NAME) {
        String::new()
    } else {
        PLACEHOLDER_NAME.to_string()
    }
}

fn claim<'h>(
    headers: &'h [String],
    claimed: &mut Vec<&'h str>,
    predicate: impl Fn(&str) -> bool,
) -> Option<&'h str> {
    let found = headers
        .iter()
        .map(String::as_str)
        .find(|header| !claimed.contains(header) && predicate(&header.to_lowercase()));
    if let Some(header) = found {
        claimed.push(header);
    }
    found
}

fn pick_primary_key(headers: &[String]) -> Option<&str> {
    let lowered: Vec<(String, &str)> = headers
        .iter()
        .map(|header| (header.trim().to_lowercase(), header.as_str()))
        .collect();
    lowered
        .iter()
        .find(|(h, _)| PRIMARY_KEY_KEYWORDS.iter().any(|kw| h.contains(kw)))
        .or_else(|| lowered.iter().find(|(h, _)| h == "id" || h == "code"))
        .or_else(|| lowered.iter().find(|(h, _)| h.contains("id")))
        .or_else(|| lowered.first())
        .map(|(_, original)| *original)
}

/// Folds a strategy answer into a valid partition of `headers`.
///
/// Role fields naming unknown or already-placed columns are dropped (key and name fall
/// back to the keyword choice), duplicate category entries are removed and every header
/// the strategy left out lands in "other". Returns `None` when the answer is not a JSON
/// object at all.
pub fn reconcile(candidate: &Value, headers: &[String], baseline: &SchemaMap) -> Option<SchemaMap> {
    let object = candidate.as_object()?;
    let mut claimed: Vec<String> = Vec::new();

    let take = |claimed: &mut Vec<String>, field: &str| -> Option<String> {
        let value = object.get(field)?.as_str()?.trim();
        if value.is_empty() || claimed.iter().any(|c| c == value) {
            return None;
        }
        let header = headers.iter().find(|h| h.as_str() == value)?;
        claimed.push(header.clone());
        Some(header.clone())
    };

    let primary_key = take(&mut claimed, "primary_key").unwrap_or_else(|| {
        claimed.push(baseline.primary_key.clone());
        baseline.primary_key.clone()
    });
    let employee_name = take(&mut claimed, "employee_name").unwrap_or_else(|| {
        if claimed.contains(&baseline.employee_name) {
            name_placeholder(headers)
        } else {
            claimed.push(baseline.employee_name.clone());
            baseline.employee_name.clone()
        }
    });
    let email = take(&mut claimed, "email");
    let phone = take(&mut claimed, "phone");
    let messaging_handle =
        take(&mut claimed, "messaging_handle").or_else(|| take(&mut claimed, "whatsapp"));
    let role_column = take(&mut claimed, "role_column");

    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(raw) = object.get("categories").and_then(Value::as_object) {
        for (tag, columns) in raw {
            let Some(columns) = columns.as_array() else {
                continue;
            };
            for column in columns.iter().filter_map(Value::as_str) {
                if claimed.iter().any(|c| c == column) || !headers.iter().any(|h| h == column) {
                    continue;
                }
                claimed.push(column.to_string());
                categories
                    .entry(tag.trim().to_lowercase())
                    .or_default()
                    .push(column.to_string());
            }
        }
    }

    let omitted: Vec<String> = headers
        .iter()
        .filter(|header| !claimed.contains(header))
        .cloned()
        .collect();
    if !omitted.is_empty() {
        debug!(count = omitted.len(), "columns omitted by schema strategy moved to other");
        categories
            .entry(OTHER_CATEGORY.to_string())
            .or_default()
            .extend(omitted);
    }

    Some(SchemaMap {
        primary_key,
        employee_name,
        email,
        phone,
        messaging_handle,
        role_column,
        categories,
    })
}
