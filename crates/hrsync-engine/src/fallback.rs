use hrsync_core::{
    CellValue, EventContext, EventName, EventOutcome, Record, UpdatePlan, context_number,
    context_text,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BalanceKind {
    Ceiling,
    Consumed,
    Remaining,
}

impl BalanceKind {
    /// A bare "total" word only marks a ceiling when `allow_bare_total` is set.
    fn classify(lower: &str, words: &[&str], allow_bare_total: bool) -> Option<Self> {
        if ["entitlement", "carry forward", "carried forward", "carry-forward"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            return Some(Self::Ceiling);
        }
        if ["taken", "availed", "consumed"].iter().any(|kw| lower.contains(kw)) {
            return Some(Self::Consumed);
        }
        if ["remaining", "balance", "available"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            return Some(Self::Remaining);
        }
        (allow_bare_total && words.contains(&"total")).then_some(Self::Ceiling)
    }
}

fn words(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn has_phrase(words: &[&str], first: &str, second: &str) -> bool {
    words.windows(2).any(|pair| pair[0] == first && pair[1] == second)
}

/// Leave sheets often carry unprefixed counters ("Days Taken", "Balance").
const UNPREFIXED_BALANCE_FAMILY: &str = "leave";

/// Deterministic plan built from header keywords. Pure and infallible.
pub fn fallback_plan(
    headers: &[String],
    record: &Record,
    event: &EventName,
    context: &EventContext,
) -> UpdatePlan {
    let family = event.family();
    let status = event.outcome.status_label();
    let reason = context_text(context, "reason");
    let start_date = context_text(context, "start_date");
    let end_date = context_text(context, "end_date");
    let decided_by = context_text(context, "decided_by");

    let mut plan = UpdatePlan::default();
    let mut has_status = false;
    let mut balances: Vec<(BalanceKind, &str)> = Vec::new();

    for header in headers {
        let lower = header.to_lowercase();
        let words = words(&lower);
        let related = !family.is_empty() && lower.contains(family);
        let dated = related || lower.contains("upcoming");
        let balance = if related {
            BalanceKind::classify(&lower, &words, true)
        } else if family == UNPREFIXED_BALANCE_FAMILY {
            BalanceKind::classify(&lower, &words, false)
        } else {
            None
        };

        if related && lower.contains("status") {
            plan.set(header.as_str(), status);
            has_status = true;
        } else if related && lower.contains("reason") {
            if let Some(reason) = &reason {
                plan.set(header.as_str(), reason.as_str());
            }
        } else if has_phrase(&words, "decided", "by") || has_phrase(&words, "approved", "by") {
            if let Some(decided_by) = &decided_by {
                plan.set(header.as_str(), decided_by.as_str());
            }
        } else if let Some(kind) = balance {
            balances.push((kind, header.as_str()));
        } else if dated && words.iter().any(|w| matches!(*w, "from" | "start")) {
            if let Some(start) = &start_date {
                plan.set(header.as_str(), start.as_str());
            }
        } else if dated
            && !words.contains(&"total")
            && words.iter().any(|w| matches!(*w, "to" | "end" | "until"))
        {
            if let Some(end) = &end_date {
                plan.set(header.as_str(), end.as_str());
            }
        }
    }

    if !has_status {
        let column = format!("{} Request Status", event.family_title());
        plan.set(column.clone(), status);
        plan.add_new_column(column);
    }

    if event.outcome == EventOutcome::Approved {
        let duration = context_number(context, "duration").or_else(|| context_number(context, "days"));
        if let Some(duration) = duration {
            apply_balance(&mut plan, record, &balances, duration);
        }
    }

    plan
}

fn apply_balance(
    plan: &mut UpdatePlan,
    record: &Record,
    balances: &[(BalanceKind, &str)],
    duration: f64,
) {
    let of_kind = |kind: BalanceKind| -> Vec<&str> {
        balances
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, column)| *column)
            .collect()
    };

    let mut new_taken = Vec::new();
    for column in of_kind(BalanceKind::Consumed) {
        let current = match record.get(column) {
            None | Some(CellValue::Empty) => Some(0.0),
            Some(cell) => cell.as_number(),
        };
        if let Some(current) = current {
            let taken = current + duration;
            plan.set(column, taken);
            new_taken.push(taken);
        }
    }

    let ceilings: Vec<f64> = of_kind(BalanceKind::Ceiling)
        .into_iter()
        .filter_map(|column| record.get(column).and_then(CellValue::as_number))
        .collect();
    let derived = match (ceilings.as_slice(), new_taken.as_slice()) {
        ([ceiling], [taken]) => Some(ceiling - taken),
        _ => None,
    };

    for column in of_kind(BalanceKind::Remaining) {
        let current = record.get(column).and_then(CellValue::as_number);
        if let Some(remaining) = derived.or(current.map(|value| value - duration)) {
            plan.set(column, remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn context(value: serde_json::Value) -> EventContext {
        value.as_object().cloned().unwrap_or_default()
    }

    fn record(pairs: &[(&str, CellValue)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn maps_status_reason_and_dates() {
        let cols = headers(&[
            "Emp ID",
            "Leave Status",
            "Leave Reason",
            "Upcoming Leave From",
            "Upcoming Leave To",
            "Total Leaves",
        ]);
        let ctx = context(json!({
            "reason": "Family function",
            "start_date": "2026-11-02",
            "end_date": "2026-11-04"
        }));
        let plan = fallback_plan(&cols, &Record::new(), &EventName::parse("leave_applied"), &ctx);
        assert_eq!(plan.updates.get("Leave Status"), Some(&CellValue::from("Pending")));
        assert_eq!(plan.updates.get("Leave Reason"), Some(&CellValue::from("Family function")));
        assert_eq!(plan.updates.get("Upcoming Leave From"), Some(&CellValue::from("2026-11-02")));
        assert_eq!(plan.updates.get("Upcoming Leave To"), Some(&CellValue::from("2026-11-04")));
        assert!(!plan.updates.contains_key("Total Leaves"));
        assert!(plan.new_columns.is_empty());
    }

    #[test]
    fn synthesizes_status_column_when_missing() {
        let cols = headers(&["Emp ID", "Name"]);
        let plan = fallback_plan(
            &cols,
            &Record::new(),
            &EventName::parse("expense_rejected"),
            &EventContext::new(),
        );
        assert_eq!(plan.new_columns, vec!["Expense Request Status".to_string()]);
        assert_eq!(
            plan.updates.get("Expense Request Status"),
            Some(&CellValue::from("Rejected"))
        );
    }

    #[test]
    fn unknown_outcome_writes_pending() {
        let cols = headers(&["Emp ID", "Onboarding Status"]);
        let plan = fallback_plan(
            &cols,
            &Record::new(),
            &EventName::parse("onboarding_started"),
            &EventContext::new(),
        );
        assert_eq!(plan.updates.get("Onboarding Status"), Some(&CellValue::from("Pending")));
    }

    #[test]
    fn records_who_decided() {
        let cols = headers(&["Emp ID", "Leave Status", "Approved By"]);
        let ctx = context(json!({"decided_by": "Priya"}));
        let plan = fallback_plan(&cols, &Record::new(), &EventName::parse("leave_approved"), &ctx);
        assert_eq!(plan.updates.get("Approved By"), Some(&CellValue::from("Priya")));
    }

    #[test]
    fn approved_leave_keeps_entitlement_consistent() {
        let cols = headers(&[
            "Emp ID",
            "Leave Status",
            "Total Leave Entitlement",
            "Leaves Taken",
            "Leaves Remaining",
        ]);
        let row = record(&[
            ("Emp ID", CellValue::from("E1")),
            ("Total Leave Entitlement", CellValue::from(24_i64)),
            ("Leaves Taken", CellValue::from(4_i64)),
            ("Leaves Remaining", CellValue::from(20_i64)),
        ]);
        let ctx = context(json!({"duration": 3}));
        let plan = fallback_plan(&cols, &row, &EventName::parse("leave_approved"), &ctx);
        assert_eq!(plan.updates.get("Leaves Taken"), Some(&CellValue::Number(7.0)));
        assert_eq!(plan.updates.get("Leaves Remaining"), Some(&CellValue::Number(17.0)));
        assert!(!plan.updates.contains_key("Total Leave Entitlement"));
    }

    #[test]
    fn inconsistent_row_derives_remaining_from_entitlement() {
        let cols = headers(&["Emp ID", "Leave Entitlement", "Leave Taken", "Leave Balance"]);
        let row = record(&[
            ("Leave Entitlement", CellValue::from(20_i64)),
            ("Leave Taken", CellValue::from(5_i64)),
            ("Leave Balance", CellValue::from(9_i64)),
        ]);
        let ctx = context(json!({"days": "2"}));
        let plan = fallback_plan(&cols, &row, &EventName::parse("leave_approved"), &ctx);
        assert_eq!(plan.updates.get("Leave Taken"), Some(&CellValue::Number(7.0)));
        assert_eq!(plan.updates.get("Leave Balance"), Some(&CellValue::Number(13.0)));
    }

    #[test]
    fn balances_untouched_unless_approved() {
        let cols = headers(&["Emp ID", "Leave Status", "Leave Balance"]);
        let row = record(&[("Leave Balance", CellValue::from(10_i64))]);
        let ctx = context(json!({"duration": 2}));
        for event in ["leave_applied", "leave_rejected"] {
            let plan = fallback_plan(&cols, &row, &EventName::parse(event), &ctx);
            assert!(!plan.updates.contains_key("Leave Balance"), "{event}");
        }
    }

    #[test]
    fn unprefixed_leave_counters_are_updated() {
        let cols = headers(&["Emp ID", "Leave Status", "Total Entitlement", "Days Taken", "Balance"]);
        let row = record(&[
            ("Emp ID", CellValue::from("E1")),
            ("Total Entitlement", CellValue::from(24_i64)),
            ("Days Taken", CellValue::from(4_i64)),
            ("Balance", CellValue::from(20_i64)),
        ]);
        let ctx = context(json!({"duration": 3}));
        let plan = fallback_plan(&cols, &row, &EventName::parse("leave_approved"), &ctx);
        assert_eq!(plan.updates.get("Days Taken"), Some(&CellValue::Number(7.0)));
        assert_eq!(plan.updates.get("Balance"), Some(&CellValue::Number(17.0)));
        assert!(!plan.updates.contains_key("Total Entitlement"));
    }

    #[test]
    fn unprefixed_counters_ignored_for_other_families() {
        let cols = headers(&["Emp ID", "Expense Status", "Balance"]);
        let row = record(&[("Balance", CellValue::from(100_i64))]);
        let ctx = context(json!({"duration": 3}));
        let plan = fallback_plan(&cols, &row, &EventName::parse("expense_approved"), &ctx);
        assert!(!plan.updates.contains_key("Balance"));
    }

    #[test]
    fn counters_named_like_dates_are_not_overwritten_with_dates() {
        let cols = headers(&["Emp ID", "Leave Status", "Leaves Taken To Date", "Leaves Remaining"]);
        let row = record(&[
            ("Leaves Taken To Date", CellValue::from(4_i64)),
            ("Leaves Remaining", CellValue::from(20_i64)),
        ]);
        let ctx = context(json!({"duration": 3, "end_date": "2026-11-04"}));
        let plan = fallback_plan(&cols, &row, &EventName::parse("leave_request_approved"), &ctx);
        assert_eq!(plan.updates.get("Leaves Taken To Date"), Some(&CellValue::Number(7.0)));
        assert_eq!(plan.updates.get("Leaves Remaining"), Some(&CellValue::Number(17.0)));
    }

    #[test]
    fn decided_on_dates_do_not_receive_the_approver() {
        let cols = headers(&["Emp ID", "Leave Status", "Decided On", "Decided By"]);
        let ctx = context(json!({"decided_by": "Priya"}));
        let plan = fallback_plan(&cols, &Record::new(), &EventName::parse("leave_approved"), &ctx);
        assert_eq!(plan.updates.get("Decided By"), Some(&CellValue::from("Priya")));
        assert!(!plan.updates.contains_key("Decided On"));
    }
}
