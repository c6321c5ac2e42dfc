// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use ai_file_organizer::ai::parse_json_reply;
use ai_file_organizer::planner::OrganizationPlan;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

fuzz_target!(|data: &[u8]| {
    let Ok(reply) = std::str::from_utf8(data) else {
        return;
    };
    if let Some(value) = parse_json_reply(reply) {
        if let Ok(plan) = OrganizationPlan::from_value(&value) {
            let plan = plan.deduplicate();
            let valid: HashSet<i64> = (0..16).collect();
            let _ = plan.validate(&valid, 2);
            let _ = plan.to_value();
        }
    }
});
