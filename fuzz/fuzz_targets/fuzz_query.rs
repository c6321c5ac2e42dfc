// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use ai_file_organizer::query::parse_query_at;
use arbitrary::Arbitrary;
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct QueryInput {
    query: String,
    /// Seconds since the epoch, bounded below
    now: u32,
}

fuzz_target!(|input: QueryInput| {
    if let Some(now) = Utc.timestamp_opt(i64::from(input.now), 0).single() {
        let _ = parse_query_at(&input.query, now);
    }
});
