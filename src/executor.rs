//! Query execution over an encoded entries payload.
//!
//! Resolves the reference through the cache (a miss means the reference is
//! the payload), decodes it, then filters, sorts and paginates the entries.

use chrono::DateTime;
use serde::Serialize;
use std::borrow::Cow;
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::cache::PayloadCache;
use crate::error::{Error, Result};
use crate::normalize::{DATE_PREFIX, TEXT_PREFIX};
use crate::payload::{decode_entries, FieldValue, Fields};
use crate::query::{Constraint, Filter, Operator, Query, SortEntry};

/// Property holding the synthetic row identifier of every returned entry
pub const ROW_ID_PROPERTY: &str = "_row_id";

/// One decoded entry with its position-derived identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    #[serde(rename = "_row_id")]
    pub row_id: usize,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Entry {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Whether the entry holds any value for a column.
    fn has(&self, property: &str) -> bool {
        self.fields.contains_key(property)
            || self.fields.contains_key(&format!("{}{}", TEXT_PREFIX, property))
            || self.fields.contains_key(&format!("{}{}", DATE_PREFIX, property))
    }

    /// Plain text of a column, falling back to the display value.
    fn text(&self, property: &str) -> Option<Cow<'_, str>> {
        self.fields
            .get(&format!("{}{}", TEXT_PREFIX, property))
            .or_else(|| self.fields.get(property))
            .map(FieldValue::as_text)
    }

    fn date_value(&self, property: &str) -> Option<&FieldValue> {
        self.fields.get(&format!("{}{}", DATE_PREFIX, property))
    }

    fn timestamp(&self, property: &str) -> Option<i64> {
        self.date_value(property).and_then(FieldValue::as_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// The requested page of entries
    pub entries: Vec<Entry>,
    /// Number of entries that passed filtering, before pagination
    pub count: usize,
}

/// Runs queries against payload references, reading through an optional cache.
pub struct EntryStore<'c> {
    cache: Option<&'c PayloadCache>,
}

impl<'c> EntryStore<'c> {
    pub fn new(cache: Option<&'c PayloadCache>) -> Self {
        Self { cache }
    }

    /// Decode the entries behind a reference, numbering them in payload order.
    pub fn load(&self, reference: &str) -> Result<Vec<Entry>> {
        let decoded = match self.cache.and_then(|cache| cache.get(reference)) {
            Some(payload) => {
                debug!(len = payload.len(), "entries reference found in cache");
                decode_entries(&payload).map_err(Error::CorruptCachedData)?
            }
            None => {
                debug!("entries reference not in cache, reading it as the payload");
                decode_entries(reference).map_err(Error::UnresolvedReference)?
            }
        };
        Ok(decoded
            .into_iter()
            .enumerate()
            .map(|(row_id, fields)| Entry { row_id, fields })
            .collect())
    }

    pub fn execute(&self, reference: &str, query: &Query) -> Result<QueryResult> {
        let entries = self.load(reference)?;
        let total = entries.len();

        for constraint in query.filters.iter().flat_map(|f| &f.constraints) {
            if !constraint.is_recognized() {
                warn!(operator = %constraint.operator, "unknown filter operator, using contains");
            }
        }

        let mut matching: Vec<Entry> = entries
            .into_iter()
            .filter(|entry| query.filters.iter().all(|filter| passes(entry, filter)))
            .collect();
        let count = matching.len();

        if !query.sort.is_empty() {
            matching.sort_by(|a, b| compare_entries(a, b, &query.sort));
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        let page: Vec<Entry> = matching.into_iter().skip(query.offset).take(limit).collect();

        debug!(
            total,
            count,
            returned = page.len(),
            offset = query.offset,
            limit = ?query.limit,
            sort_keys = query.sort.len(),
            "executed query"
        );

        Ok(QueryResult {
            entries: page,
            count,
        })
    }
}

fn passes(entry: &Entry, filter: &Filter) -> bool {
    let ok = filter
        .constraints
        .iter()
        .all(|constraint| passes_constraint(entry, &filter.property, constraint));
    if !ok {
        debug!(row_id = entry.row_id, property = %filter.property, "entry filtered out");
    }
    ok
}

fn passes_constraint(entry: &Entry, property: &str, constraint: &Constraint) -> bool {
    match constraint.operator_kind() {
        Operator::Between => {
            let Some(date) = entry.date_value(property) else {
                return true;
            };
            let Some(timestamp) = date.as_timestamp() else {
                debug!(row_id = entry.row_id, %property, value = %date.as_text(), "date value is not a timestamp, skipping range");
                return true;
            };
            match parse_range(&constraint.value) {
                Some((begin, end)) => begin <= timestamp && timestamp <= end,
                None => {
                    debug!(value = %constraint.value, "malformed date range, ignoring constraint");
                    true
                }
            }
        }
        op => match entry.text(property) {
            Some(text) => text_matches(op, &text, &constraint.value),
            None => true,
        },
    }
}

fn text_matches(op: Operator, text: &str, value: &str) -> bool {
    match op {
        Operator::StartsWith => text.to_lowercase().starts_with(&value.to_lowercase()),
        Operator::Equals => text == value,
        Operator::Contains | Operator::Between => {
            text.to_lowercase().contains(&value.to_lowercase())
        }
    }
}

/// Parse `begin/end` as two RFC 3339 instants in epoch seconds.
fn parse_range(value: &str) -> Option<(i64, i64)> {
    let mut parts = value.split('/').map(str::trim).filter(|p| !p.is_empty());
    let (begin, end) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let begin = DateTime::parse_from_rfc3339(begin).ok()?.timestamp();
    let end = DateTime::parse_from_rfc3339(end).ok()?.timestamp();
    Some((begin, end))
}

/// Order two entries by the sort keys, first deciding key wins.
///
/// Within one key, rows with a date sort before rows without one; dated rows
/// compare numerically and the rest by text.
fn compare_entries(a: &Entry, b: &Entry, sort: &[SortEntry]) -> Ordering {
    for key in sort {
        let Some(ordering) = compare_on(a, b, &key.property) else {
            continue;
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_on(a: &Entry, b: &Entry, property: &str) -> Option<Ordering> {
    match (a.has(property), b.has(property)) {
        (false, false) => None,
        // present sorts before absent
        (true, false) => Some(Ordering::Less),
        (false, true) => Some(Ordering::Greater),
        (true, true) => Some(match (a.timestamp(property), b.timestamp(property)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a
                .text(property)
                .unwrap_or_default()
                .cmp(&b.text(property).unwrap_or_default()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{payload_key, CacheSettings};
    use crate::payload::PayloadCodec;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> String {
        PayloadCodec::default().encode_value(&value).unwrap()
    }

    fn texts(result: &QueryResult, key: &str) -> Vec<String> {
        result
            .entries
            .iter()
            .map(|e| e.get(key).map(|v| v.as_text().into_owned()).unwrap_or_default())
            .collect()
    }

    fn filter(property: &str, op: Operator, value: &str) -> Query {
        let mut query = Query::default();
        query.add_constraint(property, Constraint::new(op, value));
        query
    }

    #[test]
    fn test_contains_filter_case_insensitive() {
        let entries = payload(json!([{"0": "Apple"}, {"0": "Banana"}, {"0": "apricot"}]));
        let result = EntryStore::new(None)
            .execute(&entries, &filter("0", Operator::Contains, "ap"))
            .unwrap();
        assert_eq!(texts(&result, "0"), vec!["Apple", "apricot"]);
        assert_eq!(result.count, 2);
        let ids: Vec<usize> = result.entries.iter().map(|e| e.row_id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_starts_with_and_equals() {
        let entries = payload(json!([
            {"0": "<b>Apple</b>", "text.0": "Apple"},
            {"0": "<b>apple pie</b>", "text.0": "apple pie"},
            {"0": "<b>Pineapple</b>", "text.0": "Pineapple"}
        ]));
        let store = EntryStore::new(None);
        let result = store
            .execute(&entries, &filter("0", Operator::StartsWith, "APP"))
            .unwrap();
        assert_eq!(texts(&result, "text.0"), vec!["Apple", "apple pie"]);

        let result = store
            .execute(&entries, &filter("0", Operator::Equals, "Apple"))
            .unwrap();
        assert_eq!(texts(&result, "text.0"), vec!["Apple"]);
    }

    #[test]
    fn test_constraints_and_filters_are_conjunctive() {
        let entries = payload(json!([
            {"0": "alpha", "1": "x"},
            {"0": "alpine", "1": "y"},
            {"0": "beta", "1": "x"}
        ]));
        let mut query = filter("0", Operator::StartsWith, "al");
        query.add_constraint("0", Constraint::new(Operator::Contains, "ph"));
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(texts(&result, "0"), vec!["alpha"]);

        let mut query = filter("0", Operator::StartsWith, "al");
        query.add_constraint("1", Constraint::new(Operator::Equals, "y"));
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(texts(&result, "0"), vec!["alpine"]);
    }

    #[test]
    fn test_text_filter_on_missing_column_keeps_entry() {
        let entries = payload(json!([{"0": "a"}, {"0": "b", "1": "zzz"}]));
        let result = EntryStore::new(None)
            .execute(&entries, &filter("1", Operator::Contains, "q"))
            .unwrap();
        assert_eq!(texts(&result, "0"), vec!["a"]);
    }

    #[test]
    fn test_sort_ascending_descending_and_stable() {
        let entries = payload(json!([
            {"text.0": "b", "1": "first"},
            {"text.0": "a"},
            {"text.0": "c"},
            {"text.0": "b", "1": "second"}
        ]));
        let store = EntryStore::new(None);
        let mut query = Query::default();
        query.sort.push(SortEntry::ascending("0"));
        let result = store.execute(&entries, &query).unwrap();
        assert_eq!(texts(&result, "text.0"), vec!["a", "b", "b", "c"]);
        assert_eq!(texts(&result, "1"), vec!["", "first", "second", ""]);

        query.sort = vec![SortEntry::descending("0")];
        let result = store.execute(&entries, &query).unwrap();
        assert_eq!(texts(&result, "text.0"), vec!["c", "b", "b", "a"]);
        // ties keep their original order in both directions
        assert_eq!(texts(&result, "1"), vec!["", "first", "second", ""]);
    }

    #[test]
    fn test_sort_presence_before_absence() {
        let entries = payload(json!([{}, {"0": "x"}]));
        let store = EntryStore::new(None);
        let mut query = Query::default();
        query.sort.push(SortEntry::ascending("0"));
        let result = store.execute(&entries, &query).unwrap();
        let ids: Vec<usize> = result.entries.iter().map(|e| e.row_id).collect();
        assert_eq!(ids, vec![1, 0]);

        query.sort = vec![SortEntry::descending("0")];
        let result = store.execute(&entries, &query).unwrap();
        let ids: Vec<usize> = result.entries.iter().map(|e| e.row_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_sort_falls_through_to_next_key() {
        let entries = payload(json!([
            {"text.1": "b"},
            {"text.1": "a"},
            {"text.0": "z", "text.1": "c"}
        ]));
        let mut query = Query::default();
        query.sort = vec![SortEntry::descending("0"), SortEntry::ascending("1")];
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        // the entry lacking key 0 on both sides is ordered by key 1
        assert_eq!(texts(&result, "text.1"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_dates_numerically() {
        let entries = payload(json!([
            {"text.0": "10 Dec 1815", "date.0": -4861728000i64},
            {"text.0": "14 Nov 2023", "date.0": 1700000000},
            {"text.0": "1 Jan 1970", "date.0": 0}
        ]));
        let mut query = Query::default();
        query.sort.push(SortEntry::ascending("0"));
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(
            texts(&result, "text.0"),
            vec!["10 Dec 1815", "1 Jan 1970", "14 Nov 2023"]
        );
    }

    #[test]
    fn test_sort_mixed_date_column_is_total() {
        // xorshift keeps the row mix reproducible
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let rows: Vec<serde_json::Value> = (0..500)
            .map(|_| {
                let text = format!("{:04}", next() % 10_000);
                if next() % 2 == 0 {
                    json!({"text.0": text, "date.0": (next() % 1_000_000) as i64})
                } else {
                    json!({"text.0": text})
                }
            })
            .collect();
        let entries = payload(serde_json::Value::Array(rows));

        for descending in [false, true] {
            let mut query = Query::default();
            query.sort.push(SortEntry {
                property: "0".to_string(),
                descending,
            });
            let result = EntryStore::new(None).execute(&entries, &query).unwrap();
            assert_eq!(result.entries.len(), 500);

            let mut keys: Vec<(bool, i64, String)> = result
                .entries
                .iter()
                .map(|e| {
                    let date = e.get("date.0").and_then(FieldValue::as_timestamp);
                    let text = e.text("0").map(|t| t.into_owned()).unwrap_or_default();
                    (date.is_none(), date.unwrap_or(0), text)
                })
                .collect();
            if descending {
                keys.reverse();
            }
            // dated rows first by date, then undated rows by text
            for pair in keys.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                assert!(a.0 <= b.0, "dated row after undated row");
                if a.0 == b.0 {
                    if a.0 {
                        assert!(a.2 <= b.2, "{:?} before {:?}", a, b);
                    } else {
                        assert!(a.1 <= b.1, "{:?} before {:?}", a, b);
                    }
                }
            }
        }
    }

    #[test]
    fn test_sort_text_is_case_sensitive() {
        let entries = payload(json!([{"text.0": "b"}, {"text.0": "B"}, {"text.0": "a"}]));
        let mut query = Query::default();
        query.sort.push(SortEntry::ascending("0"));
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(texts(&result, "text.0"), vec!["B", "a", "b"]);
    }

    #[test]
    fn test_pagination_and_count() {
        let rows: Vec<serde_json::Value> = (0..30)
            .map(|i| json!({"0": format!("row {:02}", i), "1": if i < 25 { "keep" } else { "drop" }}))
            .collect();
        let entries = payload(json!(rows));
        let mut query = filter("1", Operator::Equals, "keep");
        query.offset = 10;
        query.limit = Some(5);
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(result.count, 25);
        assert_eq!(
            texts(&result, "0"),
            vec!["row 10", "row 11", "row 12", "row 13", "row 14"]
        );

        query.offset = 40;
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(result.count, 25);

        query.offset = 0;
        query.limit = None;
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(result.entries.len(), 25);
    }

    #[test]
    fn test_date_between_filter() {
        let entries = payload(json!([
            {"0": "in", "date.0": 1700000000},
            {"0": "before", "date.0": 1600000000},
            {"0": "no date"},
            {"0": "bad date", "date.0": "soon"}
        ]));
        let result = EntryStore::new(None)
            .execute(
                &entries,
                &filter(
                    "0",
                    Operator::Between,
                    "2023-01-01T00:00:00Z/2023-12-31T23:59:59Z",
                ),
            )
            .unwrap();
        assert_eq!(texts(&result, "0"), vec!["in", "no date", "bad date"]);
    }

    #[test]
    fn test_date_between_is_inclusive() {
        let entries = payload(json!([{"date.0": 1672531200}, {"date.0": 1672531199}]));
        let result = EntryStore::new(None)
            .execute(
                &entries,
                &filter("0", Operator::Between, "2023-01-01T00:00:00Z/2023-01-02T00:00:00Z"),
            )
            .unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.entries[0].row_id, 0);
    }

    #[test]
    fn test_malformed_range_is_no_constraint() {
        let entries = payload(json!([{"date.0": 1700000000}, {"date.0": 0}]));
        let store = EntryStore::new(None);
        for range in ["2023-01-01T00:00:00Z", "yesterday/today", "a/b/c", ""] {
            let result = store
                .execute(&entries, &filter("0", Operator::Between, range))
                .unwrap();
            assert_eq!(result.count, 2, "range {:?}", range);
        }
    }

    #[test]
    fn test_unknown_operator_acts_as_contains() {
        let entries = payload(json!([{"0": "Apple"}, {"0": "Banana"}]));
        let mut query = Query::default();
        query.add_constraint(
            "0",
            Constraint {
                operator: "fuzzy".to_string(),
                value: "NAN".to_string(),
            },
        );
        let result = EntryStore::new(None).execute(&entries, &query).unwrap();
        assert_eq!(texts(&result, "0"), vec!["Banana"]);
    }

    #[test]
    fn test_entries_serialize_with_row_id() {
        let entries = payload(json!([{"0": "42", "text.0": "42"}]));
        let result = EntryStore::new(None)
            .execute(&entries, &Query::default())
            .unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"entries": [{"_row_id": 0, "0": 42, "text.0": 42}], "count": 1})
        );
    }

    #[test]
    fn test_cache_hit_and_fallback() {
        let cache = PayloadCache::new("test.cache", &CacheSettings::default());
        let entries = payload(json!([{"0": "cached"}]));
        let key = payload_key(&entries);
        cache.put(key.clone(), entries.as_str());

        let store = EntryStore::new(Some(&cache));
        let result = store.execute(&key, &Query::default()).unwrap();
        assert_eq!(texts(&result, "0"), vec!["cached"]);

        // a never-stored reference is read as the payload itself
        let inline = payload(json!([{"0": "inline"}]));
        let result = store.execute(&inline, &Query::default()).unwrap();
        assert_eq!(texts(&result, "0"), vec!["inline"]);
    }

    #[test]
    fn test_unresolved_reference_error() {
        let cache = PayloadCache::new("test.cache", &CacheSettings::default());
        let err = EntryStore::new(Some(&cache))
            .execute("0123abcd-not-a-payload", &Query::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(_)), "got {:?}", err);
        assert!(err.to_string().contains("not in cache"));
    }

    #[test]
    fn test_corrupt_cached_data_error() {
        let cache = PayloadCache::new("test.cache", &CacheSettings::default());
        cache.put("key", "@@@ not base64 @@@");
        let err = EntryStore::new(Some(&cache))
            .execute("key", &Query::default())
            .unwrap_err();
        assert!(matches!(err, Error::CorruptCachedData(_)), "got {:?}", err);
        assert!(err.to_string().contains("found in cache"));
    }

    #[test]
    fn test_empty_reference_yields_no_entries() {
        let result = EntryStore::new(None).execute("", &Query::default()).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(result.count, 0);
    }
}
