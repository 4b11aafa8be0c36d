//! Parla search: memoized sorted view and substring matching over the
//! directory. Single in-RAM view; nothing is persisted.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parla_core::{DirectoryRecord, Fingerprint};
use smallvec::SmallVec;
use tracing::debug;

/// A prepared query: trimmed, lowercased, plus the digits-only form when the
/// query reads as a phone number ("55 1234-5678" does, "ana" does not).
#[derive(Debug, Clone)]
pub struct QueryNeedle {
    lowered: String,
    digits: Option<String>,
}

impl QueryNeedle {
    pub fn new(query: &str) -> Self {
        let lowered = query.trim().to_lowercase();
        let digits = phone_query_digits(&lowered);
        Self { lowered, digits }
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.lowered
    }
}

/// Digits left after stripping phone separators, provided nothing else
/// remains. Any other character disqualifies the query from phone matching.
fn phone_query_digits(q: &str) -> Option<String> {
    let stripped: String = q
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '+' | '-' | '(' | ')' | '.'))
        .collect();
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        Some(stripped)
    } else {
        None
    }
}

/// Messaging addresses and anything with 7+ digits count as phone-like.
fn token_is_phone_like(token: &str) -> bool {
    token.contains('@') || token.chars().filter(|c| c.is_ascii_digit()).count() >= 7
}

fn digits_of(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn entry_matches(
    lowered_name: &str,
    lowered_tokens: &[String],
    digit_tokens: &[String],
    needle: &QueryNeedle,
) -> bool {
    if lowered_name.contains(needle.lowered.as_str()) {
        return true;
    }
    if lowered_tokens.iter().any(|t| t.contains(needle.lowered.as_str())) {
        return true;
    }
    if let Some(digits) = &needle.digits {
        if digit_tokens.iter().any(|d| d.contains(digits.as_str())) {
            return true;
        }
    }
    false
}

/// Matching rule used by [`MatchIndex::search`], usable on its own for
/// one-off checks. An empty needle matches everything.
pub fn is_match(record: &DirectoryRecord, needle: &QueryNeedle) -> bool {
    if needle.is_empty() {
        return true;
    }
    let lowered_name = record.display_name.to_lowercase();
    let lowered_tokens: Vec<String> =
        record.match_tokens.iter().map(|t| t.to_lowercase()).collect();
    let digit_tokens: Vec<String> = record
        .match_tokens
        .iter()
        .filter(|t| token_is_phone_like(t))
        .map(|t| digits_of(t))
        .filter(|d| !d.is_empty())
        .collect();
    entry_matches(&lowered_name, &lowered_tokens, &digit_tokens, needle)
}

/// Sorted copy of one collection with the per-record matching forms
/// precomputed, so keystroke evaluation never re-lowercases anything.
pub struct SortedView {
    fingerprint: Fingerprint,
    records: Vec<DirectoryRecord>,
    lowered_names: Vec<String>,
    lowered_tokens: Vec<SmallVec<[String; 4]>>,
    digit_tokens: Vec<SmallVec<[String; 2]>>,
}

impl SortedView {
    pub fn records(&self) -> &[DirectoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn matches(&self, i: usize, needle: &QueryNeedle) -> bool {
        entry_matches(
            &self.lowered_names[i],
            &self.lowered_tokens[i],
            &self.digit_tokens[i],
            needle,
        )
    }
}

fn build_view(records: &[DirectoryRecord]) -> SortedView {
    let fingerprint = Fingerprint::of(records);
    let mut entries: Vec<(DirectoryRecord, String)> = records
        .iter()
        .map(|r| (r.clone(), r.display_name.to_lowercase()))
        .collect();
    // Live channels first, then lowered name. Stable, so equal keys keep
    // collection order.
    entries.sort_by(|(a, la), (b, lb)| {
        b.channel_live.cmp(&a.channel_live).then_with(|| la.cmp(lb))
    });

    let mut sorted = Vec::with_capacity(entries.len());
    let mut lowered_names = Vec::with_capacity(entries.len());
    let mut lowered_tokens = Vec::with_capacity(entries.len());
    let mut digit_tokens = Vec::with_capacity(entries.len());
    for (rec, lowered) in entries {
        let ltoks: SmallVec<[String; 4]> =
            rec.match_tokens.iter().map(|t| t.to_lowercase()).collect();
        let dtoks: SmallVec<[String; 2]> = rec
            .match_tokens
            .iter()
            .filter(|t| token_is_phone_like(t))
            .map(|t| digits_of(t))
            .filter(|d| !d.is_empty())
            .collect();
        sorted.push(rec);
        lowered_names.push(lowered);
        lowered_tokens.push(ltoks);
        digit_tokens.push(dtoks);
    }
    SortedView {
        fingerprint,
        records: sorted,
        lowered_names,
        lowered_tokens,
        digit_tokens,
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Result cap for non-empty queries when `limit` is not given.
    pub max_results: usize,
    /// Result cap for the empty-query listing when `limit` is not given.
    pub default_results: usize,
    /// Record to drop from any result (used for "everyone but me" pickers).
    pub exclude_id: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 50,
            default_results: 25,
            exclude_id: None,
            offset: 0,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SearchOutcome {
    pub records: Vec<DirectoryRecord>,
    /// Matches before slicing (after `exclude_id`).
    pub total_count: usize,
    pub has_more: bool,
    pub is_default_list: bool,
    /// Offset for the next page; only set while `has_more`.
    pub next_offset: Option<usize>,
}

/// Memoized sorted view plus paged substring search over one collection.
///
/// The index holds no collection of its own: callers pass the slice on every
/// call and the cached view is reused as long as its fingerprint matches.
/// One index serves one logical collection; the embedding application
/// decides sharing (usually one `Arc<MatchIndex>` next to the roster handle).
pub struct MatchIndex {
    view: ArcSwapOption<SortedView>,
}

impl MatchIndex {
    pub fn new() -> Self {
        Self { view: ArcSwapOption::empty() }
    }

    /// Cached sorted view of `records`; rebuilt only when the fingerprint
    /// moved. Unchanged collections get the same `Arc` back.
    pub fn sorted(&self, records: &[DirectoryRecord]) -> Arc<SortedView> {
        if let Some(view) = self.view.load_full() {
            if view.fingerprint.matches(records) {
                return view;
            }
        }
        let t0 = std::time::Instant::now();
        let view = Arc::new(build_view(records));
        metrics::gauge!("match_docs", records.len() as f64);
        metrics::counter!("match_rebuilds_total", 1u64);
        debug!(docs = records.len(), took_ms = %t0.elapsed().as_millis(), "match: view rebuilt");
        self.view.store(Some(view.clone()));
        view
    }

    /// Ranked, filtered, paginated view of `records` for `query`.
    ///
    /// Never fails: empty collections and out-of-range offsets come back as
    /// an empty outcome with `has_more = false`.
    pub fn search(
        &self,
        records: &[DirectoryRecord],
        query: &str,
        opts: &SearchOptions,
    ) -> SearchOutcome {
        let started = std::time::Instant::now();
        let view = self.sorted(records);
        let needle = QueryNeedle::new(query);
        let limit = if needle.is_empty() {
            opts.limit.unwrap_or(opts.default_results)
        } else {
            opts.limit.unwrap_or(opts.max_results)
        };
        let exclude = opts.exclude_id.as_deref();

        let mut out: Vec<DirectoryRecord> = Vec::new();
        let mut total = 0usize;
        for (i, rec) in view.records().iter().enumerate() {
            if exclude == Some(rec.id.as_str()) {
                continue;
            }
            if !needle.is_empty() && !view.matches(i, &needle) {
                continue;
            }
            if total >= opts.offset && out.len() < limit {
                out.push(rec.clone());
            }
            total += 1;
        }

        let has_more = opts.offset.saturating_add(limit) < total;
        let next_offset = if has_more { Some(opts.offset + out.len()) } else { None };
        metrics::histogram!("match_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
        SearchOutcome {
            records: out,
            total_count: total,
            has_more,
            is_default_list: needle.is_empty(),
            next_offset,
        }
    }

    /// Drops the cached view; the next call rebuilds. Escape hatch for
    /// callers that mutated a collection in place.
    pub fn clear_cache(&self) {
        self.view.store(None);
    }
}

impl Default for MatchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, name: &str, live: bool) -> DirectoryRecord {
        DirectoryRecord::new(id, name).with_channel_live(live)
    }

    fn rec_tok(id: &str, name: &str, tokens: &[&str], live: bool) -> DirectoryRecord {
        DirectoryRecord::new(id, name)
            .with_tokens(tokens.iter().map(|t| t.to_string()))
            .with_channel_live(live)
    }

    #[test]
    fn unchanged_collection_reuses_the_view() {
        let idx = MatchIndex::new();
        let recs = vec![rec("a", "Ana", false), rec("b", "Bia", true)];
        let v1 = idx.sorted(&recs);
        let v2 = idx.sorted(&recs);
        assert!(Arc::ptr_eq(&v1, &v2));

        let grown = vec![recs[0].clone(), recs[1].clone(), rec("c", "Caio", false)];
        let v3 = idx.sorted(&grown);
        assert!(!Arc::ptr_eq(&v1, &v3));

        idx.clear_cache();
        let v4 = idx.sorted(&grown);
        assert!(!Arc::ptr_eq(&v3, &v4));
    }

    #[test]
    fn live_channels_rank_first_then_lowered_name() {
        let idx = MatchIndex::new();
        let recs = vec![
            rec("1", "zara", false),
            rec("2", "Ana", false),
            rec("3", "beto", true),
            rec("4", "ana", true),
        ];
        let view = idx.sorted(&recs);
        let names: Vec<&str> = view.records().iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, ["ana", "beto", "Ana", "zara"]);
    }

    #[test]
    fn equal_keys_keep_collection_order() {
        let idx = MatchIndex::new();
        let recs = vec![
            rec("first", "Ana", false),
            rec("second", "ana", false),
            rec("third", "ANA", false),
        ];
        let view = idx.sorted(&recs);
        let ids: Vec<&str> = view.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "third"]);
    }

    #[test]
    fn empty_query_is_the_default_list() {
        let idx = MatchIndex::new();
        let recs = vec![rec("a", "Ana", false), rec("b", "Bia", false), rec("c", "Caio", false)];
        let opts = SearchOptions {
            default_results: 2,
            exclude_id: Some("b".into()),
            ..Default::default()
        };
        let out = idx.search(&recs, "  ", &opts);
        assert!(out.is_default_list);
        assert_eq!(out.total_count, 2);
        assert!(!out.has_more);
        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let idx = MatchIndex::new();
        let recs = vec![
            rec("a", "Ana Clara", false),
            rec("b", "Mariana", false),
            rec_tok("c", "Suporte", &["ana-team"], false),
            rec("d", "Beto", false),
        ];
        let out = idx.search(&recs, "ANA", &SearchOptions::default());
        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(out.total_count, 3);
        assert!(!out.has_more);
    }

    #[test]
    fn query_digits_match_phone_like_tokens() {
        let idx = MatchIndex::new();
        let recs = vec![
            rec_tok(
                "wa",
                "Cliente WhatsApp",
                &["5215512345678@s.whatsapp.net"],
                true,
            ),
            rec_tok("br", "Cliente BR", &["+55 (11) 91234-5678"], false),
            rec("plain", "Ana", false),
        ];

        // Digits buried in a JID, matched past the country prefix.
        let out = idx.search(&recs, "5512345678", &SearchOptions::default());
        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["wa"]);

        // Formatted query against a formatted token.
        let out = idx.search(&recs, "11 91234-5678", &SearchOptions::default());
        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["br"]);
    }

    #[test]
    fn short_digit_runs_are_not_phone_tokens() {
        // "u-17" carries digits but is not phone-like, so a digit query
        // can only hit it as a literal substring.
        let r = rec_tok("x", "Ana", &["u-17"], false);
        assert!(is_match(&r, &QueryNeedle::new("17")));
        assert!(!is_match(&r, &QueryNeedle::new("170")));

        let six = rec_tok("y", "Bia", &["123456"], false);
        assert!(!is_match(&six, &QueryNeedle::new("12 34 56")));
    }

    #[test]
    fn alpha_queries_never_take_the_digit_path() {
        let r = rec_tok("x", "Loja", &["5511912345678@s.whatsapp.net"], false);
        assert!(!is_match(&r, &QueryNeedle::new("ana")));
        // "@" makes the token itself searchable as text.
        assert!(is_match(&r, &QueryNeedle::new("whatsapp.net")));
    }

    #[test]
    fn slicing_is_half_open_with_next_offset() {
        let idx = MatchIndex::new();
        let recs: Vec<DirectoryRecord> = (0..7)
            .map(|i| rec(&format!("id{i}"), &format!("cliente {i:02}"), false))
            .collect();
        let opts = SearchOptions { offset: 2, limit: Some(3), ..Default::default() };
        let out = idx.search(&recs, "cliente", &opts);
        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["id2", "id3", "id4"]);
        assert_eq!(out.total_count, 7);
        assert!(out.has_more);
        assert_eq!(out.next_offset, Some(5));

        let tail = idx.search(
            &recs,
            "cliente",
            &SearchOptions { offset: 5, limit: Some(3), ..Default::default() },
        );
        assert_eq!(tail.records.len(), 2);
        assert!(!tail.has_more);
        assert_eq!(tail.next_offset, None);
    }

    #[test]
    fn out_of_range_offset_yields_empty() {
        let idx = MatchIndex::new();
        let recs = vec![rec("a", "Ana", false)];
        let out = idx.search(
            &recs,
            "ana",
            &SearchOptions { offset: 10, limit: Some(5), ..Default::default() },
        );
        assert!(out.records.is_empty());
        assert!(!out.has_more);
        assert_eq!(out.total_count, 1);
        assert_eq!(out.next_offset, None);

        let none = idx.search(&recs, "zzz", &SearchOptions::default());
        assert!(none.records.is_empty());
        assert_eq!(none.total_count, 0);
        assert!(!none.has_more);
    }

    #[test]
    fn empty_collection_is_fine() {
        let idx = MatchIndex::new();
        let out = idx.search(&[], "ana", &SearchOptions::default());
        assert!(out.records.is_empty());
        assert_eq!(out.total_count, 0);
        assert!(!out.has_more);
    }
}
