//! Signal fingerprint matcher.
//!
//! Post-analysis fuzzy duplicate check over recently emitted signals. Two
//! sources often report the same event with different wording, links and
//! numbers; once analysis has labelled both with the same action, event type
//! and asset, their stripped text is compared.

#![allow(clippy::cast_precision_loss)]

use crate::config::SignalMatchConfig;
use crate::models::{SignalRecord, TradeAction};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

static URL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)https?://\S+|www\.\S+").ok());

/// Lowercases, strips URLs, digits and punctuation, and folds whitespace.
#[must_use]
pub fn normalize_signal_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_urls = URL_PATTERN
        .as_ref()
        .map_or_else(|| lowered.clone(), |re| re.replace_all(&lowered, " ").into_owned());

    let mapped: String = without_urls
        .chars()
        .map(|c| {
            if c.is_alphabetic() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sequence similarity ratio in `[0, 1]`: `2 * M / T`.
///
/// `M` counts characters in matching blocks found by repeatedly taking the
/// longest common substring and recursing on both sides (Ratcliff/Obershelp).
/// Two empty strings score 1.
#[must_use]
pub fn sequence_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    if a == b {
        return 1.0;
    }
    let matched = matching_characters(&a, &b);
    (2 * matched) as f32 / total as f32
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    // Positions of every character in `b`, ascending.
    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        positions.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, &positions, (alo, ahi), (blo, bhi));
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    matched
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`; earliest wins ties.
///
/// Only positions of `b` holding the current character of `a` are visited,
/// so the cost follows the number of equal character pairs rather than the
/// product of the lengths.
fn longest_match(
    a: &[char],
    positions: &HashMap<char, Vec<usize>>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // Length of the match ending at (i - 1, j), keyed by j.
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(js) = positions.get(c) {
            let start = js.partition_point(|&j| j < blo);
            for &j in js[start..].iter().take_while(|&&j| j < bhi) {
                let size = j
                    .checked_sub(1)
                    .and_then(|prev| run_lengths.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, size);
                if size > best_size {
                    best_i = i + 1 - size;
                    best_j = j + 1 - size;
                    best_size = size;
                }
            }
        }
        run_lengths = next;
    }
    (best_i, best_j, best_size)
}

/// Longest prefix of `text` holding at most `max_chars` characters.
#[must_use]
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}

/// Number of distinct non-space characters present in both texts.
#[must_use]
pub fn shared_char_count(a: &str, b: &str) -> usize {
    let left: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    b.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<HashSet<char>>()
        .intersection(&left)
        .count()
}

/// What the matcher compares for one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFingerprint {
    /// Signal identifier.
    pub id: String,
    /// Normalized text.
    pub text: String,
    /// Suggested action.
    pub action: TradeAction,
    /// Event category.
    pub event_type: String,
    /// Asset code.
    pub asset: String,
    /// When the source message arrived.
    pub observed_at: DateTime<Utc>,
}

impl SignalFingerprint {
    /// Builds a fingerprint, normalizing `text`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        text: &str,
        action: TradeAction,
        event_type: impl Into<String>,
        asset: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            text: normalize_signal_text(text),
            action,
            event_type: event_type.into(),
            asset: asset.into(),
            observed_at,
        }
    }

    /// Fingerprint of an emission-ready record.
    #[must_use]
    pub fn from_record(record: &SignalRecord) -> Self {
        Self::new(
            record.id.clone(),
            &record.text,
            record.action,
            record.event_type.clone(),
            record.asset.clone(),
            record.observed_at,
        )
    }
}

/// A recent signal the candidate duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMatch {
    /// Identifier of the earlier signal.
    pub matched_id: String,
    /// Sequence ratio of the normalized texts.
    pub similarity: f32,
}

/// Four-condition duplicate test.
///
/// A candidate duplicates a reference only when all hold:
/// 1. `sequence_ratio` of normalized texts `>= similarity_threshold`
/// 2. action, event type and asset are equal
/// 3. `shared_char_count >= min_shared_chars`
/// 4. the two arrival times are at most `window` apart
///
/// Any single failure means not a duplicate. Text conditions only look at
/// the first `max_compare_chars` characters of each normalized text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalMatcher {
    similarity_threshold: f32,
    min_shared_chars: usize,
    window: Duration,
    max_compare_chars: usize,
}

impl SignalMatcher {
    /// Creates a matcher with the default comparison length.
    #[must_use]
    pub fn new(similarity_threshold: f32, min_shared_chars: usize, window: Duration) -> Self {
        Self {
            similarity_threshold,
            min_shared_chars,
            window,
            max_compare_chars: SignalMatchConfig::default().max_compare_chars,
        }
    }

    /// Limits how many characters of each text are compared.
    #[must_use]
    pub fn with_max_compare_chars(mut self, max_compare_chars: usize) -> Self {
        self.max_compare_chars = max_compare_chars.max(1);
        self
    }

    /// Creates a matcher from configuration.
    #[must_use]
    pub fn from_config(config: &SignalMatchConfig) -> Self {
        Self::new(
            config.similarity_threshold,
            config.min_shared_chars,
            config.window(),
        )
        .with_max_compare_chars(config.max_compare_chars)
    }

    /// Recency window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Returns true if the cheap conditions hold: equal metadata and arrival
    /// times within the window.
    #[must_use]
    pub fn could_match(&self, candidate: &SignalFingerprint, reference: &SignalFingerprint) -> bool {
        candidate.action == reference.action
            && candidate.event_type == reference.event_type
            && candidate.asset == reference.asset
            && (candidate.observed_at - reference.observed_at).abs() <= self.window
    }

    /// Similarity of `candidate` to `reference` if every condition holds.
    #[must_use]
    pub fn compare(&self, candidate: &SignalFingerprint, reference: &SignalFingerprint) -> Option<f32> {
        if !self.could_match(candidate, reference) {
            return None;
        }
        let left = char_prefix(&candidate.text, self.max_compare_chars);
        let right = char_prefix(&reference.text, self.max_compare_chars);
        if shared_char_count(left, right) < self.min_shared_chars {
            return None;
        }
        let similarity = sequence_ratio(left, right);
        (similarity >= self.similarity_threshold).then_some(similarity)
    }

    /// Most similar recent signal that `candidate` duplicates.
    #[must_use]
    pub fn find_duplicate<'a, I>(&self, candidate: &SignalFingerprint, recent: I) -> Option<SignalMatch>
    where
        I: IntoIterator<Item = &'a SignalFingerprint>,
    {
        recent
            .into_iter()
            .filter(|reference| reference.id != candidate.id)
            .filter_map(|reference| {
                self.compare(candidate, reference).map(|similarity| SignalMatch {
                    matched_id: reference.id.clone(),
                    similarity,
                })
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }

    /// Returns true if `candidate` duplicates any of `recent`.
    #[must_use]
    pub fn is_duplicate_signal(&self, candidate: &SignalFingerprint, recent: &[SignalFingerprint]) -> bool {
        self.find_duplicate(candidate, recent).is_some()
    }
}

impl Default for SignalMatcher {
    fn default() -> Self {
        Self::from_config(&SignalMatchConfig::default())
    }
}

/// Time-ordered window of recently emitted signals.
///
/// Only reachable through [`check_and_record`](Self::check_and_record) and
/// [`remove`](Self::remove). Text comparison runs outside the lock against a
/// snapshot; the insert then re-checks anything recorded in the meantime
/// under the lock, so of two racing near-identical signals only one is
/// recorded.
pub struct RecentSignalWindow {
    matcher: SignalMatcher,
    capacity: usize,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    entries: VecDeque<Recorded>,
    next_seq: u64,
}

#[derive(Clone)]
struct Recorded {
    seq: u64,
    fingerprint: SignalFingerprint,
}

impl WindowState {
    fn purge_before(&mut self, observed_at: DateTime<Utc>, window: Duration) {
        let Some(cutoff) = observed_at.checked_sub_signed(window) else {
            return;
        };
        while self
            .entries
            .front()
            .is_some_and(|e| e.fingerprint.observed_at < cutoff)
        {
            self.entries.pop_front();
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.fingerprint.id == id)
    }
}

impl RecentSignalWindow {
    /// Creates a window; capacity is at least one.
    #[must_use]
    pub fn new(matcher: SignalMatcher, capacity: usize) -> Self {
        Self {
            matcher,
            capacity: capacity.max(1),
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Creates a window from configuration.
    #[must_use]
    pub fn from_config(config: &SignalMatchConfig) -> Self {
        Self::new(SignalMatcher::from_config(config), config.capacity)
    }

    /// Checks `candidate` against the window and records it when unique.
    pub fn check_and_record(&self, candidate: SignalFingerprint) -> Option<SignalMatch> {
        let (snapshot, seen_up_to) = {
            let mut state = self.lock();
            state.purge_before(candidate.observed_at, self.matcher.window());
            let snapshot: Vec<SignalFingerprint> = state
                .entries
                .iter()
                .map(|e| &e.fingerprint)
                .filter(|f| self.matcher.could_match(&candidate, f))
                .cloned()
                .collect();
            (snapshot, state.next_seq)
        };

        let outside_lock = self.matcher.find_duplicate(&candidate, &snapshot);

        let mut state = self.lock();
        let found = match outside_lock {
            Some(found) if state.contains(&found.matched_id) => Some(found),
            // The match was removed meanwhile; rescan everything under the lock.
            Some(_) => self
                .matcher
                .find_duplicate(&candidate, state.entries.iter().map(|e| &e.fingerprint)),
            None => self.matcher.find_duplicate(
                &candidate,
                state
                    .entries
                    .iter()
                    .filter(|e| e.seq >= seen_up_to)
                    .map(|e| &e.fingerprint),
            ),
        };
        if found.is_none() {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push_back(Recorded {
                seq,
                fingerprint: candidate,
            });
            while state.entries.len() > self.capacity {
                state.entries.pop_front();
            }
        }
        drop(state);

        metrics::counter!(
            "dedup_checks_total",
            "stage" => "signal",
            "result" => if found.is_some() { "duplicate" } else { "unique" }
        )
        .increment(1);
        found
    }

    /// Removes a recorded signal; returns true if it was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.fingerprint.id != id);
        before != state.entries.len()
    }

    /// Number of recorded signals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    const SOL_A: &str = "Coinbase will list Solana (SOL) for spot trading starting today https://coinbase.com/blog/1";
    const SOL_B: &str = "BREAKING: Coinbase will list Solana SOL for spot trading from today! https://t.co/xyz";

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    fn fp(id: &str, text: &str, minutes: i64) -> SignalFingerprint {
        SignalFingerprint::new(id, text, TradeAction::Observe, "listing", "SOL", at(minutes))
    }

    #[test]
    fn test_normalize_strips_urls_digits_punctuation() {
        assert_eq!(
            normalize_signal_text("BTC hits $100,000!! See https://x.com/a?b=1 or www.example.org now"),
            "btc hits see or now"
        );
    }

    #[test]
    fn test_sequence_ratio_known_values() {
        assert!((sequence_ratio("abcd", "bcde") - 0.75).abs() < 1e-6);
        assert!((sequence_ratio("", "") - 1.0).abs() < f32::EPSILON);
        assert!(sequence_ratio("abc", "").abs() < f32::EPSILON);
        assert!((sequence_ratio("same text", "same text") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_listing_paraphrase_forty_minutes_apart_is_duplicate() {
        let matcher = SignalMatcher::default();
        let first = fp("a", SOL_A, 0);
        let second = fp("b", SOL_B, 40);
        let found = matcher.find_duplicate(&second, [&first]).unwrap();
        assert_eq!(found.matched_id, "a");
        assert!(found.similarity >= 0.80);
    }

    #[test_case(|c: &mut SignalFingerprint| c.action = TradeAction::Buy ; "action differs")]
    #[test_case(|c: &mut SignalFingerprint| c.event_type = "hack".to_string() ; "event type differs")]
    #[test_case(|c: &mut SignalFingerprint| c.asset = "ADA".to_string() ; "asset differs")]
    #[test_case(|c: &mut SignalFingerprint| c.observed_at += Duration::hours(7) ; "outside window")]
    #[test_case(|c: &mut SignalFingerprint| c.text = normalize_signal_text("Kraken halts withdrawals after exploit") ; "text dissimilar")]
    fn test_single_failing_condition_is_not_duplicate(mutate: fn(&mut SignalFingerprint)) {
        let matcher = SignalMatcher::default();
        let reference = fp("a", SOL_A, 0);
        let mut candidate = fp("b", SOL_B, 40);
        assert!(matcher.compare(&candidate, &reference).is_some());

        mutate(&mut candidate);
        assert!(matcher.compare(&candidate, &reference).is_none());
    }

    #[test]
    fn test_short_degenerate_text_rejected_by_char_floor() {
        let matcher = SignalMatcher::default();
        let a = fp("a", "up", 0);
        let b = fp("b", "up", 1);
        assert!((sequence_ratio(&a.text, &b.text) - 1.0).abs() < f32::EPSILON);
        assert!(!matcher.is_duplicate_signal(&b, &[a]));
    }

    #[test]
    fn test_window_records_unique_and_flags_duplicate() {
        let window = RecentSignalWindow::from_config(&SignalMatchConfig::default());
        assert!(window.check_and_record(fp("a", SOL_A, 0)).is_none());
        let found = window.check_and_record(fp("b", SOL_B, 40)).unwrap();
        assert_eq!(found.matched_id, "a");
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_window_purges_expired_and_respects_capacity() {
        let config = SignalMatchConfig {
            capacity: 2,
            ..SignalMatchConfig::default()
        };
        let window = RecentSignalWindow::from_config(&config);
        window.check_and_record(fp("old", SOL_A, 0));
        assert!(window.check_and_record(fp("new", SOL_B, 60 * 7)).is_none());
        assert_eq!(window.len(), 1);

        window.check_and_record(SignalFingerprint::new(
            "x",
            "Binance delists several margin pairs this week",
            TradeAction::Sell,
            "delisting",
            "NONE",
            at(60 * 7),
        ));
        window.check_and_record(SignalFingerprint::new(
            "y",
            "Ethereum foundation moves large ETH balance",
            TradeAction::Observe,
            "whale",
            "ETH",
            at(60 * 7),
        ));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_remove() {
        let window = RecentSignalWindow::from_config(&SignalMatchConfig::default());
        window.check_and_record(fp("a", SOL_A, 0));
        assert!(window.remove("a"));
        assert!(!window.remove("a"));
        assert!(window.check_and_record(fp("b", SOL_B, 40)).is_none());
    }

    #[test]
    fn test_char_prefix_respects_char_boundaries() {
        assert_eq!(char_prefix("héllo wörld", 4), "héll");
        assert_eq!(char_prefix("short", 100), "short");
        assert_eq!(char_prefix("", 3), "");
    }

    #[test]
    fn test_long_texts_compare_only_the_capped_prefix() {
        let shared: String = (0..100).map(|i| ["coinbase ", "lists ", "solana "][i % 3]).collect();
        let a = format!("{shared}{}", "kraken halts withdrawals ".repeat(60));
        let b = format!("{shared}{}", "binance opens perpetual markets ".repeat(60));
        let first = fp("a", &a, 0);
        let second = fp("b", &b, 5);

        let capped = SignalMatcher::default().with_max_compare_chars(300);
        let similarity = capped.compare(&second, &first).unwrap();
        assert!((similarity - 1.0).abs() < f32::EPSILON);

        let wide = capped.with_max_compare_chars(10_000);
        assert!(wide.compare(&second, &first).is_none());
    }

    #[test]
    fn test_window_survives_extreme_timestamps() {
        let window = RecentSignalWindow::new(
            SignalMatcher::new(0.8, 10, Duration::MAX),
            10,
        );
        let early = SignalFingerprint::new(
            "early",
            SOL_A,
            TradeAction::Observe,
            "listing",
            "SOL",
            DateTime::<Utc>::MIN_UTC,
        );
        assert!(window.check_and_record(early).is_none());

        let late = SignalFingerprint::new(
            "late",
            SOL_B,
            TradeAction::Observe,
            "listing",
            "SOL",
            DateTime::<Utc>::MAX_UTC,
        );
        assert_eq!(window.check_and_record(late).unwrap().matched_id, "early");

        let default_window = RecentSignalWindow::from_config(&SignalMatchConfig::default());
        assert!(
            default_window
                .check_and_record(SignalFingerprint::new(
                    "min",
                    SOL_A,
                    TradeAction::Observe,
                    "listing",
                    "SOL",
                    DateTime::<Utc>::MIN_UTC,
                ))
                .is_none()
        );
    }

    #[test]
    fn test_removed_match_is_not_reported() {
        let window = RecentSignalWindow::from_config(&SignalMatchConfig::default());
        window.check_and_record(fp("a", SOL_A, 0));
        window.check_and_record(fp("c", "Kraken halts withdrawals after exploit on hot wallet", 0));
        assert!(window.remove("a"));
        assert!(window.check_and_record(fp("b", SOL_B, 40)).is_none());
        assert_eq!(window.len(), 2);
    }

    /// Quadratic reference for the matching-block count.
    fn reference_ratio(a: &str, b: &str) -> f32 {
        fn longest(a: &[char], b: &[char], lo: (usize, usize), hi: (usize, usize)) -> (usize, usize, usize) {
            let mut best = (lo.0, lo.1, 0);
            for i in lo.0..hi.0 {
                for j in lo.1..hi.1 {
                    let mut k = 0;
                    while i + k < hi.0 && j + k < hi.1 && a[i + k] == b[j + k] {
                        k += 1;
                    }
                    if k > best.2 {
                        best = (i, j, k);
                    }
                }
            }
            best
        }
        fn blocks(a: &[char], b: &[char], lo: (usize, usize), hi: (usize, usize)) -> usize {
            let (i, j, k) = longest(a, b, lo, hi);
            if k == 0 {
                return 0;
            }
            k + blocks(a, b, lo, (i, j)) + blocks(a, b, (i + k, j + k), hi)
        }
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let m = blocks(&a, &b, (0, 0), (a.len(), b.len()));
        (2 * m) as f32 / (a.len() + b.len()) as f32
    }

    proptest! {
        #[test]
        fn prop_ratio_agrees_with_reference(a in "[abc ]{0,30}", b in "[abc ]{0,30}") {
            prop_assert!((sequence_ratio(&a, &b) - reference_ratio(&a, &b)).abs() < 1e-6);
        }

        #[test]
        fn prop_ratio_bounded_and_symmetric_on_identity(a in "[a-z ]{0,40}", b in "[a-z ]{0,40}") {
            let r = sequence_ratio(&a, &b);
            prop_assert!((0.0..=1.0).contains(&r));
            prop_assert!((sequence_ratio(&a, &a) - 1.0).abs() < f32::EPSILON);
        }

        #[test]
        fn prop_shared_chars_symmetric(a in "[a-z ]{0,40}", b in "[a-z ]{0,40}") {
            prop_assert_eq!(shared_char_count(&a, &b), shared_char_count(&b, &a));
        }
    }
}
