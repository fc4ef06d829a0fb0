//! Multi-term query engine: tokenizes a query string, opens a cursor per
//! resolved term, joins and scores matches, and folds the result into a
//! caller-owned record → score map.
//!
//! The literal design drives everything through `token_info_skip` against
//! live cursors and a min-heap over sub-cursors. This crate's cursors
//! already materialize their whole posting list up front (see
//! `cursor.rs`), so the join below walks plain `Vec<Posting>` slices with
//! the same skip-ahead shape `binary_merge`'s `holistic_binary_merge`
//! uses: sort by posting-list length, drive from the shortest list, and
//! restart whenever a longer list jumps past the current candidate.

mod query;
mod tokenize;

pub use query::{CorpusStats, ResultSet, SelectMode, SelectOp, SelectQuery};

use std::cmp::Reverse;

use priority_queue::PriorityQueue;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::error::IiResult;
use crate::index::Index;
use crate::lexicon::Lexicon;
use crate::model::posting::Posting;
use crate::scoring::Scorer;

use tokenize::{normalize, tokenize};

/// Below this many accumulated hits, an `EXACT` query under `OR` widens
/// to `UNSPLIT` then `PARTIAL` rather than return a near-empty result.
const MATCH_ESCALATION_THRESHOLD: usize = 2;

#[derive(Clone)]
struct TokenInfo {
    postings: Vec<Posting>,
    idx: usize,
}

impl TokenInfo {
    fn new(postings: Vec<Posting>) -> Self {
        TokenInfo { postings, idx: 0 }
    }

    fn len(&self) -> usize {
        self.postings.len()
    }

    fn current(&self) -> Option<&Posting> {
        self.postings.get(self.idx)
    }

    fn next(&mut self) -> bool {
        self.idx += 1;
        self.idx < self.postings.len()
    }

    /// Advances to the first posting at or after `(rid, sid)`, returning
    /// whether one exists.
    fn advance_to(&mut self, rid: u32, sid: u32) -> bool {
        while let Some(p) = self.postings.get(self.idx) {
            if (p.rid, p.sid) >= (rid, sid) {
                return true;
            }
            self.idx += 1;
        }
        false
    }
}

/// Merges several term-id posting lists into one ascending `(rid, sid)`
/// stream, used for `PREFIX`/`SUFFIX`/`UNSPLIT`/`PARTIAL` expansions that
/// fan a single query token out to many lexicon entries.
fn merge_by_rid_sid(lists: Vec<Vec<Posting>>) -> Vec<Posting> {
    let mut heap: PriorityQueue<usize, Reverse<(u32, u32)>> = PriorityQueue::new();
    let mut idxs = vec![0usize; lists.len()];
    for (i, list) in lists.iter().enumerate() {
        if let Some(p) = list.first() {
            heap.push(i, Reverse((p.rid, p.sid)));
        }
    }
    let mut out = Vec::new();
    while let Some((i, _)) = heap.pop() {
        let p = lists[i][idxs[i]].clone();
        idxs[i] += 1;
        if let Some(next) = lists[i].get(idxs[i]) {
            heap.push(i, Reverse((next.rid, next.sid)));
        }
        out.push(p);
    }
    out
}

/// Performs the AND/phrase skip-join over `tokens` (sorted internally by
/// list length), returning every `(rid, sid)` where all tokens co-occur.
fn and_join(tokens: &mut [TokenInfo]) -> Vec<(u32, u32)> {
    if tokens.is_empty() {
        return Vec::new();
    }
    tokens.sort_by_key(|t| t.len());
    let mut hits = Vec::new();
    let Some(first) = tokens[0].current() else {
        return hits;
    };
    let mut current = (first.rid, first.sid);
    let mut i = 1usize;
    loop {
        if i == tokens.len() {
            hits.push(current);
            if !tokens[0].next() {
                break;
            }
            current = match tokens[0].current() {
                Some(p) => (p.rid, p.sid),
                None => break,
            };
            i = 1;
            continue;
        }
        if !tokens[i].advance_to(current.0, current.1) {
            break;
        }
        let cand = tokens[i].current().map(|p| (p.rid, p.sid)).unwrap();
        if cand > current {
            if !tokens[0].advance_to(cand.0, cand.1) {
                break;
            }
            current = tokens[0].current().map(|p| (p.rid, p.sid)).unwrap();
            i = 0;
        }
        i += 1;
    }
    hits
}

/// Whether positions drawn from `n` distinct tokens can all fit within a
/// window of width `max_interval`, the simplified stand-in for the
/// literal design's `btr`-driven min/max tracking.
fn near_hit(token_positions: &[&[u32]], max_interval: u32) -> bool {
    let n = token_positions.len();
    let mut all: Vec<(u32, usize)> = Vec::new();
    for (ti, positions) in token_positions.iter().enumerate() {
        all.extend(positions.iter().map(|&p| (p, ti)));
    }
    all.sort_unstable();
    let mut count = vec![0u32; n];
    let mut distinct = 0usize;
    let mut left = 0usize;
    for right in 0..all.len() {
        let (_, ti) = all[right];
        if count[ti] == 0 {
            distinct += 1;
        }
        count[ti] += 1;
        while all[right].0 - all[left].0 > max_interval {
            let (_, tl) = all[left];
            count[tl] -= 1;
            if count[tl] == 0 {
                distinct -= 1;
            }
            left += 1;
        }
        if distinct == n {
            return true;
        }
    }
    false
}

fn apply_section_weight(score: f32, sid: u32, weights: &Option<Vec<f32>>) -> f32 {
    match weights {
        Some(w) => w.get(sid as usize).copied().map(|w| score * w).unwrap_or(score),
        None => score,
    }
}

fn res_add(results: &mut ResultSet, op: SelectOp, bootstrap: bool, rid: u32, score: f32) {
    match op {
        SelectOp::Or => {
            *results.entry(rid).or_insert(0.0) += score;
        }
        SelectOp::And => {
            if bootstrap {
                results.insert(rid, score);
            } else if let Some(s) = results.get_mut(&rid) {
                *s += score;
            }
        }
        SelectOp::AndNot => {
            results.remove(&rid);
        }
        SelectOp::Adjust => {
            if let Some(s) = results.get_mut(&rid) {
                *s += score;
            }
        }
    }
}

impl Index {
    /// Resolves `query` into a set of matching records scored by `scorer`
    /// and folds them into `results` according to `query.op`.
    pub fn select(
        &mut self,
        lexicon: &dyn Lexicon,
        query: &SelectQuery,
        scorer: &dyn Scorer,
        stats: &CorpusStats,
        results: &mut ResultSet,
    ) -> IiResult<()> {
        let mut local: FxHashMap<u32, f32> = FxHashMap::default();

        match query.mode {
            SelectMode::TermExtract => self.term_extract(lexicon, &query.text, scorer, stats, &mut local)?,
            SelectMode::Similar => self.similar(lexicon, &query.text, query.limit, scorer, stats, &mut local)?,
            _ => self.token_query(lexicon, query, scorer, stats, &mut local)?,
        }

        let bootstrap = results.is_empty();
        for (&rid, &score) in &local {
            res_add(results, query.op, bootstrap, rid, score);
        }
        if !bootstrap && matches!(query.op, SelectOp::And) {
            results.retain(|rid, _| local.contains_key(rid));
        }

        if matches!(query.mode, SelectMode::Exact)
            && matches!(query.op, SelectOp::Or)
            && local.len() <= MATCH_ESCALATION_THRESHOLD
        {
            let mut escalated = query.clone();
            escalated.mode = SelectMode::Unsplit;
            self.select(lexicon, &escalated, scorer, stats, results)?;
            escalated.mode = SelectMode::Partial;
            self.select(lexicon, &escalated, scorer, stats, results)?;
        }

        Ok(())
    }

    fn resolve_tids(&self, lexicon: &dyn Lexicon, token: &str, mode: SelectMode) -> Vec<u32> {
        match mode {
            SelectMode::Prefix => lexicon.prefix_search(token),
            SelectMode::Suffix => lexicon.suffix_search(token),
            SelectMode::Unsplit => {
                let mut ids = lexicon.prefix_search(token);
                ids.extend(lexicon.suffix_search(token));
                ids.sort_unstable();
                ids.dedup();
                ids
            }
            SelectMode::Partial => {
                let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(token))) else {
                    return Vec::new();
                };
                lexicon
                    .prefix_search("")
                    .into_iter()
                    .filter(|&tid| lexicon.get_term(tid).map(|t| re.is_match(t)).unwrap_or(false))
                    .collect()
            }
            _ => lexicon.get_id(token).into_iter().collect(),
        }
    }

    fn token_query(
        &mut self,
        lexicon: &dyn Lexicon,
        query: &SelectQuery,
        scorer: &dyn Scorer,
        stats: &CorpusStats,
        local: &mut FxHashMap<u32, f32>,
    ) -> IiResult<()> {
        let words = tokenize(&query.text);
        let mut token_infos = Vec::new();
        for word in &words {
            let tids = self.resolve_tids(lexicon, word, query.mode);
            if tids.is_empty() {
                continue;
            }
            let mut lists = Vec::with_capacity(tids.len());
            for tid in tids {
                lists.push(self.cursor_open(tid, 0, u32::MAX)?.into_postings());
            }
            token_infos.push(TokenInfo::new(merge_by_rid_sid(lists)));
        }

        if token_infos.is_empty() {
            return Ok(());
        }

        let phrase_mode = matches!(query.mode, SelectMode::Exact | SelectMode::Near | SelectMode::Near2);
        if phrase_mode && token_infos.len() > 1 {
            self.phrase_join(token_infos, query, scorer, stats, local)
        } else {
            for ti in &token_infos {
                let df = ti.len() as u32;
                for p in &ti.postings {
                    let score = scorer.score(p, df, stats.n_docs, stats.avg_doc_len, (stats.doc_len)(p.rid));
                    let weighted = apply_section_weight(score, p.sid, &query.section_weights);
                    *local.entry(p.rid).or_insert(0.0) += weighted;
                }
            }
            Ok(())
        }
    }

    fn phrase_join(
        &mut self,
        token_infos: Vec<TokenInfo>,
        query: &SelectQuery,
        scorer: &dyn Scorer,
        stats: &CorpusStats,
        local: &mut FxHashMap<u32, f32>,
    ) -> IiResult<()> {
        let maps: Vec<FxHashMap<(u32, u32), &Posting>> = token_infos
            .iter()
            .map(|ti| ti.postings.iter().map(|p| ((p.rid, p.sid), p)).collect())
            .collect();

        let mut driver = token_infos.clone();
        let candidates = and_join(&mut driver);

        for (rid, sid) in candidates {
            let postings: Vec<&Posting> = maps.iter().map(|m| m[&(rid, sid)]).collect();
            let hit = match query.mode {
                SelectMode::Exact => {
                    let first = postings[0];
                    first.positions.iter().any(|&p0| {
                        postings
                            .iter()
                            .enumerate()
                            .all(|(i, p)| p.positions.contains(&(p0 + i as u32)))
                    })
                }
                SelectMode::Near | SelectMode::Near2 => {
                    let position_lists: Vec<&[u32]> = postings.iter().map(|p| p.positions.as_slice()).collect();
                    near_hit(&position_lists, query.max_interval)
                }
                _ => true,
            };
            if !hit {
                continue;
            }
            let mut score = 0.0f32;
            for (i, p) in postings.iter().enumerate() {
                let df = token_infos[i].len() as u32;
                let term_score = scorer.score(p, df, stats.n_docs, stats.avg_doc_len, (stats.doc_len)(rid));
                score += apply_section_weight(term_score, p.sid, &query.section_weights);
            }
            *local.entry(rid).or_insert(0.0) += score;
        }
        Ok(())
    }

    fn term_extract(
        &mut self,
        lexicon: &dyn Lexicon,
        text: &str,
        scorer: &dyn Scorer,
        stats: &CorpusStats,
        local: &mut FxHashMap<u32, f32>,
    ) -> IiResult<()> {
        let chars: Vec<char> = normalize(text).chars().collect();
        let mut i = 0usize;
        while i < chars.len() {
            let max_len = chars.len() - i;
            let mut matched = None;
            for len in (1..=max_len).rev() {
                let candidate: String = chars[i..i + len].iter().collect();
                if let Some(tid) = lexicon.get_id(&candidate) {
                    matched = Some((tid, len));
                    break;
                }
            }
            match matched {
                Some((tid, len)) => {
                    let postings = self.cursor_open(tid, 0, u32::MAX)?.into_postings();
                    let df = postings.len() as u32;
                    for p in &postings {
                        let score = scorer.score(p, df, stats.n_docs, stats.avg_doc_len, (stats.doc_len)(p.rid));
                        *local.entry(p.rid).or_insert(0.0) += score;
                    }
                    i += len;
                }
                None => i += 1,
            }
        }
        Ok(())
    }

    fn similar(
        &mut self,
        lexicon: &dyn Lexicon,
        text: &str,
        limit: Option<usize>,
        scorer: &dyn Scorer,
        stats: &CorpusStats,
        local: &mut FxHashMap<u32, f32>,
    ) -> IiResult<()> {
        let words = tokenize(text);
        let mut weighted: Vec<(u32, f32)> = Vec::new();
        for word in &words {
            if let Some(tid) = lexicon.get_id(word) {
                let est = self.ii_estimate_size(tid)?.max(1);
                weighted.push((tid, stats.n_docs as f32 / est as f32));
            }
        }
        weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let keep = limit.unwrap_or(weighted.len() / 8 + 1);
        for &(tid, weight) in weighted.iter().take(keep) {
            let postings = self.cursor_open(tid, 0, u32::MAX)?.into_postings();
            let df = postings.len() as u32;
            for p in &postings {
                let score = scorer.score(p, df, stats.n_docs, stats.avg_doc_len, (stats.doc_len)(p.rid));
                *local.entry(p.rid).or_insert(0.0) += score * weight;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::InMemoryLexicon;
    use crate::model::posting::{IndexFlags, UpdateSpec};
    use crate::scoring::Bm25Scorer;

    fn flags() -> IndexFlags {
        IndexFlags::WITH_SECTION | IndexFlags::WITH_POSITION
    }

    fn fixed_doc_len(_rid: u32) -> u32 {
        10
    }

    fn stats(n_docs: u32) -> CorpusStats<'static> {
        CorpusStats {
            n_docs,
            avg_doc_len: 10.0,
            doc_len: &fixed_doc_len,
        }
    }

    #[test]
    fn single_term_or_query_finds_matching_records() {
        let mut index = Index::create_in_memory(flags());
        let mut lex = InMemoryLexicon::new();
        let tid = lex.get_or_create_id("rust");
        index.update_one(&mut lex, tid, UpdateSpec::insert(1, 1, vec![0])).unwrap();
        index.update_one(&mut lex, tid, UpdateSpec::insert(2, 1, vec![0])).unwrap();

        let query = SelectQuery::new("rust", SelectMode::Exact, SelectOp::Or);
        let scorer = Bm25Scorer::default();
        let mut results = ResultSet::default();
        index.select(&lex, &query, &scorer, &stats(2), &mut results).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.contains_key(&1));
        assert!(results.contains_key(&2));
    }

    #[test]
    fn exact_phrase_requires_adjacent_positions() {
        let mut index = Index::create_in_memory(flags());
        let mut lex = InMemoryLexicon::new();
        let fast = lex.get_or_create_id("fast");
        let car = lex.get_or_create_id("car");
        // record 1: "fast car" (adjacent) -> phrase hit
        index.update_one(&mut lex, fast, UpdateSpec::insert(1, 1, vec![0])).unwrap();
        index.update_one(&mut lex, car, UpdateSpec::insert(1, 1, vec![1])).unwrap();
        // record 2: "car ... fast" (not adjacent) -> no phrase hit
        index.update_one(&mut lex, fast, UpdateSpec::insert(2, 1, vec![5])).unwrap();
        index.update_one(&mut lex, car, UpdateSpec::insert(2, 1, vec![0])).unwrap();

        let query = SelectQuery::new("fast car", SelectMode::Exact, SelectOp::Or);
        let scorer = Bm25Scorer::default();
        let mut results = ResultSet::default();
        index.select(&lex, &query, &scorer, &stats(2), &mut results).unwrap();
        assert!(results.contains_key(&1));
        assert!(!results.contains_key(&2));
    }

    #[test]
    fn and_operator_intersects_successive_selects() {
        let mut index = Index::create_in_memory(flags());
        let mut lex = InMemoryLexicon::new();
        let rust = lex.get_or_create_id("rust");
        let lang = lex.get_or_create_id("language");
        index.update_one(&mut lex, rust, UpdateSpec::insert(1, 1, vec![0])).unwrap();
        index.update_one(&mut lex, rust, UpdateSpec::insert(2, 1, vec![0])).unwrap();
        index.update_one(&mut lex, lang, UpdateSpec::insert(2, 1, vec![0])).unwrap();

        let scorer = Bm25Scorer::default();
        let mut results = ResultSet::default();
        let q1 = SelectQuery::new("rust", SelectMode::Exact, SelectOp::Or);
        index.select(&lex, &q1, &scorer, &stats(2), &mut results).unwrap();
        assert_eq!(results.len(), 2);

        let q2 = SelectQuery::new("language", SelectMode::Exact, SelectOp::And);
        index.select(&lex, &q2, &scorer, &stats(2), &mut results).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&2));
    }

    #[test]
    fn and_not_removes_matching_records() {
        let mut index = Index::create_in_memory(flags());
        let mut lex = InMemoryLexicon::new();
        let rust = lex.get_or_create_id("rust");
        let slow = lex.get_or_create_id("slow");
        index.update_one(&mut lex, rust, UpdateSpec::insert(1, 1, vec![0])).unwrap();
        index.update_one(&mut lex, rust, UpdateSpec::insert(2, 1, vec![0])).unwrap();
        index.update_one(&mut lex, slow, UpdateSpec::insert(2, 1, vec![0])).unwrap();

        let scorer = Bm25Scorer::default();
        let mut results = ResultSet::default();
        let q1 = SelectQuery::new("rust", SelectMode::Exact, SelectOp::Or);
        index.select(&lex, &q1, &scorer, &stats(2), &mut results).unwrap();
        let q2 = SelectQuery::new("slow", SelectMode::Exact, SelectOp::AndNot);
        index.select(&lex, &q2, &scorer, &stats(2), &mut results).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&1));
    }

    #[test]
    fn prefix_mode_matches_multiple_terms() {
        let mut index = Index::create_in_memory(flags());
        let mut lex = InMemoryLexicon::new();
        let cat = lex.get_or_create_id("cat");
        let car = lex.get_or_create_id("car");
        index.update_one(&mut lex, cat, UpdateSpec::insert(1, 1, vec![0])).unwrap();
        index.update_one(&mut lex, car, UpdateSpec::insert(2, 1, vec![0])).unwrap();

        let query = SelectQuery::new("ca", SelectMode::Prefix, SelectOp::Or);
        let scorer = Bm25Scorer::default();
        let mut results = ResultSet::default();
        index.select(&lex, &query, &scorer, &stats(2), &mut results).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn term_extract_finds_longest_matching_term() {
        let mut index = Index::create_in_memory(flags());
        let mut lex = InMemoryLexicon::new();
        let tokyo = lex.get_or_create_id("tokyo");
        let tokyotower = lex.get_or_create_id("tokyotower");
        index.update_one(&mut lex, tokyotower, UpdateSpec::insert(1, 1, vec![0])).unwrap();
        index.update_one(&mut lex, tokyo, UpdateSpec::insert(2, 1, vec![0])).unwrap();

        let query = SelectQuery::new("tokyotower", SelectMode::TermExtract, SelectOp::Or);
        let scorer = Bm25Scorer::default();
        let mut results = ResultSet::default();
        index.select(&lex, &query, &scorer, &stats(2), &mut results).unwrap();
        assert!(results.contains_key(&1));
        assert!(!results.contains_key(&2));
    }
}
