//! Default relevance scorer. The scorer plugin ABI itself is a host
//! concern; this crate ships BM25 (grounded in the teacher's
//! `scoring::bm_25`) as the scorer used whenever the caller supplies no
//! weighting callback.

use crate::model::posting::Posting;

pub trait Scorer: Send + Sync {
    /// Score for one posting's contribution to a query term, given the
    /// term's document frequency (`df`) and the total number of records
    /// (`n_docs`) the column covers.
    fn score(&self, posting: &Posting, df: u32, n_docs: u32, avg_doc_len: f32, doc_len: u32) -> f32;
}

#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params { k1: 1.2, b: 0.75 }
    }
}

pub fn compute_idf(df: u32, n_docs: u32) -> f32 {
    let df = df.max(1) as f32;
    let n_docs = n_docs.max(1) as f32;
    ((n_docs - df + 0.5) / (df + 0.5) + 1.0).ln()
}

pub fn compute_tf_bm25(params: Bm25Params, tf: u32, doc_len: u32, avg_doc_len: f32) -> f32 {
    let tf = tf as f32;
    let norm = 1.0 - params.b + params.b * (doc_len as f32 / avg_doc_len.max(1.0));
    (tf * (params.k1 + 1.0)) / (tf + params.k1 * norm)
}

pub fn compute_term_score(
    params: Bm25Params,
    tf: u32,
    df: u32,
    n_docs: u32,
    doc_len: u32,
    avg_doc_len: f32,
) -> f32 {
    compute_idf(df, n_docs) * compute_tf_bm25(params, tf, doc_len, avg_doc_len)
}

pub struct Bm25Scorer {
    pub params: Bm25Params,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Bm25Scorer {
            params: Bm25Params::default(),
        }
    }
}

impl Scorer for Bm25Scorer {
    fn score(&self, posting: &Posting, df: u32, n_docs: u32, avg_doc_len: f32, doc_len: u32) -> f32 {
        let base = compute_term_score(self.params, posting.tf, df, n_docs, doc_len, avg_doc_len);
        if posting.weight > 0 {
            base * posting.weight as f32
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_decreases_as_document_frequency_grows() {
        let rare = compute_idf(1, 1000);
        let common = compute_idf(500, 1000);
        assert!(rare > common);
    }

    #[test]
    fn tf_component_saturates_with_k1() {
        let params = Bm25Params::default();
        let low = compute_tf_bm25(params, 1, 100, 100.0);
        let high = compute_tf_bm25(params, 100, 100, 100.0);
        assert!(high > low);
        assert!(high < params.k1 + 1.0 + 1.0);
    }

    #[test]
    fn weight_multiplies_base_score() {
        let scorer = Bm25Scorer::default();
        let mut p = Posting::new(1, 1, vec![0]);
        let unweighted = scorer.score(&p, 5, 1000, 50.0, 50);
        p.weight = 3;
        let weighted = scorer.score(&p, 5, 1000, 50.0, 50);
        assert!((weighted - unweighted * 3.0).abs() < 1e-4);
    }
}
