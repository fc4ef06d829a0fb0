use rustc_hash::FxHashMap;

/// Record-id → accumulated score, owned by the caller across successive
/// `Index::select` calls so a boolean expression tree can be evaluated by
/// chaining queries with `SelectOp`.
pub type ResultSet = FxHashMap<u32, f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    Exact,
    Near,
    Near2,
    Similar,
    TermExtract,
    Unsplit,
    Partial,
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOp {
    Or,
    And,
    AndNot,
    Adjust,
}

#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub text: String,
    pub mode: SelectMode,
    pub op: SelectOp,
    /// Maximum position span for `NEAR`/`NEAR2`; ignored otherwise.
    pub max_interval: u32,
    /// Per-section multiplier applied before accumulation, indexed by `sid`.
    pub section_weights: Option<Vec<f32>>,
    /// Caps the number of terms `SIMILAR` folds in; defaults to
    /// `matched_terms / 8 + 1` when unset.
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(text: impl Into<String>, mode: SelectMode, op: SelectOp) -> Self {
        SelectQuery {
            text: text.into(),
            mode,
            op,
            max_interval: 8,
            section_weights: None,
            limit: None,
        }
    }

    pub fn with_max_interval(mut self, max_interval: u32) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_section_weights(mut self, weights: Vec<f32>) -> Self {
        self.section_weights = Some(weights);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Per-corpus figures the scorer needs but the column itself doesn't
/// track: total record count, mean record length, and a way to look up
/// one record's length.
pub struct CorpusStats<'a> {
    pub n_docs: u32,
    pub avg_doc_len: f32,
    pub doc_len: &'a dyn Fn(u32) -> u32,
}
