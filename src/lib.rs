//! An embeddable on-disk inverted index column: a sparse per-term array of
//! slots, each either inline, pointing at an in-memory update buffer, or
//! pointing at a merged on-disk chunk, plus the codec, paged stores,
//! updater, cursor, and query engine built on top of them.
//!
//! Nothing here owns tokenization or the term dictionary; a host supplies
//! both through [`lexicon::Lexicon`].

pub mod array;
pub mod builder;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod index;
pub mod lexicon;
pub mod model;
pub mod scoring;
pub mod select;
pub mod store;
pub mod update;

pub use error::{IiError, IiResult};
pub use index::Index;
pub use lexicon::{InMemoryLexicon, Lexicon};
pub use model::posting::{IndexFlags, Posting, UpdateSpec};
pub use model::slot::Slot;
