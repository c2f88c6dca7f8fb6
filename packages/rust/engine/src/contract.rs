//! What SenseIndex needs from a word-sense-disambiguation engine.
//!
//! The engine is split in two: an [`EngineFactory`] that owns the large,
//! read-only model data and is shared by every worker, and the
//! [`EngineHandle`]s it issues, which carry per-call scratch state and are
//! owned by exactly one worker.

use std::fmt;

use serde::{Deserialize, Serialize};

use senseindex_shared::{Result, SenseIndexError};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Process-wide engine entry point, built once from a matrix directory.
///
/// `open_handle` may be called concurrently from several workers.
pub trait EngineFactory: Send + Sync {
    type Handle: EngineHandle;

    /// Issue a fresh handle. Fails with [`SenseIndexError::Resource`].
    ///
    /// [`SenseIndexError::Resource`]: senseindex_shared::SenseIndexError::Resource
    fn open_handle(&self) -> Result<Self::Handle>;
}

/// A stateful disambiguation session. Not for concurrent use.
pub trait EngineHandle {
    /// Disambiguate `text`. Fails with [`SenseIndexError::Engine`].
    ///
    /// [`SenseIndexError::Engine`]: senseindex_shared::SenseIndexError::Engine
    fn disambiguate(
        &mut self,
        text: &str,
        options: &DisambiguationOptions,
    ) -> Result<DisambiguationOutcome>;
}

/// Factory for runs that only preprocess fields and never disambiguate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEngine;

/// Handle type of [`NoEngine`]; it can never be constructed.
#[derive(Debug)]
pub enum NoHandle {}

impl EngineFactory for NoEngine {
    type Handle = NoHandle;

    fn open_handle(&self) -> Result<NoHandle> {
        Err(SenseIndexError::resource(
            "no disambiguation engine is configured",
        ))
    }
}

impl EngineHandle for NoHandle {
    fn disambiguate(&mut self, _: &str, _: &DisambiguationOptions) -> Result<DisambiguationOutcome> {
        match *self {}
    }
}

/// Per-call knobs passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisambiguationOptions {
    pub max_variants_per_sentence: usize,
}

impl Default for DisambiguationOptions {
    fn default() -> Self {
        Self {
            max_variants_per_sentence: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The engine's raw result for one input text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisambiguationOutcome {
    #[serde(default)]
    pub sentences: Vec<SentenceResult>,
}

/// Candidate renderings of one input sentence, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceResult {
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// One candidate disambiguated rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub terms: Vec<Term>,
}

/// A surface word, optionally tagged with the sense the engine chose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sense: Option<String>,
}

impl Term {
    pub fn plain(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            sense: None,
        }
    }

    pub fn sensed(word: impl Into<String>, sense: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            sense: Some(sense.into()),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sense {
            Some(sense) => write!(f, "{}_{}", self.word, sense),
            None => f.write_str(&self.word),
        }
    }
}

/// Canonical display form: terms joined by single spaces.
impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

impl FromIterator<Term> for Variant {
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}
