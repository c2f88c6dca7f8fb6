//! In-process stub engine for tests.
//!
//! Each call yields one sentence whose variants tag the first word of the
//! text with sense `n_01` (then `n_02`, ...) followed by the text's last
//! word: `"title 1"` becomes `"title_n_01 1"`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use senseindex_shared::{Result, SenseIndexError};

use crate::contract::{
    DisambiguationOptions, DisambiguationOutcome, EngineFactory, EngineHandle, SentenceResult,
    Term, Variant,
};

/// Stub factory counting the handles it issues.
#[derive(Debug, Default)]
pub struct StubEngineFactory {
    open_attempts: AtomicUsize,
    fail_open: bool,
    variants_per_call: usize,
    fail_on: Option<String>,
    crash_on: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StubEngineFactory {
    pub fn new() -> Self {
        Self {
            variants_per_call: 1,
            ..Self::default()
        }
    }

    /// Every `open_handle` call fails with a resource error.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Return `n` variants per call instead of one (capped by the options).
    pub fn variants_per_call(mut self, n: usize) -> Self {
        self.variants_per_call = n;
        self
    }

    /// Fail with an engine error whenever the input text equals `text`.
    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.fail_on = Some(text.into());
        self
    }

    /// Break the handle when the input text equals `text`: that call and
    /// every later one fail with a resource error.
    pub fn crashing_on(mut self, text: impl Into<String>) -> Self {
        self.crash_on = Some(text.into());
        self
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn handles_opened(&self) -> usize {
        if self.fail_open { 0 } else { self.open_attempts() }
    }

    /// Every text disambiguated through any handle, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl EngineFactory for StubEngineFactory {
    type Handle = StubEngineHandle;

    fn open_handle(&self) -> Result<StubEngineHandle> {
        let id = self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(SenseIndexError::resource("stub engine refuses to open handles"));
        }
        Ok(StubEngineHandle {
            id,
            variants_per_call: self.variants_per_call,
            fail_on: self.fail_on.clone(),
            crash_on: self.crash_on.clone(),
            crashed: false,
            calls: Arc::clone(&self.calls),
        })
    }
}

/// Handle issued by [`StubEngineFactory`].
#[derive(Debug)]
pub struct StubEngineHandle {
    id: usize,
    variants_per_call: usize,
    fail_on: Option<String>,
    crash_on: Option<String>,
    crashed: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StubEngineHandle {
    /// Sequence number of this handle within its factory.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl EngineHandle for StubEngineHandle {
    fn disambiguate(
        &mut self,
        text: &str,
        options: &DisambiguationOptions,
    ) -> Result<DisambiguationOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }

        if self.crashed || self.crash_on.as_deref() == Some(text) {
            self.crashed = true;
            return Err(SenseIndexError::resource(format!(
                "stub engine handle {} crashed",
                self.id
            )));
        }

        if self.fail_on.as_deref() == Some(text) {
            return Err(SenseIndexError::engine(format!("stub engine failed on '{text}'")));
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let Some(first) = words.first() else {
            return Ok(DisambiguationOutcome::default());
        };
        let last = words.last().filter(|_| words.len() > 1);

        let count = self.variants_per_call.min(options.max_variants_per_sentence);
        let variants = (1..=count)
            .map(|n| {
                let mut terms = vec![Term::sensed(first.to_lowercase(), format!("n_{n:02}"))];
                if let Some(last) = last {
                    terms.push(Term::plain(*last));
                }
                Variant { terms }
            })
            .collect();

        Ok(DisambiguationOutcome {
            sentences: vec![SentenceResult { variants }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_renders_first_and_last_word() {
        let factory = StubEngineFactory::new();
        let mut handle = factory.open_handle().unwrap();
        let outcome = handle
            .disambiguate("title 1", &DisambiguationOptions::default())
            .unwrap();

        assert_eq!(outcome.sentences.len(), 1);
        assert_eq!(outcome.sentences[0].variants[0].to_string(), "title_n_01 1");
        assert_eq!(factory.calls(), vec!["title 1"]);
    }

    #[test]
    fn stub_respects_max_variants() {
        let factory = StubEngineFactory::new().variants_per_call(5);
        let mut handle = factory.open_handle().unwrap();
        let options = DisambiguationOptions {
            max_variants_per_sentence: 2,
        };
        let outcome = handle.disambiguate("content 1", &options).unwrap();
        assert_eq!(outcome.sentences[0].variants.len(), 2);
        assert_eq!(outcome.sentences[0].variants[1].to_string(), "content_n_02 1");
    }

    #[test]
    fn stub_blank_text_yields_empty_outcome() {
        let factory = StubEngineFactory::new();
        let mut handle = factory.open_handle().unwrap();
        let outcome = handle
            .disambiguate("  ", &DisambiguationOptions::default())
            .unwrap();
        assert!(outcome.sentences.is_empty());
    }
}
