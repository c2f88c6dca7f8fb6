//! Per-document field fan-out.
//!
//! Configured URL/path fields are normalized into
//! `springsense.<field>.preprocessed`; configured text fields are sent
//! through the worker's engine handle and every flattened variant lands in
//! `springsense.<field>.text.<index>`. The preprocessing pass is applied to
//! the document before the disambiguation pass reads it, so a
//! `*.preprocessed` field may itself be configured for disambiguation.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use tracing::{debug, instrument, trace};

use senseindex_engine::{DisambiguationOptions, EngineFactory, WorkerContext};
use senseindex_shared::{
    Document, FIELD_NAMESPACE, FieldAppend, FieldSelection, FilterConfig, Result, SenseIndexError,
};

use crate::flatten::flatten;
use crate::normalize::normalize;

static REPEATED_NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(?:{}\.)+", regex::escape(FIELD_NAMESPACE)))
        .expect("namespace prefix regex")
});

/// `springsense.<field>.preprocessed`
pub fn preprocessed_field_name(field: &str) -> String {
    format!("{FIELD_NAMESPACE}.{field}.preprocessed")
}

/// `springsense.<field>.text.<index>`, with any run of leading
/// `springsense.` prefixes collapsed to one.
pub fn disambiguated_field_name(field: &str, index: usize) -> String {
    let name = format!("{FIELD_NAMESPACE}.{field}.text.{index}");
    let prefix = format!("{FIELD_NAMESPACE}.");
    REPEATED_NAMESPACE_RE
        .replace(&name, NoExpand(&prefix))
        .into_owned()
}

/// Applies the configured field selection to documents.
#[derive(Debug, Clone)]
pub struct FieldFanoutProcessor {
    fields: FieldSelection,
    options: DisambiguationOptions,
}

impl FieldFanoutProcessor {
    pub fn new(fields: FieldSelection, options: DisambiguationOptions) -> Self {
        Self { fields, options }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(
            config.fields.clone(),
            DisambiguationOptions {
                max_variants_per_sentence: config.max_variants_per_sentence,
            },
        )
    }

    pub fn fields(&self) -> &FieldSelection {
        &self.fields
    }

    /// Appends produced by normalizing every configured path field.
    ///
    /// Values that normalize to nothing (blank, undecodable) are skipped.
    pub fn preprocess_appends(&self, doc: &Document) -> Vec<FieldAppend> {
        let mut appends = Vec::new();
        for field in self.fields.preprocess.iter() {
            let Some(values) = doc.values(field) else {
                continue;
            };
            let target = preprocessed_field_name(field);
            appends.extend(
                values
                    .iter()
                    .filter_map(|value| normalize(value))
                    .map(|phrase| FieldAppend::new(target.clone(), phrase)),
            );
        }
        appends
    }

    /// Appends produced by disambiguating every configured text field.
    ///
    /// The worker's handle is only requested once a configured field is
    /// actually present. Engine failures abort the whole document.
    pub fn disambiguation_appends<F: EngineFactory>(
        &self,
        doc: &Document,
        worker: &mut WorkerContext<F>,
    ) -> Result<Vec<FieldAppend>> {
        let mut appends = Vec::new();
        for field in self.fields.disambiguate.iter() {
            let Some(values) = doc.values(field) else {
                continue;
            };
            for value in values {
                let outcome = worker
                    .disambiguate(value, &self.options)
                    .map_err(|e| match e {
                        SenseIndexError::Engine(message) => {
                            SenseIndexError::engine(format!("field '{field}': {message}"))
                        }
                        other => other,
                    })?;
                trace!(field, sentences = outcome.sentences.len(), "disambiguated value");

                appends.extend(
                    flatten(Some(&outcome))
                        .into_iter()
                        .enumerate()
                        .map(|(i, variant)| {
                            FieldAppend::new(disambiguated_field_name(field, i), variant)
                        }),
                );
            }
        }
        Ok(appends)
    }

    /// Run both passes over one document and return it with the derived
    /// fields appended.
    #[instrument(skip_all, fields(worker = worker.id()))]
    pub fn process<F: EngineFactory>(
        &self,
        mut doc: Document,
        worker: &mut WorkerContext<F>,
    ) -> Result<Document> {
        let preprocessed = self.preprocess_appends(&doc);
        let preprocessed_count = preprocessed.len();
        doc.apply(preprocessed);

        let disambiguated = self.disambiguation_appends(&doc, worker)?;
        let disambiguated_count = disambiguated.len();
        doc.apply(disambiguated);

        debug!(
            preprocessed = preprocessed_count,
            disambiguated = disambiguated_count,
            "document processed"
        );
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senseindex_engine::testing::StubEngineFactory;
    use senseindex_engine::{EngineHandlePool, NoEngine};
    use senseindex_shared::FieldSet;

    fn processor(preprocess: &str, disambiguate: &str) -> FieldFanoutProcessor {
        FieldFanoutProcessor::new(
            FieldSelection {
                preprocess: FieldSet::parse(preprocess).unwrap(),
                disambiguate: FieldSet::parse(disambiguate).unwrap(),
            },
            DisambiguationOptions::default(),
        )
    }

    fn doc(fields: &[(&str, &str)]) -> Document {
        let mut doc = Document::new();
        for (name, value) in fields {
            doc.add(*name, *value);
        }
        doc
    }

    #[test]
    fn derived_field_names() {
        assert_eq!(preprocessed_field_name("url"), "springsense.url.preprocessed");
        assert_eq!(disambiguated_field_name("title", 0), "springsense.title.text.0");
        assert_eq!(
            disambiguated_field_name("springsense.url.preprocessed", 2),
            "springsense.url.preprocessed.text.2"
        );
        assert_eq!(
            disambiguated_field_name("springsense.springsense.title", 1),
            "springsense.title.text.1"
        );
    }

    #[test]
    fn title_values_fan_out_in_input_order() {
        let pool = EngineHandlePool::new(StubEngineFactory::new());
        let mut worker = pool.worker();
        let input = doc(&[("title", "title 1"), ("title", "title 2")]);

        let out = processor("", "title").process(input, &mut worker).unwrap();

        assert_eq!(
            out.values("springsense.title.text.0").unwrap(),
            ["title_n_01 1", "title_n_01 2"]
        );
        assert!(!out.contains("springsense.title.text.1"));
        assert_eq!(out.values("title").unwrap(), ["title 1", "title 2"]);
    }

    #[test]
    fn variant_index_follows_flattening_order() {
        let pool = EngineHandlePool::new(StubEngineFactory::new().variants_per_call(2));
        let mut worker = pool.worker();
        let input = doc(&[("content", "content 1")]);

        let out = processor("", "content").process(input, &mut worker).unwrap();

        assert_eq!(
            out.values("springsense.content.text.0").unwrap(),
            ["content_n_01 1"]
        );
        assert_eq!(
            out.values("springsense.content.text.1").unwrap(),
            ["content_n_02 1"]
        );
    }

    #[test]
    fn absent_fields_are_skipped_without_touching_the_engine() {
        let pool = EngineHandlePool::new(StubEngineFactory::new());
        let mut worker = pool.worker();
        let input = doc(&[("body", "unrelated")]);

        let out = processor("url", "title").process(input, &mut worker).unwrap();

        assert_eq!(out.field_names().collect::<Vec<_>>(), ["body"]);
        assert!(!worker.has_handle());
        assert!(pool.factory().calls().is_empty());
    }

    #[test]
    fn empty_fields_are_kept_and_never_reach_the_engine() {
        let pool = EngineHandlePool::new(StubEngineFactory::new());
        let mut worker = pool.worker();
        let input = Document::from_json_line(r#"{"title":[],"url":[]}"#).unwrap();

        let out = processor("url", "title").process(input, &mut worker).unwrap();

        assert_eq!(out.field_names().collect::<Vec<_>>(), ["title", "url"]);
        assert!(!worker.has_handle());
        assert!(pool.factory().calls().is_empty());
    }

    #[test]
    fn preprocessing_runs_before_disambiguation() {
        let pool = EngineHandlePool::new(StubEngineFactory::new());
        let mut worker = pool.worker();
        let input = doc(&[("url", "http://h/d/DesertSky%20Bus%20Distribution.xls")]);

        let out = processor("url", "springsense.url.preprocessed")
            .process(input, &mut worker)
            .unwrap();

        assert_eq!(
            out.values("springsense.url.preprocessed").unwrap(),
            ["Desert Sky Bus Distribution"]
        );
        assert_eq!(
            out.values("springsense.url.preprocessed.text.0").unwrap(),
            ["desert_n_01 Distribution"]
        );
        assert_eq!(pool.factory().calls(), vec!["Desert Sky Bus Distribution"]);
    }

    #[test]
    fn undecodable_values_are_skipped() {
        let pool = EngineHandlePool::new(NoEngine);
        let mut worker = pool.worker();
        let input = doc(&[("url", "http://h/%ff.txt"), ("url", "/d/Site_Report.pdf")]);

        let out = processor("url", "").process(input, &mut worker).unwrap();

        assert_eq!(
            out.values("springsense.url.preprocessed").unwrap(),
            ["Site Report"]
        );
    }

    #[test]
    fn preprocess_only_runs_without_an_engine() {
        let pool = EngineHandlePool::new(NoEngine);
        let mut worker = pool.worker();
        let input = doc(&[("url", "file:///d/HTMLFile.html"), ("title", "x")]);

        let out = processor("url", "").process(input, &mut worker).unwrap();

        assert_eq!(out.values("springsense.url.preprocessed").unwrap(), ["HTML File"]);
        assert!(!worker.has_handle());
    }

    #[test]
    fn engine_failure_fails_the_document() {
        let pool = EngineHandlePool::new(StubEngineFactory::new().failing_on("title 2"));
        let mut worker = pool.worker();
        let input = doc(&[("title", "title 1"), ("title", "title 2")]);

        let err = processor("", "title").process(input, &mut worker).unwrap_err();

        assert!(matches!(err, SenseIndexError::Engine(_)));
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn lost_handle_fails_the_document_and_retires_the_handle() {
        let pool = EngineHandlePool::new(StubEngineFactory::new().crashing_on("title 2"));
        let mut worker = pool.worker();
        let input = doc(&[("title", "title 1"), ("title", "title 2")]);

        let err = processor("", "title").process(input, &mut worker).unwrap_err();

        assert!(matches!(err, SenseIndexError::Resource(_)));
        assert!(!worker.has_handle());
    }

    #[test]
    fn handle_failure_is_a_resource_error() {
        let pool = EngineHandlePool::new(StubEngineFactory::new().failing_open());
        let mut worker = pool.worker();
        let input = doc(&[("title", "title 1")]);

        let err = processor("", "title").process(input, &mut worker).unwrap_err();
        assert!(matches!(err, SenseIndexError::Resource(_)));
    }

    #[test]
    fn one_handle_serves_many_documents() {
        let pool = EngineHandlePool::new(StubEngineFactory::new());
        let mut worker = pool.worker();
        let processor = processor("", "title");

        for i in 0..3 {
            let value = format!("title {i}");
            let input = doc(&[("title", value.as_str())]);
            processor.process(input, &mut worker).unwrap();
        }
        assert_eq!(pool.factory().handles_opened(), 1);
    }
}
