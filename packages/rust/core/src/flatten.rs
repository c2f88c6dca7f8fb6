use senseindex_engine::DisambiguationOutcome;

/// Flatten an engine outcome into display strings, sentence-major then
/// variant-major. An absent outcome flattens to nothing.
pub fn flatten(outcome: Option<&DisambiguationOutcome>) -> Vec<String> {
    outcome
        .into_iter()
        .flat_map(|outcome| &outcome.sentences)
        .flat_map(|sentence| &sentence.variants)
        .map(ToString::to_string)
        .collect()
}
