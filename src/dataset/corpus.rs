//! Corpus files: relation label map and line-delimited JSON sentences
//!
//! Each corpus line looks like
//! `{"sentId": .., "sentText": "..", "relationMentions": [{"arg1Text": .., "arg2Text": ..,
//! "arg1StartIndex": .., "arg1EndIndex": .., "arg2StartIndex": .., "arg2EndIndex": ..,
//! "relationName": ..}]}`. Every mention becomes one [`RelationExample`].

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::dataset::features::{ArgSpan, FeatureExtractor, RelationExample};
use crate::utils::error::{RelExtError, Result};

/// Relation names in file order plus the set of "no relation" names
#[derive(Debug, Clone)]
pub struct LabelMap {
    names: Vec<String>,
    index: HashMap<String, usize>,
    ignored: HashSet<String>,
}

impl LabelMap {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();
        Self {
            names,
            index,
            ignored: HashSet::new(),
        }
    }

    /// Read a newline-delimited label file; line order defines the id
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelExtError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let mut names: Vec<&str> = content.lines().map(str::trim).collect();
        while names.last().is_some_and(|name| name.is_empty()) {
            names.pop();
        }
        // ids follow raw line order, so a gap would shift every later label
        if let Some(blank) = names.iter().position(|name| name.is_empty()) {
            return Err(RelExtError::Config(format!(
                "label file {} has a blank line at line {}",
                path.display(),
                blank + 1
            )));
        }
        let map = Self::from_names(names);
        if map.is_empty() {
            return Err(RelExtError::Config(format!(
                "label file {} is empty",
                path.display()
            )));
        }
        Ok(map)
    }

    /// Names that never count as positive predictions or gold positives
    pub fn with_ignored<I, S>(mut self, ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored = ignored.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self, name: &str) -> Result<usize> {
        self.get(name)
            .ok_or_else(|| RelExtError::LabelNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// How strictly a corpus file is filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Drop over-long sentences and unknown labels
    Training,
    /// Keep everything; unknown labels are scored as unrecognized positives
    Evaluation,
}

/// Counters reported after loading a corpus file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub sentences: usize,
    pub examples: usize,
    pub too_long: usize,
    pub unknown_labels: usize,
    pub invalid_spans: usize,
}

/// Span index written either as a number or a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpanIndex {
    Number(i64),
    Text(String),
}

impl SpanIndex {
    /// Signed value; a non-numeric string is a malformed record
    fn value(&self, line: usize) -> Result<i64> {
        match self {
            SpanIndex::Number(n) => Ok(*n),
            SpanIndex::Text(s) => s.trim().parse::<i64>().map_err(|_| RelExtError::Corpus {
                line,
                message: format!("span index '{}' is not an integer", s),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MentionRecord {
    arg1_text: String,
    arg2_text: String,
    arg1_start_index: SpanIndex,
    arg1_end_index: SpanIndex,
    arg2_start_index: SpanIndex,
    arg2_end_index: SpanIndex,
    relation_name: String,
}

impl MentionRecord {
    /// Both argument spans, or `InvalidSpan` when an index is negative
    fn spans(&self, line: usize, num_words: usize) -> Result<Result<(ArgSpan, ArgSpan)>> {
        let span = |start: &SpanIndex, end: &SpanIndex| -> Result<Result<ArgSpan>> {
            let (start, end) = (start.value(line)?, end.value(line)?);
            Ok(match (usize::try_from(start), usize::try_from(end)) {
                (Ok(start), Ok(end)) => Ok(ArgSpan::new(start, end)),
                _ => Err(RelExtError::InvalidSpan {
                    start: start.max(0) as usize,
                    end: end.max(0) as usize,
                    len: num_words,
                }),
            })
        };
        let arg1 = span(&self.arg1_start_index, &self.arg1_end_index)?;
        let arg2 = span(&self.arg2_start_index, &self.arg2_end_index)?;
        Ok(arg1.and_then(|a1| arg2.map(|a2| (a1, a2))))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentenceRecord {
    #[serde(default)]
    sent_id: serde_json::Value,
    sent_text: String,
    #[serde(default)]
    relation_mentions: Vec<MentionRecord>,
}

/// Reads corpus files into examples
pub struct CorpusLoader<'a> {
    labels: &'a LabelMap,
    extractor: &'a FeatureExtractor,
    max_sentence_len: usize,
}

impl<'a> CorpusLoader<'a> {
    pub fn new(
        labels: &'a LabelMap,
        extractor: &'a FeatureExtractor,
        max_sentence_len: usize,
    ) -> Self {
        Self {
            labels,
            extractor,
            max_sentence_len,
        }
    }

    pub fn load_file(&self, path: &Path, mode: LoadMode) -> Result<(Vec<RelationExample>, LoadStats)> {
        if !path.exists() {
            return Err(RelExtError::PathNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let (examples, stats) = self.load_reader(reader, mode)?;
        info!(
            "Loaded {}: {} sentences, {} examples ({} too long, {} unknown labels, {} invalid spans)",
            path.display(),
            stats.sentences,
            stats.examples,
            stats.too_long,
            stats.unknown_labels,
            stats.invalid_spans
        );
        Ok((examples, stats))
    }

    pub fn load_reader<R: BufRead>(
        &self,
        reader: R,
        mode: LoadMode,
    ) -> Result<(Vec<RelationExample>, LoadStats)> {
        let mut examples = Vec::new();
        let mut stats = LoadStats::default();
        let mut uid = 1usize;

        for (line_idx, line) in reader.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: SentenceRecord =
                serde_json::from_str(line).map_err(|e| RelExtError::Corpus {
                    line: line_no,
                    message: e.to_string(),
                })?;
            stats.sentences += 1;

            let sentence = record.sent_text.trim();
            if mode == LoadMode::Training
                && sentence.split_whitespace().count() > self.max_sentence_len
            {
                stats.too_long += 1;
                continue;
            }

            for mention in &record.relation_mentions {
                if !self.labels.contains(&mention.relation_name) {
                    stats.unknown_labels += 1;
                    if mode == LoadMode::Training {
                        continue;
                    }
                }
                let extracted = mention
                    .spans(line_no, sentence.split_whitespace().count())?
                    .and_then(|(arg1_span, arg2_span)| {
                        self.extractor.extract(
                            sentence,
                            &mention.arg1_text,
                            &mention.arg2_text,
                            arg1_span,
                            arg2_span,
                            &mention.relation_name,
                        )
                    });
                match extracted {
                    Ok(example) => {
                        examples.push(example.with_source(uid, record.sent_id.clone()));
                        uid += 1;
                    }
                    Err(err @ RelExtError::InvalidSpan { .. }) => {
                        warn!("Line {}: skipping mention: {}", line_no, err);
                        stats.invalid_spans += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        stats.examples = examples.len();
        Ok((examples, stats))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::dataset::features::FeatureConfig;

    const CORPUS: &str = r#"
{"sentId": 1, "sentText": "John works at Acme", "relationMentions": [{"arg1Text": "John", "arg2Text": "Acme", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": 3, "arg2EndIndex": 3, "relationName": "A"}]}
{"sentId": "s2", "sentText": "Mary lives in Paris now", "relationMentions": [{"arg1Text": "Mary", "arg2Text": "Paris", "arg1StartIndex": "0", "arg1EndIndex": "0", "arg2StartIndex": "3", "arg2EndIndex": "3", "relationName": "Z"}, {"arg1Text": "Mary", "arg2Text": "now", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": 9, "arg2EndIndex": 9, "relationName": "B"}]}
{"sentId": 3, "sentText": "one two three four five six seven", "relationMentions": [{"arg1Text": "one", "arg2Text": "seven", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": 6, "arg2EndIndex": 6, "relationName": "None"}]}
"#;

    fn labels() -> LabelMap {
        LabelMap::from_names(["A", "B", "None"]).with_ignored(["None"])
    }

    #[test]
    fn test_label_map_order_defines_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.txt");
        fs::write(&path, "None\n/people/person/nationality\n/location/contains\n\n\n").unwrap();
        let map = LabelMap::load(&path).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.id("None").unwrap(), 0);
        assert_eq!(map.id("/location/contains").unwrap(), 2);
        assert!(matches!(map.id("nope"), Err(RelExtError::LabelNotFound(_))));
    }

    #[test]
    fn test_label_file_rejects_interior_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.txt");
        fs::write(&path, "None\n\n/location/contains\n").unwrap();
        assert!(matches!(LabelMap::load(&path), Err(RelExtError::Config(_))));
    }

    #[test]
    fn test_negative_span_skips_only_that_mention() {
        let labels = labels();
        let extractor = FeatureExtractor::default();
        let loader = CorpusLoader::new(&labels, &extractor, 100);
        let corpus = concat!(
            r#"{"sentId": 1, "sentText": "a b c", "relationMentions": [{"arg1Text": "a", "arg2Text": "c", "arg1StartIndex": -1, "arg1EndIndex": 0, "arg2StartIndex": 2, "arg2EndIndex": 2, "relationName": "A"}]}"#,
            "\n",
            r#"{"sentId": 2, "sentText": "d e f", "relationMentions": [{"arg1Text": "d", "arg2Text": "f", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": "-2", "arg2EndIndex": 2, "relationName": "A"}, {"arg1Text": "d", "arg2Text": "f", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": 2, "arg2EndIndex": 2, "relationName": "B"}]}"#,
            "\n"
        );
        let (examples, stats) = loader
            .load_reader(Cursor::new(corpus), LoadMode::Training)
            .unwrap();
        assert_eq!(stats.invalid_spans, 2);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].relation, "B");
        assert_eq!(examples[0].sent_id, serde_json::json!(2));
    }

    #[test]
    fn test_non_numeric_span_is_a_corpus_error() {
        let labels = labels();
        let extractor = FeatureExtractor::default();
        let loader = CorpusLoader::new(&labels, &extractor, 100);
        let corpus = r#"{"sentId": 1, "sentText": "a b c", "relationMentions": [{"arg1Text": "a", "arg2Text": "c", "arg1StartIndex": "x", "arg1EndIndex": 0, "arg2StartIndex": 2, "arg2EndIndex": 2, "relationName": "A"}]}"#;
        let err = loader
            .load_reader(Cursor::new(corpus), LoadMode::Training)
            .unwrap_err();
        assert!(matches!(err, RelExtError::Corpus { line: 1, .. }));
    }

    #[test]
    fn test_training_mode_filters() {
        let labels = labels();
        let extractor = FeatureExtractor::new(FeatureConfig::default());
        let loader = CorpusLoader::new(&labels, &extractor, 6);
        let (examples, stats) = loader
            .load_reader(Cursor::new(CORPUS), LoadMode::Training)
            .unwrap();

        assert_eq!(stats.sentences, 3);
        assert_eq!(stats.too_long, 1);
        assert_eq!(stats.unknown_labels, 1);
        assert_eq!(stats.invalid_spans, 1);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].uid, 1);
        assert_eq!(examples[0].sent_id, serde_json::json!(1));
    }

    #[test]
    fn test_evaluation_mode_keeps_unknown_labels() {
        let labels = labels();
        let extractor = FeatureExtractor::new(FeatureConfig::default());
        let loader = CorpusLoader::new(&labels, &extractor, 6);
        let (examples, stats) = loader
            .load_reader(Cursor::new(CORPUS), LoadMode::Evaluation)
            .unwrap();

        assert_eq!(stats.too_long, 0);
        assert_eq!(stats.unknown_labels, 1);
        let relations: Vec<&str> = examples.iter().map(|e| e.relation.as_str()).collect();
        assert_eq!(relations, vec!["A", "Z", "None"]);
        let uids: Vec<usize> = examples.iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![1, 2, 3]);
        assert_eq!(examples[1].sent_id, serde_json::json!("s2"));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let labels = labels();
        let extractor = FeatureExtractor::default();
        let loader = CorpusLoader::new(&labels, &extractor, 100);
        let err = loader
            .load_reader(Cursor::new("\n{\"sentText\": 3}\n"), LoadMode::Evaluation)
            .unwrap_err();
        assert!(matches!(err, RelExtError::Corpus { line: 2, .. }));
    }
}
