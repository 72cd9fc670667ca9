//! Word vocabulary and embedding matrix construction
//!
//! The vocabulary is frozen once built: `<PAD>` = 0, `<UNK>` = 1, then
//! pretrained words that are frequent enough, then the remaining frequent
//! words with random vectors. It is persisted as JSON so inference can map
//! tokens without re-reading the corpus.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::features::{RelationExample, PAD_TOKEN, UNK_TOKEN};
use crate::utils::error::{RelExtError, Result};

pub const PAD_ID: usize = 0;
pub const UNK_ID: usize = 1;

/// Range of the uniform init for words without a pretrained vector
const RANDOM_INIT_BOUND: f32 = 0.25;

/// Token frequencies in first-seen order
#[derive(Debug, Clone, Default)]
pub struct TokenFrequencies {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl TokenFrequencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count whitespace tokens of every example's raw text
    pub fn from_examples<'a>(examples: impl IntoIterator<Item = &'a RelationExample>) -> Self {
        let mut freqs = Self::new();
        for example in examples {
            freqs.add_sentence(&example.text);
        }
        freqs
    }

    pub fn add_sentence(&mut self, sentence: &str) {
        for word in sentence.split_whitespace() {
            match self.counts.get_mut(word) {
                Some(count) => *count += 1,
                None => {
                    self.order.push(word.to_string());
                    self.counts.insert(word.to_string(), 1);
                }
            }
        }
    }

    pub fn count(&self, word: &str) -> usize {
        self.counts.get(word).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Words in the order they were first seen
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Token ⇄ id mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "VocabularyFile", into = "VocabularyFile")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    tokens: Vec<String>,
}

impl From<VocabularyFile> for Vocabulary {
    fn from(file: VocabularyFile) -> Self {
        let index = file
            .tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id))
            .collect();
        Self {
            tokens: file.tokens,
            index,
        }
    }
}

impl From<Vocabulary> for VocabularyFile {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            tokens: vocab.tokens,
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    /// Vocabulary holding only the reserved tokens
    pub fn new() -> Self {
        let mut vocab = Self {
            tokens: Vec::new(),
            index: HashMap::new(),
        };
        vocab.insert(PAD_TOKEN);
        vocab.insert(UNK_TOKEN);
        vocab
    }

    /// Insert a token, returning its id (existing id if already present)
    pub fn insert(&mut self, token: &str) -> usize {
        if let Some(&id) = self.index.get(token) {
            return id;
        }
        let id = self.tokens.len();
        self.tokens.push(token.to_string());
        self.index.insert(token.to_string(), id);
        id
    }

    pub fn get(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    /// Id of `token`, falling back to `<UNK>`
    pub fn id(&self, token: &str) -> usize {
        self.get(token).unwrap_or(UNK_ID)
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelExtError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let vocab: Self = serde_json::from_str(&content)?;
        if vocab.get(PAD_TOKEN) != Some(PAD_ID) || vocab.get(UNK_TOKEN) != Some(UNK_ID) {
            return Err(RelExtError::Vocabulary(format!(
                "{} does not start with {} and {}",
                path.display(),
                PAD_TOKEN,
                UNK_TOKEN
            )));
        }
        Ok(vocab)
    }
}

/// Row-major `[vocab_size, dim]` embedding table
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    pub dim: usize,
    pub values: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            dim,
            values: vec![0.0; rows * dim],
        }
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.values.len() / self.dim
        }
    }

    pub fn row(&self, id: usize) -> &[f32] {
        &self.values[id * self.dim..(id + 1) * self.dim]
    }

    fn push_row(&mut self, row: &[f32]) {
        self.values.extend_from_slice(row);
    }

    fn push_random<R: Rng>(&mut self, rng: &mut R) {
        for _ in 0..self.dim {
            self.values
                .push(rng.gen_range(-RANDOM_INIT_BOUND..RANDOM_INIT_BOUND));
        }
    }
}

/// Build the frozen vocabulary and its initial embedding matrix.
///
/// Words reach the vocabulary only with frequency >= `density`. Pretrained
/// vectors (if `embedding_file` is given) are admitted first, in file order.
pub fn build_vocabulary<R: Rng>(
    frequencies: &TokenFrequencies,
    embedding_file: Option<&Path>,
    dim: usize,
    density: usize,
    rng: &mut R,
) -> Result<(Vocabulary, EmbeddingMatrix)> {
    let mut vocab = Vocabulary::new();
    let mut matrix = EmbeddingMatrix {
        dim,
        values: Vec::new(),
    };
    matrix.push_row(&vec![0.0; dim]);
    matrix.push_random(rng);

    let mut pretrained = 0usize;
    if let Some(path) = embedding_file {
        if !path.exists() {
            return Err(RelExtError::PathNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let mut malformed = 0usize;
        for line in reader.lines() {
            let line = line?;
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let values: Vec<&str> = parts.collect();
            if values.len() < dim {
                continue;
            }
            if frequencies.count(word) < density || vocab.contains(word) {
                continue;
            }
            let parsed: std::result::Result<Vec<f32>, _> =
                values[..dim].iter().map(|v| v.parse::<f32>()).collect();
            match parsed {
                Ok(vector) => {
                    vocab.insert(word);
                    matrix.push_row(&vector);
                    pretrained += 1;
                }
                Err(_) => malformed += 1,
            }
        }
        if malformed > 0 {
            warn!("Skipped {} malformed embedding lines in {}", malformed, path.display());
        }
    }
    info!("Pretrained vectors admitted: {}", pretrained);

    for word in frequencies.words() {
        if frequencies.count(word) >= density && !vocab.contains(word) {
            vocab.insert(word);
            matrix.push_random(rng);
        }
    }
    info!(
        "Vocabulary size: {} ({} distinct corpus tokens)",
        vocab.len(),
        frequencies.len()
    );

    Ok((vocab, matrix))
}
