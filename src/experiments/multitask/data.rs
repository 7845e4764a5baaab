use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::data::DataLoader;
use crate::error::Result;

use super::config::{TrainConfig, N_SENTIMENT_CLASSES};

pub const PAD_TOKEN: usize = 0;
pub const CLS_TOKEN: usize = 1;
const FIRST_WORD_TOKEN: usize = 2;

#[derive(Debug, Deserialize)]
struct SentimentRecord {
    id: String,
    sentence: String,
    #[serde(default)]
    sentiment: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ParaphraseRecord {
    id: String,
    sentence1: String,
    sentence2: String,
    #[serde(default)]
    is_duplicate: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SimilarityRecord {
    id: String,
    sentence1: String,
    sentence2: String,
    #[serde(default)]
    similarity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentenceExample {
    pub id: String,
    pub sentence: String,
    pub label: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairExample {
    pub id: String,
    pub sentence1: String,
    pub sentence2: String,
    pub label: Option<f32>,
}

/// Reads every well-formed record of a tab-separated file with a header row.
/// Rows that fail to parse are skipped and counted.
fn read_records<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quoting(false)
        .from_reader(file);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for result in reader.deserialize() {
        match result {
            Ok(record) => records.push(record),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped malformed rows");
    }
    Ok(records)
}

fn keep_labeled<T>(examples: Vec<T>, labeled: bool, has_label: impl Fn(&T) -> bool, path: &Path) -> Vec<T> {
    if !labeled {
        return examples;
    }
    let total = examples.len();
    let kept: Vec<T> = examples.into_iter().filter(|e| has_label(e)).collect();
    if kept.len() < total {
        warn!(
            path = %path.display(),
            dropped = total - kept.len(),
            "dropped rows without a valid label"
        );
    }
    kept
}

/// Loads sentiment examples. With `labeled`, rows without a sentiment in
/// `0..5` are dropped.
pub fn load_sentiment(path: &Path, labeled: bool) -> Result<Vec<SentenceExample>> {
    let examples: Vec<SentenceExample> = read_records::<SentimentRecord>(path)?
        .into_iter()
        .map(|r| SentenceExample {
            id: r.id,
            sentence: r.sentence,
            label: r
                .sentiment
                .filter(|s| s.fract() == 0.0 && *s >= 0.0 && (*s as usize) < N_SENTIMENT_CLASSES)
                .map(|s| s as usize),
        })
        .collect();
    Ok(keep_labeled(examples, labeled, |e| e.label.is_some(), path))
}

/// Loads paraphrase pairs; labels are 0 or 1.
pub fn load_paraphrase(path: &Path, labeled: bool) -> Result<Vec<PairExample>> {
    let examples: Vec<PairExample> = read_records::<ParaphraseRecord>(path)?
        .into_iter()
        .map(|r| PairExample {
            id: r.id,
            sentence1: r.sentence1,
            sentence2: r.sentence2,
            label: r.is_duplicate.map(|d| if d >= 0.5 { 1.0 } else { 0.0 }),
        })
        .collect();
    Ok(keep_labeled(examples, labeled, |e| e.label.is_some(), path))
}

/// Loads similarity pairs; labels are real-valued scores.
pub fn load_similarity(path: &Path, labeled: bool) -> Result<Vec<PairExample>> {
    let examples: Vec<PairExample> = read_records::<SimilarityRecord>(path)?
        .into_iter()
        .map(|r| PairExample {
            id: r.id,
            sentence1: r.sentence1,
            sentence2: r.sentence2,
            label: r.similarity.filter(|s| s.is_finite()),
        })
        .collect();
    Ok(keep_labeled(examples, labeled, |e| e.label.is_some(), path))
}

/// Deterministic word-level tokenizer hashing lowercased alphanumeric words
/// into a fixed vocabulary. Id 0 is padding and id 1 opens every sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct HashingTokenizer {
    vocab_size: usize,
    max_len: usize,
}

impl HashingTokenizer {
    pub fn new(vocab_size: usize, max_len: usize) -> HashingTokenizer {
        HashingTokenizer {
            vocab_size: vocab_size.max(FIRST_WORD_TOKEN + 1),
            max_len: max_len.max(1),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn word_id(&self, word: &str) -> usize {
        // FNV-1a, stable across platforms and releases
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        let buckets = (self.vocab_size - FIRST_WORD_TOKEN) as u64;
        FIRST_WORD_TOKEN + (hash % buckets) as usize
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        let lowered = text.to_lowercase();
        std::iter::once(CLS_TOKEN)
            .chain(
                lowered
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(|w| self.word_id(w)),
            )
            .take(self.max_len)
            .collect()
    }

    /// Pads a batch to its longest sequence. Returns token ids and attention mask.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S]) -> (Array2<usize>, Array2<f32>) {
        let encoded: Vec<Vec<usize>> = texts.iter().map(|t| self.encode(t.as_ref())).collect();
        let width = encoded.iter().map(Vec::len).max().unwrap_or(1);
        let mut ids = Array2::from_elem((encoded.len(), width), PAD_TOKEN);
        let mut mask = Array2::<f32>::zeros((encoded.len(), width));
        for (row, tokens) in encoded.iter().enumerate() {
            for (col, &token) in tokens.iter().enumerate() {
                ids[[row, col]] = token;
                mask[[row, col]] = 1.0;
            }
        }
        (ids, mask)
    }
}

#[derive(Debug, Clone)]
pub struct SentenceBatch {
    pub ids: Vec<String>,
    pub token_ids: Array2<usize>,
    pub attention_mask: Array2<f32>,
    /// `None` when any example of the batch is unlabeled.
    pub labels: Option<Vec<usize>>,
}

impl SentenceBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PairBatch {
    pub ids: Vec<String>,
    pub token_ids_1: Array2<usize>,
    pub attention_mask_1: Array2<f32>,
    pub token_ids_2: Array2<usize>,
    pub attention_mask_2: Array2<f32>,
    pub labels: Option<Vec<f32>>,
}

impl PairBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct SentenceLoader {
    dataset: Vec<SentenceExample>,
    tokenizer: HashingTokenizer,
    batch_size: usize,
}

impl SentenceLoader {
    pub fn new(dataset: Vec<SentenceExample>, tokenizer: HashingTokenizer, batch_size: usize) -> Self {
        SentenceLoader {
            dataset,
            tokenizer,
            batch_size,
        }
    }
}

impl DataLoader<Vec<SentenceExample>, SentenceExample, SentenceBatch> for SentenceLoader {
    fn get_dataset(&self) -> &Vec<SentenceExample> {
        &self.dataset
    }

    fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    fn collate(&self, samples: Vec<SentenceExample>) -> SentenceBatch {
        let sentences: Vec<&str> = samples.iter().map(|s| s.sentence.as_str()).collect();
        let (token_ids, attention_mask) = self.tokenizer.encode_batch(&sentences);
        SentenceBatch {
            labels: samples.iter().map(|s| s.label).collect(),
            ids: samples.into_iter().map(|s| s.id).collect(),
            token_ids,
            attention_mask,
        }
    }
}

pub struct PairLoader {
    dataset: Vec<PairExample>,
    tokenizer: HashingTokenizer,
    batch_size: usize,
}

impl PairLoader {
    pub fn new(dataset: Vec<PairExample>, tokenizer: HashingTokenizer, batch_size: usize) -> Self {
        PairLoader {
            dataset,
            tokenizer,
            batch_size,
        }
    }
}

impl DataLoader<Vec<PairExample>, PairExample, PairBatch> for PairLoader {
    fn get_dataset(&self) -> &Vec<PairExample> {
        &self.dataset
    }

    fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    fn collate(&self, samples: Vec<PairExample>) -> PairBatch {
        let first: Vec<&str> = samples.iter().map(|s| s.sentence1.as_str()).collect();
        let second: Vec<&str> = samples.iter().map(|s| s.sentence2.as_str()).collect();
        let (token_ids_1, attention_mask_1) = self.tokenizer.encode_batch(&first);
        let (token_ids_2, attention_mask_2) = self.tokenizer.encode_batch(&second);
        PairBatch {
            labels: samples.iter().map(|s| s.label).collect(),
            ids: samples.into_iter().map(|s| s.id).collect(),
            token_ids_1,
            attention_mask_1,
            token_ids_2,
            attention_mask_2,
        }
    }
}

/// Loaders of one split for all three tasks. Test splits are unlabeled.
pub struct MultitaskSplit {
    pub sst: SentenceLoader,
    pub para: PairLoader,
    pub sts: PairLoader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl MultitaskSplit {
    pub fn load(config: &TrainConfig, split: Split) -> Result<MultitaskSplit> {
        let tokenizer = HashingTokenizer::new(config.vocab_size, config.max_seq_len);
        let (sst_path, para_path, sts_path) = match split {
            Split::Train => (&config.sst.train, &config.para.train, &config.sts.train),
            Split::Dev => (&config.sst.dev, &config.para.dev, &config.sts.dev),
            Split::Test => (&config.sst.test, &config.para.test, &config.sts.test),
        };
        let labeled = split != Split::Test;

        let sst = load_sentiment(sst_path, labeled)?;
        let para = load_paraphrase(para_path, labeled)?;
        let sts = load_similarity(sts_path, labeled)?;
        info!(
            ?split,
            sst = sst.len(),
            para = para.len(),
            sts = sts.len(),
            "loaded task data"
        );

        Ok(MultitaskSplit {
            sst: SentenceLoader::new(sst, tokenizer.clone(), config.sst_batch_size),
            para: PairLoader::new(para, tokenizer.clone(), config.para_batch_size),
            sts: PairLoader::new(sts, tokenizer, config.sts_batch_size),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sst.get_dataset().is_empty()
            || self.para.get_dataset().is_empty()
            || self.sts.get_dataset().is_empty()
    }
}
