//! Markov-chain model: an n-gram table over interned words, trained from
//! chat and sampled to generate messages.

use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};
use crate::{Emote, Message};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

const MIN_INPUT_LENGTH: usize = 2;
const GOOD_INPUT_LENGTH: usize = 6;
const DISCARD_CHANCE_PERCENT: u64 = 60;

const MAX_PREFIX_LENGTH: usize = 6;
const MAX_OUTPUT_LENGTH: usize = 50;

pub const IDX_START_MARKER: u64 = 0;
pub const IDX_END_MARKER: u64 = 1;

const WORD_FLAG_EMOTE: u64 = 0x1;
const WORD_FLAG_SENTENCE_START: u64 = 0x2;
const WORD_FLAG_SENTENCE_END: u64 = 0x4;

/// One successor entry: a global word index and how often it followed the
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordFreq {
    pub index: u64,
    pub frequency: u64,
}

/// All observed successors of one prefix. `total_frequency` always equals
/// the sum of the entries, and `global_index_map` inverts `words`.
#[derive(Debug, Clone, Default)]
pub struct WordList {
    pub total_frequency: u64,
    pub words: Vec<WordFreq>,
    pub global_index_map: HashMap<u64, u64>,
}

impl WordList {
    fn add(&mut self, word: u64) {
        self.total_frequency += 1;
        match self.global_index_map.get(&word) {
            Some(&at) => self.words[at as usize].frequency += 1,
            None => {
                self.global_index_map.insert(word, self.words.len() as u64);
                self.words.push(WordFreq {
                    index: word,
                    frequency: 1,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoredWord {
    pub word: String,
    pub flags: u64,
}

impl StoredWord {
    fn is_emote(&self) -> bool {
        self.flags & WORD_FLAG_EMOTE != 0
    }
}

/// The model: prefix table plus the global word dictionary. Indices 0 and
/// 1 are the start/end sentinels.
#[derive(Debug, Clone)]
pub struct MarkovModel {
    table: HashMap<Vec<u64>, WordList>,

    /// word -> global index; emotes are keyed with a leading space so they
    /// can never collide with ordinary words. Rebuilt on load, not stored.
    word_indices: HashMap<String, u64>,

    word_list: Vec<StoredWord>,
}

impl Default for MarkovModel {
    fn default() -> Self {
        MarkovModel::new()
    }
}

impl MarkovModel {
    pub fn new() -> Self {
        let mut model = MarkovModel {
            table: HashMap::new(),
            word_indices: HashMap::new(),
            word_list: Vec::new(),
        };
        model.seed_sentinels();
        model
    }

    fn seed_sentinels(&mut self) {
        if self.word_list.is_empty() {
            self.word_list.push(StoredWord {
                word: String::new(),
                flags: WORD_FLAG_SENTENCE_START,
            });
            self.word_list.push(StoredWord {
                word: String::new(),
                flags: WORD_FLAG_SENTENCE_END,
            });
        }
    }

    fn rebuild_indices(&mut self) {
        self.word_indices.clear();
        for (i, stored) in self.word_list.iter().enumerate().skip(IDX_END_MARKER as usize + 1) {
            let key = if stored.is_emote() {
                format!(" {}", stored.word)
            } else {
                stored.word.clone()
            };
            self.word_indices.insert(key, i as u64);
        }
    }

    fn word_index(&mut self, word: &str, is_emote: bool) -> u64 {
        // emotes are marked by a leading space in the index key; words never
        // contain spaces, so the two can't collide.
        let key = if is_emote {
            format!(" {word}")
        } else {
            word.to_string()
        };

        if let Some(&idx) = self.word_indices.get(&key) {
            return idx;
        }

        let idx = self.word_list.len() as u64;
        self.word_list.push(StoredWord {
            word: word.to_string(),
            flags: if is_emote { WORD_FLAG_EMOTE } else { 0 },
        });
        self.word_indices.insert(key, idx);
        idx
    }

    /// Trains on one input. Short inputs are skipped entirely; middling
    /// ones are dropped probabilistically to keep the table from filling
    /// with low-content noise.
    pub fn train(&mut self, input: &str, emotes: &[(usize, usize)], rng: &mut impl Rng) {
        let input = input.trim();
        if input.is_empty() {
            return;
        }

        let words = tokenise(input, emotes);

        if words.len() < MIN_INPUT_LENGTH {
            return;
        }

        if words.len() < GOOD_INPUT_LENGTH && rng.random_range(0..100u64) <= DISCARD_CHANCE_PERCENT
        {
            return;
        }

        let mut indices = Vec::with_capacity(words.len() + 2);
        indices.push(IDX_START_MARKER);
        for (word, is_emote) in &words {
            indices.push(self.word_index(word, *is_emote));
        }
        indices.push(IDX_END_MARKER);

        for i in 0..indices.len().saturating_sub(1) {
            for k in 1..=MAX_PREFIX_LENGTH {
                if i + k >= indices.len() {
                    break;
                }

                let prefix = &indices[i..i + k];
                let next = indices[i + k];

                self.table.entry(prefix.to_vec()).or_default().add(next);
            }
        }
    }

    fn generate_one(&self, output: &[u64], rng: &mut impl Rng) -> u64 {
        if output.is_empty() {
            return IDX_END_MARKER;
        }

        // sample on the shortest usable prefix, backing off when a prefix
        // has no successors.
        let prefix_len = 1usize;
        let mut prefix = &output[output.len().saturating_sub(prefix_len)..];

        while !prefix.is_empty() {
            if let Some(list) = self.table.get(prefix) {
                if list.total_frequency > 0 {
                    let mut selection = rng.random_range(0..list.total_frequency);
                    for word in &list.words {
                        if word.frequency > selection {
                            return word.index;
                        }
                        selection -= word.frequency;
                    }
                }
            }

            prefix = &prefix[1..];
        }

        IDX_END_MARKER
    }

    /// Generates a message of at most 50 tokens, starting from the START
    /// sentinel and stopping at END or when every prefix is exhausted.
    pub fn generate(&self, rng: &mut impl Rng) -> Message {
        let mut output = vec![IDX_START_MARKER];

        while output.len() < MAX_OUTPUT_LENGTH {
            let word = self.generate_one(&output, rng);
            if word == IDX_END_MARKER {
                break;
            }

            output.push(word);
        }

        let mut msg = Message::new();
        for idx in output {
            let Some(stored) = self.word_list.get(idx as usize) else {
                continue;
            };

            if stored.word.is_empty() {
                continue;
            }

            if stored.is_emote() {
                msg.add_emote(Emote::new(stored.word.clone()));
            } else {
                msg.add_text(stored.word.clone());
            }
        }

        msg
    }

    #[cfg(test)]
    fn word_of(&self, idx: u64) -> &str {
        &self.word_list[idx as usize].word
    }
}

fn should_split(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | '?')
}

/// Splits an input into (token, is-emote) pairs. Tokens break on
/// whitespace and on runs of `.,!?`, except that `.` and `?` followed by a
/// non-space stay inside the token so URLs survive intact. Emote byte
/// ranges become their own tokens.
fn tokenise<'a>(input: &'a str, emotes: &[(usize, usize)]) -> Vec<(&'a str, bool)> {
    let mut spans: Vec<(usize, usize)> = emotes.to_vec();
    spans.sort_unstable();
    let mut spans = spans.as_slice();

    let mut words: Vec<(&'a str, bool)> = Vec::new();
    let mut start = 0usize;
    let mut pos = 0usize;

    let mut push = |from: usize, to: usize, emote: bool| {
        if to > from {
            let text = input[from..to].trim();
            if !text.is_empty() {
                words.push((&input[from..to], emote));
            }
        }
    };

    while pos < input.len() {
        // an emote span beginning here becomes its own token
        if let Some(&(es, len)) = spans.first() {
            if es == pos {
                push(start, pos, false);
                let end = (es + len).min(input.len());
                push(es, end, true);
                spans = &spans[1..];
                pos = end;
                start = end;
                continue;
            } else if es < pos {
                spans = &spans[1..];
                continue;
            }
        }

        let c = input[pos..].chars().next().unwrap();

        if c == ' ' || c == '\t' {
            push(start, pos, false);
            pos += 1;
            start = pos;
            continue;
        }

        if should_split(c) {
            let next = input[pos + c.len_utf8()..].chars().next();
            let keep_inside =
                (c == '.' || c == '?') && next.is_some_and(|n| n != ' ' && n != '\t');

            if !keep_inside {
                push(start, pos, false);

                let mut run_end = pos;
                while run_end < input.len() {
                    let rc = input[run_end..].chars().next().unwrap();
                    if !should_split(rc) {
                        break;
                    }
                    run_end += rc.len_utf8();
                }

                push(pos, run_end, false);
                pos = run_end;
                start = pos;
                continue;
            }
        }

        pos += c.len_utf8();
    }

    push(start, input.len(), false);
    words
}

/// Shared handle to the model; training takes the write side, generation
/// and persistence the read side.
#[derive(Clone)]
pub struct MarkovHandle {
    inner: Arc<tokio::sync::RwLock<MarkovModel>>,
}

impl MarkovHandle {
    pub fn new(model: MarkovModel) -> Self {
        MarkovHandle {
            inner: Arc::new(tokio::sync::RwLock::new(model)),
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, MarkovModel> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, MarkovModel> {
        self.inner.write().await
    }
}

/// One queued training input: sanitised text plus emote byte ranges.
#[derive(Debug, Clone)]
pub struct MarkovInput {
    pub text: String,
    pub emotes: Vec<(usize, usize)>,
}

pub type MarkovSender = mpsc::Sender<MarkovInput>;

pub fn channel() -> (MarkovSender, mpsc::Receiver<MarkovInput>) {
    mpsc::channel(256)
}

/// Drains the training queue into the model. An empty text is the
/// shutdown sentinel.
pub async fn worker(handle: MarkovHandle, mut rx: mpsc::Receiver<MarkovInput>) {
    while let Some(input) = rx.recv().await {
        if input.text.is_empty() {
            break;
        }

        let mut model = handle.write().await;
        model.train(&input.text, &input.emotes, &mut rand::rng());
    }

    tracing::info!(target: "markov", "worker exited");
}

impl Serialise for WordFreq {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_MARKOV_WORD);
        wr.write_u64(self.index);
        wr.write_u64(self.frequency);
    }
}

impl Deserialise for WordFreq {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_MARKOV_WORD)?;
        Ok(WordFreq {
            index: rd.read_u64()?,
            frequency: rd.read_u64()?,
        })
    }
}

impl Serialise for WordList {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_MARKOV_WORD_LIST);
        wr.write_u64(self.total_frequency);
        wr.write(&self.words);
        wr.write(&self.global_index_map);
    }
}

impl Deserialise for WordList {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_MARKOV_WORD_LIST)?;
        Ok(WordList {
            total_frequency: rd.read_u64()?,
            words: rd.read()?,
            global_index_map: rd.read()?,
        })
    }
}

impl Serialise for StoredWord {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_MARKOV_STORED_WORD);
        wr.write_str(&self.word);
        wr.write_u64(self.flags);
    }
}

impl Deserialise for StoredWord {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_MARKOV_STORED_WORD)?;
        Ok(StoredWord {
            word: rd.read_str()?,
            flags: rd.read_u64()?,
        })
    }
}

impl Serialise for MarkovModel {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_MARKOV_DB);
        wr.write(&self.table);
        wr.write(&self.word_list);
    }
}

impl Deserialise for MarkovModel {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_MARKOV_DB)?;

        let mut model = MarkovModel {
            table: rd.read()?,
            word_indices: HashMap::new(),
            word_list: rd.read()?,
        };

        // the word -> index table is derivable, so it's rebuilt rather
        // than stored twice.
        model.seed_sentinels();
        model.rebuild_indices();
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn plain(tokens: &[(&str, bool)]) -> Vec<String> {
        tokens.iter().map(|(w, _)| w.to_string()).collect()
    }

    #[test]
    fn test_tokenise_whitespace_and_punctuation() {
        let toks = tokenise("hello there, world!", &[]);
        assert_eq!(plain(&toks), vec!["hello", "there", ",", "world", "!"]);
    }

    #[test]
    fn test_tokenise_keeps_urls_together() {
        // '.' and '?' followed by a non-space stay inside the token
        let toks = tokenise("see https://example.com/x?q=1 now", &[]);
        assert_eq!(plain(&toks), vec!["see", "https://example.com/x?q=1", "now"]);
    }

    #[test]
    fn test_tokenise_punctuation_runs_lump_together() {
        let toks = tokenise("wait what?! ok", &[]);
        assert_eq!(plain(&toks), vec!["wait", "what", "?!", "ok"]);
    }

    #[test]
    fn test_tokenise_emote_ranges() {
        let input = "hello Kappa world";
        let toks = tokenise(input, &[(6, 5)]);
        assert_eq!(toks[1], ("Kappa", true));
        assert_eq!(plain(&toks), vec!["hello", "Kappa", "world"]);
    }

    #[test]
    fn test_train_skips_short_inputs() {
        let mut model = MarkovModel::new();
        model.train("single", &[], &mut rng(1));
        assert!(model.table.is_empty());
    }

    #[test]
    fn test_total_frequency_invariant() {
        let mut model = MarkovModel::new();
        for input in [
            "the quick brown fox jumps over the dog",
            "the quick red fox runs under the dog",
            "a lazy dog sleeps all day long here",
        ] {
            model.train(input, &[], &mut rng(7));
        }

        assert!(!model.table.is_empty());
        for list in model.table.values() {
            let sum: u64 = list.words.iter().map(|w| w.frequency).sum();
            assert_eq!(list.total_frequency, sum);

            for (word, &at) in &list.global_index_map {
                assert_eq!(list.words[at as usize].index, *word);
            }
        }
    }

    #[test]
    fn test_emotes_cannot_collide_with_words() {
        let mut model = MarkovModel::new();
        let as_word = model.word_index("Kappa", false);
        let as_emote = model.word_index("Kappa", true);
        assert_ne!(as_word, as_emote);
        assert_eq!(model.word_of(as_word), "Kappa");
        assert_eq!(model.word_of(as_emote), "Kappa");
    }

    #[test]
    fn test_generation_is_deterministic_and_on_vocabulary() {
        let mut model = MarkovModel::new();
        // long enough to dodge the probabilistic discard
        for input in [
            "the quick brown fox jumps over the lazy dog",
            "the quick red fox jumps over the sleepy cat",
        ] {
            model.train(input, &[], &mut rng(3));
        }

        let a = model.generate(&mut rng(42));
        let b = model.generate(&mut rng(42));
        assert_eq!(a, b);

        let vocab: Vec<&str> = model.word_list.iter().map(|w| w.word.as_str()).collect();
        for frag in &a.fragments {
            let crate::Fragment::Text(word) = frag else {
                panic!("no emotes were trained");
            };
            assert!(vocab.contains(&word.as_str()), "unknown word '{word}'");
        }
    }

    #[test]
    fn test_generation_caps_length() {
        let mut model = MarkovModel::new();
        // "a a a ..." loops on itself forever without the cap
        model.train(
            "a a a a a a a a a a a a a a a a a a a a a a a a a a",
            &[],
            &mut rng(9),
        );

        let msg = model.generate(&mut rng(4));
        assert!(msg.fragments.len() < MAX_OUTPUT_LENGTH);
    }

    #[test]
    fn test_serialise_roundtrip_rebuilds_indices() {
        let mut model = MarkovModel::new();
        model.train("the quick brown fox jumps over the lazy dog", &[], &mut rng(5));

        let mut buf = Vec::new();
        model.serialise(&mut Writer::new(&mut buf));
        let mut back: MarkovModel = Reader::new(&buf).read().unwrap();

        assert_eq!(back.word_list.len(), model.word_list.len());
        assert_eq!(back.table.len(), model.table.len());

        // training after a reload reuses existing word indices
        let before = back.word_list.len();
        back.train("the quick brown fox jumps over the lazy dog", &[], &mut rng(5));
        assert_eq!(back.word_list.len(), before);
    }
}
