//! Text analysis shared by the vector and full-text backends.
//!
//! Both backends run text through a Tantivy analyzer chain rather than
//! splitting on whitespace themselves, so documents and queries are
//! normalized identically.

use serde::{Deserialize, Serialize};
use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    StopWordFilter,
    TextAnalyzer,
    TokenStream,
};

/// Which normalization a text-search configuration applies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TextSearchConfig {
    /// Lowercase, drop English stop words, Snowball-stem.
    #[default]
    English,
    /// Lowercase only.
    Simple,
}

impl std::str::FromStr for TextSearchConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "english" => Ok(Self::English),
            "simple" => Ok(Self::Simple),
            other => Err(format!("unknown text search config: {other}")),
        }
    }
}

/// Words the English configuration never indexes.
const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an",
    "and", "any", "are", "as", "at", "be", "because", "been", "before",
    "being", "below", "between", "both", "but", "by", "can", "did", "do",
    "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "i", "if", "in", "into",
    "is", "it", "its", "itself", "just", "me", "more", "most", "my",
    "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only",
    "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same",
    "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "you", "your", "yours", "yourself",
    "yourselves",
];

/// Turns text into the lexemes a backend stores and matches.
#[derive(Clone)]
pub struct Analyzer {
    config: TextSearchConfig,
    analyzer: TextAnalyzer,
}

impl Analyzer {
    pub fn new(config: TextSearchConfig) -> Self {
        let analyzer = match config {
            TextSearchConfig::English => {
                TextAnalyzer::builder(SimpleTokenizer::default())
                    .filter(RemoveLongFilter::limit(40))
                    .filter(LowerCaser)
                    .filter(StopWordFilter::remove(
                        ENGLISH_STOP_WORDS.iter().map(|w| w.to_string()),
                    ))
                    .filter(Stemmer::new(Language::English))
                    .build()
            }
            TextSearchConfig::Simple => {
                TextAnalyzer::builder(SimpleTokenizer::default())
                    .filter(RemoveLongFilter::limit(40))
                    .filter(LowerCaser)
                    .build()
            }
        };
        Self { config, analyzer }
    }

    pub fn config(&self) -> TextSearchConfig {
        self.config
    }

    /// Analyze `text` into lexemes, in order and with repetitions.
    pub fn lexemes(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut lexemes = Vec::new();
        while stream.advance() {
            lexemes.push(stream.token().text.clone());
        }
        lexemes
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Split a raw query on whitespace and lowercase each token.
pub fn query_tokens(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}
