//! Statistical analysis of submitted text.
//!
//! A diagnostic reported next to the verdict. It never changes the verdict:
//! only the capture ledger and timing decide that. Nothing here looks at
//! what was typed beyond word and sentence shape.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{HashMap, HashSet};

/// Shorter texts are not analyzed.
pub const MIN_CHARS: usize = 50;
/// Texts with fewer words are not analyzed.
pub const MIN_WORDS: usize = 10;

/// Word repetition is only measured over texts at least this long.
const MIN_BURSTINESS_WORDS: usize = 20;
const LONG_WORD_LEN: usize = 8;
const PUNCTUATION: &str = ".,!?;:\"-'()[]{}";

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "it", "its", "this", "that", "these", "those", "i", "you", "he", "she", "we", "they", "what",
    "which", "who", "whom", "when", "where", "why", "how", "all", "each", "every", "both", "few",
    "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so",
    "than", "too", "very", "just", "also", "now", "here", "there", "then", "if",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFeatures {
    pub word_count: usize,
    pub sentence_count: usize,
    /// Unique words over total words
    pub vocabulary_diversity: f64,
    /// Words used once over unique words
    pub hapax_ratio: f64,
    /// Share of words that are not stopwords
    pub content_word_ratio: f64,
    pub avg_sentence_length: f64,
    pub sentence_length_std: f64,
    pub sentence_length_cv: f64,
    pub avg_word_length: f64,
    pub word_length_std: f64,
    pub word_length_cv: f64,
    /// Mean coefficient of variation of the gaps between repeats of a word
    pub burstiness: f64,
    pub bigram_repetition: f64,
    pub trigram_repetition: f64,
    pub char_entropy: f64,
    pub word_entropy: f64,
    pub punctuation_ratio: f64,
    pub long_word_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentVerdict {
    Human,
    AiGenerated,
    Uncertain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub verdict: ContentVerdict,
    pub is_human: bool,
    pub confidence: f64,
    /// Weighted 0-1 score; higher reads more human
    pub human_score: f64,
    pub features: ContentFeatures,
}

/// Analyze `text`, or `None` when it is too short to say anything.
pub fn analyze_text(text: &str) -> Option<ContentAnalysis> {
    if text.chars().count() < MIN_CHARS {
        return None;
    }
    let words = tokenize(text);
    if words.len() < MIN_WORDS {
        return None;
    }

    let features = extract(text, &words);
    let human_score = human_score(&features);
    let (verdict, is_human, confidence) = if human_score >= 0.65 {
        (ContentVerdict::Human, true, (0.5 + (human_score - 0.65) * 1.5).min(0.95))
    } else if human_score <= 0.35 {
        (ContentVerdict::AiGenerated, false, (0.5 + (0.35 - human_score) * 1.5).min(0.95))
    } else {
        (
            ContentVerdict::Uncertain,
            human_score > 0.5,
            0.5 + (human_score - 0.5).abs() * 0.5,
        )
    };

    Some(ContentAnalysis {
        verdict,
        is_human,
        confidence,
        human_score,
        features,
    })
}

/// Lowercase words made of ASCII letters, with at most one inner apostrophe
/// part (`don't`, `it's`).
fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_lowercase() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_lowercase() {
            i += 1;
        }
        if i + 1 < chars.len() && chars[i] == '\'' && chars[i + 1].is_ascii_lowercase() {
            i += 1;
            while i < chars.len() && chars[i].is_ascii_lowercase() {
                i += 1;
            }
        }
        words.push(chars[start..i].iter().collect());
    }
    words
}

fn sentence_lengths(text: &str) -> Vec<f64> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| tokenize(s).len() as f64)
        .collect()
}

fn extract(text: &str, words: &[String]) -> ContentFeatures {
    let total = words.len() as f64;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in words {
        *counts.entry(word.as_str()).or_default() += 1;
    }
    let unique = counts.len() as f64;
    let hapax = counts.values().filter(|&&c| c == 1).count() as f64;
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let content_words = words.iter().filter(|w| !stopwords.contains(w.as_str())).count() as f64;

    let sentences = sentence_lengths(text);
    let (avg_sentence_length, sentence_length_std, sentence_length_cv) = spread(&sentences);
    let word_lengths: Vec<f64> = words.iter().map(|w| w.chars().count() as f64).collect();
    let (avg_word_length, word_length_std, word_length_cv) = spread(&word_lengths);

    let non_space: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let punctuation = text.chars().filter(|c| PUNCTUATION.contains(*c)).count() as f64;
    let long_words = words
        .iter()
        .filter(|w| w.chars().count() > LONG_WORD_LEN)
        .count() as f64;

    ContentFeatures {
        word_count: words.len(),
        sentence_count: sentences.len(),
        vocabulary_diversity: unique / total,
        hapax_ratio: if unique > 0.0 { hapax / unique } else { 0.0 },
        content_word_ratio: content_words / total,
        avg_sentence_length,
        sentence_length_std,
        sentence_length_cv,
        avg_word_length,
        word_length_std,
        word_length_cv,
        burstiness: burstiness(words),
        bigram_repetition: ngram_diversity(words, 2),
        trigram_repetition: ngram_diversity(words, 3),
        char_entropy: entropy(non_space.iter()),
        word_entropy: entropy(words.iter()),
        punctuation_ratio: if text.is_empty() {
            0.0
        } else {
            punctuation / text.chars().count() as f64
        },
        long_word_ratio: long_words / total,
    }
}

/// Mean, population standard deviation and coefficient of variation.
fn spread(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mean = values.iter().mean();
    let std = values.iter().population_std_dev();
    let cv = if mean > 0.0 { std / mean } else { 0.0 };
    (mean, std, cv)
}

/// How unevenly repeated words are spread through the text. People cluster
/// a word around where they talk about it.
fn burstiness(words: &[String]) -> f64 {
    if words.len() < MIN_BURSTINESS_WORDS {
        return 0.0;
    }
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, word) in words.iter().enumerate() {
        positions.entry(word.as_str()).or_default().push(i);
    }

    let scores: Vec<f64> = positions
        .values()
        .filter(|p| p.len() >= 2)
        .filter_map(|p| {
            let gaps: Vec<f64> = p.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
            let mean = gaps.iter().mean();
            (mean > 0.0).then(|| gaps.iter().population_std_dev() / mean)
        })
        .collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().mean()
    }
}

/// Unique n-grams over total n-grams; 1.0 when the text is too short.
fn ngram_diversity(words: &[String], n: usize) -> f64 {
    if words.len() < n + 1 {
        return 1.0;
    }
    let grams: Vec<&[String]> = words.windows(n).collect();
    let unique: HashSet<&[String]> = grams.iter().copied().collect();
    unique.len() as f64 / grams.len() as f64
}

/// Shannon entropy in bits.
fn entropy<T, I>(items: I) -> f64
where
    T: std::hash::Hash + Eq,
    I: Iterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut total = 0usize;
    for item in items {
        *counts.entry(item).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

fn human_score(f: &ContentFeatures) -> f64 {
    let mut weighted = Vec::with_capacity(6);
    weighted.push(((f.vocabulary_diversity / 0.6).min(1.0), 0.15));
    if f.avg_sentence_length > 0.0 {
        weighted.push(((f.sentence_length_cv / 0.5).min(1.0), 0.20));
    }
    if f.burstiness > 0.0 {
        weighted.push((f.burstiness.min(1.0), 0.15));
    }
    weighted.push(((f.bigram_repetition / 0.9).min(1.0), 0.15));
    weighted.push(((f.trigram_repetition / 0.95).min(1.0), 0.15));
    let entropy_score = if f.word_entropy > 4.0 {
        ((f.word_entropy - 4.0) / 4.0).min(1.0)
    } else {
        0.0
    };
    weighted.push((entropy_score, 0.15));

    let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
    let score: f64 = weighted.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight;
    score.clamp(0.0, 1.0)
}
