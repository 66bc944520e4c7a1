//! Incremental sentence segmentation over an unbounded text stream.
//!
//! Boundary detection is a punctuation heuristic. It knows a handful of
//! abbreviations, decimals and single-letter initials, but quoted dialogue,
//! unknown abbreviations and sentence-final abbreviations can still be split
//! (or joined) wrongly. Callers must treat units as speakable chunks, not as
//! grammatically exact sentences.
//!
//! Every decision depends only on the text seen so far and never on where the
//! fragments were cut, so any chunking of the same input yields the same units,
//! and the units always concatenate back to the exact input.

use serde::Serialize;

/// Abbreviations whose trailing period does not end a sentence (lower-cased).
const ABBREVIATIONS: &[&str] = &[
    "dr.", "mr.", "mrs.", "ms.", "prof.", "etc.", "vs.", "e.g.", "i.e.", "a.m.", "p.m.", "inc.",
    "ltd.", "corp.", "st.", "jr.", "sr.",
];

/// Why a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Sentence-ending punctuation followed by whitespace.
    Terminal,
    /// A newline after some content.
    LineBreak,
    /// No boundary within the configured length ceiling.
    Overflow,
    /// Remainder emitted at end of stream.
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentenceUnit {
    pub text: String,
    pub boundary: Boundary,
}

impl SentenceUnit {
    fn new(text: String, boundary: Boundary) -> Self {
        Self { text, boundary }
    }
}

/// Accumulates fragments and hands out complete units as soon as they are known.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    max_unit_chars: Option<usize>,
}

enum Scan {
    Found(usize, Boundary),
    NotFound,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a break once a unit grows past `max` characters without a
    /// boundary. Breaks prefer the last whitespace inside the limit.
    pub fn with_max_unit_chars(mut self, max: Option<usize>) -> Self {
        self.max_unit_chars = max.filter(|m| *m > 0);
        self
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feed one fragment; returns every unit it completed, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(fragment);
        let mut units = Vec::new();
        while let Some(unit) = self.next_unit() {
            units.push(unit);
        }
        units
    }

    /// End of stream: whatever is left becomes the final unit.
    pub fn finish(&mut self) -> Option<SentenceUnit> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(SentenceUnit::new(text, Boundary::Flush))
    }

    fn next_unit(&mut self) -> Option<SentenceUnit> {
        let (end, boundary) = match self.scan() {
            Scan::Found(end, boundary) => (end, boundary),
            Scan::NotFound => (self.overflow_split()?, Boundary::Overflow),
        };
        let rest = self.buffer.split_off(end);
        let text = std::mem::replace(&mut self.buffer, rest);
        Some(SentenceUnit::new(text, boundary))
    }

    /// Finds the first boundary whose unit fits inside the length ceiling.
    /// Returns a byte offset into the buffer.
    fn scan(&self) -> Scan {
        let text = self.buffer.as_str();
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let limit = self.max_unit_chars.unwrap_or(usize::MAX);
        let byte_at = |idx: usize| chars.get(idx).map_or(text.len(), |(b, _)| *b);

        let mut seen_content = false;
        for (i, &(_, c)) in chars.iter().enumerate() {
            if i >= limit {
                break;
            }

            if c == '\n' && seen_content {
                if i + 1 > limit {
                    break;
                }
                return Scan::Found(byte_at(i + 1), Boundary::LineBreak);
            }

            if is_terminal(c) {
                let mut j = i + 1;
                while j < chars.len() && (is_terminal(chars[j].1) || is_closing(chars[j].1)) {
                    j += 1;
                }
                if j > limit || j == chars.len() {
                    // either too long, or the run may continue in the next fragment
                    break;
                }
                if chars[j].1.is_whitespace() && !(c == '.' && is_abbreviation(&chars[..=i])) {
                    return Scan::Found(byte_at(j), Boundary::Terminal);
                }
            }

            seen_content |= !c.is_whitespace();
        }
        Scan::NotFound
    }

    /// Byte offset of a forced break, or `None` while the buffer fits.
    fn overflow_split(&self) -> Option<usize> {
        let max = self.max_unit_chars?;
        let chars: Vec<(usize, char)> = self.buffer.char_indices().take(max + 1).collect();
        if chars.len() <= max {
            return None;
        }
        let split = (1..max)
            .rev()
            .find(|&k| chars[k].1.is_whitespace() && !chars[k - 1].1.is_whitespace())
            .unwrap_or(max);
        Some(chars[split].0)
    }
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '।')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | '”' | '’')
}

/// `upto` ends with the period under test.
fn is_abbreviation(upto: &[(usize, char)]) -> bool {
    let start = upto
        .iter()
        .rposition(|(_, c)| c.is_whitespace())
        .map_or(0, |p| p + 1);
    let token: String = upto[start..]
        .iter()
        .map(|(_, c)| *c)
        .skip_while(|c| matches!(c, '(' | '"' | '\'' | '“' | '‘'))
        .flat_map(char::to_lowercase)
        .collect();

    if ABBREVIATIONS.contains(&token.as_str()) {
        return true;
    }
    // single-letter initial such as "J."
    let mut letters = token.trim_end_matches('.').chars();
    matches!((letters.next(), letters.next()), (Some(c), None) if c.is_alphabetic())
        && upto.len() >= 2
        && upto[upto.len() - 2].1.is_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_chunks(chunks: &[&str], max: Option<usize>) -> Vec<SentenceUnit> {
        let mut seg = SentenceSegmenter::new().with_max_unit_chars(max);
        let mut units: Vec<SentenceUnit> = chunks.iter().flat_map(|c| seg.push(c)).collect();
        units.extend(seg.finish());
        units
    }

    fn texts(units: &[SentenceUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text.as_str()).collect()
    }

    fn chunk_by(text: &str, size: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars.chunks(size).map(|c| c.iter().collect()).collect()
    }

    #[test]
    fn test_three_sentences_any_split() {
        let input = "Hello world. How are you? Fine.";
        let n = input.len();
        for a in 1..n {
            for b in a..n {
                let chunks = [&input[..a], &input[a..b], &input[b..]];
                let units = segment_chunks(&chunks, None);
                assert_eq!(
                    texts(&units),
                    vec!["Hello world.", " How are you?", " Fine."],
                    "split at {a}/{b}"
                );
            }
        }
    }

    #[test]
    fn test_last_unit_is_flushed() {
        let units = segment_chunks(&["One. Two"], None);
        assert_eq!(units[0].boundary, Boundary::Terminal);
        assert_eq!(units[1], SentenceUnit::new(" Two".into(), Boundary::Flush));
    }

    #[test]
    fn test_roundtrip_independent_of_chunking() {
        let input = "Dr. Smith paid $3.50, i.e. cheap!\n\nThen he left… \"Really?\" she asked.\
                     J. R. R. Tolkien wrote it. यह अच्छा है। ठीक है?  Done";
        let whole = segment_chunks(&[input], Some(40));
        for size in 1..=9 {
            let chunks = chunk_by(input, size);
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let units = segment_chunks(&refs, Some(40));
            assert_eq!(units, whole, "chunk size {size}");
            assert_eq!(units.iter().map(|u| u.text.as_str()).collect::<String>(), input);
        }
    }

    #[test]
    fn test_abbreviations_and_decimals_do_not_split() {
        let units = segment_chunks(&["Dr. Smith paid 3.50 dollars, e.g. cash. Then left."], None);
        assert_eq!(
            texts(&units),
            vec!["Dr. Smith paid 3.50 dollars, e.g. cash.", " Then left."]
        );
    }

    #[test]
    fn test_initials_do_not_split() {
        let units = segment_chunks(&["Written by J. Smith. It sold well."], None);
        assert_eq!(texts(&units), vec!["Written by J. Smith.", " It sold well."]);
    }

    #[test]
    fn test_closing_quote_stays_with_sentence() {
        let units = segment_chunks(&["He said \"Stop!\" Then he went."], None);
        assert_eq!(texts(&units), vec!["He said \"Stop!\"", " Then he went."]);
    }

    #[test]
    fn test_newline_is_a_hard_break() {
        let units = segment_chunks(&["First line\n", "\nSecond line"], None);
        assert_eq!(texts(&units), vec!["First line\n", "\nSecond line"]);
        assert_eq!(units[0].boundary, Boundary::LineBreak);
    }

    #[test]
    fn test_danda_ends_sentence() {
        let units = segment_chunks(&["यह अच्छा है। ठीक है"], None);
        assert_eq!(texts(&units), vec!["यह अच्छा है।", " ठीक है"]);
    }

    #[test]
    fn test_no_empty_units() {
        let units = segment_chunks(&["\n\n", "Hi.", " ", "\n"], None);
        assert!(units.iter().all(|u| !u.text.is_empty()));
        assert_eq!(texts(&units), vec!["\n\nHi.", " \n"]);
        assert!(segment_chunks(&[], None).is_empty());
    }

    #[test]
    fn test_terminal_at_end_waits_for_more_input() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push("Wait.").is_empty());
        assert!(seg.push("..").is_empty());
        let units = seg.push(" Go");
        assert_eq!(texts(&units), vec!["Wait..."]);
        assert_eq!(seg.pending(), " Go");
    }

    #[test]
    fn test_overflow_breaks_at_whitespace() {
        let units = segment_chunks(&["aaaa bbbb cccc dddd eeee"], Some(10));
        assert!(units.iter().all(|u| u.text.chars().count() <= 10));
        assert_eq!(units[0], SentenceUnit::new("aaaa bbbb".into(), Boundary::Overflow));
        assert_eq!(units.iter().map(|u| u.text.as_str()).collect::<String>(), "aaaa bbbb cccc dddd eeee");
    }

    #[test]
    fn test_overflow_hard_split_without_whitespace() {
        let units = segment_chunks(&["abcdefghijklmnop"], Some(5));
        assert_eq!(texts(&units), vec!["abcde", "fghij", "klmno", "p"]);
    }
}
