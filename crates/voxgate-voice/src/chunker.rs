//! Sentence chunker — turns an LLM token stream into speakable chunks.
//!
//! TTS latency is dominated by the first chunk, so the chunker flushes as
//! soon as the accumulated buffer is plausibly speakable: at terminal
//! punctuation, once enough words have accumulated behind a sentence
//! break, or when the buffer grows past the length cap. The tail is
//! always flushed when the stream ends.

/// Flush once the buffer reaches this many characters.
const MAX_CHUNK_CHARS: usize = 60;

/// Flush at a sentence break once this many words have accumulated.
const FLUSH_WORDS: usize = 8;

/// Chunks shorter than this are held back unless they are a complete
/// sentence, so the TTS never receives micro-utterances like "Ok".
const MIN_CHUNK_CHARS: usize = 8;

/// Sentence-terminal punctuation, including the Devanagari danda.
const TERMINALS: [char; 4] = ['.', '!', '?', '।'];

/// Accumulates token deltas and yields speakable chunks.
#[derive(Debug, Default)]
pub struct SentenceChunker {
    buf: String,
}

impl SentenceChunker {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Append one token delta; returns any chunks that became speakable.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buf.push_str(delta);
        let mut out = Vec::new();

        loop {
            match self.try_flush() {
                Some(chunk) => out.push(chunk),
                None => break,
            }
        }

        out
    }

    /// Flush whatever remains at stream end. Always allowed, regardless
    /// of the minimum-length rule.
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.buf.trim().to_string();
        self.buf.clear();
        if tail.is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    /// Text currently held back.
    #[must_use]
    pub fn pending(&self) -> &str {
        self.buf.trim()
    }

    fn try_flush(&mut self) -> Option<String> {
        let trimmed = self.buf.trim_start();

        // Length cap: flush the whole buffer even without punctuation.
        if trimmed.chars().count() >= MAX_CHUNK_CHARS {
            let chunk = self.buf.trim().to_string();
            self.buf.clear();
            return Some(chunk);
        }

        // Otherwise flush up to a sentence boundary. A too-short candidate
        // (below the minimum with too few words) is extended to the next
        // boundary instead of being emitted as a micro-utterance.
        for boundary in sentence_boundaries(&self.buf) {
            let candidate = self.buf[..boundary].trim();

            let word_count = candidate.split_whitespace().count();
            let complete = ends_with_terminal(candidate);
            let long_enough = candidate.chars().count() >= MIN_CHUNK_CHARS;

            if complete && (long_enough || word_count >= FLUSH_WORDS) {
                let chunk = candidate.to_string();
                self.buf.drain(..boundary);
                return Some(chunk);
            }
        }

        None
    }
}

/// Byte offsets just past each sentence-terminal run that is followed by
/// whitespace (avoids splitting decimals like "3.5"), in ascending order.
fn sentence_boundaries(text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut end = None;
    for (i, c) in text.char_indices() {
        if TERMINALS.contains(&c) {
            end = Some(i + c.len_utf8());
        } else if let Some(e) = end {
            if c.is_whitespace() {
                boundaries.push(e);
                end = None;
            } else if c.is_ascii_digit() || c.is_alphabetic() {
                end = None;
            }
        }
    }
    boundaries
}

fn ends_with_terminal(text: &str) -> bool {
    text.chars().last().is_some_and(|c| TERMINALS.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_on_sentence_end() {
        let mut c = SentenceChunker::new();
        assert!(c.push("We are open ").is_empty());
        let chunks = c.push("nine to five. Anything");
        assert_eq!(chunks, vec!["We are open nine to five.".to_string()]);
        assert_eq!(c.pending(), "Anything");
    }

    #[test]
    fn holds_micro_utterances() {
        let mut c = SentenceChunker::new();
        // "Ok." is a complete sentence but below the minimum length, and
        // has too few words to flush early.
        assert!(c.push("Ok. ").is_empty());
        let chunks = c.push("I can certainly help with that. ");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("Ok."));
    }

    #[test]
    fn length_cap_flushes_without_punctuation() {
        let mut c = SentenceChunker::new();
        let long = "word ".repeat(14); // 70 chars, no terminal
        let chunks = c.push(&long);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].chars().count() >= 60);
    }

    #[test]
    fn finish_flushes_tail_regardless_of_length() {
        let mut c = SentenceChunker::new();
        assert!(c.push("bye").is_empty());
        assert_eq!(c.finish().as_deref(), Some("bye"));
        assert_eq!(c.finish(), None);
    }

    #[test]
    fn decimal_numbers_do_not_split() {
        let mut c = SentenceChunker::new();
        let chunks = c.push("The fee is 3.5 lakh rupees per year. ");
        assert_eq!(chunks, vec!["The fee is 3.5 lakh rupees per year.".to_string()]);
    }

    #[test]
    fn danda_terminates_hindi_sentences() {
        let mut c = SentenceChunker::new();
        let chunks = c.push("नमस्ते, मैं आपकी मदद कर सकती हूँ। और");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].ends_with('।'));
    }

    #[test]
    fn multiple_sentences_in_one_delta() {
        let mut c = SentenceChunker::new();
        let chunks = c.push("First sentence here. Second sentence follows. And");
        assert_eq!(chunks.len(), 2);
        assert_eq!(c.pending(), "And");
    }

    #[test]
    fn empty_stream_produces_nothing() {
        let mut c = SentenceChunker::new();
        assert!(c.push("").is_empty());
        assert_eq!(c.finish(), None);
    }
}
