use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::Chunk;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 800,
            overlap_chars: 120,
            min_chars: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars ({}) must be less than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        if self.min_chars > self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chars ({}) must not exceed max_chars ({})",
                self.min_chars, self.max_chars
            )));
        }
        let placeholder = image_placeholder(1).chars().count();
        if self.min_chars > placeholder {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chars ({}) must not exceed the image placeholder length ({placeholder})",
                self.min_chars
            )));
        }
        Ok(())
    }
}

/// Collapse whitespace runs to single spaces and drop control characters
/// (NULs and form feeds are common in extracted PDF text).
pub fn normalize_whitespace(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split normalized text after `.`, `!` or `?` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let boundary = chars.peek().is_some_and(|(_, next)| next.is_whitespace());
        if boundary {
            let end = index + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Greedily pack whole sentences into chunks of at most `max_chars`.
///
/// A sentence longer than `max_chars` is emitted whole rather than cut
/// mid-sentence. Each new chunk starts with roughly `overlap_chars` worth of
/// whole trailing words from the previous one. Chunks shorter than
/// `min_chars` are dropped as noise.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for sentence in split_sentences(&normalized) {
        if buffer.is_empty() {
            buffer.push_str(sentence);
            continue;
        }

        let projected = char_len(&buffer) + 1 + char_len(sentence);
        if projected <= config.max_chars {
            buffer.push(' ');
            buffer.push_str(sentence);
            continue;
        }

        let tail = overlap_tail(&buffer, config.overlap_chars);
        emit(&mut chunks, &buffer, config.min_chars);
        buffer = if tail.is_empty() {
            sentence.to_string()
        } else {
            format!("{tail} {sentence}")
        };
    }

    emit(&mut chunks, &buffer, config.min_chars);
    chunks
}

fn emit(chunks: &mut Vec<String>, buffer: &str, min_chars: usize) {
    let trimmed = buffer.trim();
    if char_len(trimmed) >= min_chars {
        chunks.push(trimmed.to_string());
    }
}

/// Trailing whole words of `text` totalling at most `budget` characters.
fn overlap_tail(text: &str, budget: usize) -> String {
    if budget == 0 {
        return String::new();
    }

    let mut taken = Vec::new();
    let mut used = 0;
    for word in text.split_whitespace().rev() {
        let cost = char_len(word) + usize::from(!taken.is_empty());
        if used + cost > budget {
            break;
        }
        used += cost;
        taken.push(word);
    }
    taken.reverse();
    taken.join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn image_placeholder(page: u32) -> String {
    format!("[Page {page}: this page contains images but no extractable text]")
}

/// Chunk every page of a document, in page order.
///
/// Pages without text are skipped, unless they carry images, in which case a
/// placeholder chunk keeps them discoverable. Zero chunks is an ingestion
/// failure.
pub fn build_chunks(
    source: &Path,
    pages: &[PageText],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    for page in pages {
        if page.number == 0 {
            return Err(IngestError::InvalidArgument(format!(
                "page numbers are 1-based, got 0 in {}",
                source.display()
            )));
        }

        let has_images = !page.images.is_empty();
        let page_chunks = chunk_text(&page.text, config);

        if page_chunks.is_empty() {
            if has_images {
                chunks.push(Chunk {
                    text: image_placeholder(page.number),
                    page: page.number,
                    has_images,
                });
            }
            continue;
        }

        debug!(page = page.number, chunks = page_chunks.len(), "chunked page");
        chunks.extend(page_chunks.into_iter().map(|text| Chunk {
            text,
            page: page.number,
            has_images,
        }));
    }

    if chunks.is_empty() {
        return Err(IngestError::NoContentExtracted {
            path: source.to_path_buf(),
        });
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageImage;

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
            images: Vec::new(),
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{0}  spacing\u{000c}";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let sentences = split_sentences("First one. Second? Third! v1.2 stays whole");
        assert_eq!(
            sentences,
            vec!["First one.", "Second?", "Third!", "v1.2 stays whole"]
        );
    }

    #[test]
    fn chunks_respect_size_and_floor() {
        let config = ChunkingConfig {
            max_chars: 80,
            overlap_chars: 20,
            min_chars: 10,
        };
        let text = "The pump must be primed before use. \
                    Pressure should stay below ten bar at all times. \
                    Inspect the seals every month for visible wear. \
                    Replace the filter cartridge twice a year.";

        let chunks = chunk_text(text, config);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() >= config.min_chars);
        }
    }

    #[test]
    fn next_chunk_starts_with_overlap_words() {
        let config = ChunkingConfig {
            max_chars: 60,
            overlap_chars: 15,
            min_chars: 1,
        };
        let text = "Alpha beta gamma delta epsilon zeta eta theta. Iota kappa lambda mu nu xi omicron pi.";

        let chunks = chunk_text(text, config);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("zeta eta theta. Iota"));
        assert!(chunks[1].ends_with("omicron pi."));
    }

    #[test]
    fn oversized_sentence_is_kept_whole() {
        let config = ChunkingConfig {
            max_chars: 20,
            overlap_chars: 5,
            min_chars: 1,
        };
        let long = "This single sentence is far longer than the chunk budget allows";

        let chunks = chunk_text(long, config);
        assert_eq!(chunks, vec![long.to_string()]);
    }

    #[test]
    fn image_only_pages_get_a_placeholder() {
        let mut image_page = page(2, "   ");
        image_page.images.push(PageImage {
            page: 2,
            filter: Some("DCTDecode".to_string()),
            data: vec![0xff, 0xd8],
        });
        let pages = vec![
            page(1, "This first page has enough words in it to pass the minimum floor."),
            image_page,
            page(3, ""),
        ];

        let chunks = build_chunks(Path::new("doc.pdf"), &pages, ChunkingConfig::default())
            .expect("document has content");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, 1);
        assert!(!chunks[0].has_images);
        assert_eq!(chunks[1].page, 2);
        assert!(chunks[1].has_images);
        assert!(chunks[1].text.contains("no extractable text"));
        for chunk in &chunks {
            assert!(chunk.text.trim().chars().count() >= ChunkingConfig::default().min_chars);
            assert!(chunk.page >= 1);
        }
    }

    #[test]
    fn empty_document_is_an_ingestion_failure() {
        let pages = vec![page(1, " \n "), page(2, "tiny")];
        let result = build_chunks(Path::new("empty.pdf"), &pages, ChunkingConfig::default());
        assert!(matches!(result, Err(IngestError::NoContentExtracted { .. })));
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let config = ChunkingConfig {
            max_chars: 100,
            overlap_chars: 100,
            min_chars: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn floor_above_the_image_placeholder_is_rejected() {
        let config = ChunkingConfig {
            min_chars: 100,
            ..ChunkingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IngestError::InvalidChunkConfig(reason)) if reason.contains("placeholder")
        ));

        let floor = image_placeholder(1).chars().count();
        let config = ChunkingConfig {
            min_chars: floor,
            ..ChunkingConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(image_placeholder(u32::MAX).chars().count() >= floor);
    }
}
