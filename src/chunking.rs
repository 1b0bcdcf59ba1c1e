//! Prose chunking: splits page text into overlapping, sentence-aligned
//! chunks ready for embedding.
//!
//! Grounded on the teacher's `ContentChunker::chunk_text` /
//! `find_sentence_boundary` (`src/knowledge/chunker.rs`), generalized to
//! run per-page so each chunk keeps an accurate `page_number`.

/// One chunk of prose text from a single page, pre-embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub page_number: u32,
    pub content: String,
}

/// Chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

pub struct ProseChunker {
    config: ChunkerConfig,
}

impl ProseChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk the text of every page, tagging each chunk with its page number.
    pub fn chunk_pages(&self, pages: &[(u32, String)]) -> Vec<TextChunk> {
        pages
            .iter()
            .flat_map(|(page_number, text)| self.chunk_page(*page_number, text))
            .collect()
    }

    fn chunk_page(&self, page_number: u32, text: &str) -> Vec<TextChunk> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        if text.trim().is_empty() {
            return Vec::new();
        }

        if text.len() <= chunk_size {
            return vec![TextChunk {
                page_number,
                content: text.trim().to_string(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = (start + chunk_size).min(text.len());

            let chunk_text = if end < text.len() {
                self.find_sentence_boundary(&text[start..end])
            } else {
                text[start..end].to_string()
            };

            if !chunk_text.trim().is_empty() {
                chunks.push(TextChunk {
                    page_number,
                    content: chunk_text.trim().to_string(),
                });
            }

            let advance = chunk_text.len().saturating_sub(overlap).max(1);
            start += advance;

            if start >= text.len() {
                break;
            }
        }

        chunks
    }

    fn find_sentence_boundary(&self, text: &str) -> String {
        let search_start = text.len().saturating_sub(100);
        let search_text = &text[search_start..];

        if let Some(pos) = search_text.rfind(|c: char| c == '.' || c == '!' || c == '?') {
            return text[..search_start + pos + 1].to_string();
        }

        if let Some(pos) = text.rfind(char::is_whitespace) {
            return text[..pos].to_string();
        }

        text.to_string()
    }
}

impl Default for ProseChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_short_page() {
        let chunker = ProseChunker::default();
        let chunks = chunker.chunk_pages(&[(1, "Uruguay hosted the first World Cup.".to_string())]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 1);
    }

    #[test]
    fn test_chunk_long_page_respects_overlap_and_page_number() {
        let config = ChunkerConfig {
            chunk_size: 50,
            chunk_overlap: 10,
        };
        let chunker = ProseChunker::new(config);
        let text = "This is sentence one. This is sentence two. This is sentence three. This is sentence four.";
        let chunks = chunker.chunk_pages(&[(3, text.to_string())]);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.page_number == 3));
    }

    #[test]
    fn test_chunk_pages_tags_each_page_independently() {
        let chunker = ProseChunker::default();
        let chunks = chunker.chunk_pages(&[
            (1, "Page one content.".to_string()),
            (2, "Page two content.".to_string()),
        ]);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks[1].page_number, 2);
    }

    #[test]
    fn test_empty_page_produces_no_chunks() {
        let chunker = ProseChunker::default();
        let chunks = chunker.chunk_pages(&[(1, "   ".to_string())]);
        assert!(chunks.is_empty());
    }
}
