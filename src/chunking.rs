/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The words of this window joined by single spaces
    pub text: String,
    /// Number of words in this chunk
    pub word_count: usize,
    /// Identifier of the document this chunk belongs to (the ticker)
    pub document_id: String,
    /// Offset of the first word of this chunk in the document's word sequence
    pub start_position: usize,
}

/// Distance between window starts; never zero so the window always advances
pub fn step_size(window: usize, overlap: usize) -> usize {
    window.max(1).saturating_sub(overlap).max(1)
}

/// Split text into overlapping windows of at most `window` words.
///
/// Windows start every `step_size(window, overlap)` words and the last window
/// is the first one that reaches the end of the text, so non-empty input
/// yields `ceil((words - overlap) / step)` chunks (at least one).
pub fn chunk(text: &str, window: usize, overlap: usize) -> Vec<String> {
    split_into_chunks(text, "", window, overlap)
        .into_iter()
        .map(|chunk| chunk.text)
        .collect()
}

/// Split text into word windows, keeping offsets and the owning document id
pub fn split_into_chunks(
    text: &str,
    document_id: &str,
    window: usize,
    overlap: usize,
) -> Vec<TextChunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let window = window.max(1);
    let step = step_size(window, overlap);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(words.len());
        chunks.push(TextChunk {
            text: words[start..end].join(" "),
            word_count: end - start,
            document_id: document_id.to_string(),
            start_position: start,
        });

        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}
