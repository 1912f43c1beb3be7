use crate::models::{SearchHit, SourceRef};
use std::collections::HashMap;

pub const EMPTY_QUESTION_ANSWER: &str = "Please ask a question about the document.";
pub const NO_INDEX_ANSWER: &str =
    "No document knowledge is available yet. Please upload and index a document first.";
pub const IRRELEVANT_ANSWER: &str = "The question is irrelevant or not covered in the document.";

/// `[Page N]\n<text>` blocks in retrieval-rank order, separated by a blank line.
pub fn assemble_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("[Page {}]\n{}", hit.page, hit.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One citation per page, keeping that page's best distance. Pages appear in
/// the order they were first retrieved.
pub fn dedupe_sources(hits: &[SearchHit]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut by_page: HashMap<u32, usize> = HashMap::new();

    for hit in hits {
        match by_page.get(&hit.page) {
            Some(&slot) => {
                let kept = &mut sources[slot];
                if hit.distance < kept.distance {
                    kept.distance = hit.distance;
                    kept.text = Some(hit.text.clone());
                }
                kept.has_images |= hit.has_images;
            }
            None => {
                by_page.insert(hit.page, sources.len());
                sources.push(SourceRef {
                    page: hit.page,
                    distance: hit.distance,
                    text: Some(hit.text.clone()),
                    has_images: hit.has_images,
                });
            }
        }
    }
    sources
}

/// Cut `context` to at most `max_chars` characters.
pub fn truncate_context(context: &str, max_chars: usize) -> &str {
    match context.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => &context[..byte_offset],
        None => context,
    }
}

pub fn build_prompt(context: &str, question: &str, max_context_chars: usize) -> String {
    let context = truncate_context(context, max_context_chars);
    format!(
        "You are a document question-answering assistant.\n\
         \n\
         Rules:\n\
         - Answer ONLY using the context below.\n\
         - If the context does not contain the answer, reply with exactly: {IRRELEVANT_ANSWER}\n\
         - Do not explain your reasoning.\n\
         - Do not use markdown.\n\
         - Do not mention the context, the pages or how the information was retrieved.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer:"
    )
}

/// `1 / (1 + mean distance)` rounded to three places; 0.0 with no hits.
pub fn confidence(hits: &[SearchHit]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    let mean = hits.iter().map(|hit| hit.distance.max(0.0)).sum::<f32>() / hits.len() as f32;
    ((1.0 / (1.0 + mean)) * 1_000.0).round() / 1_000.0
}

/// Smallest distance among `hits`.
pub fn best_distance(hits: &[SearchHit]) -> Option<f32> {
    hits.iter().map(|hit| hit.distance).reduce(f32::min)
}
