//! Repetition-based boilerplate detection across one crawl run.

use std::collections::{HashMap, HashSet};

use crate::markup::Block;

/// Counts, per block, how many distinct documents of the run contain it.
///
/// Byte-identical documents count once, so an exact duplicate page does not
/// turn its own content into boilerplate.
#[derive(Debug, Default)]
pub struct BoilerplateIndex {
    counts: HashMap<Block, usize>,
    threshold: usize,
}

impl BoilerplateIndex {
    /// A block is boilerplate when it appears on at least
    /// `max(min_pages, ceil(ratio * distinct_documents))` documents.
    /// The floor is always two documents.
    pub fn build<'a>(
        documents: impl IntoIterator<Item = &'a [Block]>,
        min_pages: usize,
        ratio: f64,
    ) -> Self {
        let mut seen_documents: HashSet<&'a [Block]> = HashSet::new();
        let mut counts: HashMap<Block, usize> = HashMap::new();

        for blocks in documents {
            if blocks.is_empty() || !seen_documents.insert(blocks) {
                continue;
            }
            let unique: HashSet<&Block> = blocks.iter().collect();
            for block in unique {
                *counts.entry(block.clone()).or_default() += 1;
            }
        }

        let distinct = seen_documents.len();
        let by_ratio = (ratio.clamp(0.0, 1.0) * distinct as f64).ceil() as usize;
        let threshold = min_pages.max(by_ratio).max(2);

        Self { counts, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_boilerplate(&self, block: &Block) -> bool {
        self.counts.get(block).is_some_and(|&n| n >= self.threshold)
    }

    /// Drop boilerplate blocks, keeping the rest in order.
    pub fn strip(&self, blocks: Vec<Block>) -> Vec<Block> {
        blocks
            .into_iter()
            .filter(|b| !self.is_boilerplate(b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Block {
        Block::Text(s.into())
    }

    #[test]
    fn repeated_blocks_are_demoted() {
        let footer = text("Acme Ltd, 12 High Street. All rights reserved.");
        let docs = [
            vec![text("Home page intro"), footer.clone()],
            vec![text("About us"), footer.clone()],
            vec![text("Contact details"), footer.clone()],
        ];

        let index = BoilerplateIndex::build(docs.iter().map(Vec::as_slice), 2, 0.5);
        assert_eq!(index.threshold(), 2);
        assert!(index.is_boilerplate(&footer));
        assert!(!index.is_boilerplate(&text("About us")));
        assert_eq!(index.strip(docs[1].clone()), vec![text("About us")]);
    }

    #[test]
    fn ratio_raises_threshold_on_large_runs() {
        let shared = text("Seasonal offer");
        let mut docs: Vec<Vec<Block>> = (0..10).map(|i| vec![text(&format!("page {i}"))]).collect();
        for doc in docs.iter_mut().take(3) {
            doc.push(shared.clone());
        }

        let index = BoilerplateIndex::build(docs.iter().map(Vec::as_slice), 2, 0.5);
        assert_eq!(index.threshold(), 5);
        assert!(!index.is_boilerplate(&shared));
    }

    #[test]
    fn identical_documents_count_once() {
        let doc = vec![text("Only page content")];
        let docs = [doc.clone(), doc.clone()];
        let index = BoilerplateIndex::build(docs.iter().map(Vec::as_slice), 2, 0.5);
        assert!(!index.is_boilerplate(&text("Only page content")));
    }

    #[test]
    fn single_page_runs_keep_everything() {
        let docs = [vec![text("a"), text("a")]];
        let index = BoilerplateIndex::build(docs.iter().map(Vec::as_slice), 1, 0.0);
        assert!(!index.is_boilerplate(&text("a")));
    }
}
