//! Joins manifest rows with accepted images.
//!
//! Every product is tried in manifest order against three strategies: the
//! reference index, then the `image name` column, then the product name.
//! An image is handed to at most one product; earlier rows win.

use crate::calligraph::models::{
    ExtractedRef, MatchStrategy, MatchTask, ProductRecord, RawImage, StrategyCounts,
};
use crate::calligraph::reference::{extract_reference, file_stem};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Minimum token length considered by the product-name pass.
const FUZZY_MIN_TOKEN: usize = 5;
const FUZZY_MAX_TOKENS: usize = 2;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchPlan {
    pub tasks: Vec<MatchTask>,
    pub unmatched_products: Vec<ProductRecord>,
    pub unmatched_images: Vec<String>,
    pub strategy_counts: StrategyCounts,
}

/// Insertion-ordered multimap from lookup key to image indices.
#[derive(Debug, Default)]
struct ImageIndex {
    keys: Vec<String>,
    buckets: Vec<Vec<usize>>,
    positions: HashMap<String, usize>,
}

impl ImageIndex {
    fn insert(&mut self, key: String, image: usize) {
        if key.is_empty() {
            return;
        }
        let slot = match self.positions.get(&key) {
            Some(slot) => *slot,
            None => {
                self.keys.push(key.clone());
                self.buckets.push(Vec::new());
                self.positions.insert(key, self.keys.len() - 1);
                self.keys.len() - 1
            }
        };
        let bucket = &mut self.buckets[slot];
        if !bucket.contains(&image) {
            bucket.push(image);
        }
    }

    fn get(&self, key: &str) -> &[usize] {
        self.positions
            .get(key)
            .map(|slot| self.buckets[*slot].as_slice())
            .unwrap_or(&[])
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.buckets.iter().map(Vec::as_slice))
    }
}

pub fn match_products(products: &[ProductRecord], images: &[RawImage]) -> MatchPlan {
    let extracted: Vec<ExtractedRef> = images
        .iter()
        .map(|image| extract_reference(&image.filename))
        .collect();

    let mut index = ImageIndex::default();
    for (idx, (image, extracted)) in images.iter().zip(&extracted).enumerate() {
        index.insert(extracted.base_ref.clone(), idx);
        index.insert(file_stem(&image.filename).to_lowercase(), idx);
        index.insert(image.filename.to_lowercase(), idx);
    }

    let mut used: HashSet<usize> = HashSet::new();
    let mut plan = MatchPlan::default();

    for product in products {
        let Some((strategy, bucket)) = find_candidates(product, &index) else {
            plan.unmatched_products.push(product.clone());
            continue;
        };
        let mut candidates: Vec<usize> = bucket
            .into_iter()
            .filter(|idx| !used.contains(idx))
            .collect();
        if candidates.is_empty() {
            plan.unmatched_products.push(product.clone());
            continue;
        }

        candidates.sort_by(|a, b| {
            extracted[*a]
                .ordinal
                .cmp(&extracted[*b].ordinal)
                .then_with(|| images[*a].filename.cmp(&images[*b].filename))
        });

        let total = candidates.len() as u32;
        let base = product
            .image_name
            .as_deref()
            .unwrap_or(&product.reference)
            .to_string();

        for (pos, image_idx) in candidates.into_iter().enumerate() {
            let ordinal = pos as u32 + 1;
            let final_stem = if total == 1 {
                base.clone()
            } else {
                format!("{base}_{ordinal}")
            };
            used.insert(image_idx);
            plan.strategy_counts.record(strategy);
            plan.tasks.push(MatchTask {
                sku: product.sku.clone(),
                reference: product.reference.clone(),
                image: images[image_idx].clone(),
                source_ordinal: extracted[image_idx].ordinal,
                ordinal,
                total_for_sku: total,
                final_stem,
                strategy,
            });
        }
    }

    plan.unmatched_images = images
        .iter()
        .enumerate()
        .filter(|(idx, _)| !used.contains(idx))
        .map(|(_, image)| image.filename.clone())
        .collect();
    plan
}

/// Runs the three passes in precedence order and returns the raw candidate
/// set of the first one that finds anything. Claimed images are filtered out
/// by the caller, so a product whose pass hits only claimed images gets
/// nothing rather than falling through.
fn find_candidates(
    product: &ProductRecord,
    index: &ImageIndex,
) -> Option<(MatchStrategy, Vec<usize>)> {
    let mut by_ref = Vec::new();
    for key in [
        product.reference.to_uppercase(),
        product.reference.to_lowercase(),
        product.reference.clone(),
    ] {
        for idx in index.get(&key) {
            if !by_ref.contains(idx) {
                by_ref.push(*idx);
            }
        }
    }
    if !by_ref.is_empty() {
        return Some((MatchStrategy::Ref, by_ref));
    }

    if let Some(image_name) = product.image_name.as_deref() {
        let needle = image_name.to_lowercase();
        let hit = index.entries().find(|(key, _)| {
            let key = key.to_lowercase();
            key.contains(&needle) || needle.contains(&key)
        });
        if let Some((_, bucket)) = hit {
            return Some((MatchStrategy::ImageName, bucket.to_vec()));
        }
    }

    if let Some(product_name) = product.product_name.as_deref() {
        let tokens: Vec<String> = product_name
            .split_whitespace()
            .filter(|token| token.chars().count() >= FUZZY_MIN_TOKEN)
            .take(FUZZY_MAX_TOKENS)
            .map(str::to_lowercase)
            .collect();
        let hit = index.entries().find(|(key, _)| {
            let key = key.to_lowercase();
            tokens.iter().any(|token| key.contains(token.as_str()))
        });
        if let Some((_, bucket)) = hit {
            return Some((MatchStrategy::Fuzzy, bucket.to_vec()));
        }
    }

    None
}
