//! Derives the product reference and ordinal carried by an image filename.

use crate::calligraph::models::ExtractedRef;
use once_cell::sync::Lazy;
use regex::Regex;

static WITH_ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z0-9]+c?)_([0-9]+)$").expect("ordinal pattern"));
static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-z0-9]+c?)$").expect("bare pattern"));
static WITH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z0-9]+c?)[-_](.+)$").expect("suffix pattern"));
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+c?").expect("token pattern"));

/// Filename without its final extension. Dotfiles keep their full name.
pub fn file_stem(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}

/// Rules are tried in order on the lowercased stem; the first hit wins.
pub fn extract_reference(filename: &str) -> ExtractedRef {
    let stem = file_stem(filename).trim().to_lowercase();

    if let Some(caps) = WITH_ORDINAL.captures(&stem) {
        let ordinal = caps[2].parse::<u32>().ok().filter(|n| *n > 0).unwrap_or(1);
        return ExtractedRef {
            base_ref: caps[1].to_uppercase(),
            ordinal,
        };
    }
    if let Some(caps) = BARE.captures(&stem) {
        return ExtractedRef {
            base_ref: caps[1].to_uppercase(),
            ordinal: 1,
        };
    }
    if let Some(caps) = WITH_SUFFIX.captures(&stem) {
        return ExtractedRef {
            base_ref: caps[1].to_uppercase(),
            ordinal: 1,
        };
    }

    let base_ref = TOKEN
        .find_iter(&stem)
        .map(|m| m.as_str())
        .find(|token| ends_with_digit_c(token))
        .unwrap_or(&stem)
        .to_uppercase();
    ExtractedRef {
        base_ref,
        ordinal: 1,
    }
}

fn ends_with_digit_c(token: &str) -> bool {
    let mut tail = token.chars().rev();
    matches!(
        (tail.next(), tail.next()),
        (Some('c'), Some(d)) if d.is_ascii_digit()
    )
}
