//! Identifiers derived from a [`Selection`]: combination key, config hash, SKU.
//!
//! All three are computed from the same picks, so a selection always maps to
//! the same key, hash and SKU.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use variantforge_core::ProductGroupId;

use crate::axis::{AxisKey, ValueId};
use crate::expander::Selection;
use crate::slug::slugify;

/// Human-readable slug of a combination, e.g. `red-m-16-gb`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombinationKey(String);

impl CombinationKey {
    pub fn from_selection(selection: &Selection<'_>) -> Self {
        let slugs: Vec<&str> = selection
            .picks()
            .iter()
            .map(|p| p.value.slug.as_str())
            .collect();
        Self(slugs.join("-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical fingerprint of `(product group, axis → value)`; the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigHash(String);

impl ConfigHash {
    pub fn compute(group: ProductGroupId, selection: &Selection<'_>) -> Self {
        Self::from_pairs(group, &selection.value_ids())
    }

    /// Pairs are sorted by axis key, so registration order does not matter.
    /// Each component is length-prefixed to keep the encoding unambiguous.
    pub fn from_pairs(group: ProductGroupId, pairs: &[(AxisKey, ValueId)]) -> Self {
        let mut sorted: Vec<&(AxisKey, ValueId)> = pairs.iter().collect();
        sorted.sort();

        let mut canonical = format!("{group}|");
        for (key, value) in sorted {
            let _ = write!(
                canonical,
                "{}:{}={}:{};",
                key.as_str().len(),
                key,
                value.as_str().len(),
                value
            );
        }

        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Leading segment of every SKU generated for a product group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuBase(String);

const TOKEN_HEAD: usize = 3;
const TOKEN_RADIX: usize = 36;
const TOKEN_DIGITS: usize = 2;

impl SkuBase {
    /// Sanitized `prefix` when it has any alphanumerics, otherwise the first
    /// eight hex digits of the group id.
    pub fn new(prefix: Option<&str>, group: ProductGroupId) -> Self {
        let from_prefix = prefix
            .map(|p| slugify(p).to_ascii_uppercase())
            .filter(|p| !p.is_empty());

        match from_prefix {
            Some(p) => Self(p),
            None => {
                let simple = group.as_uuid().simple().to_string();
                Self(simple[..8].to_ascii_uppercase())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `BASE-TOKEN-TOKEN...`, one fixed-width token per pick.
    pub fn sku_for(&self, selection: &Selection<'_>) -> String {
        let mut sku = self.0.clone();
        for pick in selection.picks() {
            sku.push('-');
            sku.push_str(&value_token(&pick.value.slug, pick.position));
        }
        sku
    }
}

/// Three characters from the slug (padded with `X`) followed by the 1-based
/// value position in base 36, zero-padded to two digits. Positions past `ZZ`
/// take as many digits as they need, so tokens never repeat within an axis.
fn value_token(slug: &str, position: usize) -> String {
    let head: String = slug
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(TOKEN_HEAD)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    format!(
        "{head:X<head_width$}{:0>digit_width$}",
        base36(position + 1),
        head_width = TOKEN_HEAD,
        digit_width = TOKEN_DIGITS
    )
}

fn base36(mut n: usize) -> String {
    let mut digits = Vec::new();
    loop {
        let digit = char::from_digit((n % TOKEN_RADIX) as u32, TOKEN_RADIX as u32).unwrap_or('0');
        digits.push(digit.to_ascii_uppercase());
        n /= TOKEN_RADIX;
        if n == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}
