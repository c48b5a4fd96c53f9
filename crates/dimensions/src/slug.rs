//! URL-safe slugs for axis values and keys.

/// Lowercase ASCII alphanumerics survive; every other run of characters
/// collapses into a single `-`. Leading and trailing separators are dropped.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_joins_words() {
        assert_eq!(slugify("Midnight Blue"), "midnight-blue");
        assert_eq!(slugify("  16 GB  "), "16-gb");
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(slugify("XL / Tall -- fit"), "xl-tall-fit");
    }

    #[test]
    fn drops_non_ascii() {
        assert_eq!(slugify("Crème brûlée"), "cr-me-br-l-e");
        assert_eq!(slugify("红色"), "");
    }

    #[test]
    fn is_idempotent() {
        let once = slugify("Space Gray (2nd gen)");
        assert_eq!(slugify(&once), once);
    }
}
