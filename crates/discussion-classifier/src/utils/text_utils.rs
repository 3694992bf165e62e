//! Text normalization helpers for labels, topic names and slugs

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref NON_SLUG_REGEX: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Collapse runs of whitespace into single spaces and trim both ends
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Canonical stored form of a label or subject name.
    pub fn normalize_label(text: &str) -> String {
        Self::normalize_whitespace(text.trim()).to_lowercase()
    }

    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }

    /// Replace accented Latin letters by their base letter.
    pub fn fold_diacritics(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => out.push('a'),
                'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => out.push('A'),
                'ç' => out.push('c'),
                'Ç' => out.push('C'),
                'è' | 'é' | 'ê' | 'ë' => out.push('e'),
                'È' | 'É' | 'Ê' | 'Ë' => out.push('E'),
                'ì' | 'í' | 'î' | 'ï' => out.push('i'),
                'Ì' | 'Í' | 'Î' | 'Ï' => out.push('I'),
                'ñ' => out.push('n'),
                'Ñ' => out.push('N'),
                'ò' | 'ó' | 'ô' | 'õ' | 'ö' => out.push('o'),
                'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => out.push('O'),
                'ù' | 'ú' | 'û' | 'ü' => out.push('u'),
                'Ù' | 'Ú' | 'Û' | 'Ü' => out.push('U'),
                'ý' | 'ÿ' => out.push('y'),
                'Ý' | 'Ÿ' => out.push('Y'),
                'œ' => out.push_str("oe"),
                'Œ' => out.push_str("OE"),
                'æ' => out.push_str("ae"),
                'Æ' => out.push_str("AE"),
                other => out.push(other),
            }
        }
        out
    }

    /// URL-safe slug: lowercase ASCII, runs of anything else become a single `-`.
    pub fn slugify(text: &str) -> String {
        let folded = Self::fold_diacritics(text).to_lowercase();
        NON_SLUG_REGEX
            .replace_all(&folded, "-")
            .trim_matches('-')
            .to_string()
    }

    /// Truncate to at most `max_chars` characters without splitting a code point
    pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => Cow::Owned(text[..byte_idx].to_string()),
            None => Cow::Borrowed(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(
            TextUtils::normalize_label("  Accès   Compte et\tMot de passe  "),
            "accès compte et mot de passe"
        );
        assert_eq!(TextUtils::normalize_label("déjà normalisé"), "déjà normalisé");
    }

    #[test]
    fn test_slugify_strips_diacritics_and_punctuation() {
        assert_eq!(
            TextUtils::slugify("Validation Partielle et Blocs de Compétences"),
            "validation-partielle-et-blocs-de-competences"
        );
        assert_eq!(TextUtils::slugify("  Problèmes  Email!! "), "problemes-email");
        assert_eq!(TextUtils::slugify("Procédures VAE / Œuvre"), "procedures-vae-oeuvre");
        assert_eq!(TextUtils::slugify("---"), "");
    }

    #[test]
    fn test_char_len_counts_code_points() {
        assert_eq!(TextUtils::char_len("été"), 3);
        assert_eq!("été".len(), 5);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(TextUtils::truncate_chars("réclamation", 4), "récl");
        assert_eq!(TextUtils::truncate_chars("abc", 10), "abc");
    }
}
