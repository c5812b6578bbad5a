//! Text folding used as the join key between user queries and dataset rows.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold a string for equality lookups: trim, lowercase, strip diacritics,
/// and collapse internal whitespace runs to a single space.
///
/// Example: "  Puente   Río Frío " → "puente rio frio"
pub fn fold(value: &str) -> String {
    let stripped: String = value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive a column identifier from a raw header.
///
/// Example: "Fecha de Vaciado " → "fecha_de_vaciado", "Avance (%)" → "avance_(%)"
pub fn column_id(header: &str) -> String {
    fold(header.trim_start_matches('\u{feff}')).replace(' ', "_")
}

/// Title-case a folded query for display in replies.
///
/// Example: "puente 10" → "Puente 10"
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().to_string() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
