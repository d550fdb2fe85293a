//! Normalization of raw OCR output to the Saudi plate layout: up to three
//! Arabic letters followed by up to four digits.

const ARABIC_BLOCK: std::ops::RangeInclusive<char> = '\u{0600}'..='\u{06FF}';
const MAX_LETTERS: usize = 3;
const MAX_DIGITS: usize = 4;

/// Maps Arabic-Indic and Eastern Arabic-Indic digits to their ASCII value.
fn native_digit(c: char) -> Option<char> {
    match c {
        '\u{0660}'..='\u{0669}' => char::from_digit(c as u32 - 0x0660, 10),
        '\u{06F0}'..='\u{06F9}' => char::from_digit(c as u32 - 0x06F0, 10),
        _ => None,
    }
}

fn is_kept(c: char) -> bool {
    ARABIC_BLOCK.contains(&c) || c.is_ascii_digit() || c.is_whitespace()
}

/// Cleans one OCR hit. Returns `None` when nothing plate-like survives.
///
/// ASCII digits are collected before converted native digits, each group in reading order.
pub fn clean_plate_text(raw: &str) -> Option<String> {
    let filtered: String = raw.chars().filter(|&c| is_kept(c)).collect();

    let letters: Vec<String> = filtered
        .chars()
        .filter(|&c| ARABIC_BLOCK.contains(&c) && native_digit(c).is_none())
        .take(MAX_LETTERS)
        .map(String::from)
        .collect();

    let digits: String = filtered
        .chars()
        .filter(char::is_ascii_digit)
        .chain(filtered.chars().filter_map(native_digit))
        .take(MAX_DIGITS)
        .collect();

    let cleaned = match (letters.is_empty(), digits.is_empty()) {
        (false, false) => format!("{} {}", letters.join(" "), digits),
        (true, false) => digits,
        (false, true) => letters.join(" "),
        (true, true) => filtered.split_whitespace().collect::<Vec<_>>().join(" "),
    };

    (!cleaned.is_empty()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_native_digits() {
        assert_eq!(
            clean_plate_text("أ ب ج ١٢٣٤").as_deref(),
            Some("أ ب ج 1234")
        );
    }

    #[test]
    fn native_digits_only() {
        assert_eq!(clean_plate_text("٥٦٧٨").as_deref(), Some("5678"));
    }

    #[test]
    fn symbols_are_stripped() {
        assert_eq!(clean_plate_text("@@@12-34##").as_deref(), Some("1234"));
    }

    #[test]
    fn extended_digits_are_converted() {
        assert_eq!(clean_plate_text("۱۲۳").as_deref(), Some("123"));
    }

    #[test]
    fn letters_and_digits_are_capped() {
        assert_eq!(
            clean_plate_text("ا ب ج د 123456").as_deref(),
            Some("ا ب ج 1234")
        );
    }

    #[test]
    fn ascii_digits_precede_native_digits() {
        assert_eq!(clean_plate_text("١٢ 34").as_deref(), Some("3412"));
    }

    #[test]
    fn letters_without_digits() {
        assert_eq!(clean_plate_text("س-ص").as_deref(), Some("س ص"));
    }

    #[test]
    fn latin_and_empty_input_are_discarded() {
        assert_eq!(clean_plate_text("ABC"), None);
        assert_eq!(clean_plate_text("   "), None);
        assert_eq!(clean_plate_text(""), None);
    }
}
