//! Structural clause markers at the start of a line.
//!
//! Recognises the numbering conventions contracts use to open a clause so the
//! segmenter can split on structure rather than on sentences.
//!
//! # Recognised forms
//!
//! - Dotted numeric: `1.`, `1.2`, `12.3.4`, `7)` (at most 3 digits per level)
//! - Letter suffix (amendment insertion): `3A.`, `41ZA.`
//! - Parenthesised: `(a)`, `(iv)`, `(12)`
//! - Lone letter: `a)`, `b)`
//! - Keyword: `Section 4`, `Article IV`, `Clause 7.1`, `Schedule 2`, `Part 3`, `§ 5`
//!
//! # Sort keys
//!
//! [`sort_key`] turns a label into a string whose lexicographic order is
//! document order. Each level becomes three zero-padded segments: the number,
//! then up to two letter-suffix groups. A plain letter `A`..`Z` codes as
//! 010..260 and a `Z`-prefixed pair `ZA`..`ZZ` as 001..026, so `3ZA` sorts
//! between `3` and `3A`.

/// A marker found at the start of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Label as written, without trailing punctuation (`3.1`, `(a)`, `Article IV`).
    pub label: String,
    /// Bytes of the line consumed by the marker, including trailing `.`/`)`.
    pub len: usize,
}

const KEYWORDS: &[&str] = &["section", "article", "clause", "schedule", "part", "annex", "§"];

/// Parse a marker at the start of `line` (leading whitespace ignored).
///
/// Returns `None` for ordinary prose such as `30 days after notice`.
pub fn parse_marker(line: &str) -> Option<Marker> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();

    let found = parse_keyword(trimmed)
        .or_else(|| parse_parenthesised(trimmed))
        .or_else(|| parse_numeric(trimmed))
        .or_else(|| parse_lone_letter(trimmed))?;

    Some(Marker {
        label: found.label,
        len: found.len + indent,
    })
}

/// Whether the remainder of the line after the marker is a title rather than
/// a sentence: short, and not terminated like prose.
pub fn is_heading_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let rest = match parse_marker(trimmed) {
        Some(m) => trimmed[m.len..].trim(),
        None => trimmed,
    };
    if rest.is_empty() {
        return true;
    }
    if rest.split_whitespace().count() > 8 || ends_sentence(rest) {
        return false;
    }
    // Titles are either upper case or title case.
    let letters: Vec<char> = rest.chars().filter(|c| c.is_alphabetic()).collect();
    let all_upper = !letters.is_empty() && letters.iter().all(|c| c.is_uppercase());
    let title_case = rest
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .all(|w| w.chars().next().is_some_and(|c| c.is_uppercase()));
    all_upper || title_case
}

/// Whether text ends like a complete sentence or list item.
pub fn ends_sentence(text: &str) -> bool {
    let trimmed = text.trim_end_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'');
    matches!(
        trimmed.chars().last(),
        Some('.' | ';' | ':' | '!' | '?' | ')' | '”' | '’')
    )
}

/// Lexicographically sortable key for a marker label.
///
/// `3` → `003.000.000`, `3A` → `003.010.000`, `12.3` →
/// `012.000.000.003.000.000`, `Article IV` → `004.000.000`, `(b)` →
/// `002.000.000`. A lone `i`, `v` or `x` reads as a roman numeral.
pub fn sort_key(label: &str) -> String {
    let number = label.split_whitespace().last().unwrap_or("");
    let number = number.trim_matches(|c| c == '(' || c == ')' || c == '.');
    if number.is_empty() {
        return level_key(0, &[]);
    }
    number
        .split('.')
        .map(|level| {
            if is_roman(level) {
                return level_key(roman_value(level), &[]);
            }
            match level.as_bytes() {
                [letter] if letter.is_ascii_lowercase() => {
                    level_key(u32::from(letter - b'a') + 1, &[])
                }
                bytes => {
                    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
                    let base = level[..digits].parse().unwrap_or(0);
                    level_key(base, &suffix_codes(&bytes[digits..]))
                }
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn level_key(base: u32, suffix: &[u32]) -> String {
    let first = suffix.first().copied().unwrap_or(0);
    let second = suffix.get(1).copied().unwrap_or(0);
    format!("{base:03}.{first:03}.{second:03}")
}

/// Up to two suffix groups: `ZA`..`ZZ` → 1..26, `A`..`Z` → 10..260.
fn suffix_codes(suffix: &[u8]) -> Vec<u32> {
    let mut codes = Vec::with_capacity(2);
    let mut i = 0;
    while i < suffix.len() && codes.len() < 2 {
        match (suffix[i], suffix.get(i + 1)) {
            (b'Z', Some(next)) if next.is_ascii_uppercase() => {
                codes.push(u32::from(next - b'A') + 1);
                i += 2;
            }
            (letter, _) if letter.is_ascii_uppercase() => {
                codes.push((u32::from(letter - b'A') + 1) * 10);
                i += 1;
            }
            _ => break,
        }
    }
    codes
}

fn roman_value(s: &str) -> u32 {
    let digit = |c: char| match c.to_ascii_lowercase() {
        'i' => 1,
        'v' => 5,
        'x' => 10,
        'l' => 50,
        _ => 0,
    };
    let values: Vec<i64> = s.chars().map(digit).collect();
    let total: i64 = values
        .iter()
        .enumerate()
        .map(|(i, &v)| if values.get(i + 1).is_some_and(|&next| next > v) { -v } else { v })
        .sum();
    u32::try_from(total).unwrap_or(0)
}

fn parse_keyword(s: &str) -> Option<Marker> {
    let lower = s.to_lowercase();
    let keyword = KEYWORDS.iter().find(|k| lower.starts_with(**k))?;
    let after_kw = &s[keyword.len()..];
    let rest = after_kw.trim_start();
    if rest.len() == after_kw.len() && *keyword != "§" {
        // "Sections" or "Clauses" in running text, not a marker.
        return None;
    }
    let number_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .unwrap_or(rest.len());
    let number = rest[..number_len].trim_end_matches('.');
    if number.is_empty() || !(is_numeric_label(number) || is_roman(number)) {
        return None;
    }
    let consumed = s.len() - rest.len() + number_len;
    let mut len = consumed;
    if let Some(next) = s[consumed..].chars().next()
        && matches!(next, ':' | '-' | '–' | '—')
    {
        len += next.len_utf8();
    }
    let label = format!("{}{}", &s[..keyword.len()], &s[keyword.len()..s.len() - rest.len()])
        .trim_end()
        .to_string();
    Some(Marker {
        label: format!("{label} {number}"),
        len,
    })
}

fn parse_parenthesised(s: &str) -> Option<Marker> {
    let inner_end = s.strip_prefix('(')?.find(')')? + 1;
    let inner = &s[1..inner_end];
    let valid = (!inner.is_empty() && inner.len() <= 3 && inner.bytes().all(|b| b.is_ascii_digit()))
        || (inner.len() == 1 && inner.bytes().all(|b| b.is_ascii_lowercase()))
        || is_roman(inner);
    if !valid {
        return None;
    }
    Some(Marker {
        label: s[..=inner_end].to_string(),
        len: inner_end + 1,
    })
}

fn parse_numeric(s: &str) -> Option<Marker> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut levels = 0;

    loop {
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let digits = i - digits_start;
        if digits == 0 || digits > 3 {
            return None;
        }
        // Letter suffix: 3A, 41ZA.
        while i < bytes.len() && bytes[i].is_ascii_uppercase() && i - digits_start < 6 {
            i += 1;
        }
        levels += 1;
        if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
            i += 1;
            continue;
        }
        break;
    }

    let label_end = i;
    match bytes.get(i) {
        Some(b'.') | Some(b')') => i += 1,
        // Dotted labels may stand alone: "1.2 Fees".
        Some(b) if b.is_ascii_whitespace() && levels > 1 => {}
        None if levels > 1 => {}
        _ => return None,
    }
    // A marker is followed by whitespace or the end of the line.
    if let Some(next) = bytes.get(i)
        && !next.is_ascii_whitespace()
    {
        return None;
    }

    Some(Marker {
        label: s[..label_end].to_string(),
        len: i,
    })
}

fn parse_lone_letter(s: &str) -> Option<Marker> {
    let mut chars = s.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_lowercase() || chars.next()? != ')' {
        return None;
    }
    if chars.next().is_some_and(|c| !c.is_whitespace()) {
        return None;
    }
    Some(Marker {
        label: format!("{letter})"),
        len: 2,
    })
}

fn is_numeric_label(s: &str) -> bool {
    s.split('.').all(|part| {
        let digits = part.bytes().take_while(|b| b.is_ascii_digit()).count();
        digits > 0
            && digits <= 3
            && part[digits..].bytes().all(|b| b.is_ascii_uppercase())
    })
}

fn is_roman(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 6
        && (s.chars().all(|c| matches!(c, 'i' | 'v' | 'x' | 'l'))
            || s.chars().all(|c| matches!(c, 'I' | 'V' | 'X' | 'L')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(line: &str) -> Option<String> {
        parse_marker(line).map(|m| m.label)
    }

    #[test]
    fn dotted_numeric() {
        assert_eq!(label("1. Definitions"), Some("1".into()));
        assert_eq!(label("1.2 Fees are payable monthly."), Some("1.2".into()));
        assert_eq!(label("12.3.4. Notices"), Some("12.3.4".into()));
        assert_eq!(label("7) Term"), Some("7".into()));
    }

    #[test]
    fn letter_suffix() {
        assert_eq!(label("3A. Inserted clause"), Some("3A".into()));
        assert_eq!(label("41ZA. Pre-inserted"), Some("41ZA".into()));
    }

    #[test]
    fn parenthesised() {
        assert_eq!(label("(a) the Vendor shall"), Some("(a)".into()));
        assert_eq!(label("(iv) any affiliate"), Some("(iv)".into()));
        assert_eq!(label("(12) twelve"), Some("(12)".into()));
        assert_eq!(label("(see below) text"), None);
    }

    #[test]
    fn lone_letter() {
        assert_eq!(label("b) second item"), Some("b)".into()));
        assert_eq!(label("a)b"), None);
    }

    #[test]
    fn keywords() {
        assert_eq!(label("Section 4 Termination"), Some("Section 4".into()));
        assert_eq!(label("ARTICLE IV - LIABILITY"), Some("ARTICLE IV".into()));
        assert_eq!(label("Clause 7.1: Fees"), Some("Clause 7.1".into()));
        assert_eq!(label("§ 5 Governing law"), Some("§ 5".into()));
    }

    #[test]
    fn prose_is_not_a_marker() {
        assert_eq!(label("30 days after notice the Vendor"), None);
        assert_eq!(label("2024. The year"), None);
        assert_eq!(label("Sections of this agreement"), None);
        assert_eq!(label("The Vendor may terminate"), None);
        assert_eq!(label("Section of land"), None);
        assert_eq!(label("3.5% interest applies"), None);
    }

    #[test]
    fn indent_counts_toward_len() {
        let m = parse_marker("   (b) text").unwrap();
        assert_eq!(m.label, "(b)");
        assert_eq!(m.len, 6);
    }

    #[test]
    fn heading_lines() {
        assert!(is_heading_line("1. TERMINATION"));
        assert!(is_heading_line("Article IV"));
        assert!(is_heading_line("Limitation of Liability"));
        assert!(!is_heading_line("1. The Vendor may terminate at will."));
        assert!(!is_heading_line("the parties agree as follows"));
        assert!(!is_heading_line(""));
    }

    fn assert_sorted(labels: &[&str]) {
        let keys: Vec<String> = labels.iter().map(|l| sort_key(l)).collect();
        for (pair, names) in keys.windows(2).zip(labels.windows(2)) {
            assert!(pair[0] < pair[1], "{} ({}) !< {} ({})", names[0], pair[0], names[1], pair[1]);
        }
    }

    #[test]
    fn sort_keys_follow_document_order() {
        assert_sorted(&["1", "2", "2.1", "2.2", "2.10", "3", "3ZA", "3A", "3AA", "3B", "10"]);
        assert_sorted(&["(a)", "(b)", "(c)"]);
        assert_sorted(&["(ii)", "(iv)", "(ix)", "(x)"]);
        assert_sorted(&["Article II", "Article IV", "Section 10"]);
    }

    #[test]
    fn sort_key_values() {
        assert_eq!(sort_key("3"), "003.000.000");
        assert_eq!(sort_key("3ZA"), "003.001.000");
        assert_eq!(sort_key("41ZA"), "041.001.000");
        assert_eq!(sort_key("3AB"), "003.010.020");
        assert_eq!(sort_key("12.3"), "012.000.000.003.000.000");
        assert_eq!(sort_key("Article IV"), "004.000.000");
        assert_eq!(sort_key("§ 5"), "005.000.000");
        assert_eq!(sort_key("b)"), "002.000.000");
        assert_eq!(sort_key("(iv)"), "004.000.000");
    }

    #[test]
    fn sentence_endings() {
        assert!(ends_sentence("payable within 30 days."));
        assert!(ends_sentence("as follows:"));
        assert!(ends_sentence("the \"Services\".\"  "));
        assert!(!ends_sentence("provided that the Vendor"));
    }
}
