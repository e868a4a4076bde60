use once_cell::sync::Lazy;
use regex::Regex;

pub mod bbl;
pub mod bibliography;
pub mod citation;
pub mod expand;
pub mod glossary;
pub mod labels;
pub mod sections;
pub mod wiki;

pub use bibliography::{BibEntry, BibEntryBuilder, Bibliography};
pub use citation::{scan_citations, CitationIndex, CitationOccurrence, ManuscriptLines};

// Commonly used regex patterns compiled once
static LATEX_COMMAND_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\[a-zA-Z]+\*?(\{([^}]*)\})?").expect("Invalid LaTeX command regex pattern")
});
static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex pattern"));

/// Find the closing brace that balances an already opened group.
///
/// `start` is the byte offset just after the opening `{`. Returns the byte
/// offset of the matching `}`, or `None` when the group never closes.
/// Backslash-escaped braces do not count.
pub fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Extract the braced argument that opens at or after `start`.
/// Returns the argument text and the offset just past its closing brace.
pub fn braced_argument(text: &str, start: usize) -> Option<(&str, usize)> {
    let rest = &text[start..];
    let open = rest.find('{')?;
    // Only whitespace may separate the command from its argument
    if !rest[..open].trim().is_empty() {
        return None;
    }
    let body_start = start + open + 1;
    let close = find_matching_brace(text, body_start)?;
    Some((&text[body_start..close], close + 1))
}

/// Collapse whitespace runs into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

/// Strip LaTeX markup from a short string such as a title.
///
/// `\emph{x}` becomes `x`, bare commands vanish, grouping braces are removed.
pub fn strip_latex(text: &str) -> String {
    let replaced = LATEX_COMMAND_REGEX.replace_all(text, |caps: &regex::Captures| {
        caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()
    });
    let without_braces: String = replaced.chars().filter(|c| *c != '{' && *c != '}').collect();
    normalize_whitespace(&without_braces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_brace_handles_nesting() {
        let text = "{A {Study} of X} tail";
        assert_eq!(find_matching_brace(text, 1), Some(15));
    }

    #[test]
    fn matching_brace_skips_escaped() {
        let text = r"{50\} percent}";
        assert_eq!(find_matching_brace(text, 1), Some(13));
    }

    #[test]
    fn unterminated_group() {
        assert_eq!(find_matching_brace("{never", 1), None);
    }

    #[test]
    fn braced_argument_requires_adjacent_group() {
        let text = r"\field{title}{Deep {RL}}";
        let (arg, end) = braced_argument(text, 13).unwrap();
        assert_eq!(arg, "Deep {RL}");
        assert_eq!(end, text.len());
        assert!(braced_argument("x y {z}", 0).is_none());
    }

    #[test]
    fn strip_latex_keeps_argument_text() {
        assert_eq!(strip_latex(r"The \emph{Art} of {C}omputing"), "The Art of Computing");
        assert_eq!(strip_latex(r"  A   \textbf{bold}  claim "), "A bold claim");
    }
}
