//! MediaWiki publishing: citation placeholders and CS1 reference lists.
//!
//! Citations are first swapped for `<<<CITE:keys>>>` / `<<<TEXTCITE:keys>>>`
//! placeholders so a document converter leaves them alone. After conversion
//! the (HTML-escaped) placeholders become `<ref>` tags backed by a list of
//! Citation Style 1 templates.

use log::warn;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;

use crate::latex::bibliography::{BibEntry, Bibliography};
use crate::latex::strip_latex;

static LATEX_CITE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(text|paren|auto)?cite\{([^}]+)\}").expect("Invalid citation regex pattern")
});
static CITE_PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&lt;&lt;&lt;CITE:([^&]+)&gt;&gt;&gt;").expect("Invalid CITE placeholder regex pattern")
});
static TEXTCITE_PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&lt;&lt;&lt;TEXTCITE:([^&]+)&gt;&gt;&gt;").expect("Invalid TEXTCITE placeholder regex pattern")
});
static REFERENCES_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<references\s*/>").expect("Invalid references tag regex pattern"));
static AUTHOR_SEPARATOR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+and\s+").expect("Invalid author separator regex pattern"));

/// Maximum number of authors or editors written into a template.
const MAX_NAMES: usize = 10;

/// Replace LaTeX citation commands with placeholders.
/// Returns the new text and the number of citations converted.
pub fn to_placeholders(content: &str) -> (String, usize) {
    let mut count = 0;
    let converted = LATEX_CITE_REGEX.replace_all(content, |caps: &Captures| {
        count += 1;
        let keys = &caps[2];
        match caps.get(1).map(|m| m.as_str()) {
            Some("text") => format!("<<<TEXTCITE:{}>>>", keys),
            _ => format!("<<<CITE:{}>>>", keys),
        }
    });
    (converted.into_owned(), count)
}

fn strip_braces(value: &str) -> String {
    value.chars().filter(|c| *c != '{' && *c != '}').collect::<String>().trim().to_string()
}

/// Split one BibTeX name into `(last, first)`.
///
/// Handles `Last, First`, `First Last` and single (e.g. institutional) names.
pub fn split_author_name(name: &str) -> (String, String) {
    let name = strip_braces(name);
    if let Some((last, first)) = name.split_once(',') {
        return (last.trim().to_string(), first.trim().to_string());
    }
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => (last.to_string(), rest.join(" ")),
        _ => (name.clone(), String::new()),
    }
}

/// Parse a BibTeX `author`/`editor` field into `(last, first)` pairs.
pub fn parse_authors(field: &str) -> Vec<(String, String)> {
    AUTHOR_SEPARATOR_REGEX
        .split(field)
        .filter(|a| !a.trim().is_empty())
        .map(split_author_name)
        .collect()
}

fn template_type(entry: &BibEntry) -> &'static str {
    let has_journal = entry.get("journal").is_some() || entry.get("journaltitle").is_some();
    match entry.entry_type.as_str() {
        "online" | "misc" | "unpublished" | "report" => "cite web",
        "reference" | "book" | "inbook" | "incollection" | "thesis" | "manual" => "cite book",
        _ if has_journal => "cite journal",
        _ => "cite web",
    }
}

/// Render an entry as a Citation Style 1 template such as `{{cite journal|...}}`.
pub fn entry_to_cs1(entry: &BibEntry) -> String {
    let mut template = format!("{{{{{}", template_type(entry));
    let mut push = |name: &str, value: &str| {
        let value = strip_braces(value);
        if !value.is_empty() {
            template.push_str(&format!("|{}={}", name, value));
        }
    };

    let authors = entry.get("author").map(|a| parse_authors(a)).unwrap_or_default();
    for (i, (last, first)) in authors.iter().take(MAX_NAMES).enumerate() {
        push(&format!("last{}", i + 1), last);
        push(&format!("first{}", i + 1), first);
    }
    if authors.is_empty() {
        if let Some(editors) = entry.get("editor") {
            for (i, (last, first)) in parse_authors(editors).iter().take(MAX_NAMES).enumerate() {
                push(&format!("editor{}-last", i + 1), last);
                push(&format!("editor{}-first", i + 1), first);
            }
        }
    }
    if let Some(year) = entry.get("year") {
        push("year", year);
    }
    if let Some(title) = entry.get("title") {
        push("title", &strip_latex(title));
    }
    if let Some(journal) = entry.get("journal").or_else(|| entry.get("journaltitle")) {
        push("journal", journal);
    }
    if let Some(volume) = entry.get("volume") {
        push("volume", volume);
    }
    if let Some(issue) = entry.get("number").or_else(|| entry.get("issue")) {
        push("issue", issue);
    }
    for (field, name) in [("pages", "pages"), ("publisher", "publisher"), ("institution", "publisher")] {
        if let Some(value) = entry.get(field) {
            push(name, value);
        }
    }
    match (entry.get("doi"), entry.get("url")) {
        (Some(doi), _) => push("doi", doi),
        (None, Some(url)) => push("url", url),
        (None, None) => {}
    }
    if let Some(isbn) = entry.get("isbn") {
        push("isbn", isbn);
    }

    template.push_str("}}");
    template
}

/// Inline author text for narrative citations: `Smith`, `Smith and Jones`, or the first surname.
fn author_display(entry: &BibEntry) -> Option<String> {
    let authors = parse_authors(entry.get("author")?);
    match authors.as_slice() {
        [] => None,
        [(a, _), (b, _)] => Some(format!("{} and {}", a, b)),
        [(first, _), ..] => Some(first.clone()),
    }
}

fn split_keys(keys: &str) -> Vec<&str> {
    keys.split(',').map(str::trim).filter(|k| !k.is_empty()).collect()
}

/// Result of converting placeholders in a MediaWiki document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WikiConversion {
    pub content: String,
    pub cited: BTreeSet<String>,
    pub unknown: BTreeSet<String>,
}

/// Turn escaped placeholders into `<ref>` tags and append a `== References ==` list.
///
/// Unknown keys stay visible as placeholders so they can be fixed by hand.
pub fn convert_placeholders(content: &str, bibliography: &Bibliography) -> WikiConversion {
    let mut cited = BTreeSet::new();
    let mut unknown = BTreeSet::new();

    let content = CITE_PLACEHOLDER_REGEX.replace_all(content, |caps: &Captures| {
        split_keys(&caps[1])
            .into_iter()
            .map(|key| {
                if bibliography.get(key).is_some() {
                    cited.insert(key.to_string());
                    format!("<ref name=\"{}\" />", key)
                } else {
                    warn!("Citation key '{}' not found in bibliography", key);
                    unknown.insert(key.to_string());
                    format!("<<<CITE:{}>>>", key)
                }
            })
            .collect::<String>()
    });

    let content = TEXTCITE_PLACEHOLDER_REGEX.replace_all(&content, |caps: &Captures| {
        split_keys(&caps[1])
            .into_iter()
            .map(|key| match bibliography.get(key) {
                Some(entry) => {
                    cited.insert(key.to_string());
                    let reference = format!("<ref name=\"{}\" />", key);
                    let year = entry
                        .get("year")
                        .or_else(|| entry.get("date"))
                        .filter(|y| !y.is_empty());
                    match (author_display(entry), year) {
                        (Some(author), Some(year)) => format!("{} ({}){}", author, year, reference),
                        (Some(author), None) => format!("{}{}", author, reference),
                        (None, _) => reference,
                    }
                }
                None => {
                    warn!("Citation key '{}' not found in bibliography", key);
                    unknown.insert(key.to_string());
                    format!("<<<TEXTCITE:{}>>>", key)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    });

    let mut content = REFERENCES_TAG_REGEX.replace_all(&content, "").into_owned();
    if !cited.is_empty() {
        let mut section = String::from("\n\n== References ==\n<references>\n");
        for key in &cited {
            if let Some(entry) = bibliography.get(key) {
                section.push_str(&format!("<ref name=\"{}\">{}</ref>\n", key, entry_to_cs1(entry)));
            }
        }
        section.push_str("</references>\n");
        content = format!("{}{}", content.trim_end(), section);
    }

    WikiConversion {
        content,
        cited,
        unknown,
    }
}
