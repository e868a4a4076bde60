use once_cell::sync::Lazy;
use regex::Regex;

/// DOI patterns in priority order; the first one that matches wins.
static DOI_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)doi[:\s]*([0-9]+\.[0-9]+/[^\s]+)",
        r"(?i)https?://doi\.org/([0-9]+\.[0-9]+/[^\s]+)",
        r"(?i)https?://dx\.doi\.org/([0-9]+\.[0-9]+/[^\s]+)",
        r"(?i)doi\.org/([0-9]+\.[0-9]+/[^\s]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Invalid DOI regex pattern"))
    .collect()
});

const DOI_PREFIXES: [&str; 5] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Find the first DOI mentioned in a block of text.
///
/// Trailing sentence punctuation (`.`, `,`, `;`, `)`) is removed.
pub fn find_doi_in_text(text: &str) -> Option<String> {
    DOI_PATTERNS.iter().find_map(|pattern| {
        pattern.captures(text).and_then(|caps| {
            let doi = caps[1].trim_end_matches(['.', ',', ';', ')']);
            if doi.is_empty() {
                None
            } else {
                Some(doi.to_string())
            }
        })
    })
}

/// Canonical DOI form used for comparisons: lower-case with no resolver prefix.
///
/// `https://doi.org/10.1/ABC`, `doi:10.1/ABC` and `10.1/ABC` all become `10.1/abc`.
pub fn normalize_doi(doi: &str) -> String {
    let mut value = doi.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(stripped) = value.strip_prefix(prefix) {
            value = stripped.trim().to_string();
        }
    }
    value
}
