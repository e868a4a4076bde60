use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::CiteError;
use crate::latex::find_matching_brace;

static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"name=\{([^}]+)\}").expect("Invalid glossary name regex pattern"));
static DEFINED_IN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%defined_in=\{([^}]+)\}").expect("Invalid glossary defined_in regex pattern"));
static STEM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%stem=\{([^}]+)\}").expect("Invalid glossary stem regex pattern"));
static HEADING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(chapter|section|subsection|subsubsection)\{[^}]*\}").expect("Invalid heading regex pattern")
});
static SECTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\section\{([^}]+)\}").expect("Invalid section regex pattern"));
static GLSDISP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\glsdisp\{([^}]+)\}").expect("Invalid glsdisp regex pattern"));

const ENTRY_MARKER: &str = "\\newglossaryentry{";

/// Commands whose arguments are never linked.
pub const DEFAULT_SKIP_TAGS: [&str; 7] = ["label", "ref", "cite", "todo", "hyperref", "url", "textcite"];

/// One `\newglossaryentry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryTerm {
    pub id: String,
    pub name: Option<String>,
    /// Section title where the term is introduced; it is not linked there.
    pub defined_in: Option<String>,
    /// Case-insensitive fragments that identify the term in running text.
    pub stems: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Glossary {
    pub terms: Vec<GlossaryTerm>,
}

impl Glossary {
    /// Parse `\newglossaryentry{id}{...}` definitions.
    ///
    /// Stems and the defining section live in LaTeX comments inside the
    /// entry: `%stem={a,b}` and `%defined_in={Title}`.
    pub fn parse(content: &str) -> Self {
        let mut terms = Vec::new();
        for part in content.split(ENTRY_MARKER).skip(1) {
            if part.trim().is_empty() {
                continue;
            }
            let Some(id_end) = part.find('}') else {
                continue;
            };
            let id = part[..id_end].trim().to_string();
            let body = part[id_end + 1..]
                .find('{')
                .map(|offset| id_end + 1 + offset + 1)
                .map(|start| {
                    let end = find_matching_brace(part, start).unwrap_or(part.len());
                    part[start..end].trim()
                })
                .unwrap_or("");

            let capture = |re: &Regex| re.captures(body).map(|caps| caps[1].to_string());
            let stems: Vec<String> = capture(&STEM_REGEX)
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if !stems.is_empty() {
                debug!("Found {} stems for {}: {:?}", stems.len(), id, stems);
            }
            terms.push(GlossaryTerm {
                id,
                name: capture(&NAME_REGEX),
                defined_in: capture(&DEFINED_IN_REGEX),
                stems,
            });
        }
        Self { terms }
    }

    pub fn load(path: &Path) -> Result<Self, CiteError> {
        let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
        let glossary = Self::parse(&content);
        info!(
            "Found {} glossary terms ({} with stems) in {}",
            glossary.terms.len(),
            glossary.terms.iter().filter(|t| !t.stems.is_empty()).count(),
            path.display()
        );
        Ok(glossary)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlossaryStats {
    pub total_sections: usize,
    pub skipped_sections: usize,
    pub total_term_checks: usize,
    pub skipped_defined_in: usize,
    pub not_found: usize,
    pub skipped_in_tag: usize,
    pub skipped_heading: usize,
    pub stems_searched: usize,
    pub replaced: usize,
}

impl fmt::Display for GlossaryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processing Statistics:")?;
        writeln!(f, "Total sections: {}", self.total_sections)?;
        writeln!(f, "Skipped sections: {}", self.skipped_sections)?;
        writeln!(f, "Total term checks: {}", self.total_term_checks)?;
        writeln!(f, "Terms skipped (defined in section): {}", self.skipped_defined_in)?;
        writeln!(f, "Terms not found in section: {}", self.not_found)?;
        writeln!(f, "Terms skipped (in tags): {}", self.skipped_in_tag)?;
        writeln!(f, "Terms skipped (in heading): {}", self.skipped_heading)?;
        writeln!(f, "Stems searched: {}", self.stems_searched)?;
        write!(f, "Terms replaced: {}", self.replaced)
    }
}

/// Links the first mention of each glossary term per `\section` with `\glsdisp`.
#[derive(Debug, Clone)]
pub struct GlossaryLinker {
    /// Sections whose title contains one of these strings are left alone.
    pub skip_sections: Vec<String>,
    pub skip_tags: Vec<String>,
}

impl Default for GlossaryLinker {
    fn default() -> Self {
        Self {
            skip_sections: vec!["Quick Start / Essentials".to_string()],
            skip_tags: DEFAULT_SKIP_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

fn within(position: usize, zones: &[(usize, usize)]) -> bool {
    zones.iter().any(|&(start, end)| start <= position && position < end)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

impl GlossaryLinker {
    fn skip_zones(&self, content: &str) -> Vec<(usize, usize)> {
        if self.skip_tags.is_empty() {
            return Vec::new();
        }
        let tags: Vec<String> = self.skip_tags.iter().map(|t| regex::escape(t)).collect();
        match Regex::new(&format!(r"\\({})\{{[^}}]*\}}", tags.join("|"))) {
            Ok(re) => re.find_iter(content).map(|m| (m.start(), m.end())).collect(),
            Err(e) => {
                warn!("Invalid skip tag pattern: {}", e);
                Vec::new()
            }
        }
    }

    /// Insert `\glsdisp{id}{word}` links and return the new text with statistics.
    ///
    /// A stem match expands to the whole surrounding word. Matches inside
    /// headings, inside skipped command arguments, or overlapping an earlier
    /// link are passed over.
    pub fn link(&self, content: &str, glossary: &Glossary) -> (String, GlossaryStats) {
        let headings: Vec<(usize, usize)> = HEADING_REGEX
            .find_iter(content)
            .map(|m| (m.start(), m.end()))
            .collect();
        let skip_zones = self.skip_zones(content);
        let sections: Vec<(String, usize, usize)> = SECTION_REGEX
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((caps[1].to_string(), whole.start(), whole.end()))
            })
            .collect();

        let mut stats = GlossaryStats::default();
        let mut replacements: Vec<(usize, usize, String)> = Vec::new();
        let bytes = content.as_bytes();

        for (idx, (title, _, section_start)) in sections.iter().enumerate() {
            let section_end = sections.get(idx + 1).map(|s| s.1).unwrap_or(content.len());
            stats.total_sections += 1;

            if self.skip_sections.iter().any(|s| title.contains(s.as_str())) {
                debug!("Skipping section: {}", title);
                stats.skipped_sections += 1;
                continue;
            }
            let clean_title = title.trim_start_matches('*').trim();
            let section = &content[*section_start..section_end];

            for term in &glossary.terms {
                stats.total_term_checks += 1;
                if term.defined_in.as_deref() == Some(clean_title) {
                    stats.skipped_defined_in += 1;
                    continue;
                }
                if term.stems.is_empty() {
                    continue;
                }

                let mut any_match = false;
                for stem in &term.stems {
                    stats.stems_searched += 1;
                    let pattern = match RegexBuilder::new(&regex::escape(stem)).case_insensitive(true).build() {
                        Ok(re) => re,
                        Err(e) => {
                            warn!("Invalid stem '{}' for {}: {}", stem, term.id, e);
                            continue;
                        }
                    };

                    let mut in_heading = 0;
                    let mut in_tag = 0;
                    let mut candidates = 0;
                    let mut chosen = None;
                    for m in pattern.find_iter(section) {
                        candidates += 1;
                        let abs = section_start + m.start();
                        if within(abs, &headings) {
                            in_heading += 1;
                            continue;
                        }
                        if within(abs, &skip_zones) {
                            in_tag += 1;
                            continue;
                        }
                        let mut start = abs;
                        while start > *section_start && is_word_byte(bytes[start - 1]) {
                            start -= 1;
                        }
                        let mut end = section_start + m.end();
                        while end < section_end && is_word_byte(bytes[end]) {
                            end += 1;
                        }
                        let overlaps = replacements.iter().any(|(s, e, _)| start < *e && *s < end);
                        if overlaps {
                            continue;
                        }
                        chosen = Some((start, end));
                        break;
                    }
                    if candidates > 0 {
                        any_match = true;
                    }

                    match chosen {
                        Some((start, end)) => {
                            let word = &content[start..end];
                            debug!("{}: '{}' -> \\glsdisp{{{}}}", title, word, term.id);
                            replacements.push((start, end, format!("\\glsdisp{{{}}}{{{}}}", term.id, word)));
                            stats.replaced += 1;
                            break;
                        }
                        None if candidates > 0 && in_heading == candidates => stats.skipped_heading += 1,
                        None if candidates > 0 && in_tag == candidates => stats.skipped_in_tag += 1,
                        None => {}
                    }
                }
                if !any_match {
                    stats.not_found += 1;
                }
            }
        }

        replacements.sort_by(|a, b| b.0.cmp(&a.0));
        let mut output = content.to_string();
        for (start, end, replacement) in replacements {
            output.replace_range(start..end, &replacement);
        }
        (output, stats)
    }
}

/// Link glossary terms with the default skip lists.
pub fn link_glossary_terms(content: &str, glossary: &Glossary) -> (String, GlossaryStats) {
    GlossaryLinker::default().link(content, glossary)
}

/// Count `\glsdisp{id}` uses per term, most used first.
pub fn count_glsdisp(content: &str) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for caps in GLSDISP_REGEX.captures_iter(content) {
        *counts.entry(caps[1].to_string()).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}
