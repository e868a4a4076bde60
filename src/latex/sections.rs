use log::warn;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

static HEADING_START_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(chapter|section|subsection|subsubsection)\{").expect("Invalid heading regex pattern")
});

const STRUCTURAL_COMMANDS: [&str; 8] = [
    "\\chapter{",
    "\\section{",
    "\\subsection{",
    "\\subsubsection{",
    "\\chapter*{",
    "\\section*{",
    "\\subsection*{",
    "\\subsubsection*{",
];

/// Environments merged with their neighbouring lines when chunking.
const GROUPED_ENVIRONMENTS: [&str; 3] = ["itemize", "enumerate", "quotation"];

/// A manuscript line with its 1-based number.
pub type NumberedLine = (usize, String);

/// Consecutive manuscript lines analysed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub line_numbers: Vec<usize>,
    pub text: String,
}

impl Chunk {
    pub fn first_line(&self) -> usize {
        self.line_numbers.first().copied().unwrap_or(0)
    }

    /// `Line 5` or `Lines 5-9`.
    pub fn line_label(&self) -> String {
        match self.line_numbers.as_slice() {
            [only] => format!("Line {}", only),
            [first, .., last] => format!("Lines {}-{}", first, last),
            [] => "Line ?".to_string(),
        }
    }
}

fn heading_level(command: &str) -> usize {
    match command {
        "chapter" => 0,
        "section" => 1,
        "subsection" => 2,
        _ => 3,
    }
}

pub fn is_structural_command(line: &str) -> bool {
    let stripped = line.trim();
    STRUCTURAL_COMMANDS.iter().any(|cmd| stripped.starts_with(cmd))
}

/// Lines under the first heading whose title contains `name` (case-insensitive).
///
/// Collection stops at the next heading of the same or a higher level.
pub fn extract_section(content: &str, name: &str) -> Vec<NumberedLine> {
    let pattern = format!(
        r"\\(chapter|section|subsection|subsubsection)\{{.*{}.*\}}",
        regex::escape(name)
    );
    let section_regex = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re,
        Err(e) => {
            warn!("Invalid section name '{}': {}", name, e);
            return Vec::new();
        }
    };

    let mut level: Option<usize> = None;
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        match level {
            None => {
                if let Some(caps) = section_regex.captures(line) {
                    level = Some(heading_level(&caps[1]));
                }
            }
            Some(section_level) => {
                if let Some(caps) = HEADING_START_REGEX.captures(line) {
                    if heading_level(&caps[1]) <= section_level {
                        break;
                    }
                }
                lines.push((idx + 1, line.to_string()));
            }
        }
    }
    lines
}

/// Document body lines, without the preamble and without table contents.
pub fn filter_content_lines(content: &str) -> Vec<NumberedLine> {
    let mut lines = Vec::new();
    let mut in_document = false;
    let mut table_depth = 0usize;

    for (idx, line) in content.lines().enumerate() {
        if line.contains("\\begin{document}") {
            in_document = true;
            continue;
        }
        if !in_document {
            continue;
        }
        if line.contains("\\begin{table") || line.contains("\\begin{tabular") {
            table_depth += 1;
            continue;
        }
        if line.contains("\\end{table") || line.contains("\\end{tabular") {
            table_depth = table_depth.saturating_sub(1);
            continue;
        }
        if table_depth > 0 {
            continue;
        }
        lines.push((idx + 1, line.to_string()));
    }
    lines
}

fn joins_neighbour(line: &str) -> bool {
    !line.trim().is_empty() && !is_structural_command(line)
}

/// Group lines into analysis chunks.
///
/// Every line is its own chunk except list and quotation environments,
/// which are merged with the adjoining paragraph text (up to a blank line
/// or a heading) on both sides.
pub fn chunk_lines(lines: &[NumberedLine]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let (line_number, line) = &lines[i];
        let environment = GROUPED_ENVIRONMENTS
            .iter()
            .find(|env| line.contains(&format!("\\begin{{{}}}", env)));

        let Some(environment) = environment else {
            chunks.push(Chunk {
                line_numbers: vec![*line_number],
                text: line.clone(),
            });
            i += 1;
            continue;
        };

        // Earlier chunks may already hold the preceding lines
        let mut start = i;
        while start > 0 && joins_neighbour(&lines[start - 1].1) {
            start -= 1;
        }
        let first_number = lines[start].0;
        while chunks
            .last()
            .map(|c| c.line_numbers.iter().any(|n| *n >= first_number))
            .unwrap_or(false)
        {
            chunks.pop();
        }

        let begin = format!("\\begin{{{}}}", environment);
        let end_marker = format!("\\end{{{}}}", environment);
        let mut depth = 1;
        let mut end = i;
        let mut k = i + 1;
        while k < lines.len() && depth > 0 {
            if lines[k].1.contains(&begin) {
                depth += 1;
            } else if lines[k].1.contains(&end_marker) {
                depth -= 1;
            }
            end = k;
            k += 1;
        }
        while end + 1 < lines.len() && joins_neighbour(&lines[end + 1].1) {
            end += 1;
        }

        let group = &lines[start..=end];
        chunks.push(Chunk {
            line_numbers: group.iter().map(|(n, _)| *n).collect(),
            text: group.iter().map(|(_, l)| l.as_str()).collect::<Vec<_>>().join("\n"),
        });
        i = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(text: &str) -> Vec<NumberedLine> {
        text.lines().enumerate().map(|(i, l)| (i + 1, l.to_string())).collect()
    }

    #[test]
    fn list_joins_adjacent_paragraph() {
        let lines = numbered("Intro\nLead in:\n\\begin{itemize}\n\\item a\n\\end{itemize}\nAfter\n\nLater");
        let chunks = chunk_lines(&lines);
        assert_eq!(chunks[0].line_numbers, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(chunks[1].line_numbers, vec![7]);
        assert_eq!(chunks[2].line_numbers, vec![8]);
        assert_eq!(chunks[0].line_label(), "Lines 1-6");
    }

    #[test]
    fn heading_stops_backward_merge() {
        let lines = numbered("\\section{A}\n\\begin{quotation}\nq\n\\end{quotation}");
        let chunks = chunk_lines(&lines);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].line_numbers, vec![2, 3, 4]);
    }
}
