use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::error::CiteError;
use crate::verification::llm::{LlmRequest, LlmService};

/// Consecutive manuscript lines, as `(line number, text)` pairs.
pub type Paragraph = Vec<(usize, String)>;

/// Split line contents into paragraphs at every gap in the numbering.
pub fn group_into_paragraphs(lines: &[(usize, String)]) -> Vec<Paragraph> {
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut current: Paragraph = Vec::new();
    for (line_number, text) in lines {
        if let Some((previous, _)) = current.last() {
            if *line_number > previous + 1 {
                paragraphs.push(std::mem::take(&mut current));
            }
        }
        current.push((*line_number, text.clone()));
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// Paragraph text with `Line N:` prefixes, one line each.
pub fn paragraph_text(paragraph: &Paragraph) -> String {
    paragraph
        .iter()
        .map(|(n, text)| format!("Line {}: {}\n", n, text))
        .collect()
}

pub fn attribution_prompt(keys: &[String], paragraph: &str) -> String {
    format!(
        "In academic writing in APA, paragraphs are split into 'attribution units' that each depend on a certain set of citations. \
So the first sentence has citation1, and the following sentences inherit that until a sentence starts that uses a different set of citations or is an opinion. \
Mark each attribution unit in the following paragraph that uses exactly this ({}) particular set of citations by inserting '->' and '<-' around that set of sentences. \
Markers should generally be on sentence or clause boundaries. \
You're acting as an input/output function; your *only* output is the original text (and line numbers) with the markers added. \
DO NOT ADD ANYTHING ELSE OR EXPLAIN WHAT YOU'RE DOING.\n\nPARAGRAPH: <<{}>>",
        keys.join(", "),
        paragraph
    )
}

/// Ask the service to mark attribution units in every paragraph, concurrently.
///
/// Results come back in paragraph order. The first failure or timeout aborts
/// the remaining requests and is returned.
pub async fn mark_attribution_units(
    llm: Arc<dyn LlmService>,
    paragraphs: &[Paragraph],
    keys: &[String],
    timeout: Duration,
) -> Result<Vec<String>, CiteError> {
    info!("Marking attribution units in {} paragraphs", paragraphs.len());
    let mut join_set = JoinSet::new();
    for (idx, paragraph) in paragraphs.iter().enumerate() {
        let llm = Arc::clone(&llm);
        let request = LlmRequest::new(attribution_prompt(keys, &paragraph_text(paragraph)), timeout);
        join_set.spawn(async move { (idx, llm.complete(request).await) });
    }

    let mut marked: Vec<(usize, String)> = Vec::with_capacity(paragraphs.len());
    while let Some(joined) = join_set.join_next().await {
        let (idx, result) = match joined {
            Ok(r) => r,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                join_set.abort_all();
                return Err(CiteError::ToolFailed {
                    tool: llm.name().to_string(),
                    status: "panicked".to_string(),
                    stderr: e.to_string(),
                });
            }
        };
        match result {
            Ok(text) => {
                debug!("Paragraph {} marked", idx + 1);
                marked.push((idx, text));
            }
            Err(e) => {
                join_set.abort_all();
                return Err(e);
            }
        }
    }

    marked.sort_by_key(|(idx, _)| *idx);
    Ok(marked.into_iter().map(|(_, text)| text).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_start_new_paragraphs() {
        let lines = vec![
            (3, "a".to_string()),
            (4, "b".to_string()),
            (7, "c".to_string()),
        ];
        let paragraphs = group_into_paragraphs(&lines);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraph_text(&paragraphs[0]), "Line 3: a\nLine 4: b\n");
    }
}
