//! End-of-session evaluation shaping. The model returns the critique as plain
//! text with blank lines between the criterion sections; this module turns
//! that into a paragraph structure the CLI can print, without interpreting
//! the content.

use std::fmt;

/// One block of the evaluation, split on blank-line boundaries. Single line
/// breaks inside a block are preserved as separate lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paragraph {
    lines: Vec<String>,
}

impl Paragraph {
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for Paragraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

/// The formatted session evaluation. Produced once per session, read-only
/// afterwards. An evaluation failure is represented as a report whose text is
/// the error line, so the learner always gets something printable.
#[derive(Clone, Debug)]
pub struct AnalysisReport {
    raw: String,
    paragraphs: Vec<Paragraph>,
}

impl AnalysisReport {
    /// Shape raw evaluation text into paragraphs. Tolerates anything,
    /// including the empty string a zero-turn session can produce; the
    /// result is then a report with no paragraphs. Formatting is idempotent:
    /// feeding a rendered report back in yields the same structure.
    #[must_use]
    pub fn from_raw(text: impl Into<String>) -> Self {
        let raw = text.into();
        let paragraphs = raw
            .split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .map(|block| Paragraph {
                lines: block.lines().map(str::to_owned).collect(),
            })
            .collect();
        Self { raw, paragraphs }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .paragraphs
            .iter()
            .map(Paragraph::to_string)
            .collect::<Vec<_>>()
            .join("\n\n");
        f.write_str(&rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_sections_become_two_paragraphs() {
        let report = AnalysisReport::from_raw(
            "Fluency and Coherence:\nGood pace overall.\nScore: 6/9\n\nOverall Band Score: 6/9",
        );

        assert_eq!(report.paragraphs().len(), 2);
        assert_eq!(
            report.paragraphs()[0].lines(),
            [
                "Fluency and Coherence:",
                "Good pace overall.",
                "Score: 6/9"
            ]
        );
        assert_eq!(report.paragraphs()[1].lines(), ["Overall Band Score: 6/9"]);
    }

    #[test]
    fn empty_text_yields_a_well_formed_empty_report() {
        let report = AnalysisReport::from_raw("");
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "");
    }

    #[test]
    fn stray_blank_lines_do_not_create_empty_paragraphs() {
        let report = AnalysisReport::from_raw("\n\nLexical Resource:\nScore: 7/9\n\n\n\n");
        assert_eq!(report.paragraphs().len(), 1);
    }

    #[test]
    fn formatting_is_idempotent() {
        let report = AnalysisReport::from_raw("first\nsecond\n\nthird");
        let reparsed = AnalysisReport::from_raw(report.to_string());
        assert_eq!(report.paragraphs(), reparsed.paragraphs());
    }
}
