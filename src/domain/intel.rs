//! Intel briefing text handling
//!
//! Briefings arrive as loosely formatted plain text. These helpers turn them
//! into escaped HTML for display and into short plain-text summaries.

use crate::domain::types::IntelRecord;

const SENTENCE_ENDS: [char; 5] = ['.', '!', '?', '\u{05be}', '\u{2022}'];

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// `- item`, `* item` or `• item`
fn bullet_content(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(['-', '*', '•'])?.trim_start();
    (!rest.is_empty()).then_some(rest)
}

/// `1. item` or `1) item`
fn numbered_content(line: &str) -> Option<(&str, &str)> {
    let digits = line.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix(['.', ')'])?.trim_start();
    (!rest.is_empty()).then(|| (&line[..digits], rest))
}

/// Convert briefing text to HTML: bullet runs become lists, numbered lines
/// and `Title: body` lines get a bold lead, everything else is a paragraph.
pub fn format_intel_html(text: &str) -> String {
    let mut chunks: Vec<String> = Vec::new();
    let mut list: Vec<String> = Vec::new();

    fn flush(list: &mut Vec<String>, chunks: &mut Vec<String>) {
        if !list.is_empty() {
            chunks.push(format!("<ul>{}</ul>", list.concat()));
            list.clear();
        }
    }

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            flush(&mut list, &mut chunks);
            continue;
        }

        if let Some(content) = bullet_content(line) {
            list.push(format!("<li>{}</li>", escape_html(content)));
            continue;
        }

        flush(&mut list, &mut chunks);

        if let Some((index, content)) = numbered_content(line) {
            chunks.push(format!(
                "<p><strong>{}.</strong> {}</p>",
                escape_html(index),
                escape_html(content)
            ));
            continue;
        }

        match line.find(':') {
            Some(colon) if colon > 0 && colon < line.len() - 1 => {
                let title = escape_html(&line[..colon]);
                let body = escape_html(line[colon + 1..].trim());
                chunks.push(format!("<p><strong>{title}:</strong> {body}</p>"));
            }
            _ => chunks.push(format!("<p>{}</p>", escape_html(line))),
        }
    }

    flush(&mut list, &mut chunks);
    chunks.concat()
}

/// HTML for display: stored html wins, else formatted text
pub fn intel_html(intel: &IntelRecord) -> String {
    let html = intel.html.trim();
    if !html.is_empty() {
        return html.to_string();
    }
    if !intel.text.trim().is_empty() {
        return format_intel_html(&intel.text);
    }
    String::new()
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    for c in html.chars() {
        match (in_tag, c) {
            (false, '<') => {
                in_tag = true;
                tag.clear();
            }
            (true, '>') => {
                in_tag = false;
                let name = tag.trim_start_matches('/').to_ascii_lowercase();
                if name.starts_with("br") || name.starts_with("li") {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            (true, c) => tag.push(c),
            (false, c) => out.push(c),
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Plain text of a briefing: stored text wins, else tag-stripped html
pub fn intel_text_content(intel: &IntelRecord) -> String {
    let text = intel.text.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    let html = intel.html.trim();
    if !html.is_empty() {
        return collapse_whitespace(&strip_tags(html));
    }
    String::new()
}

/// First `sentences` sentences, cut at `max_chars` with an ellipsis
pub fn intel_summary(intel: &IntelRecord, sentences: usize, max_chars: usize) -> String {
    let limit = sentences.max(1);
    let max_chars = max_chars.max(60);

    let normalized = collapse_whitespace(&intel_text_content(intel));
    if normalized.is_empty() {
        return String::new();
    }

    let mut picked: Vec<&str> = Vec::new();
    for word in normalized.split(' ') {
        picked.push(word);
        if word.ends_with(SENTENCE_ENDS) {
            let count = picked.iter().filter(|w| w.ends_with(SENTENCE_ENDS)).count();
            if count >= limit {
                break;
            }
        }
    }
    let summary = picked.join(" ");

    if summary.chars().count() > max_chars {
        let cut: String = summary.chars().take(max_chars).collect();
        return format!("{}…", cut.trim_end());
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">Tom & 'Jerry'</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;");
    }

    #[test]
    fn test_format_intel_html() {
        let text = "Summary: Busy at noon\n- Bring cash\n* Arrive early\n\n1. Open 8-16\nPlain <line>";
        let html = format_intel_html(text);

        assert_eq!(
            html,
            "<p><strong>Summary:</strong> Busy at noon</p>\
             <ul><li>Bring cash</li><li>Arrive early</li></ul>\
             <p><strong>1.</strong> Open 8-16</p>\
             <p>Plain &lt;line&gt;</p>"
        );
    }

    #[test]
    fn test_trailing_colon_is_plain_paragraph() {
        assert_eq!(format_intel_html("Hours:"), "<p>Hours:</p>");
    }

    #[test]
    fn test_intel_text_falls_back_to_html() {
        let intel = IntelRecord {
            html: "<p>Line one</p><ul><li>two</li></ul>".to_string(),
            ..Default::default()
        };
        assert_eq!(intel_text_content(&intel), "Line one two");
        assert_eq!(intel_html(&intel), "<p>Line one</p><ul><li>two</li></ul>");
    }

    #[test]
    fn test_intel_summary_limits_sentences_and_length() {
        let intel = IntelRecord {
            text: "First sentence. Second one! Third?".to_string(),
            ..Default::default()
        };
        assert_eq!(intel_summary(&intel, 2, 320), "First sentence. Second one!");

        let long = IntelRecord { text: "word ".repeat(40), ..Default::default() };
        let summary = intel_summary(&long, 2, 60);
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().count(), 60);
    }
}
