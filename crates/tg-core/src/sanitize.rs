//! Annotation content sanitization
//!
//! Captured terminal content and user-supplied notes are stored verbatim in
//! search, so anything that could smuggle markup or terminal control
//! sequences into a viewer is stripped before persistence: script/style
//! elements go entirely (tag and body), remaining markup tags are removed,
//! and C0/C1 control characters other than newline and tab are dropped.

/// Strip markup and control characters from annotation content.
///
/// Returns the cleaned, trimmed string; may be empty, in which case the
/// caller must reject the annotation.
pub fn sanitize(content: &str) -> String {
    let without_blocks = strip_container_elements(content);
    let without_tags = strip_tags(&without_blocks);

    let cleaned: String = without_tags
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    cleaned.trim().to_string()
}

/// Remove `<script>`/`<style>` elements including their bodies,
/// case-insensitively. Unclosed elements are stripped to end of input.
fn strip_container_elements(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    // ASCII lowering keeps byte offsets aligned with the original input.
    let lower = input.to_ascii_lowercase();
    let mut pos = 0;

    while pos < input.len() {
        let rest = &lower[pos..];
        let next = ["<script", "<style"]
            .iter()
            .filter_map(|open| rest.find(open).map(|i| (i, *open)))
            .min_by_key(|(i, _)| *i);

        match next {
            Some((start, open)) => {
                out.push_str(&input[pos..pos + start]);
                let close = match open {
                    "<script" => "</script>",
                    _ => "</style>",
                };
                match lower[pos + start..].find(close) {
                    Some(end) => pos = pos + start + end + close.len(),
                    None => break,
                }
            }
            None => {
                out.push_str(&input[pos..]);
                break;
            }
        }
    }

    out
}

/// Remove remaining `<...>` tags, keeping their inner text.
fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;

    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_element_removed_with_body() {
        assert_eq!(sanitize("<script>alert(1)</script>Deployed"), "Deployed");
    }

    #[test]
    fn test_plain_tags_keep_inner_text() {
        assert_eq!(sanitize("<b>release</b> v2 shipped"), "release v2 shipped");
    }

    #[test]
    fn test_control_characters_stripped() {
        assert_eq!(sanitize("ok\x1b[31mred\x07"), "ok[31mred");
    }

    #[test]
    fn test_newlines_and_tabs_survive() {
        assert_eq!(sanitize("line one\n\tline two"), "line one\n\tline two");
    }

    #[test]
    fn test_all_markup_sanitizes_to_empty() {
        assert_eq!(sanitize("<script>alert(1)</script>"), "");
        assert_eq!(sanitize("   \x00\x1b  "), "");
    }

    #[test]
    fn test_unclosed_script_stripped_to_end() {
        assert_eq!(sanitize("note <script>alert(1)"), "note");
    }

    #[test]
    fn test_case_insensitive_blocks() {
        assert_eq!(sanitize("<SCRIPT>x</SCRIPT>done"), "done");
    }
}
