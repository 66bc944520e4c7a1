//! Markdown cleanup before text reaches a synthesizer.
//!
//! Every rewrite only deletes characters (or turns `_` into a space), and the
//! cleanup pass is repeated until nothing changes. The result is therefore
//! stable: running [`normalize`] on its own output returns it unchanged.
//! Malformed markup never fails; stray symbols are simply dropped.

/// Clean one sentence unit for speech. May return an empty string when the
/// unit carried nothing speakable (e.g. a bare code fence).
pub fn normalize(text: &str) -> String {
    let mut current = clean_pass(text);
    loop {
        let next = clean_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(text: &str) -> String {
    let mut cleaned = strip_code_fences(text);

    // Inline code: keep the content, drop the backticks
    cleaned.retain(|c| c != '`');

    cleaned = collapse_links(&cleaned);
    cleaned = strip_line_markers(&cleaned);

    // Emphasis, strike-through and stray heading marks
    cleaned.retain(|c| !matches!(c, '*' | '~' | '#'));
    let cleaned = cleaned.replace('_', " ");

    tidy_whitespace(&cleaned)
}

/// Closed fences lose their whole block; an unclosed fence loses the rest of
/// its line (the language tag).
fn strip_code_fences(text: &str) -> String {
    let mut cleaned = text.to_string();
    while let Some(start) = cleaned.find("```") {
        let end = match cleaned[start + 3..].find("```") {
            Some(rel) => start + 3 + rel + 3,
            None => cleaned[start..]
                .find('\n')
                .map_or(cleaned.len(), |rel| start + rel),
        };
        cleaned.replace_range(start..end, "");
    }
    cleaned
}

/// `[label](url)` and `![alt](url)` become their visible text; leftover
/// brackets are dropped.
fn collapse_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let Some(close_rel) = rest[open + 1..].find(']') else {
            break;
        };
        let close = open + 1 + close_rel;
        let after = &rest[close + 1..];

        if after.starts_with('(') {
            if let Some(paren) = after.find(')') {
                let head = &rest[..open];
                out.push_str(head.strip_suffix('!').unwrap_or(head));
                out.push_str(&rest[open + 1..close]);
                rest = &after[paren + 1..];
                continue;
            }
        }
        out.push_str(&rest[..=close]);
        rest = after;
    }
    out.push_str(rest);
    out.retain(|c| c != '[' && c != ']');
    out
}

fn strip_line_markers(text: &str) -> String {
    text.lines()
        .map(strip_markers)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Heading, quote, bullet and numbered-list markers at the start of a line.
fn strip_markers(line: &str) -> &str {
    let mut line = line.trim_start();
    loop {
        let next = if line.starts_with('#') {
            line.trim_start_matches('#')
        } else if let Some(rest) = line.strip_prefix('>') {
            rest
        } else if let Some(rest) = ["- ", "* ", "+ ", "• "]
            .iter()
            .find_map(|marker| line.strip_prefix(marker))
        {
            rest
        } else if let Some(rest) = strip_numbered(line) {
            rest
        } else {
            return line;
        };
        line = next.trim_start();
    }
}

/// `1. ` / `12) ` style markers, at most three digits.
fn strip_numbered(line: &str) -> Option<&str> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") "))
}

fn tidy_whitespace(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut out = String::with_capacity(collapsed.len());
    let mut chars = collapsed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ' ' && matches!(chars.peek(), Some(',' | '.' | '!' | '?' | ';' | ':')) {
            continue;
        }
        out.push(c);
    }
    out.trim().to_string()
}
