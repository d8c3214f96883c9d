use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::highlight::highlight_code;
use super::language::{detect_language, DetectedLanguage};

// Private-use code points; stripped from input so they cannot be forged.
const STASH_OPEN: char = '\u{E000}';
const STASH_CLOSE: char = '\u{E001}';

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(\w+)?([\s\S]*?)```").expect("fence pattern is valid"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("inline code pattern is valid"));
static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^&gt; (.*)$").expect("blockquote pattern is valid"));
static H3: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^### (.*)$").expect("h3 pattern is valid"));
static H2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## (.*)$").expect("h2 pattern is valid"));
static H1: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# (.*)$").expect("h1 pattern is valid"));
// Emphasis never spans a line or an existing tag, which keeps tags balanced.
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n<]+)\*\*").expect("bold pattern is valid"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\s<][^*\n<]*)\*").expect("italic pattern is valid"));
static UNORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\*[ \t]+(.*)$").expect("list pattern is valid"));
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+\.[ \t]+(.*)$").expect("list pattern is valid"));
static STASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("\u{E000}([BI])(\\d+)\u{E001}").expect("placeholder pattern is valid")
});

const BLOCK_PREFIXES: [&str; 6] = ["<div", "<li", "<h", "<table", "<blockquote", "\u{E000}B"];

/// First fenced block of a message, for the code preview panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSnippet {
    pub language: String,
    pub code: String,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            STASH_OPEN | STASH_CLOSE => {}
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of `escape_html` for text it produced.
pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Render a possibly partial message buffer to HTML.
///
/// Input is escaped first. Fences and inline code are lifted out before the
/// line passes run and restored after paragraph assembly, so their contents
/// are never rewritten. Safe to call on every streamed update.
pub fn render_markdown(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let normalized = text.replace("\r\n", "\n");
    let escaped = escape_html(&normalized);

    let mut blocks: Vec<String> = Vec::new();
    let mut inlines: Vec<String> = Vec::new();

    let formatted = FENCE.replace_all(&escaped, |caps: &Captures| {
        let index = blocks.len();
        let tag = caps.get(1).map(|m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        blocks.push(render_code_block(index, tag, body));
        format!("{STASH_OPEN}B{index}{STASH_CLOSE}")
    });

    let formatted = render_tables(&formatted);
    let formatted = BLOCKQUOTE.replace_all(&formatted, "<blockquote>$1</blockquote>");
    let formatted = H3.replace_all(&formatted, "<h3>$1</h3>");
    let formatted = H2.replace_all(&formatted, "<h2>$1</h2>");
    let formatted = H1.replace_all(&formatted, "<h1>$1</h1>");
    let formatted = INLINE_CODE.replace_all(&formatted, |caps: &Captures| {
        let index = inlines.len();
        inlines.push(format!("<code class=\"inline-code\">{}</code>", &caps[1]));
        format!("{STASH_OPEN}I{index}{STASH_CLOSE}")
    });
    let formatted = BOLD.replace_all(&formatted, "<strong>$1</strong>");
    let formatted = ITALIC.replace_all(&formatted, "<em>$1</em>");
    let formatted = UNORDERED_ITEM.replace_all(&formatted, "<li class=\"list-disc\">$1</li>");
    let formatted = ORDERED_ITEM.replace_all(&formatted, "<li class=\"list-decimal\">$1</li>");

    let assembled = assemble_paragraphs(&formatted);

    STASHED
        .replace_all(&assembled, |caps: &Captures| {
            let store = if &caps[1] == "B" { &blocks } else { &inlines };
            caps[2]
                .parse::<usize>()
                .ok()
                .and_then(|i| store.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

/// The first complete fenced block in raw message text, if any.
pub fn first_code_block(text: &str) -> Option<CodeSnippet> {
    let caps = FENCE.captures(text)?;
    let code = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
    let language = match caps.get(1) {
        Some(tag) => tag.as_str().to_string(),
        None => detect_language(&code).as_str().to_string(),
    };
    Some(CodeSnippet { language, code })
}

fn render_code_block(index: usize, tag: Option<&str>, body: &str) -> String {
    let code = unescape_html(body.trim());
    let language = match tag {
        Some(tag) => tag.to_lowercase(),
        None => detect_language(&code).as_str().to_string(),
    };

    let highlighted = if language == DetectedLanguage::PlainText.as_str() {
        escape_html(&code)
    } else {
        highlight_code(&code, &language)
    };

    format!(
        concat!(
            "<div class=\"code-container\">",
            "<div class=\"code-header\">",
            "<span class=\"code-lang\">{lang}</span>",
            "<button class=\"copy-code-btn\" type=\"button\" data-copy-target=\"code-block-{index}\">Copy</button>",
            "</div>",
            "<pre><code id=\"code-block-{index}\" class=\"language-{lang}\">{code}</code></pre>",
            "</div>",
        ),
        lang = language,
        index = index,
        code = highlighted,
    )
}

fn is_table_row(line: &str) -> bool {
    let line = line.trim_end();
    line.len() >= 3 && line.starts_with('|') && line.ends_with('|')
}

fn table_cells(line: &str) -> Vec<&str> {
    let line = line.trim_end();
    line[1..line.len() - 1].split('|').map(str::trim).collect()
}

fn render_row(line: &str, cell_tag: &str) -> String {
    let cells: String = table_cells(line)
        .into_iter()
        .map(|c| format!("<{cell_tag}>{c}</{cell_tag}>"))
        .collect();
    format!("<tr>{cells}</tr>")
}

/// A run of pipe rows is a table only if one of them is a `---` divider.
/// Rows above the first divider are headers; dividers themselves are dropped.
fn render_table(rows: &[&str]) -> Option<String> {
    let divider = rows.iter().position(|r| r.contains("---"))?;

    let head: String = rows[..divider]
        .iter()
        .map(|r| render_row(r, "th"))
        .collect();
    let body: String = rows[divider..]
        .iter()
        .filter(|r| !r.contains("---"))
        .map(|r| render_row(r, "td"))
        .collect();

    let mut html = String::from("<table>");
    if !head.is_empty() {
        html.push_str(&format!("<thead>{head}</thead>"));
    }
    if !body.is_empty() {
        html.push_str(&format!("<tbody>{body}</tbody>"));
    }
    html.push_str("</table>");
    Some(html)
}

fn render_tables(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if !is_table_row(lines[i]) {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        }

        let start = i;
        while i < lines.len() && is_table_row(lines[i]) {
            i += 1;
        }
        let group = &lines[start..i];
        match render_table(group) {
            Some(table) => out.push(table),
            None => out.extend(group.iter().map(|l| l.to_string())),
        }
    }

    out.join("\n")
}

fn assemble_paragraphs(text: &str) -> String {
    text.split("\n\n")
        .filter_map(|segment| {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                None
            } else if BLOCK_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
                Some(trimmed.to_string())
            } else {
                Some(format!("<p>{trimmed}</p>"))
            }
        })
        .collect()
}
