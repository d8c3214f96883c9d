use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::markdown::escape_html;

const KEYWORDS: &str = "const|let|var|function|return|if|else|for|while|import|export|from|\
class|extends|new|true|false|null|undefined|await|async|try|catch|finally|public|private|\
protected|static|readonly|interface|type|enum|default|as|is|in|of|void|any|number|string|\
boolean|object|unknown|never|def|print|elif|with|yield|lambda|pass|break|continue";

const BUILTINS: &str = "console|window|document|Math|JSON|Array|Object|String|Number|Boolean|\
Promise|Map|Set|Error|Date|Reflect|Proxy|setTimeout|setInterval|clearTimeout|clearInterval";

static CODE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        concat!(
            r"(?P<comment>//[^\n]*|/\*[\s\S]*?\*/)",
            r#"|(?P<string>"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*')"#,
            r"|\b(?P<keyword>{keywords})\b",
            r"|\b(?P<builtin>{builtins})\b",
            r"|(?P<call>\b[A-Za-z_][A-Za-z0-9_]*)(?P<call_tail>\s*\()",
            r"|\b(?P<number>\d+)\b",
            r"|(?P<operator>[-+*/=<>!&|])",
        ),
        keywords = KEYWORDS,
        builtins = BUILTINS,
    );
    Regex::new(&pattern).expect("code highlight pattern is valid")
});

static MARKUP_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<tag></?[A-Za-z][A-Za-z0-9]*)",
        r#"|(?P<attr_lead> )(?P<attr>[A-Za-z-]+)=(?:"(?P<value>[^"\n]*)")?"#,
        r"|(?P<comment><!--[\s\S]*?-->)",
    ))
    .expect("markup highlight pattern is valid")
});

/// Languages highlighted with the tag/attribute passes.
pub fn is_markup_language(language: &str) -> bool {
    matches!(language, "html" | "xml" | "svg")
}

/// Highlight raw `code` for `language`, returning escaped markup.
///
/// One alternation per language family; the earliest match wins and ties go
/// to the earlier branch, so text inside a comment or string is not
/// highlighted again.
pub fn highlight_code(code: &str, language: &str) -> String {
    if is_markup_language(language) {
        highlight_with(code, &MARKUP_TOKEN, emit_markup_token)
    } else {
        highlight_with(code, &CODE_TOKEN, emit_code_token)
    }
}

fn highlight_with(code: &str, re: &Regex, emit: fn(&mut String, &Captures)) -> String {
    let mut out = String::with_capacity(code.len() * 2);
    let mut last = 0;

    for caps in re.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&escape_html(&code[last..whole.start()]));
        emit(&mut out, &caps);
        last = whole.end();
    }

    out.push_str(&escape_html(&code[last..]));
    out
}

fn wrap(out: &mut String, class: &str, text: &str) {
    out.push_str("<span class=\"hl-");
    out.push_str(class);
    out.push_str("\">");
    out.push_str(&escape_html(text));
    out.push_str("</span>");
}

fn emit_code_token(out: &mut String, caps: &Captures) {
    const SIMPLE: [(&str, &str); 6] = [
        ("comment", "comment"),
        ("string", "string"),
        ("keyword", "keyword"),
        ("builtin", "function"),
        ("number", "number"),
        ("operator", "operator"),
    ];

    for (group, class) in SIMPLE {
        if let Some(m) = caps.name(group) {
            wrap(out, class, m.as_str());
            return;
        }
    }

    if let (Some(name), Some(tail)) = (caps.name("call"), caps.name("call_tail")) {
        wrap(out, "function", name.as_str());
        out.push_str(&escape_html(tail.as_str()));
    }
}

fn emit_markup_token(out: &mut String, caps: &Captures) {
    if let Some(tag) = caps.name("tag") {
        wrap(out, "tag", tag.as_str());
    } else if let Some(attr) = caps.name("attr") {
        out.push(' ');
        wrap(out, "attr", attr.as_str());
        out.push('=');
        if let Some(value) = caps.name("value") {
            out.push_str("&quot;");
            wrap(out, "string", value.as_str());
            out.push_str("&quot;");
        }
    } else if let Some(comment) = caps.name("comment") {
        wrap(out, "comment", comment.as_str());
    }
}
