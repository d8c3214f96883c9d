use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectedLanguage {
    Tsx,
    JavaScript,
    Python,
    Html,
    TypeScript,
    Json,
    Rust,
    Cpp,
    Java,
    Php,
    Sql,
    Css,
    PlainText,
}

impl DetectedLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedLanguage::Tsx => "tsx",
            DetectedLanguage::JavaScript => "javascript",
            DetectedLanguage::Python => "python",
            DetectedLanguage::Html => "html",
            DetectedLanguage::TypeScript => "typescript",
            DetectedLanguage::Json => "json",
            DetectedLanguage::Rust => "rust",
            DetectedLanguage::Cpp => "cpp",
            DetectedLanguage::Java => "java",
            DetectedLanguage::Php => "php",
            DetectedLanguage::Sql => "sql",
            DetectedLanguage::Css => "css",
            DetectedLanguage::PlainText => "plaintext",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tsx" => Some(DetectedLanguage::Tsx),
            "javascript" => Some(DetectedLanguage::JavaScript),
            "python" => Some(DetectedLanguage::Python),
            "html" => Some(DetectedLanguage::Html),
            "typescript" => Some(DetectedLanguage::TypeScript),
            "json" => Some(DetectedLanguage::Json),
            "rust" => Some(DetectedLanguage::Rust),
            "cpp" => Some(DetectedLanguage::Cpp),
            "java" => Some(DetectedLanguage::Java),
            "php" => Some(DetectedLanguage::Php),
            "sql" => Some(DetectedLanguage::Sql),
            "css" => Some(DetectedLanguage::Css),
            "plaintext" => Some(DetectedLanguage::PlainText),
            _ => None,
        }
    }
}

impl fmt::Display for DetectedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Guess the language of untagged code. The first matching rule wins, so
/// rule order is part of the result.
pub fn detect_language(code: &str) -> DetectedLanguage {
    let clean = code.trim();
    let lower = clean.to_lowercase();

    // High-confidence markers
    if contains_any(&lower, &["import react", "from \"react\"", "jsx"]) {
        return DetectedLanguage::Tsx;
    }
    if lower.contains("const [") && lower.contains("] = usestate") {
        return DetectedLanguage::Tsx;
    }
    if contains_any(&lower, &["import ", "export ", "const ", "console.log"]) {
        return DetectedLanguage::JavaScript;
    }
    if contains_any(&lower, &["def ", "print(", "import os", "if __name__ =="]) {
        return DetectedLanguage::Python;
    }
    if contains_any(&lower, &["<html>", "<!doctype html", "<div", "<script"]) {
        return DetectedLanguage::Html;
    }
    if contains_any(
        &lower,
        &[
            "interface ",
            "type ",
            "enum ",
            "as string",
            ": number",
            ": string",
            ": boolean",
        ],
    ) {
        return DetectedLanguage::TypeScript;
    }

    // Structure-based detection
    if (clean.starts_with('{') || clean.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(clean).is_ok()
    {
        return DetectedLanguage::Json;
    }

    if contains_any(&lower, &["struct ", "fn ", "impl ", "let mut"]) {
        return DetectedLanguage::Rust;
    }
    if contains_any(&lower, &["void main(", "#include <", "std::"]) {
        return DetectedLanguage::Cpp;
    }
    if contains_any(&lower, &["public class ", "system.out.println"]) {
        return DetectedLanguage::Java;
    }
    if lower.contains("<?php") {
        return DetectedLanguage::Php;
    }
    if lower.contains("select ") && lower.contains(" from ") && lower.contains("where ") {
        return DetectedLanguage::Sql;
    }
    if contains_any(&lower, &["body {", ".class {", "@media"]) {
        return DetectedLanguage::Css;
    }

    DetectedLanguage::PlainText
}
