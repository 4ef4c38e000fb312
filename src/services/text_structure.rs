use std::sync::LazyLock;

use regex::Regex;

use crate::schemas::grading::{DocumentStructure, StructuredLine};

const LITERAL_SYMBOLS: &[(&str, &str)] =
    &[("->", "→"), ("<=", "≤"), (">=", "≥"), ("!=", "≠"), ("+-", "±")];

const GREEK_LETTERS: &[(&str, &str)] = &[
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("epsilon", "ε"),
    ("theta", "θ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("pi", "π"),
    ("sigma", "σ"),
    ("omega", "ω"),
];

const FULL_WIDTH_PUNCTUATION: &[(char, char)] = &[
    (',', '，'),
    (';', '；'),
    (':', '：'),
    ('?', '？'),
    ('!', '！'),
    ('(', '（'),
    (')', '）'),
    ('.', '。'),
];

static TIMES_BETWEEN_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\s*[xX]\s*(\d)").expect("times pattern"));
static DIVIDE_BETWEEN_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\s*/\s*(\d)").expect("divide pattern"));
static GREEK_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    GREEK_LETTERS
        .iter()
        .map(|(name, glyph)| {
            let pattern = format!(r"\\?\b{name}\b");
            (Regex::new(&pattern).expect("greek pattern"), *glyph)
        })
        .collect()
});
static HORIZONTAL_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("whitespace pattern"));

static TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(question|problem)\s*\d+|^第\s*[0-9一二三四五六七八九十百]+\s*题")
        .expect("title pattern")
});
static SOLUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bsolution\s*[:：]|解答?\s*[:：]").expect("solution pattern"));
static EQUATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[=<>≤≥≠+\-×÷*/]|\d|frac\{|sqrt\{").expect("equation pattern")
});
static ANSWER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\banswer\s*[:：]|\btherefore\b|∴|答\s*[:：]|因此|所以").expect("answer pattern")
});

/// Replace ASCII math notation with the corresponding symbols.
pub(crate) fn normalize_math_symbols(text: &str) -> String {
    let mut output = text.to_string();
    for (ascii, symbol) in LITERAL_SYMBOLS {
        output = output.replace(ascii, symbol);
    }

    // Chains like 2x3x4 share operands, so repeat until nothing matches.
    while TIMES_BETWEEN_NUMBERS.is_match(&output) {
        output = TIMES_BETWEEN_NUMBERS.replace_all(&output, "${1}×${2}").into_owned();
    }
    while DIVIDE_BETWEEN_NUMBERS.is_match(&output) {
        output = DIVIDE_BETWEEN_NUMBERS.replace_all(&output, "${1}÷${2}").into_owned();
    }

    for (pattern, glyph) in GREEK_PATTERNS.iter() {
        output = pattern.replace_all(&output, *glyph).into_owned();
    }
    output
}

/// ASCII punctuation to full-width CJK forms. Separators inside numbers
/// (`3.14`, `1,000`) are kept.
pub(crate) fn normalize_cjk_punctuation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());

    for (idx, ch) in chars.iter().enumerate() {
        let numeric_separator = matches!(ch, '.' | ',')
            && idx > 0
            && chars[idx - 1].is_ascii_digit()
            && chars.get(idx + 1).is_some_and(|next| next.is_ascii_digit());

        let replacement = if numeric_separator {
            None
        } else {
            FULL_WIDTH_PUNCTUATION.iter().find(|(ascii, _)| ascii == ch).map(|(_, wide)| *wide)
        };
        output.push(replacement.unwrap_or(*ch));
    }
    output
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| HORIZONTAL_WHITESPACE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Tag lines as title, question, equation or answer. A line may land in
/// several categories.
pub(crate) fn analyze_structure(text: &str) -> DocumentStructure {
    let mut structure = DocumentStructure::default();

    for (line, raw) in text.lines().enumerate() {
        let content = raw.trim();
        if content.is_empty() {
            continue;
        }
        let entry = || StructuredLine { text: content.to_string(), line };

        if line == 0 && TITLE_PATTERN.is_match(content) {
            structure.title = Some(content.to_string());
        }
        if SOLUTION_PATTERN.is_match(content) {
            structure.questions.push(entry());
        }
        if EQUATION_PATTERN.is_match(content) {
            structure.equations.push(entry());
        }
        if ANSWER_PATTERN.is_match(content) {
            structure.answers.push(entry());
        }
    }

    structure
}
