//! Token/value matching
//!
//! Patterns are compiled once, at rule load time, and owned by the rule
//! database; matching at event time never allocates or re-parses. Glob
//! patterns support `*`, `?`, bracket sets (`[abc]`, `[a-z]`, `[!...]`) and
//! top-level alternation (`sda|sdb`). Matching is always over the whole
//! value; an empty pattern matches only the empty value. A malformed bracket
//! set is a compile error so it surfaces as a rule-load diagnostic, never as
//! a silent non-match.

use regex::RegexBuilder;

use crate::errors::{pattern_syntax, Result};

/// Case handling for a compiled pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchCase {
    #[default]
    Sensitive,
    Insensitive,
}

/// A compiled value pattern: glob dialect or anchored regex
#[derive(Debug, Clone)]
pub enum Pattern {
    Glob(GlobPattern),
    Regex(Box<regex::Regex>),
}

impl Pattern {
    /// Compile a glob pattern
    pub fn glob(pattern: &str, case: MatchCase) -> Result<Self> {
        Ok(Pattern::Glob(GlobPattern::compile(pattern, case)?))
    }

    /// Compile a regex pattern, anchored to the whole value
    pub fn regex(pattern: &str, case: MatchCase) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        let compiled = RegexBuilder::new(&anchored)
            .case_insensitive(case == MatchCase::Insensitive)
            .build()
            .map_err(|e| pattern_syntax(pattern, e.to_string()))?;
        Ok(Pattern::Regex(Box::new(compiled)))
    }

    /// Match the whole value against this pattern
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Glob(glob) => glob.matches(value),
            Pattern::Regex(re) => re.is_match(value),
        }
    }

    /// The raw source text the pattern was compiled from
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Glob(glob) => &glob.raw,
            Pattern::Regex(re) => re.as_str(),
        }
    }
}

/// A compiled glob: one token list per `|` alternative
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    alternatives: Vec<Vec<GlobToken>>,
    case: MatchCase,
}

#[derive(Debug, Clone, PartialEq)]
enum GlobToken {
    Literal(char),
    Any,
    One,
    Set { negated: bool, items: Vec<SetItem> },
}

#[derive(Debug, Clone, PartialEq)]
enum SetItem {
    Char(char),
    Range(char, char),
}

impl GlobPattern {
    /// Compile a glob pattern
    ///
    /// # Errors
    /// `PatternSyntax` on an unterminated bracket set or a reversed range.
    pub fn compile(pattern: &str, case: MatchCase) -> Result<Self> {
        let folded;
        let source = match case {
            MatchCase::Sensitive => pattern,
            MatchCase::Insensitive => {
                folded = pattern.to_lowercase();
                &folded
            }
        };

        let mut alternatives = Vec::new();
        for alt in split_alternatives(source) {
            alternatives.push(compile_tokens(&alt, pattern)?);
        }

        Ok(Self {
            raw: pattern.to_string(),
            alternatives,
            case,
        })
    }

    /// Match the whole value against any alternative
    pub fn matches(&self, value: &str) -> bool {
        let folded;
        let value = match self.case {
            MatchCase::Sensitive => value,
            MatchCase::Insensitive => {
                folded = value.to_lowercase();
                &folded
            }
        };
        let chars: Vec<char> = value.chars().collect();
        self.alternatives
            .iter()
            .any(|tokens| match_tokens(tokens, &chars))
    }
}

/// Split on top-level `|`, honoring backslash escapes and bracket sets
fn split_alternatives(pattern: &str) -> Vec<String> {
    let mut alternatives = Vec::new();
    let mut current = String::new();
    let mut in_set = false;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '[' if !in_set => {
                in_set = true;
                current.push(c);
            }
            ']' if in_set => {
                in_set = false;
                current.push(c);
            }
            '|' if !in_set => {
                alternatives.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    alternatives.push(current);
    alternatives
}

fn compile_tokens(alt: &str, original: &str) -> Result<Vec<GlobToken>> {
    let mut tokens = Vec::new();
    let mut chars = alt.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => tokens.push(GlobToken::Any),
            '?' => tokens.push(GlobToken::One),
            '\\' => {
                // Trailing backslash matches a literal backslash, as fnmatch does
                tokens.push(GlobToken::Literal(chars.next().unwrap_or('\\')));
            }
            '[' => tokens.push(compile_set(&mut chars, original)?),
            _ => tokens.push(GlobToken::Literal(c)),
        }
    }
    Ok(tokens)
}

fn compile_set(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    original: &str,
) -> Result<GlobToken> {
    let mut negated = false;
    if matches!(chars.peek(), Some('!') | Some('^')) {
        negated = true;
        chars.next();
    }

    let mut items = Vec::new();
    let mut first = true;
    loop {
        let Some(c) = chars.next() else {
            return Err(pattern_syntax(original, "unterminated bracket set"));
        };
        // A `]` in first position is a literal member
        if c == ']' && !first {
            break;
        }
        first = false;

        let c = if c == '\\' {
            chars.next().unwrap_or('\\')
        } else {
            c
        };

        // Range if a `-` follows and is not the closing position
        if chars.peek() == Some(&'-') {
            let mut lookahead = chars.clone();
            lookahead.next(); // consume '-'
            match lookahead.peek() {
                Some(&end) if end != ']' => {
                    chars.next(); // '-'
                    chars.next(); // end
                    if end < c {
                        return Err(pattern_syntax(
                            original,
                            format!("reversed range {}-{} in bracket set", c, end),
                        ));
                    }
                    items.push(SetItem::Range(c, end));
                    continue;
                }
                _ => {}
            }
        }
        items.push(SetItem::Char(c));
    }

    if items.is_empty() {
        return Err(pattern_syntax(original, "empty bracket set"));
    }
    Ok(GlobToken::Set { negated, items })
}

fn set_contains(items: &[SetItem], c: char) -> bool {
    items.iter().any(|item| match item {
        SetItem::Char(member) => *member == c,
        SetItem::Range(lo, hi) => (*lo..=*hi).contains(&c),
    })
}

fn match_tokens(tokens: &[GlobToken], chars: &[char]) -> bool {
    let Some(token) = tokens.first() else {
        return chars.is_empty();
    };
    match token {
        GlobToken::Any => {
            // Either the star consumes nothing, or it eats one char and stays
            match_tokens(&tokens[1..], chars)
                || (!chars.is_empty() && match_tokens(tokens, &chars[1..]))
        }
        GlobToken::One => !chars.is_empty() && match_tokens(&tokens[1..], &chars[1..]),
        GlobToken::Literal(expected) => {
            chars.first() == Some(expected) && match_tokens(&tokens[1..], &chars[1..])
        }
        GlobToken::Set { negated, items } => match chars.first() {
            Some(&c) => (set_contains(items, c) != *negated) && match_tokens(&tokens[1..], &chars[1..]),
            None => false,
        },
    }
}
