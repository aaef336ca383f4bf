//! Rule line parser
//!
//! Parses one logical line (continuations already joined by the loader) into
//! a [`Rule`]. The grammar is comma-separated clauses of the form
//! `KEY[{attr}] OP "value"`. Match operators: `==`, `!=` (glob), `=~`, `!~`
//! (anchored regex). Assignment operators: `=`, `+=`, `:=`. Values are
//! double-quoted with C-style escapes.
//!
//! Patterns are compiled here, at load time, so malformed globs and regexes
//! surface as load diagnostics instead of silent non-matches.

use uevd_core::pattern::{MatchCase, Pattern};

use crate::errors::{parse_error, Result, RuleError};
use crate::model::{Action, Assign, ImportSource, Predicate, Rule, RuleSource, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Match,       // ==
    NoMatch,     // !=
    MatchRe,     // =~
    NoMatchRe,   // !~
    AssignSet,   // =
    AssignAdd,   // +=
    AssignFinal, // :=
}

impl Op {
    fn is_match(self) -> bool {
        matches!(self, Op::Match | Op::NoMatch | Op::MatchRe | Op::NoMatchRe)
    }

    fn negated(self) -> bool {
        matches!(self, Op::NoMatch | Op::NoMatchRe)
    }

    fn regex(self) -> bool {
        matches!(self, Op::MatchRe | Op::NoMatchRe)
    }

    fn assign(self) -> Assign {
        match self {
            Op::AssignSet => Assign::Set,
            Op::AssignAdd => Assign::Add,
            Op::AssignFinal => Assign::Final,
            _ => unreachable!("match operator has no assignment spelling"),
        }
    }
}

struct RawClause {
    key: String,
    attr: Option<String>,
    op: Op,
    value: String,
}

/// Parse one logical rule line
///
/// # Errors
/// `RuleError::Parse` with the offending location for any syntax error,
/// unknown key, operator/key mismatch, or malformed pattern.
pub fn parse_rule(line: &str, source: RuleSource) -> Result<Rule> {
    let mut cursor = Cursor::new(line, &source);
    let mut predicates = Vec::new();
    let mut actions = Vec::new();
    let mut clauses = 0usize;

    loop {
        cursor.skip_ws();
        if cursor.at_end() {
            break;
        }
        let clause = cursor.clause()?;
        clauses += 1;
        build_clause(clause, &source, &mut predicates, &mut actions)?;

        cursor.skip_ws();
        if cursor.at_end() {
            break;
        }
        cursor.expect(',')?;
        cursor.skip_ws();
        if cursor.at_end() {
            return Err(source.error("trailing comma"));
        }
    }

    if clauses == 0 {
        return Err(source.error("empty rule"));
    }

    Ok(Rule {
        predicates,
        actions,
        source,
    })
}

impl RuleSource {
    fn error(&self, reason: impl Into<String>) -> RuleError {
        parse_error(&self.file, self.line, reason)
    }
}

// ===== Clause → model mapping =====

fn build_clause(
    clause: RawClause,
    source: &RuleSource,
    predicates: &mut Vec<Predicate>,
    actions: &mut Vec<Action>,
) -> Result<()> {
    let RawClause {
        key,
        attr,
        op,
        value,
    } = clause;

    if op.is_match() {
        let predicate = build_predicate(&key, attr, op, value, source)?;
        predicates.push(predicate);
        return Ok(());
    }

    let action = build_action(&key, attr, op, value, source)?;
    actions.push(action);
    Ok(())
}

fn build_predicate(
    key: &str,
    attr: Option<String>,
    op: Op,
    value: String,
    source: &RuleSource,
) -> Result<Predicate> {
    // PROGRAM is special: the value is a command line, not a pattern
    if key == "PROGRAM" {
        if attr.is_some() {
            return Err(source.error("PROGRAM takes no attribute"));
        }
        if op.regex() {
            return Err(source.error("PROGRAM supports == and != only"));
        }
        return Ok(Predicate::Program {
            command: value,
            negated: op.negated(),
        });
    }

    let (selector, case) = selector_for(key, attr, source)?;
    let pattern = if op.regex() {
        Pattern::regex(&value, case)
    } else {
        Pattern::glob(&value, case)
    }
    .map_err(|e| source.error(e.to_string()))?;

    Ok(Predicate::Match {
        selector,
        negated: op.negated(),
        pattern,
    })
}

/// Resolve a match key (plus optional attribute) to a selector
///
/// Keyed selectors (`ENV{k}`, `ATTR{k}`, `ATTRS{k}`) use the attribute as
/// the key; plain selectors accept only the `nocase` attribute, which makes
/// the match case-insensitive.
fn selector_for(
    key: &str,
    attr: Option<String>,
    source: &RuleSource,
) -> Result<(Selector, MatchCase)> {
    let keyed = |attr: Option<String>, name: &str| -> Result<String> {
        attr.ok_or_else(|| source.error(format!("{} requires a key attribute, e.g. {}{{key}}", name, name)))
    };

    let selector = match key {
        "ENV" => return Ok((Selector::Env(keyed(attr, "ENV")?), MatchCase::Sensitive)),
        "ATTR" => return Ok((Selector::Attr(keyed(attr, "ATTR")?), MatchCase::Sensitive)),
        "ATTRS" => return Ok((Selector::Attrs(keyed(attr, "ATTRS")?), MatchCase::Sensitive)),
        "ACTION" => Selector::Action,
        "KERNEL" => Selector::Kernel,
        "DEVPATH" => Selector::Devpath,
        "SUBSYSTEM" => Selector::Subsystem,
        "DEVTYPE" => Selector::Devtype,
        "DRIVER" => Selector::Driver,
        "KERNELS" => Selector::Kernels,
        "SUBSYSTEMS" => Selector::Subsystems,
        "DRIVERS" => Selector::Drivers,
        "TAG" => Selector::Tag,
        "RESULT" => Selector::Result,
        other => return Err(source.error(format!("unknown match key '{}'", other))),
    };

    let case = match attr.as_deref() {
        None => MatchCase::Sensitive,
        Some("nocase") => MatchCase::Insensitive,
        Some(other) => {
            return Err(source.error(format!("unknown option '{{{}}}' on {}", other, key)))
        }
    };
    Ok((selector, case))
}

fn build_action(
    key: &str,
    attr: Option<String>,
    op: Op,
    value: String,
    source: &RuleSource,
) -> Result<Action> {
    let assign = op.assign();

    let no_attr = |attr: Option<String>| -> Result<()> {
        match attr {
            None => Ok(()),
            Some(a) => Err(source.error(format!("{} takes no attribute (got '{{{}}}')", key, a))),
        }
    };
    let singular = |assign: Assign| -> Result<bool> {
        match assign {
            Assign::Set => Ok(false),
            Assign::Final => Ok(true),
            Assign::Add => Err(source.error(format!("{} is a singular decision; += does not apply", key))),
        }
    };

    let action = match key {
        "ENV" => {
            let env_key = attr.ok_or_else(|| source.error("ENV requires a key attribute"))?;
            Action::SetProperty {
                key: env_key,
                op: assign,
                value,
            }
        }
        "NAME" => {
            no_attr(attr)?;
            Action::SetName {
                value,
                final_: singular(assign)?,
            }
        }
        "SYMLINK" => {
            no_attr(attr)?;
            Action::Symlink { op: assign, value }
        }
        "OWNER" => {
            no_attr(attr)?;
            Action::SetOwner {
                value,
                final_: singular(assign)?,
            }
        }
        "GROUP" => {
            no_attr(attr)?;
            Action::SetGroup {
                value,
                final_: singular(assign)?,
            }
        }
        "MODE" => {
            no_attr(attr)?;
            Action::SetMode {
                value,
                final_: singular(assign)?,
            }
        }
        "TAG" => {
            no_attr(attr)?;
            if assign != Assign::Add {
                return Err(source.error("TAG accumulates; use TAG+="));
            }
            Action::AddTag { value }
        }
        "RUN" => {
            let mandatory = match attr.as_deref() {
                None => false,
                Some("mandatory") => true,
                Some(other) => {
                    return Err(source.error(format!("unknown option '{{{}}}' on RUN", other)))
                }
            };
            if assign == Assign::Final {
                return Err(source.error("RUN does not support :="));
            }
            Action::Run {
                op: assign,
                command: value,
                mandatory,
            }
        }
        "IMPORT" => {
            let src = match attr.as_deref() {
                Some("program") => ImportSource::Program,
                Some("file") => ImportSource::File,
                Some(other) => {
                    return Err(source.error(format!("unknown IMPORT source '{{{}}}'", other)))
                }
                None => return Err(source.error("IMPORT requires {program} or {file}")),
            };
            if assign != Assign::Set {
                return Err(source.error("IMPORT supports = only"));
            }
            Action::Import { source: src, value }
        }
        "SERIAL" => {
            no_attr(attr)?;
            if assign != Assign::Set {
                return Err(source.error("SERIAL supports = only"));
            }
            Action::SetWaitToken { value }
        }
        "ACTION" | "KERNEL" | "DEVPATH" | "SUBSYSTEM" | "DEVTYPE" | "DRIVER" | "KERNELS"
        | "SUBSYSTEMS" | "DRIVERS" | "ATTR" | "ATTRS" | "PROGRAM" | "RESULT" => {
            return Err(source.error(format!("{} is a match key; use == or !=", key)))
        }
        other => return Err(source.error(format!("unknown assignment key '{}'", other))),
    };
    Ok(action)
}

// ===== Lexical cursor =====

struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a RuleSource,
}

impl<'a> Cursor<'a> {
    fn new(line: &str, source: &'a RuleSource) -> Self {
        Self {
            chars: line.chars().collect(),
            pos: 0,
            source,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self
                .source
                .error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self
                .source
                .error(format!("expected '{}', found end of line", expected))),
        }
    }

    fn clause(&mut self) -> Result<RawClause> {
        let key = self.key()?;
        let attr = self.attr()?;
        self.skip_ws();
        let op = self.op()?;
        self.skip_ws();
        let value = self.quoted_value()?;
        Ok(RawClause {
            key,
            attr,
            op,
            value,
        })
    }

    fn key(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_uppercase() || c == '_') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(match self.peek() {
                Some(c) => self.source.error(format!("expected key, found '{}'", c)),
                None => self.source.error("expected key, found end of line"),
            });
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attr(&mut self) -> Result<Option<String>> {
        if self.peek() != Some('{') {
            return Ok(None);
        }
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '}' {
                let attr: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                if attr.is_empty() {
                    return Err(self.source.error("empty attribute braces"));
                }
                return Ok(Some(attr));
            }
            self.pos += 1;
        }
        Err(self.source.error("unterminated attribute braces"))
    }

    fn op(&mut self) -> Result<Op> {
        let rest: String = self.chars[self.pos..].iter().take(2).collect();
        let (op, len) = if rest.starts_with("==") {
            (Op::Match, 2)
        } else if rest.starts_with("!=") {
            (Op::NoMatch, 2)
        } else if rest.starts_with("=~") {
            (Op::MatchRe, 2)
        } else if rest.starts_with("!~") {
            (Op::NoMatchRe, 2)
        } else if rest.starts_with("+=") {
            (Op::AssignAdd, 2)
        } else if rest.starts_with(":=") {
            (Op::AssignFinal, 2)
        } else if rest.starts_with('=') {
            (Op::AssignSet, 1)
        } else {
            return Err(self.source.error(match self.peek() {
                Some(c) => format!("expected operator, found '{}'", c),
                None => "expected operator, found end of line".to_string(),
            }));
        };
        self.pos += len;
        Ok(op)
    }

    fn quoted_value(&mut self) -> Result<String> {
        self.expect('"')?;
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(c) => value.push(c),
                    None => return Err(self.source.error("unterminated escape in value")),
                },
                Some(c) => value.push(c),
                None => return Err(self.source.error("unterminated quoted value")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Rule> {
        parse_rule(line, RuleSource::new("test.rules", 1))
    }

    #[test]
    fn test_parse_basic_rule() {
        let rule = parse(r#"SUBSYSTEM=="block", KERNEL=="sda", SYMLINK+="disk1""#).unwrap();
        assert_eq!(rule.predicates.len(), 2);
        assert_eq!(rule.actions.len(), 1);
        assert!(matches!(
            rule.actions[0],
            Action::Symlink {
                op: Assign::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_env_clauses() {
        let rule = parse(r#"ENV{ID_FS_TYPE}=="ext4", ENV{MOUNTABLE}="1""#).unwrap();
        assert!(matches!(
            &rule.predicates[0],
            Predicate::Match {
                selector: Selector::Env(k),
                negated: false,
                ..
            } if k == "ID_FS_TYPE"
        ));
        assert!(matches!(
            &rule.actions[0],
            Action::SetProperty { key, op: Assign::Set, .. } if key == "MOUNTABLE"
        ));
    }

    #[test]
    fn test_parse_final_assign() {
        let rule = parse(r#"KERNEL=="sda", NAME:="disk/main""#).unwrap();
        assert!(matches!(
            rule.actions[0],
            Action::SetName { final_: true, .. }
        ));
    }

    #[test]
    fn test_parse_regex_operator() {
        let rule = parse(r#"KERNEL=~"sd[a-z]+", SYMLINK+="scsi""#).unwrap();
        assert!(matches!(
            &rule.predicates[0],
            Predicate::Match { negated: false, .. }
        ));
    }

    #[test]
    fn test_parse_mandatory_run() {
        let rule = parse(r#"ACTION=="add", RUN{mandatory}+="/bin/setup-dev""#).unwrap();
        assert!(matches!(
            rule.actions[0],
            Action::Run {
                mandatory: true,
                op: Assign::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_name_plus_equals_rejected() {
        let err = parse(r#"KERNEL=="sda", NAME+="disk""#).unwrap_err();
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(parse(r#"KERNELZ=="sda""#).is_err());
    }

    #[test]
    fn test_assignment_on_match_key_rejected() {
        assert!(parse(r#"ACTION="add""#).is_err());
    }

    #[test]
    fn test_malformed_glob_fails_parse() {
        let err = parse(r#"KERNEL=="sd[ab""#).unwrap_err();
        assert!(err.to_string().contains("bracket"));
    }

    #[test]
    fn test_escapes_in_value() {
        let rule = parse(r#"KERNEL=="sda", ENV{NOTE}="a\"b\\c""#).unwrap();
        assert!(matches!(
            &rule.actions[0],
            Action::SetProperty { value, .. } if value == "a\"b\\c"
        ));
    }

    #[test]
    fn test_empty_line_is_error() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn test_nocase_option() {
        let rule = parse(r#"KERNEL{nocase}=="SDA*", SYMLINK+="x""#).unwrap();
        match &rule.predicates[0] {
            Predicate::Match { pattern, .. } => assert!(pattern.matches("sda1")),
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_import_requires_source() {
        assert!(parse(r#"IMPORT="prog""#).is_err());
        let rule = parse(r#"IMPORT{program}="/bin/probe $devpath""#).unwrap();
        assert!(matches!(
            rule.actions[0],
            Action::Import {
                source: ImportSource::Program,
                ..
            }
        ));
    }

    #[test]
    fn test_serial_token() {
        let rule = parse(r#"SUBSYSTEM=="block", SERIAL="raid-set-1""#).unwrap();
        assert!(matches!(
            &rule.actions[0],
            Action::SetWaitToken { value } if value == "raid-set-1"
        ));
    }

    #[test]
    fn test_trailing_comma_tolerance() {
        // A trailing comma means an empty clause; the parser rejects it
        assert!(parse(r#"KERNEL=="sda","#).is_err());
    }
}
