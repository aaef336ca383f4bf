//! Substitution expansion for rule operands
//!
//! Action operands and program command lines may reference device state via
//! `$name` / `$name{key}` expressions or the short `%x` forms:
//!
//! | long          | short   | value                                   |
//! |---------------|---------|-----------------------------------------|
//! | `$kernel`     | `%k`    | kernel name (last devpath component)    |
//! | `$devpath`    | `%p`    | kernel device path                      |
//! | `$subsystem`  |         | subsystem                               |
//! | `$devtype`    |         | devtype                                 |
//! | `$driver`     |         | driver                                  |
//! | `$major`      | `%M`    | device major number                     |
//! | `$minor`      | `%m`    | device minor number                     |
//! | `$name`       |         | current node name decision              |
//! | `$env{KEY}`   | `%E{KEY}` | working property                      |
//! | `$attr{KEY}`  | `%s{KEY}` | sysfs attribute of the device         |
//! | `$result`     | `%c`    | stdout of the last PROGRAM clause       |
//! | `$$`          | `%%`    | literal `$` / `%`                       |
//!
//! Unknown references are left in place so a typo stays visible in the
//! produced value instead of vanishing.

use tracing::warn;

use uevd_core::model::DeviceSnapshot;

use crate::context::ExecutionContext;

/// Expand every substitution reference in `input`
pub fn expand(input: &str, snapshot: &DeviceSnapshot, ctx: &ExecutionContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' => {
                if chars.peek() == Some(&'$') {
                    chars.next();
                    out.push('$');
                    continue;
                }
                let word: String = {
                    let mut w = String::new();
                    while matches!(chars.peek(), Some(c) if c.is_ascii_lowercase()) {
                        w.push(chars.next().unwrap());
                    }
                    w
                };
                // `$` followed by something that is not a reference (an
                // uppercase shell variable in a RUN command, say) passes
                // through untouched
                if word.is_empty() {
                    out.push('$');
                    continue;
                }
                let key = brace_key(&mut chars);
                match lookup(&word, key.as_deref(), snapshot, ctx) {
                    Some(value) => out.push_str(&value),
                    None => {
                        warn!(reference = %word, "unknown substitution, left in place");
                        out.push('$');
                        out.push_str(&word);
                        if let Some(k) = key {
                            out.push('{');
                            out.push_str(&k);
                            out.push('}');
                        }
                    }
                }
            }
            '%' => {
                let Some(&short) = chars.peek() else {
                    out.push('%');
                    continue;
                };
                chars.next();
                if short == '%' {
                    out.push('%');
                    continue;
                }
                let word = match short {
                    'k' => "kernel",
                    'p' => "devpath",
                    'M' => "major",
                    'm' => "minor",
                    'E' => "env",
                    's' => "attr",
                    'c' => "result",
                    other => {
                        warn!(reference = %other, "unknown short substitution, left in place");
                        out.push('%');
                        out.push(other);
                        continue;
                    }
                };
                let key = brace_key(&mut chars);
                match lookup(word, key.as_deref(), snapshot, ctx) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('%');
                        out.push(short);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn brace_key(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    if chars.peek() != Some(&'{') {
        return None;
    }
    chars.next();
    let mut key = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            return Some(key);
        }
        key.push(c);
    }
    // Unterminated braces: treat the consumed text as the key
    Some(key)
}

fn lookup(
    word: &str,
    key: Option<&str>,
    snapshot: &DeviceSnapshot,
    ctx: &ExecutionContext,
) -> Option<String> {
    match (word, key) {
        ("kernel", None) => Some(snapshot.sysname().to_string()),
        ("devpath", None) => Some(snapshot.devpath().to_string()),
        ("subsystem", None) => Some(snapshot.subsystem().unwrap_or_default().to_string()),
        ("devtype", None) => Some(snapshot.devtype().unwrap_or_default().to_string()),
        ("driver", None) => Some(snapshot.driver().unwrap_or_default().to_string()),
        ("major", None) => Some(
            snapshot
                .devnum()
                .map(|d| d.major.to_string())
                .unwrap_or_default(),
        ),
        ("minor", None) => Some(
            snapshot
                .devnum()
                .map(|d| d.minor.to_string())
                .unwrap_or_default(),
        ),
        ("name", None) => Some(
            ctx.name
                .get()
                .cloned()
                .unwrap_or_else(|| snapshot.sysname().to_string()),
        ),
        ("result", None) => Some(ctx.last_result.clone().unwrap_or_default()),
        ("env", Some(k)) => Some(ctx.properties().get(k).unwrap_or_default().to_string()),
        ("attr", Some(k)) => Some(snapshot.attribute(k).ok().flatten().unwrap_or_default()),
        _ => None,
    }
}
