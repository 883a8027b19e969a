//! Command grammar - turns `prog args :dep|delay|times; ...` into command records
//!
//! ```text
//! echo hello; cat :0|0|1; sleep 1 :rand(1,3)|2
//! ```
//!
//! The optional extras after the last `:` are read right to left: the last
//! field is the repeat count, the one before it the delay, and a third field
//! (if present) the dependency index.

use crate::core::CommandSpec;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Command has no program: '{0}'")]
    MissingProgram(String),

    #[error("Unterminated quote in command: '{0}'")]
    UnterminatedQuote(String),

    #[error("Empty random range in delay '{0}'")]
    EmptyRange(String),
}

fn rand_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^rand\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\)$").expect("rand pattern is valid")
    })
}

fn extras_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let field = r"\s*(?:-?\d+|rand\(\s*\d+\s*(?:,\s*\d+\s*)?\))?\s*";
        Regex::new(&format!(r"^{field}(?:\|{field})*$")).expect("extras pattern is valid")
    })
}

/// Parse a semicolon separated command string
pub fn parse_commands(input: &str) -> Result<Vec<CommandSpec>, ParseError> {
    log::info!("Parsing commands: {}", input);

    let specs = split_statements(input)
        .into_iter()
        .filter_map(|statement| {
            let statement = statement.trim();
            if statement.is_empty() {
                log::warn!("Empty command detected");
                None
            } else {
                Some(parse_command(statement))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("Parsed commands: {:?}", specs);
    Ok(specs)
}

/// Split on `;` outside quotes; `\;` is a literal semicolon
fn split_statements(input: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&';') => {
                current.push(';');
                chars.next();
            }
            '\'' | '"' => {
                match quote {
                    None => quote = Some(c),
                    Some(open) if open == c => quote = None,
                    Some(_) => {}
                }
                current.push(c);
            }
            ';' if quote.is_none() => statements.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

/// Parse one statement into a command record
pub fn parse_command(statement: &str) -> Result<CommandSpec, ParseError> {
    log::debug!("Splitting command: {}", statement);
    let statement = sanitize(statement);

    let (body, extras) = match statement.rfind(':') {
        Some(at) if extras_pattern().is_match(&statement[at + 1..]) => {
            (&statement[..at], Some(&statement[at + 1..]))
        }
        _ => (statement, None),
    };

    let mut words = tokenize(body).ok_or_else(|| ParseError::UnterminatedQuote(body.to_string()))?;
    if words.is_empty() {
        return Err(ParseError::MissingProgram(statement.to_string()));
    }
    let program = words.remove(0);

    let mut spec = CommandSpec::new(program).args(words);
    if let Some(extras) = extras {
        apply_extras(&mut spec, extras)?;
    }
    Ok(spec)
}

/// Strip surrounding whitespace and one pair of quotes wrapping the whole statement
fn sanitize(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            if !inner.contains(quote) {
                return inner.trim();
            }
        }
    }
    value
}

/// Split on whitespace outside quotes, dropping the quote characters
fn tokenize(body: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in body.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (Some(open), _) if open == c => quote = None,
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

fn apply_extras(spec: &mut CommandSpec, extras: &str) -> Result<(), ParseError> {
    let parts: Vec<&str> = extras.split('|').map(str::trim).collect();
    let n = parts.len();

    if n > 2 {
        spec.dependency = parts[0].parse().ok();
    }

    if n > 1 {
        spec.delay = parse_delay(parts[n - 2])?;
    }

    spec.times = match parts[n - 1].parse() {
        Ok(times) => times,
        Err(_) => {
            if !parts[n - 1].is_empty() {
                log::warn!("Invalid repeat count '{}', using 1", parts[n - 1]);
            }
            1
        }
    };

    Ok(())
}

/// A delay is a plain integer, `rand(max)` or `rand(min,max)`
fn parse_delay(value: &str) -> Result<Option<u64>, ParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(delay) = value.parse() {
        return Ok(Some(delay));
    }

    let Some(caps) = rand_pattern().captures(value) else {
        log::warn!("Invalid delay '{}', ignoring", value);
        return Ok(None);
    };

    let bound = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    let (min, max) = match (bound(1), bound(2)) {
        (Some(max), None) => (0, max),
        (Some(min), Some(max)) => (min, max),
        _ => return Err(ParseError::EmptyRange(value.to_string())),
    };

    if min >= max {
        return Err(ParseError::EmptyRange(value.to_string()));
    }
    Ok(Some(fastrand::u64(min..max)))
}
