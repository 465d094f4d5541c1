use std::path::Path;

use super::ast::SourceLoc;
use super::{CompileError, ErrorCode, Result};

/// Base here-document delimiter for prompt bodies.
pub const HEREDOC_DELIMITER: &str = "__JAIPH_PROMPT__";

/// Piece of a decoded prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain text with escapes resolved.
    Literal(String),
    /// Parameter expansion left for the shell (`$name`, `${...}`, `$1`, `$@`).
    Expansion(String),
}

/// Prompt text split into literal runs and shell parameter expansions.
///
/// Command substitution (backticks or `$(`) is rejected so that running a
/// prompt never executes code hidden inside its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLiteral {
    segments: Vec<Segment>,
}

impl PromptLiteral {
    /// Decode the raw text found between the prompt quotes.
    pub fn parse(raw: &str, file: &Path, loc: SourceLoc) -> Result<Self> {
        let reject = |message: &str| {
            CompileError::located(file.to_path_buf(), loc, ErrorCode::Parse, message)
        };

        let chars: Vec<char> = raw.chars().collect();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut index = 0;

        while index < chars.len() {
            match chars[index] {
                '\\' => match chars.get(index + 1) {
                    Some(&next @ ('$' | '`' | '"' | '\\')) => {
                        literal.push(next);
                        index += 2;
                    }
                    Some('\n') => index += 2,
                    _ => {
                        literal.push('\\');
                        index += 1;
                    }
                },
                '`' => return Err(reject("prompt cannot contain command substitution (backticks)")),
                '$' => {
                    let Some(len) = expansion_len(&chars[index..]).map_err(|message| reject(message))?
                    else {
                        literal.push('$');
                        index += 1;
                        continue;
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Expansion(chars[index..index + len].iter().collect()));
                    index += len;
                }
                ch => {
                    literal.push(ch);
                    index += 1;
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Decoded segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Text as the agent would see it before runtime expansion.
    pub fn decoded(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) | Segment::Expansion(text) => text.as_str(),
            })
            .collect()
    }

    /// Body for an unquoted here-document: literals escaped so only the
    /// expansions are interpreted by the shell.
    pub fn heredoc_body(&self) -> String {
        let mut body = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Expansion(text) => body.push_str(text),
                Segment::Literal(text) => {
                    for ch in text.chars() {
                        if matches!(ch, '\\' | '$' | '`') {
                            body.push('\\');
                        }
                        body.push(ch);
                    }
                }
            }
        }
        body
    }

    /// Delimiter that matches no line of `body`.
    pub fn heredoc_delimiter(body: &str) -> String {
        let mut delimiter = HEREDOC_DELIMITER.to_string();
        while body.lines().any(|line| line == delimiter) {
            delimiter.push('_');
        }
        delimiter
    }
}

/// Length of the expansion starting at `chars[0] == '$'`, `None` for a lone
/// dollar sign.
fn expansion_len(chars: &[char]) -> std::result::Result<Option<usize>, &'static str> {
    match chars.get(1) {
        Some('(') => Err("prompt cannot contain command substitution ($(...))"),
        Some('{') => {
            let close = chars
                .iter()
                .position(|&ch| ch == '}')
                .ok_or("unterminated ${...} expansion in prompt")?;
            let inner = &chars[2..close];
            if inner.contains(&'`') || inner.windows(2).any(|pair| pair == ['$', '(']) {
                return Err("prompt cannot contain command substitution inside ${...}");
            }
            Ok(Some(close + 1))
        }
        Some(ch) if ch.is_ascii_digit() || "@*#?$!-".contains(*ch) => Ok(Some(2)),
        Some(ch) if *ch == '_' || ch.is_ascii_alphabetic() => {
            let name_len = chars[1..]
                .iter()
                .take_while(|ch| **ch == '_' || ch.is_ascii_alphanumeric())
                .count();
            Ok(Some(1 + name_len))
        }
        _ => Ok(None),
    }
}
