//! Tokenizer and parser for the nested block configuration syntax.
//!
//! The grammar is line-oriented: a directive is a name followed by
//! whitespace-separated arguments, optionally opening a `{ ... }` block of
//! child directives. Directives end at a newline, a `;`, or the closing
//! brace of their block. Arguments may be double-quoted; `#` starts a
//! comment running to the end of the line.

use thiserror::Error;

/// A parsed directive: `name arg... { children }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub children: Vec<Directive>,
    /// Line the directive starts on, for error reporting.
    pub line: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    OpenBrace,
    CloseBrace,
    /// Newline or `;`.
    End,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                tokens.push((Token::End, line));
                line += 1;
            }
            ';' => tokens.push((Token::End, line)),
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        tokens.push((Token::End, line));
                        line += 1;
                        break;
                    }
                }
            }
            '{' => tokens.push((Token::OpenBrace, line)),
            '}' => tokens.push((Token::CloseBrace, line)),
            '"' => {
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(SyntaxError::new(line, "unterminated quoted string"))
                        }
                        Some(c) => word.push(c),
                    }
                }
                tokens.push((Token::Word(word), line));
            }
            c if c.is_whitespace() => {}
            c => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '{' | '}' | ';' | '#' | '"') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push((Token::Word(word), line));
            }
        }
    }

    Ok(tokens)
}

/// Parse a configuration source into its top-level directives.
pub fn parse(input: &str) -> Result<Vec<Directive>, SyntaxError> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let directives = parse_block(&tokens, &mut pos, false)?;
    if pos < tokens.len() {
        let (_, line) = tokens[pos];
        return Err(SyntaxError::new(line, "unexpected '}'"));
    }
    Ok(directives)
}

fn parse_block(
    tokens: &[(Token, usize)],
    pos: &mut usize,
    nested: bool,
) -> Result<Vec<Directive>, SyntaxError> {
    let mut directives = Vec::new();

    while *pos < tokens.len() {
        match &tokens[*pos] {
            (Token::End, _) => {
                *pos += 1;
            }
            (Token::CloseBrace, _) => {
                if nested {
                    *pos += 1;
                    return Ok(directives);
                }
                // Leave the stray brace for the caller to report.
                return Ok(directives);
            }
            (Token::OpenBrace, line) => {
                return Err(SyntaxError::new(*line, "expected directive, found '{'"));
            }
            (Token::Word(name), line) => {
                let line = *line;
                let name = name.clone();
                *pos += 1;
                directives.push(parse_directive(tokens, pos, name, line)?);
            }
        }
    }

    if nested {
        let line = tokens.last().map(|(_, l)| *l).unwrap_or(1);
        return Err(SyntaxError::new(line, "unclosed '{'"));
    }
    Ok(directives)
}

fn parse_directive(
    tokens: &[(Token, usize)],
    pos: &mut usize,
    name: String,
    line: usize,
) -> Result<Directive, SyntaxError> {
    let mut args = Vec::new();
    let mut children = Vec::new();

    while *pos < tokens.len() {
        match &tokens[*pos] {
            (Token::Word(arg), _) => {
                args.push(arg.clone());
                *pos += 1;
            }
            (Token::OpenBrace, _) => {
                *pos += 1;
                children = parse_block(tokens, pos, true)?;
                break;
            }
            (Token::End, _) => {
                *pos += 1;
                break;
            }
            (Token::CloseBrace, _) => break,
        }
    }

    Ok(Directive {
        name,
        args,
        children,
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_directive() {
        let directives = parse("backend 127.0.0.1:9000\n").unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].name, "backend");
        assert_eq!(directives[0].args, vec!["127.0.0.1:9000"]);
        assert!(directives[0].children.is_empty());
    }

    #[test]
    fn parses_nested_blocks() {
        let input = r#"
example.com,www.example.com {
    backend "127.0.0.1:9000" {
        send-proxy
    }
    deny 10.0.0.0/8
}
"#;
        let directives = parse(input).unwrap();
        assert_eq!(directives.len(), 1);

        let route = &directives[0];
        assert_eq!(route.name, "example.com,www.example.com");
        assert_eq!(route.children.len(), 2);

        let backend = &route.children[0];
        assert_eq!(backend.name, "backend");
        assert_eq!(backend.args, vec!["127.0.0.1:9000"]);
        assert_eq!(backend.children.len(), 1);
        assert_eq!(backend.children[0].name, "send-proxy");

        assert_eq!(route.children[1].name, "deny");
        assert_eq!(route.children[1].args, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn semicolons_terminate_directives() {
        let directives = parse("a.com { backend x:1; deny 10.0.0.0/8 }").unwrap();
        assert_eq!(directives[0].children.len(), 2);
    }

    #[test]
    fn comments_are_skipped() {
        let input = "# leading comment\nexample.com { backend x:1 } # trailing\n";
        let directives = parse(input).unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].children.len(), 1);
    }

    #[test]
    fn quoted_args_keep_special_characters() {
        let directives = parse("route { backend \"host with space:1\" }").unwrap();
        assert_eq!(directives[0].children[0].args, vec!["host with space:1"]);
    }

    #[test]
    fn unclosed_block_is_an_error() {
        let err = parse("example.com {\n  backend x:1\n").unwrap_err();
        assert!(err.message.contains("unclosed"));
    }

    #[test]
    fn stray_close_brace_is_an_error() {
        let err = parse("example.com { backend x:1 }\n}\n").unwrap_err();
        assert!(err.message.contains("unexpected"));
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = parse("route { backend \"x:1 }\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated"));
    }
}
