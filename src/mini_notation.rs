//! Mini-notation parser
//!
//! Parses the rhythmic string language inside `s("...")` calls: sequences,
//! rests, subsequences, alternation, stacking, and the `*` `/` `!` `?` `@`
//! operators, plus Euclidean `(pulses,steps,rotation)` rhythms.
//!
//! Unlike a REPL that can shrug at garbage, the editor needs positions, so
//! parsing returns a structured error with the byte offset of the problem.

use crate::pattern::Pattern;

/// Parse failure inside a mini-notation string. `position` is a character
/// offset into the notation source (not the whole program).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MiniError {
    pub position: usize,
    pub message: String,
}

impl MiniError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Symbol(String),
    Number(f64),
    Rest,         // ~
    OpenBracket,  // [
    CloseBracket, // ]
    OpenAngle,    // <
    CloseAngle,   // >
    OpenParen,    // (
    CloseParen,   // )
    Comma,
    Star,
    Slash,
    Question,
    Bang,
    At,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, MiniError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let pos = i;
        let simple = match ch {
            '~' => Some(Token::Rest),
            '[' => Some(Token::OpenBracket),
            ']' => Some(Token::CloseBracket),
            '<' => Some(Token::OpenAngle),
            '>' => Some(Token::CloseAngle),
            '(' => Some(Token::OpenParen),
            ')' => Some(Token::CloseParen),
            ',' => Some(Token::Comma),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '?' => Some(Token::Question),
            '!' => Some(Token::Bang),
            '@' => Some(Token::At),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(Spanned { token, pos });
            i += 1;
            continue;
        }
        if ch.is_whitespace() {
            i += 1;
        } else if ch.is_ascii_digit()
            || (ch == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let mut text = String::new();
            if ch == '-' {
                text.push('-');
                i += 1;
            }
            let mut has_dot = false;
            while i < chars.len() {
                let d = chars[i];
                if d.is_ascii_digit() || (d == '.' && !has_dot) {
                    has_dot |= d == '.';
                    text.push(d);
                    i += 1;
                } else {
                    break;
                }
            }
            let n: f64 = text
                .parse()
                .map_err(|_| MiniError::new(pos, format!("bad number `{text}`")))?;
            tokens.push(Spanned { token: Token::Number(n), pos });
        } else if ch.is_alphabetic() || ch == '_' {
            let mut name = String::new();
            while i < chars.len() {
                let d = chars[i];
                if d.is_alphanumeric() || d == '_' || d == '-' {
                    name.push(d);
                    i += 1;
                } else {
                    break;
                }
            }
            // `bd:2` selects the third sample of the bd set; keep the index
            // glued to the name and let the control layer split it.
            if chars.get(i) == Some(&':') {
                name.push(':');
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    name.push(chars[i]);
                    i += 1;
                }
            }
            tokens.push(Spanned { token: Token::Symbol(name), pos });
        } else {
            return Err(MiniError::new(pos, format!("unexpected character `{ch}`")));
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Node {
    Atom(String),
    Rest,
    Seq(Vec<Node>),
    Stack(Vec<Node>),
    Alternate(Vec<Node>),
    Euclid {
        name: String,
        pulses: usize,
        steps: usize,
        rotation: i32,
    },
    Fast(Box<Node>, f64),
    Slow(Box<Node>, f64),
    Degrade(Box<Node>, f64),
    Late(Box<Node>, f64),
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    input_len: usize,
}

impl Parser {
    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|s| s.pos)
            .unwrap_or(self.input_len)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), MiniError> {
        if self.current() == Some(&token) {
            self.advance();
            Ok(())
        } else {
            Err(MiniError::new(self.pos(), format!("expected {what}")))
        }
    }

    /// Top level: comma-separated sequences form a stack.
    fn parse_pattern(&mut self, closer: Option<&Token>) -> Result<Node, MiniError> {
        let mut layers = vec![self.parse_sequence(closer)?];
        while self.current() == Some(&Token::Comma) {
            self.advance();
            layers.push(self.parse_sequence(closer)?);
        }
        Ok(if layers.len() == 1 {
            layers.pop().unwrap()
        } else {
            Node::Stack(layers)
        })
    }

    fn parse_sequence(&mut self, closer: Option<&Token>) -> Result<Node, MiniError> {
        let mut children = Vec::new();
        loop {
            match self.current() {
                None => break,
                Some(Token::Comma) => break,
                Some(t) if Some(t) == closer => break,
                Some(Token::CloseBracket) | Some(Token::CloseAngle) | Some(Token::CloseParen) => {
                    return Err(MiniError::new(self.pos(), "unbalanced closing bracket"));
                }
                _ => {
                    let (node, repeat) = self.parse_element()?;
                    for _ in 0..repeat {
                        children.push(node.clone());
                    }
                }
            }
        }
        Ok(match children.len() {
            0 => Node::Rest,
            1 => children.pop().unwrap(),
            _ => Node::Seq(children),
        })
    }

    /// One step of a sequence plus its postfix operators. Returns the node
    /// and how many sequence slots it occupies (`!n` replication).
    fn parse_element(&mut self) -> Result<(Node, usize), MiniError> {
        let mut node = match self.current() {
            Some(Token::Symbol(s)) => {
                let name = s.clone();
                self.advance();
                if self.current() == Some(&Token::OpenParen) {
                    self.parse_euclid(name)?
                } else {
                    Node::Atom(name)
                }
            }
            Some(Token::Number(n)) => {
                let text = if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                };
                self.advance();
                Node::Atom(text)
            }
            Some(Token::Rest) => {
                self.advance();
                Node::Rest
            }
            Some(Token::OpenBracket) => {
                self.advance();
                let inner = self.parse_pattern(Some(&Token::CloseBracket))?;
                self.expect(Token::CloseBracket, "`]`")?;
                inner
            }
            Some(Token::OpenAngle) => {
                self.advance();
                let mut options = Vec::new();
                while self.current().is_some() && self.current() != Some(&Token::CloseAngle) {
                    let (child, repeat) = self.parse_element()?;
                    for _ in 0..repeat {
                        options.push(child.clone());
                    }
                }
                self.expect(Token::CloseAngle, "`>`")?;
                Node::Alternate(options)
            }
            _ => {
                return Err(MiniError::new(self.pos(), "expected a step"));
            }
        };

        let mut repeat = 1;
        loop {
            match self.current() {
                Some(Token::Star) => {
                    self.advance();
                    let n = self.parse_number("`*` needs a factor")?;
                    node = Node::Fast(Box::new(node), n);
                }
                Some(Token::Slash) => {
                    self.advance();
                    let n = self.parse_number("`/` needs a factor")?;
                    node = Node::Slow(Box::new(node), n);
                }
                Some(Token::Bang) => {
                    self.advance();
                    repeat = self.parse_number("`!` needs a count")? as usize;
                }
                Some(Token::Question) => {
                    self.advance();
                    let amount = if let Some(Token::Number(n)) = self.current() {
                        let n = *n;
                        self.advance();
                        n
                    } else {
                        0.5
                    };
                    node = Node::Degrade(Box::new(node), amount);
                }
                Some(Token::At) => {
                    self.advance();
                    let n = self.parse_number("`@` needs an offset")?;
                    node = Node::Late(Box::new(node), n);
                }
                _ => break,
            }
        }
        Ok((node, repeat))
    }

    fn parse_number(&mut self, what: &str) -> Result<f64, MiniError> {
        if let Some(Token::Number(n)) = self.current() {
            let n = *n;
            self.advance();
            Ok(n)
        } else {
            Err(MiniError::new(self.pos(), what))
        }
    }

    fn parse_euclid(&mut self, name: String) -> Result<Node, MiniError> {
        self.expect(Token::OpenParen, "`(`")?;
        let pulses = self.parse_number("euclid pulses")? as usize;
        self.expect(Token::Comma, "`,` between pulses and steps")?;
        let steps = self.parse_number("euclid steps")? as usize;
        let rotation = if self.current() == Some(&Token::Comma) {
            self.advance();
            self.parse_number("euclid rotation")? as i32
        } else {
            0
        };
        self.expect(Token::CloseParen, "`)`")?;
        Ok(Node::Euclid {
            name,
            pulses,
            steps,
            rotation,
        })
    }
}

fn compile(node: Node) -> Pattern<String> {
    match node {
        Node::Atom(s) => Pattern::pure(s),
        Node::Rest => Pattern::silence(),
        Node::Seq(children) => Pattern::fastcat(children.into_iter().map(compile).collect()),
        Node::Stack(layers) => Pattern::stack(layers.into_iter().map(compile).collect()),
        Node::Alternate(options) => Pattern::slowcat(options.into_iter().map(compile).collect()),
        Node::Euclid {
            name,
            pulses,
            steps,
            rotation,
        } => Pattern::euclid(name, pulses, steps, rotation),
        Node::Fast(inner, n) => compile(*inner).fast(n),
        Node::Slow(inner, n) => compile(*inner).slow(n),
        Node::Degrade(inner, p) => compile(*inner).degrade_by(p),
        Node::Late(inner, n) => compile(*inner).late(n),
    }
}

/// Parse a mini-notation string into an event pattern.
pub fn parse_mini_notation(input: &str) -> Result<Pattern<String>, MiniError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        input_len: input.len(),
    };
    let node = parser.parse_pattern(None)?;
    if parser.current().is_some() {
        return Err(MiniError::new(parser.pos(), "trailing input"));
    }
    Ok(compile(node))
}
