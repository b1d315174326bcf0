//! Pattern source transpiler
//!
//! Compiles the textual source of a pattern block into an executable
//! [`CompiledPattern`]. The surface language is a single expression:
//!
//! ```text
//! s("bd hh sn hh").fast(2).gain(0.8)
//! stack(s("bd(3,8)"), s("hh*8").pan(0.3))
//! ```
//!
//! Compilation is synchronous and pure; it is re-run from scratch on every
//! evaluate, never cached across edits. Failures come back as a
//! [`CompileError`] carrying the line/column the editor should point at.

use crate::mini_notation::parse_mini_notation;
use crate::pattern::Pattern;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace1, not_line_ending},
    combinator::{map, opt, recognize},
    multi::{many0, separated_list0},
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult, Offset,
};
use std::collections::BTreeSet;

/// One schedulable event: which sample set to hit and how to play it.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEvent {
    pub sound: String,
    /// Index into the sample set (`bd:2` selects the third `bd` sample).
    pub index: usize,
    pub gain: f32,
    pub pan: f32,
    pub speed: f32,
}

impl ControlEvent {
    fn from_symbol(symbol: &str) -> Self {
        let (sound, index) = match symbol.split_once(':') {
            Some((name, idx)) => (name.to_string(), idx.parse().unwrap_or(0)),
            None => (symbol.to_string(), 0),
        };
        Self {
            sound,
            index,
            gain: 1.0,
            pan: 0.0,
            speed: 1.0,
        }
    }
}

/// The executable result of a transpile. Ephemeral: rebuilt on every
/// evaluate, never persisted.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub events: Pattern<ControlEvent>,
}

/// Structured compilation failure, positioned for inline display next to
/// the editor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("compile error at line {line}:{column}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub hint: Option<String>,
    pub source_line: Option<String>,
}

impl CompileError {
    /// Build an error pointing at a byte offset of `source`.
    fn at_offset(source: &str, offset: usize, message: String, hint: Option<String>) -> Self {
        let offset = offset.min(source.len());
        let mut line = 1;
        let mut line_start = 0;
        for (i, ch) in source.char_indices() {
            if i >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                line_start = i + 1;
            }
        }
        let column = offset - line_start + 1;
        let source_line = source.lines().nth(line - 1).map(|l| l.to_string());
        Self {
            line,
            column,
            message,
            hint,
            source_line,
        }
    }
}

/// The loaded pattern-language runtime: which functions and methods the
/// current module set provides. Populated once during bootstrap and shared
/// by every REPL instance.
#[derive(Debug, Clone)]
pub struct Runtime {
    functions: BTreeSet<String>,
    methods: BTreeSet<String>,
}

impl Runtime {
    /// Empty runtime; individual modules are registered on top.
    pub fn new() -> Self {
        Self {
            functions: BTreeSet::new(),
            methods: BTreeSet::new(),
        }
    }

    /// Register the built-in module set.
    pub fn with_default_modules() -> Self {
        let mut rt = Self::new();
        rt.register_functions(&["s", "sound", "stack", "silence"]);
        rt.register_methods(&["fast", "slow", "rev", "late", "degrade"]);
        rt.register_methods(&["gain", "pan", "speed"]);
        rt
    }

    pub fn register_functions(&mut self, names: &[&str]) {
        self.functions.extend(names.iter().map(|s| s.to_string()));
    }

    pub fn register_methods(&mut self, names: &[&str]) {
        self.methods.extend(names.iter().map(|s| s.to_string()));
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    fn function_hint(&self) -> String {
        format!(
            "available functions: {}",
            self.functions.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    }

    fn method_hint(&self) -> String {
        format!(
            "available methods: {}",
            self.methods.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::with_default_modules()
    }
}

// ============================================================================
// Grammar
// ============================================================================

#[derive(Debug, Clone)]
enum Ast<'a> {
    /// Bare identifier, e.g. `silence`.
    Word(&'a str),
    Call {
        name: &'a str,
        args: Vec<Arg<'a>>,
    },
    Method {
        target: Box<Ast<'a>>,
        name: &'a str,
        args: Vec<Arg<'a>>,
    },
}

#[derive(Debug, Clone)]
enum Arg<'a> {
    Str(&'a str),
    Num(f64),
    Expr(Ast<'a>),
}

fn ws(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((
        multispace1,
        recognize(preceded(tag("//"), not_line_ending)),
    ))))(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)
}

fn parse_arg(input: &str) -> IResult<&str, Arg> {
    preceded(
        ws,
        alt((
            map(string_literal, Arg::Str),
            map(double, Arg::Num),
            map(parse_expr, Arg::Expr),
        )),
    )(input)
}

fn paren_args(input: &str) -> IResult<&str, Vec<Arg>> {
    delimited(
        preceded(ws, char('(')),
        separated_list0(preceded(ws, char(',')), parse_arg),
        preceded(ws, char(')')),
    )(input)
}

fn parse_primary(input: &str) -> IResult<&str, Ast> {
    let (rest, name) = preceded(ws, ident)(input)?;
    match opt(paren_args)(rest)? {
        (rest, Some(args)) => Ok((rest, Ast::Call { name, args })),
        (rest, None) => Ok((rest, Ast::Word(name))),
    }
}

fn parse_expr(input: &str) -> IResult<&str, Ast> {
    let (mut rest, mut node) = parse_primary(input)?;
    loop {
        let chained: IResult<&str, (&str, Option<Vec<Arg>>)> = preceded(
            preceded(ws, char('.')),
            pair(ident, opt(paren_args)),
        )(rest);
        match chained {
            Ok((next, (name, args))) => {
                node = Ast::Method {
                    target: Box::new(node),
                    name,
                    args: args.unwrap_or_default(),
                };
                rest = next;
            }
            Err(_) => break,
        }
    }
    Ok((rest, node))
}

// ============================================================================
// Diagnosis and evaluation
// ============================================================================

/// Turn leftover input into an actionable error, looking for the usual
/// live-coding typos first.
fn diagnose(source: &str, remaining: &str) -> CompileError {
    let offset = source.offset(remaining);
    let trimmed = remaining.trim_start();
    let trimmed_offset = offset + (remaining.len() - trimmed.len());

    if source.matches('"').count() % 2 == 1 {
        let quote = source.rfind('"').unwrap_or(trimmed_offset);
        return CompileError::at_offset(
            source,
            quote,
            "unterminated string literal".to_string(),
            Some("add a closing `\"`".to_string()),
        );
    }
    if trimmed.is_empty() {
        return CompileError::at_offset(
            source,
            source.len(),
            "unexpected end of input".to_string(),
            Some("the expression looks unfinished".to_string()),
        );
    }
    CompileError::at_offset(
        source,
        trimmed_offset,
        format!("could not parse `{}`", trimmed.chars().take(24).collect::<String>()),
        None,
    )
}

fn offset_of(source: &str, slice: &str) -> usize {
    source.offset(slice)
}

fn expect_num(
    args: &[Arg],
    idx: usize,
    source: &str,
    name_slice: &str,
    what: &str,
) -> Result<f64, CompileError> {
    match args.get(idx) {
        Some(Arg::Num(n)) => Ok(*n),
        _ => Err(CompileError::at_offset(
            source,
            offset_of(source, name_slice),
            format!("`{name_slice}` expects {what}"),
            None,
        )),
    }
}

fn eval(ast: &Ast, source: &str, runtime: &Runtime) -> Result<Pattern<ControlEvent>, CompileError> {
    match ast {
        Ast::Word(name) => {
            if *name == "silence" && runtime.has_function("silence") {
                Ok(Pattern::silence())
            } else {
                Err(CompileError::at_offset(
                    source,
                    offset_of(source, name),
                    format!("unknown name `{name}`"),
                    Some(runtime.function_hint()),
                ))
            }
        }
        Ast::Call { name, args } => {
            if !runtime.has_function(name) {
                return Err(CompileError::at_offset(
                    source,
                    offset_of(source, name),
                    format!("unknown function `{name}`"),
                    Some(runtime.function_hint()),
                ));
            }
            match *name {
                "s" | "sound" => {
                    let notation = match args.as_slice() {
                        [Arg::Str(s)] => *s,
                        _ => {
                            return Err(CompileError::at_offset(
                                source,
                                offset_of(source, name),
                                format!("`{name}` expects one pattern string"),
                                Some(format!("try {name}(\"bd hh\")")),
                            ))
                        }
                    };
                    let pattern = parse_mini_notation(notation).map_err(|e| {
                        CompileError::at_offset(
                            source,
                            offset_of(source, notation) + e.position,
                            format!("bad mini-notation: {}", e.message),
                            None,
                        )
                    })?;
                    Ok(pattern.fmap(|sym| ControlEvent::from_symbol(&sym)))
                }
                "stack" => {
                    let mut layers = Vec::new();
                    for arg in args {
                        match arg {
                            Arg::Expr(inner) => layers.push(eval(inner, source, runtime)?),
                            _ => {
                                return Err(CompileError::at_offset(
                                    source,
                                    offset_of(source, name),
                                    "`stack` expects pattern expressions".to_string(),
                                    Some("try stack(s(\"bd\"), s(\"hh*4\"))".to_string()),
                                ))
                            }
                        }
                    }
                    Ok(Pattern::stack(layers))
                }
                "silence" => Ok(Pattern::silence()),
                _ => unreachable!("registered function without an implementation"),
            }
        }
        Ast::Method { target, name, args } => {
            let pattern = eval(target, source, runtime)?;
            if !runtime.has_method(name) {
                return Err(CompileError::at_offset(
                    source,
                    offset_of(source, name),
                    format!("unknown method `.{name}`"),
                    Some(runtime.method_hint()),
                ));
            }
            match *name {
                "fast" => Ok(pattern.fast(expect_num(args, 0, source, name, "a factor")?)),
                "slow" => Ok(pattern.slow(expect_num(args, 0, source, name, "a factor")?)),
                "late" => Ok(pattern.late(expect_num(args, 0, source, name, "a cycle offset")?)),
                "rev" => Ok(pattern.rev()),
                "degrade" => match args.first() {
                    None => Ok(pattern.degrade()),
                    Some(Arg::Num(p)) => Ok(pattern.degrade_by(*p)),
                    Some(_) => Err(CompileError::at_offset(
                        source,
                        offset_of(source, name),
                        "`degrade` expects an optional probability".to_string(),
                        None,
                    )),
                },
                "gain" => {
                    let v = expect_num(args, 0, source, name, "a level")? as f32;
                    Ok(pattern.fmap(move |mut e: ControlEvent| {
                        e.gain = v;
                        e
                    }))
                }
                "pan" => {
                    let v = expect_num(args, 0, source, name, "a position (-1..1)")? as f32;
                    Ok(pattern.fmap(move |mut e: ControlEvent| {
                        e.pan = v;
                        e
                    }))
                }
                "speed" => {
                    let v = expect_num(args, 0, source, name, "a playback rate")? as f32;
                    Ok(pattern.fmap(move |mut e: ControlEvent| {
                        e.speed = v;
                        e
                    }))
                }
                _ => unreachable!("registered method without an implementation"),
            }
        }
    }
}

/// Compile pattern source against the loaded runtime. Synchronous; called on
/// every toggle-start and evaluate.
pub fn transpile(source: &str, runtime: &Runtime) -> Result<CompiledPattern, CompileError> {
    let (rest, ast) = match parse_expr(source) {
        Ok(ok) => ok,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(diagnose(source, e.input));
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(diagnose(source, &source[source.len()..]));
        }
    };
    let (rest, _) = ws(rest).unwrap_or((rest, ""));
    if !rest.is_empty() {
        return Err(diagnose(source, rest));
    }
    let events = eval(&ast, source, runtime)?;
    Ok(CompiledPattern {
        source: source.to_string(),
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt() -> Runtime {
        Runtime::with_default_modules()
    }

    #[test]
    fn compiles_a_simple_pattern() {
        let compiled = transpile(r#"s("bd hh")"#, &rt()).unwrap();
        let haps = compiled.events.onsets_in(0.0, 1.0);
        assert_eq!(haps.len(), 2);
        assert_eq!(haps[0].value.sound, "bd");
        assert_eq!(haps[1].value.sound, "hh");
    }

    #[test]
    fn unterminated_string_is_a_compile_error() {
        let err = transpile(r#"s("bd hh"#, &rt()).unwrap_err();
        assert!(err.message.contains("unterminated"), "got: {}", err.message);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn mini_notation_errors_carry_program_position() {
        let err = transpile(r#"s("bd [hh")"#, &rt()).unwrap_err();
        assert!(err.message.contains("mini-notation"), "got: {}", err.message);
        assert_eq!(err.line, 1);
        assert!(err.column > 3);
    }

    #[test]
    fn unknown_function_names_are_rejected() {
        let err = transpile(r#"boom("bd")"#, &rt()).unwrap_err();
        assert!(err.message.contains("unknown function"));
        assert!(err.hint.as_deref().unwrap_or("").contains("sound"));
    }

    #[test]
    fn unknown_method_names_are_rejected() {
        let err = transpile(r#"s("bd").explode()"#, &rt()).unwrap_err();
        assert!(err.message.contains("unknown method"));
    }

    #[test]
    fn method_chain_applies_controls() {
        let compiled = transpile(r#"s("bd").gain(0.5).pan(-1).speed(2)"#, &rt()).unwrap();
        let haps = compiled.events.onsets_in(0.0, 1.0);
        assert_eq!(haps.len(), 1);
        let ev = &haps[0].value;
        assert!((ev.gain - 0.5).abs() < 1e-6);
        assert!((ev.pan + 1.0).abs() < 1e-6);
        assert!((ev.speed - 2.0).abs() < 1e-6);
    }

    #[test]
    fn fast_multiplies_event_count() {
        let compiled = transpile(r#"s("bd hh").fast(2)"#, &rt()).unwrap();
        assert_eq!(compiled.events.onsets_in(0.0, 1.0).len(), 4);
    }

    #[test]
    fn stack_layers_patterns() {
        let compiled = transpile(r#"stack(s("bd"), s("hh hh hh"))"#, &rt()).unwrap();
        assert_eq!(compiled.events.onsets_in(0.0, 1.0).len(), 4);
    }

    #[test]
    fn silence_compiles_to_nothing() {
        let compiled = transpile("silence", &rt()).unwrap();
        assert!(compiled.events.onsets_in(0.0, 4.0).is_empty());
    }

    #[test]
    fn comments_and_whitespace_are_ignored() {
        let src = "// four on the floor\n  s(\"bd*4\") // thump\n";
        let compiled = transpile(src, &rt()).unwrap();
        assert_eq!(compiled.events.onsets_in(0.0, 1.0).len(), 4);
    }

    #[test]
    fn sample_index_is_split_from_the_sound() {
        let compiled = transpile(r#"s("bd:2")"#, &rt()).unwrap();
        let haps = compiled.events.onsets_in(0.0, 1.0);
        assert_eq!(haps[0].value.sound, "bd");
        assert_eq!(haps[0].value.index, 2);
    }

    #[test]
    fn error_reports_multiline_position() {
        let src = "stack(\n  s(\"bd\"),\n  nope(\"hh\")\n)";
        let err = transpile(src, &rt()).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.source_line.as_deref(), Some("  nope(\"hh\")"));
    }
}
