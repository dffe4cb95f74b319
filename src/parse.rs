use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while_m_n},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{opt, recognize},
    sequence::pair,
    IResult,
};

use crate::error::SyntaxError;

/// Surface syntax tree: a leaf or a call with an operator head and
/// ordered arguments. Infix operators are calls too (`a + b` is
/// `Call { head: "+", args: [a, b] }`); which of them are formula
/// operators is decided by the rewriter.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Call { head: String, args: Vec<Expr> },
}

impl Expr {
    pub fn call<S: Into<String>>(head: S, args: Vec<Expr>) -> Expr {
        Expr::Call {
            head: head.into(),
            args,
        }
    }

    pub fn ident<S: Into<String>>(name: S) -> Expr {
        Expr::Ident(name.into())
    }

    /// The head of a call, `None` for leaves.
    pub fn head(&self) -> Option<&str> {
        match self {
            Expr::Call { head, .. } => Some(head),
            _ => None,
        }
    }

    pub fn is_call(&self, name: &str) -> bool {
        self.head() == Some(name)
    }

    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Call { args, .. } => args,
            _ => &[],
        }
    }

    /// Whether this node renders as an infix/prefix operator rather than
    /// as `f(args)`.
    pub fn is_operator(&self) -> bool {
        match self {
            Expr::Call { head, args } => {
                operator_precedence(head, args.len()).is_some()
            }
            _ => false,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Call { head, args } => operator_precedence(head, args.len()).unwrap_or(ATOM),
            Expr::Number(n) if *n < 0.0 => UNARY,
            _ => ATOM,
        }
    }
}

const TILDE: u8 = 1;
const SUM: u8 = 2;
const PRODUCT: u8 = 3;
const UNARY: u8 = 4;
const POWER: u8 = 5;
const ATOM: u8 = 6;

fn operator_precedence(head: &str, arity: usize) -> Option<u8> {
    match (head, arity) {
        ("~", 2) => Some(TILDE),
        ("+", n) if n >= 2 => Some(SUM),
        ("-", 2) => Some(SUM),
        ("*", n) | ("&", n) if n >= 2 => Some(PRODUCT),
        ("/", 2) => Some(PRODUCT),
        ("-", 1) => Some(UNARY),
        ("^", 2) => Some(POWER),
        _ => None,
    }
}

fn write_operand(f: &mut fmt::Formatter, e: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Call { head, args } => match operator_precedence(head, args.len()) {
                Some(UNARY) => {
                    write!(f, "-")?;
                    write_operand(f, &args[0], args[0].precedence() < UNARY)
                }
                Some(POWER) => {
                    write_operand(f, &args[0], args[0].precedence() <= POWER)?;
                    write!(f, " ^ ")?;
                    write_operand(f, &args[1], args[1].precedence() < UNARY)
                }
                Some(prec) => {
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, " {} ", head)?;
                        }
                        // left associative: later operands need parens on ties
                        let parens = if i == 0 {
                            arg.precedence() < prec
                        } else {
                            arg.precedence() <= prec
                        };
                        write_operand(f, arg, parens)?;
                    }
                    Ok(())
                }
                None => {
                    write!(f, "{}(", head)?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ")")
                }
            },
        }
    }
}

fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

fn w_number(input: &str) -> IResult<&str, Expr> {
    let (input, digits) = recognize(pair(digit1, opt(pair(char('.'), digit0))))(input)?;
    // digit1 guarantees a parseable prefix
    let n = digits.parse::<f64>().unwrap_or(f64::NAN);
    Ok((input, Expr::Number(n)))
}

fn w_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while_m_n(1, 1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

fn w_arguments(input: &str) -> IResult<&str, Vec<Expr>> {
    let (input, _) = ws(input)?;
    if let Ok((rest, _)) = char::<&str, (&str, nom::error::ErrorKind)>(')')(input) {
        return Ok((rest, Vec::new()));
    }
    let mut args = Vec::new();
    let mut input = input;
    loop {
        let (rest, arg) = w_tilde(input)?;
        args.push(arg);
        let (rest, _) = ws(rest)?;
        let (rest, sep) = alt((char(','), char(')')))(rest)?;
        input = rest;
        if sep == ')' {
            return Ok((input, args));
        }
    }
}

fn w_identifier_or_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = w_name(input)?;
    let (after_ws, _) = ws(input)?;
    match char::<&str, (&str, nom::error::ErrorKind)>('(')(after_ws) {
        Ok((rest, _)) => {
            let (rest, args) = w_arguments(rest)?;
            Ok((rest, Expr::call(name, args)))
        }
        Err(_) => Ok((input, Expr::ident(name))),
    }
}

fn w_parenthesized(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('(')(input)?;
    let (input, _) = ws(input)?;
    let (input, inner) = w_tilde(input)?;
    let (input, _) = ws(input)?;
    let (input, _) = char(')')(input)?;
    Ok((input, inner))
}

fn w_atom(input: &str) -> IResult<&str, Expr> {
    alt((w_number, w_identifier_or_call, w_parenthesized))(input)
}

fn w_power(input: &str) -> IResult<&str, Expr> {
    let (input, base) = w_atom(input)?;
    let (after_ws, _) = ws(input)?;
    match char::<&str, (&str, nom::error::ErrorKind)>('^')(after_ws) {
        Ok((rest, _)) => {
            let (rest, _) = ws(rest)?;
            let (rest, exponent) = w_unary(rest)?;
            Ok((rest, Expr::call("^", vec![base, exponent])))
        }
        Err(_) => Ok((input, base)),
    }
}

fn w_unary(input: &str) -> IResult<&str, Expr> {
    match char::<&str, (&str, nom::error::ErrorKind)>('-')(input) {
        Ok((rest, _)) => {
            let (rest, _) = ws(rest)?;
            let (rest, operand) = w_unary(rest)?;
            Ok((
                rest,
                match operand {
                    Expr::Number(n) => Expr::Number(-n),
                    other => Expr::call("-", vec![other]),
                },
            ))
        }
        Err(_) => w_power(input),
    }
}

/// Parses `first (op next)*` left associatively, with `op` drawn from
/// `operators`.
fn w_binary<'a>(
    input: &'a str,
    operators: &'static [&'static str],
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
) -> IResult<&'a str, Expr> {
    let (mut input, mut left) = operand(input)?;
    loop {
        let (rest, _) = ws(input)?;
        let op = operators.iter().find(|op| rest.starts_with(**op));
        let op = match op {
            Some(op) => *op,
            None => return Ok((input, left)),
        };
        let (rest, _) = tag(op)(rest)?;
        let (rest, _) = ws(rest)?;
        let (rest, right) = operand(rest)?;
        left = Expr::call(op, vec![left, right]);
        input = rest;
    }
}

fn w_product(input: &str) -> IResult<&str, Expr> {
    w_binary(input, &["*", "&", "/"], w_unary)
}

fn w_sum(input: &str) -> IResult<&str, Expr> {
    w_binary(input, &["+", "-"], w_product)
}

fn w_tilde(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = w_sum(input)?;
    let (after_ws, _) = ws(input)?;
    match char::<&str, (&str, nom::error::ErrorKind)>('~')(after_ws) {
        Ok((rest, _)) => {
            let (rest, _) = ws(rest)?;
            let (rest, rhs) = w_sum(rest)?;
            Ok((rest, Expr::call("~", vec![lhs, rhs])))
        }
        Err(_) => Ok((input, lhs)),
    }
}

/// Parse a formula string into its surface syntax tree. The whole input
/// must be consumed. The result still has to go through
/// [`rewrite`](crate::rewrite::rewrite) before terms can be built from it.
pub fn parse(input: &str) -> Result<Expr, SyntaxError> {
    let (rest, _) = ws(input).map_err(|_| SyntaxError::Parse(input.to_string()))?;
    match w_tilde(rest) {
        Ok((rest, expr)) => {
            let rest = rest.trim();
            if rest.is_empty() {
                Ok(expr)
            } else {
                Err(SyntaxError::TrailingInput(rest.to_string()))
            }
        }
        Err(nom::Err::Error((at, _))) | Err(nom::Err::Failure((at, _))) => {
            Err(SyntaxError::Parse(at.to_string()))
        }
        Err(nom::Err::Incomplete(_)) => Err(SyntaxError::Parse(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Expr {
        Expr::ident(name)
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse("quantity").unwrap(), id("quantity"));
        assert_eq!(parse("  x_1.b ").unwrap(), id("x_1.b"));
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse("1").unwrap(), Expr::Number(1.0));
        assert_eq!(parse("-1").unwrap(), Expr::Number(-1.0));
        assert_eq!(parse("0.25").unwrap(), Expr::Number(0.25));
    }

    #[test]
    fn test_parse_precedence() {
        let e = parse("y ~ 1 + a * b & c").unwrap();
        let expected = Expr::call(
            "~",
            vec![
                id("y"),
                Expr::call(
                    "+",
                    vec![
                        Expr::Number(1.0),
                        Expr::call("&", vec![Expr::call("*", vec![id("a"), id("b")]), id("c")]),
                    ],
                ),
            ],
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_parse_subtraction_and_negation() {
        assert_eq!(
            parse("x - 1").unwrap(),
            Expr::call("-", vec![id("x"), Expr::Number(1.0)])
        );
        assert_eq!(parse("-x").unwrap(), Expr::call("-", vec![id("x")]));
    }

    #[test]
    fn test_parse_calls() {
        assert_eq!(
            parse("log(x + 1)").unwrap(),
            Expr::call("log", vec![Expr::call("+", vec![id("x"), Expr::Number(1.0)])])
        );
        assert_eq!(
            parse("poly(x, 3)").unwrap(),
            Expr::call("poly", vec![id("x"), Expr::Number(3.0)])
        );
        assert_eq!(parse("f()").unwrap(), Expr::call("f", vec![]));
    }

    #[test]
    fn test_parse_power_is_right_associative() {
        assert_eq!(
            parse("x ^ 2 ^ 3").unwrap(),
            Expr::call(
                "^",
                vec![id("x"), Expr::call("^", vec![Expr::Number(2.0), Expr::Number(3.0)])]
            )
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("y ~ a ~ b"), Err(SyntaxError::TrailingInput(_))));
        assert!(matches!(parse("y ~ (a + b"), Err(SyntaxError::Parse(_))));
        assert!(matches!(parse("y ~ a +"), Err(SyntaxError::Parse(_))));
        assert!(parse("").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for src in &[
            "y ~ 1 + a + a & b",
            "y ~ (a + b) & c",
            "log(x + 1) * z",
            "y ~ x - 1",
            "-(a + b)",
            "x / (y * z)",
            "(x ^ 2) ^ 3",
            "protect(a + unprotect(b & c))",
        ] {
            let e = parse(src).unwrap();
            assert_eq!(parse(&e.to_string()).unwrap(), e, "{}", src);
        }
    }
}
