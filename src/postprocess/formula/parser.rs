//! Formula expression parser
//!
//! # Grammar
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := power (("*" | "/" | "%") power)*
//! power   := unary ("**" power)?
//! unary   := "-" unary | primary
//! primary := number | "(" expr ")" | call | variable
//! call    := function "(" [expr ("," expr)*] ")"
//! variable:= ident ("." (ident | digits))?
//! ```
//!
//! `**` is right associative and binds tighter than unary minus on its
//! left operand, so `-2 ** 2` is `-(2 ** 2)`.

use crate::query::error::QueryError;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{map_res, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

// ============================================================================
// AST
// ============================================================================

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
}

/// Built-in math function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunction {
    /// e^x
    Exp,
    /// Natural logarithm
    Log,
    /// Natural logarithm
    Ln,
    /// 2^x
    Exp2,
    /// Base-2 logarithm
    Log2,
    /// 10^x, exponent truncated to an integer
    Exp10,
    /// Base-10 logarithm
    Log10,
    /// Square root
    Sqrt,
    /// Cube root
    Cbrt,
    /// Error function
    Erf,
    /// Complementary error function
    Erfc,
    /// Log of the absolute gamma function
    Lgamma,
    /// Gamma function
    Tgamma,
    /// Sine
    Sin,
    /// Cosine
    Cos,
    /// Tangent
    Tan,
    /// Arc sine
    Asin,
    /// Arc cosine
    Acos,
    /// Arc tangent
    Atan,
    /// Radians to degrees
    Degrees,
    /// Degrees to radians
    Radians,
    /// Current unix time in seconds
    Now,
}

impl MathFunction {
    /// Look up a function by name
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "exp" => MathFunction::Exp,
            "log" => MathFunction::Log,
            "ln" => MathFunction::Ln,
            "exp2" => MathFunction::Exp2,
            "log2" => MathFunction::Log2,
            "exp10" => MathFunction::Exp10,
            "log10" => MathFunction::Log10,
            "sqrt" => MathFunction::Sqrt,
            "cbrt" => MathFunction::Cbrt,
            "erf" => MathFunction::Erf,
            "erfc" => MathFunction::Erfc,
            "lgamma" => MathFunction::Lgamma,
            "tgamma" => MathFunction::Tgamma,
            "sin" => MathFunction::Sin,
            "cos" => MathFunction::Cos,
            "tan" => MathFunction::Tan,
            "asin" => MathFunction::Asin,
            "acos" => MathFunction::Acos,
            "atan" => MathFunction::Atan,
            "degrees" => MathFunction::Degrees,
            "radians" => MathFunction::Radians,
            "now" => MathFunction::Now,
            _ => return None,
        };
        Some(f)
    }

    /// Number of arguments the function takes
    pub fn arity(&self) -> usize {
        match self {
            MathFunction::Now => 0,
            _ => 1,
        }
    }
}

/// Parsed formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// Query reference (`A`, `A.0`, `A.alias`)
    Variable(String),
    /// Unary minus
    Neg(Box<Expr>),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Function call
    Call {
        /// Function
        func: MathFunction,
        /// Arguments
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Distinct variables in order of first appearance
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_variables(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parse a formula expression
pub fn parse_expression(input: &str) -> Result<Expr, QueryError> {
    match parse_expr(input.trim()) {
        Ok((remaining, expr)) => {
            if remaining.trim().is_empty() {
                Ok(expr)
            } else {
                Err(QueryError::parse(format!(
                    "Unexpected trailing input: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::parse(format!("Formula parse error: {:?}", e))),
    }
}

// ============================================================================
// Precedence Levels
// ============================================================================

fn parse_expr(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_term(input)?;
    loop {
        let (rest, op) = match preceded(multispace0, alt((char('+'), char('-')))).parse(input) {
            Ok(ok) => ok,
            Err(nom::Err::Error(_)) => return Ok((input, lhs)),
            Err(e) => return Err(e),
        };
        let (rest, rhs) = parse_term(rest)?;
        let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
        lhs = binary(op, lhs, rhs);
        input = rest;
    }
}

fn parse_term(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_power(input)?;
    loop {
        let (rest, op) =
            match preceded(multispace0, alt((char('*'), char('/'), char('%')))).parse(input) {
                Ok(ok) => ok,
                Err(nom::Err::Error(_)) => return Ok((input, lhs)),
                Err(e) => return Err(e),
            };
        let (rest, rhs) = parse_power(rest)?;
        let op = match op {
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            _ => BinaryOp::Mod,
        };
        lhs = binary(op, lhs, rhs);
        input = rest;
    }
}

fn parse_power(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>('-').parse(input) {
        let (rest, inner) = parse_power(rest)?;
        return Ok((rest, Expr::Neg(Box::new(inner))));
    }

    let (input, base) = parse_primary(input)?;
    let (input, exponent) = opt(preceded((multispace0, tag("**")), parse_power)).parse(input)?;
    Ok(match exponent {
        Some(exp) => (input, binary(BinaryOp::Pow, base, exp)),
        None => (input, base),
    })
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// ============================================================================
// Primaries
// ============================================================================

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((parse_number, parse_parenthesized, parse_identifier_term)).parse(input)
}

fn parse_number(input: &str) -> IResult<&str, Expr> {
    map_res(
        recognize((
            alt((
                recognize((digit1, opt((char('.'), digit0)))),
                recognize((char('.'), digit1)),
            )),
            opt((
                alt((char('e'), char('E'))),
                opt(alt((char('+'), char('-')))),
                digit1,
            )),
        )),
        |s: &str| s.parse::<f64>().map(Expr::Number),
    )
    .parse(input)
}

fn parse_parenthesized(input: &str) -> IResult<&str, Expr> {
    delimited(
        char('('),
        parse_expr,
        preceded(multispace0, char(')')),
    )
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Function call or variable reference
fn parse_identifier_term(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = identifier(input)?;

    if let Some(func) = MathFunction::from_name(name) {
        let call_args = delimited(
            (multispace0, char('(')),
            separated_list0(preceded(multispace0, char(',')), parse_expr),
            (multispace0, char(')')),
        )
        .parse(rest);
        if let Ok((rest, args)) = call_args {
            return Ok((rest, Expr::Call { func, args }));
        }
    }

    let (rest, selector) = opt(preceded(
        char('.'),
        alt((digit1, identifier)),
    ))
    .parse(rest)?;
    let variable = match selector {
        Some(sel) => format!("{}.{}", name, sel),
        None => name.to_string(),
    };
    Ok((rest, Expr::Variable(variable)))
}
