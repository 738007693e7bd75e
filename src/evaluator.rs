//! # Expression evaluator
//!
//! ## Responsibility
//! Turn one line of whitespace-separated infix arithmetic into an `f64`.
//!
//! ```text
//! "3 + 4 * 2" ──tokenize──► [3, +, 4, *, 2] ──to_rpn──► [3, 4, 2, *, +] ──eval──► 11.0
//! ```
//!
//! ## Guarantees
//! - Pure: no shared state, no I/O, no logging
//! - Left-associative: operators of equal precedence pop, so `3 - 4 - 2` is `(3 - 4) - 2`
//! - Numeric tokens are recognised by float parsing, so `-2.5` is a number, `-` is an operator
//! - Division by zero follows IEEE-754 (`inf` / `NaN`) and is not an error
//!
//! ## NOT Responsible For
//! - Parentheses, functions, variables or unary operators
//! - Scheduling or isolation (see: `scheduler`)

use thiserror::Error;

/// Reasons an expression cannot be evaluated.
///
/// The `Display` form is the message carried by a failed outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The expression contained no tokens.
    #[error("Empty expression")]
    EmptyExpression,

    /// The first or last token is one of `+ - * /`.
    #[error("Expression cannot start or end with an operator: {0}")]
    LeadingOrTrailingOperator(String),

    /// An operator was reached with fewer than two values on the stack.
    #[error("Invalid expression (not enough operands): {0}")]
    InsufficientOperands(String),

    /// More than one value was left on the stack after evaluation.
    #[error("Invalid expression (remaining operands): {0}")]
    TrailingOperands(String),

    /// A token that is neither a float literal nor a supported operator.
    #[error("Unknown token {token:?} in expression: {expression}")]
    UnknownToken {
        /// The offending token.
        token: String,
        /// The whole expression, for context.
        expression: String,
    },
}

/// Binary operators understood by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl Operator {
    /// Parse an operator token. Returns `None` for anything else.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            _ => None,
        }
    }

    /// Binding strength: `+ -` are 1, `* /` are 2.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
        }
    }

    /// Compute `a OP b`.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }
}

/// Parse `token` as a float literal, if it is one.
///
/// Accepts anything Rust's float parser accepts, including `-3`, `2.5`,
/// `1e3` and `inf`.
pub fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok()
}

/// Split an expression on whitespace.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::evaluator::tokenize;
/// assert_eq!(tokenize(" 3  +\t4 "), vec!["3", "+", "4"]);
/// ```
pub fn tokenize(expr: &str) -> Vec<&str> {
    expr.split_whitespace().collect()
}

/// Convert infix tokens to Reverse Polish Notation (shunting-yard).
///
/// Numbers go straight to the output. An operator first pops every stacked
/// operator of greater or equal precedence, then is pushed. Leftover
/// operators are emitted top first.
///
/// # Errors
///
/// Returns [`EvalError::UnknownToken`] for a token that is neither a number
/// nor an operator.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::evaluator::{to_rpn, tokenize};
/// let rpn = to_rpn(&tokenize("10 / 2 - 1")).unwrap_or_default();
/// assert_eq!(rpn, vec!["10", "2", "/", "1", "-"]);
/// ```
pub fn to_rpn<'a>(tokens: &[&'a str]) -> Result<Vec<&'a str>, EvalError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<(&'a str, Operator)> = Vec::new();

    for &token in tokens {
        if parse_number(token).is_some() {
            output.push(token);
            continue;
        }

        let op = Operator::from_token(token).ok_or_else(|| EvalError::UnknownToken {
            token: token.to_string(),
            expression: tokens.join(" "),
        })?;

        while let Some(&(top_token, top)) = stack.last() {
            if top.precedence() < op.precedence() {
                break;
            }
            output.push(top_token);
            stack.pop();
        }
        stack.push((token, op));
    }

    output.extend(stack.into_iter().rev().map(|(token, _)| token));
    Ok(output)
}

/// Evaluate a single infix expression.
///
/// # Errors
///
/// - [`EvalError::EmptyExpression`] when there are no tokens
/// - [`EvalError::LeadingOrTrailingOperator`] when the first or last token is an operator
/// - [`EvalError::UnknownToken`] for unsupported tokens
/// - [`EvalError::InsufficientOperands`] when an operator lacks two operands
/// - [`EvalError::TrailingOperands`] when values remain unconsumed
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::evaluator::evaluate;
/// assert_eq!(evaluate("7 + 3 * 2 - 4 / 2"), Ok(11.0));
/// ```
pub fn evaluate(expr: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(expr);

    let (first, last) = match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(EvalError::EmptyExpression),
    };
    if Operator::from_token(first).is_some() || Operator::from_token(last).is_some() {
        return Err(EvalError::LeadingOrTrailingOperator(expr.to_string()));
    }

    let rpn = to_rpn(&tokens)?;

    let mut stack: Vec<f64> = Vec::with_capacity(rpn.len());
    for token in rpn {
        if let Some(value) = parse_number(token) {
            stack.push(value);
            continue;
        }
        // to_rpn only emits numbers and known operators.
        let op = Operator::from_token(token).ok_or_else(|| EvalError::UnknownToken {
            token: token.to_string(),
            expression: expr.to_string(),
        })?;
        match (stack.pop(), stack.pop()) {
            (Some(b), Some(a)) => stack.push(op.apply(a, b)),
            _ => return Err(EvalError::InsufficientOperands(expr.to_string())),
        }
    }

    match stack.as_slice() {
        [value] => Ok(*value),
        _ => Err(EvalError::TrailingOperands(expr.to_string())),
    }
}
