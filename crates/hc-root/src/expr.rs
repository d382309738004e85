//! Row predicates for filtering chunks.
//!
//! [`CutExpr`] compiles cut strings such as `nJet >= 2 && abs(met) < 100`
//! and evaluates them column-wise over a [`RecordBatch`]. Operators:
//! `+ - * /`, comparisons, `&&`/`&`, `||`/`|`, `!`/`~`; functions `abs sqrt
//! log exp pow min max`. Referenced columns are cast to `f64`; nulls read as
//! NaN. A row passes when the result is non-zero and not NaN.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, AsArray, BooleanArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use hc_core::{Error, Result};

/// A boolean function over the rows of a chunk.
///
/// May reference columns outside the retained output set; the reader must
/// include [`RowPredicate::columns`] in what it fetches.
pub trait RowPredicate: fmt::Debug + Send + Sync {
    /// Columns the predicate reads.
    fn columns(&self) -> Vec<String>;

    /// One boolean per row of `batch`.
    fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray>;
}

impl<P: RowPredicate + ?Sized> RowPredicate for Arc<P> {
    fn columns(&self) -> Vec<String> {
        (**self).columns()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        (**self).evaluate(batch)
    }
}

/// Predicate backed by a closure.
pub struct FnPredicate<F> {
    columns: Vec<String>,
    f: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&RecordBatch) -> Result<BooleanArray> + Send + Sync,
{
    /// Wrap `f`, which reads `columns`.
    pub fn new(columns: Vec<String>, f: F) -> Self {
        Self { columns, f }
    }
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredicate").field("columns", &self.columns).finish_non_exhaustive()
    }
}

impl<F> RowPredicate for FnPredicate<F>
where
    F: Fn(&RecordBatch) -> Result<BooleanArray> + Send + Sync,
{
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        (self.f)(batch)
    }
}

// ── Syntax tree ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Op {
    /// Binding power; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            Op::Or => 1,
            Op::And => 2,
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => 3,
            Op::Add | Op::Sub => 4,
            Op::Mul | Op::Div => 5,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        let truth = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
            Op::Eq => truth(a == b),
            Op::Ne => truth(a != b),
            Op::Lt => truth(a < b),
            Op::Le => truth(a <= b),
            Op::Gt => truth(a > b),
            Op::Ge => truth(a >= b),
            Op::And => truth(is_true(a) && is_true(b)),
            Op::Or => truth(is_true(a) || is_true(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Abs => args[0].abs(),
            Func::Sqrt => args[0].sqrt(),
            Func::Log => args[0].ln(),
            Func::Exp => args[0].exp(),
            Func::Pow => args[0].powf(args[1]),
            Func::Min => args[0].min(args[1]),
            Func::Max => args[0].max(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(f64),
    Column(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

fn is_true(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

// ── Lexer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Name(String),
    Op(Op),
    Bang,
    Open,
    Close,
    Comma,
}

fn lex(src: &str) -> Result<Vec<Tok>> {
    let mut out = Vec::new();
    let mut it = src.char_indices().peekable();

    while let Some((start, c)) = it.next() {
        let next = it.peek().map(|&(_, n)| n);
        let tok = match (c, next) {
            (c, _) if c.is_whitespace() => continue,
            ('&', Some('&')) | ('|', Some('|')) | ('=', Some('=')) | ('!', Some('='))
            | ('<', Some('=')) | ('>', Some('=')) => {
                it.next();
                Tok::Op(match c {
                    '&' => Op::And,
                    '|' => Op::Or,
                    '=' => Op::Eq,
                    '!' => Op::Ne,
                    '<' => Op::Le,
                    _ => Op::Ge,
                })
            }
            ('&', _) => Tok::Op(Op::And),
            ('|', _) => Tok::Op(Op::Or),
            ('<', _) => Tok::Op(Op::Lt),
            ('>', _) => Tok::Op(Op::Gt),
            ('+', _) => Tok::Op(Op::Add),
            ('-', _) => Tok::Op(Op::Sub),
            ('*', _) => Tok::Op(Op::Mul),
            ('/', _) => Tok::Op(Op::Div),
            ('!', _) | ('~', _) => Tok::Bang,
            ('(', _) => Tok::Open,
            (')', _) => Tok::Close,
            (',', _) => Tok::Comma,
            (c, _) if c.is_ascii_digit() || c == '.' => {
                let mut end = start + 1;
                let mut prev = c;
                while let Some(&(i, n)) = it.peek() {
                    let exponent_sign = (n == '+' || n == '-') && (prev == 'e' || prev == 'E');
                    if !(n.is_ascii_digit() || n == '.' || n == 'e' || n == 'E' || exponent_sign) {
                        break;
                    }
                    prev = n;
                    end = i + n.len_utf8();
                    it.next();
                }
                let text = &src[start..end];
                Tok::Num(
                    text.parse().map_err(|_| Error::Expression(format!("invalid number '{text}'")))?,
                )
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, n)) = it.peek() {
                    if !(n.is_alphanumeric() || n == '_' || n == '.') {
                        break;
                    }
                    end = i + n.len_utf8();
                    it.next();
                }
                Tok::Name(src[start..end].to_string())
            }
            (c, _) => {
                return Err(Error::Expression(format!("unexpected character '{c}' at {start}")));
            }
        };
        out.push(tok);
    }
    Ok(out)
}

// ── Parser ──────────────────────────────────────────────────────

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    columns: Vec<String>,
}

impl Parser {
    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += usize::from(t.is_some());
        t
    }

    fn peek_op(&self) -> Option<Op> {
        match self.toks.get(self.pos) {
            Some(Tok::Op(op)) => Some(*op),
            _ => None,
        }
    }

    /// Precedence climbing over binary operators.
    fn expr(&mut self, min_prec: u8) -> Result<Node> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(prec + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node> {
        match self.toks.get(self.pos) {
            Some(Tok::Op(Op::Sub)) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Tok::Bang) => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.unary()?)))
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Node> {
        match self.next() {
            Some(Tok::Num(v)) => Ok(Node::Const(v)),
            Some(Tok::Open) => {
                let inner = self.expr(0)?;
                self.close()?;
                Ok(inner)
            }
            Some(Tok::Name(name)) if self.toks.get(self.pos) == Some(&Tok::Open) => {
                self.pos += 1;
                let func = Func::lookup(&name)
                    .ok_or_else(|| Error::Expression(format!("unknown function '{name}'")))?;
                let mut args = vec![self.expr(0)?];
                while self.toks.get(self.pos) == Some(&Tok::Comma) {
                    self.pos += 1;
                    args.push(self.expr(0)?);
                }
                self.close()?;
                if args.len() != func.arity() {
                    return Err(Error::Expression(format!(
                        "{name}() takes {} argument(s), got {}",
                        func.arity(),
                        args.len()
                    )));
                }
                Ok(Node::Call(func, args))
            }
            Some(Tok::Name(name)) => match name.as_str() {
                "true" | "True" => Ok(Node::Const(1.0)),
                "false" | "False" => Ok(Node::Const(0.0)),
                _ => {
                    let idx = match self.columns.iter().position(|c| *c == name) {
                        Some(i) => i,
                        None => {
                            self.columns.push(name);
                            self.columns.len() - 1
                        }
                    };
                    Ok(Node::Column(idx))
                }
            },
            other => Err(Error::Expression(format!(
                "expected a number, a column or '(', got {other:?}"
            ))),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.next() {
            Some(Tok::Close) => Ok(()),
            other => Err(Error::Expression(format!("expected ')', got {other:?}"))),
        }
    }
}

// ── Compiled cut ────────────────────────────────────────────────

/// A compiled cut expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CutExpr {
    source: String,
    root: Node,
    columns: Vec<String>,
}

impl CutExpr {
    /// Parse and compile `source`.
    pub fn compile(source: &str) -> Result<Self> {
        let mut p = Parser { toks: lex(source)?, pos: 0, columns: Vec::new() };
        if p.toks.is_empty() {
            return Err(Error::Expression("empty cut expression".into()));
        }
        let root = p.expr(0)?;
        if let Some(t) = p.toks.get(p.pos) {
            return Err(Error::Expression(format!("unexpected {t:?} after expression")));
        }
        Ok(Self { source: source.to_string(), root, columns: p.columns })
    }

    /// The expression text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl RowPredicate for CutExpr {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let data = self
            .columns
            .iter()
            .map(|name| numeric_column(batch, name))
            .collect::<Result<Vec<_>>>()?;
        let values = eval(&self.root, &data, batch.num_rows());
        Ok(values.into_iter().map(|v| Some(is_true(v))).collect())
    }
}

fn numeric_column(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| Error::Expression(format!("cut references unknown column '{name}'")))?;
    let numeric = array.data_type().is_numeric() || *array.data_type() == DataType::Boolean;
    if !numeric {
        return Err(Error::Expression(format!(
            "cut column '{name}' has type {} which is not scalar numeric",
            array.data_type()
        )));
    }
    let as_f64 = cast(array, &DataType::Float64)?;
    Ok(as_f64.as_primitive::<Float64Type>().iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn eval(node: &Node, cols: &[Vec<f64>], n: usize) -> Vec<f64> {
    match node {
        Node::Const(v) => vec![*v; n],
        Node::Column(i) => cols[*i].clone(),
        Node::Neg(a) => eval(a, cols, n).into_iter().map(|v| -v).collect(),
        Node::Not(a) => {
            eval(a, cols, n).into_iter().map(|v| if is_true(v) { 0.0 } else { 1.0 }).collect()
        }
        Node::Binary(op, a, b) => {
            let lhs = eval(a, cols, n);
            let rhs = eval(b, cols, n);
            lhs.into_iter().zip(rhs).map(|(x, y)| op.apply(x, y)).collect()
        }
        Node::Call(f, args) => {
            let evaluated: Vec<Vec<f64>> = args.iter().map(|a| eval(a, cols, n)).collect();
            let mut row = vec![0.0; evaluated.len()];
            (0..n)
                .map(|i| {
                    for (slot, col) in row.iter_mut().zip(&evaluated) {
                        *slot = col[i];
                    }
                    f.apply(&row)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float32Array, Int32Array};
    use arrow::datatypes::{Field, Schema};

    fn batch() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("nJet", DataType::Int32, false),
            Field::new("met", DataType::Float32, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from(vec![0, 2, 3, 5])) as ArrayRef,
                Arc::new(Float32Array::from(vec![Some(10.0), Some(-150.0), None, Some(-20.0)])),
            ],
        )
        .unwrap()
    }

    fn mask(expr: &str) -> Vec<bool> {
        let cut = CutExpr::compile(expr).unwrap();
        cut.evaluate(&batch()).unwrap().iter().map(|v| v.unwrap()).collect()
    }

    #[test]
    fn precedence_and_functions() {
        assert_eq!(mask("nJet >= 2 && abs(met) < 100"), vec![false, false, false, true]);
        assert_eq!(mask("nJet + 1 * 2 == 4"), vec![false, true, false, false]);
        assert_eq!(mask("(nJet > 4) | (nJet < 1)"), vec![true, false, false, true]);
        assert_eq!(mask("!(nJet > 2)"), vec![true, true, false, false]);
        assert_eq!(mask("max(nJet, 3) == 3"), vec![true, true, true, false]);
        assert_eq!(mask("-nJet < -2.5e0"), vec![false, false, true, true]);
    }

    #[test]
    fn null_reads_as_nan() {
        assert_eq!(mask("met == met"), vec![true, true, false, true]);
    }

    #[test]
    fn columns_in_first_use_order() {
        let cut = CutExpr::compile("met > 0 || nJet > met").unwrap();
        assert_eq!(cut.columns(), vec!["met".to_string(), "nJet".to_string()]);
        assert_eq!(cut.source(), "met > 0 || nJet > met");
    }

    #[test]
    fn compile_errors() {
        assert!(CutExpr::compile("").is_err());
        assert!(CutExpr::compile("x >").is_err());
        assert!(CutExpr::compile("foo(x)").is_err());
        assert!(CutExpr::compile("pow(x)").is_err());
        assert!(CutExpr::compile("(x > 1").is_err());
        assert!(CutExpr::compile("x $ 2").is_err());
        assert!(CutExpr::compile("x y").is_err());
    }

    #[test]
    fn unknown_column_at_evaluation() {
        let cut = CutExpr::compile("missing > 0").unwrap();
        assert!(matches!(cut.evaluate(&batch()), Err(Error::Expression(_))));
    }

    #[test]
    fn closure_predicate() {
        let p = FnPredicate::new(vec!["nJet".into()], |b: &RecordBatch| -> Result<BooleanArray> {
            let n = b.column_by_name("nJet").unwrap().as_primitive::<arrow::datatypes::Int32Type>();
            Ok(n.iter().map(|v| v.map(|v| v % 2 == 1)).collect())
        });
        let m: Vec<_> = p.evaluate(&batch()).unwrap().iter().map(|v| v.unwrap()).collect();
        assert_eq!(m, vec![false, false, true, true]);
        assert_eq!(p.columns(), vec!["nJet".to_string()]);
    }
}
