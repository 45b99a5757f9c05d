//! Compiles script text into a [`Program`].
// used for decimal literals
use bigdecimal::BigDecimal;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use std::str::FromStr;

use crate::error::{Result, VartabError};
use crate::script::dependency::LookupKind;

#[derive(Parser)]
#[grammar = "formula.pest"]
struct FormulaParser;

// ------------- Syntax tree -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(BigDecimal),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<BinaryOp> {
        Some(match symbol {
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "==" | "===" => BinaryOp::Eq,
            "!=" | "!==" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Regex { regex: Regex, global: bool },
    Local(String),
    Lookup { kind: LookupKind, args: Vec<Expr> },
    Call { name: String, args: Vec<Expr> },
    Method { receiver: Box<Expr>, name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Ternary { condition: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone)]
pub enum Statement {
    Declare { name: String, value: Expr },
    Expression(Expr),
}

/// A compiled script. The value of the last statement is the script's result.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    source: String,
    statements: Vec<Statement>,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn source(&self) -> &str {
        &self.source
    }
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

// ------------- Compilation -------------
pub fn compile(name: &str, source: &str) -> Result<Program> {
    let mut pairs = FormulaParser::parse(Rule::script, source).map_err(|e| {
        let line = match e.line_col {
            pest::error::LineColLocation::Pos((line, _)) => line,
            pest::error::LineColLocation::Span((line, _), _) => line,
        };
        VartabError::Compile {
            script: name.to_string(),
            line,
            source_line: e.line().trim_end().to_string(),
            message: e.variant.message().to_string(),
        }
    })?;
    let builder = Builder { name };
    let mut statements = Vec::new();
    if let Some(script) = pairs.next() {
        for pair in script.into_inner() {
            if pair.as_rule() == Rule::statement {
                statements.push(builder.statement(pair)?);
            }
        }
    }
    debug!("compiled script {} into {} statements", name, statements.len());
    Ok(Program { name: name.to_string(), source: source.to_string(), statements })
}

struct Builder<'s> {
    name: &'s str,
}

impl Builder<'_> {
    fn error(&self, pair: &Pair<Rule>, message: impl Into<String>) -> VartabError {
        let position = pair.as_span().start_pos();
        VartabError::Compile {
            script: self.name.to_string(),
            line: position.line_col().0,
            source_line: position.line_of().trim_end().to_string(),
            message: message.into(),
        }
    }

    fn statement(&self, pair: Pair<Rule>) -> Result<Statement> {
        let inner = self.only_child(pair)?;
        match inner.as_rule() {
            Rule::declaration => {
                let mut children = inner.into_inner().filter(|p| p.as_rule() != Rule::var_keyword);
                let (Some(name), Some(value)) = (children.next(), children.next()) else {
                    return Err(VartabError::Evaluation(String::from("malformed declaration")));
                };
                Ok(Statement::Declare { name: name.as_str().to_string(), value: self.expression(value)? })
            }
            _ => Ok(Statement::Expression(self.expression(inner)?)),
        }
    }

    fn only_child<'i>(&self, pair: Pair<'i, Rule>) -> Result<Pair<'i, Rule>> {
        let rule = pair.as_rule();
        let error = self.error(&pair, format!("empty {:?}", rule));
        pair.into_inner().next().ok_or(error)
    }

    fn expression(&self, pair: Pair<Rule>) -> Result<Expr> {
        match pair.as_rule() {
            Rule::expression | Rule::primary => {
                let inner = self.only_child(pair)?;
                self.expression(inner)
            }
            Rule::ternary => {
                let mut children = pair.into_inner();
                let condition = self.next_expression(&mut children)?;
                match (children.next(), children.next()) {
                    (Some(then), Some(otherwise)) => Ok(Expr::Ternary {
                        condition: Box::new(condition),
                        then: Box::new(self.expression(then)?),
                        otherwise: Box::new(self.expression(otherwise)?),
                    }),
                    _ => Ok(condition),
                }
            }
            Rule::or_expr
            | Rule::and_expr
            | Rule::equality
            | Rule::comparison
            | Rule::additive
            | Rule::multiplicative => self.binary(pair),
            Rule::unary => self.unary(pair),
            Rule::postfix => self.postfix(pair),
            Rule::literal => {
                let inner = self.only_child(pair)?;
                self.literal(inner)
            }
            Rule::lookup => {
                let mut children = pair.into_inner();
                let kind = match children.next().map(|k| k.as_str()) {
                    Some("$this") => LookupKind::This,
                    Some("$var") => LookupKind::Variable,
                    _ => LookupKind::Value,
                };
                let args = match children.next() {
                    Some(arguments) => self.arguments(arguments)?,
                    None => Vec::new(),
                };
                Ok(Expr::Lookup { kind, args })
            }
            Rule::call => {
                let mut children = pair.into_inner();
                let name = children.next().map(|n| n.as_str().to_string()).unwrap_or_default();
                let args = match children.next() {
                    Some(arguments) => self.arguments(arguments)?,
                    None => Vec::new(),
                };
                Ok(Expr::Call { name, args })
            }
            Rule::array => Ok(Expr::Array(
                pair.into_inner().map(|p| self.expression(p)).collect::<Result<Vec<_>>>()?,
            )),
            Rule::object => {
                let mut entries = Vec::new();
                for entry in pair.into_inner() {
                    let mut children = entry.into_inner();
                    let (Some(key), Some(value)) = (children.next(), children.next()) else {
                        continue;
                    };
                    let key = match key.as_rule() {
                        Rule::string => self.string(key)?,
                        _ => key.as_str().to_string(),
                    };
                    entries.push((key, self.expression(value)?));
                }
                Ok(Expr::Object(entries))
            }
            Rule::identifier => Ok(Expr::Local(pair.as_str().to_string())),
            _ => Err(self.error(&pair, format!("unexpected {:?}", pair.as_rule()))),
        }
    }

    fn next_expression<'i>(&self, children: &mut pest::iterators::Pairs<'i, Rule>) -> Result<Expr> {
        match children.next() {
            Some(pair) => self.expression(pair),
            None => Err(VartabError::Evaluation(String::from("missing operand"))),
        }
    }

    fn binary(&self, pair: Pair<Rule>) -> Result<Expr> {
        let mut children = pair.into_inner();
        let mut left = self.next_expression(&mut children)?;
        while let Some(op) = children.next() {
            let symbol = op.as_str();
            let op = BinaryOp::from_symbol(symbol).ok_or_else(|| self.error(&op, format!("unknown operator {}", symbol)))?;
            let right = self.next_expression(&mut children)?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary(&self, pair: Pair<Rule>) -> Result<Expr> {
        let mut ops = Vec::new();
        let mut operand = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::unary_op => ops.push(if child.as_str() == "!" { UnaryOp::Not } else { UnaryOp::Negate }),
                _ => operand = Some(self.expression(child)?),
            }
        }
        let mut expr = operand.ok_or_else(|| VartabError::Evaluation(String::from("missing operand")))?;
        for op in ops.into_iter().rev() {
            expr = Expr::Unary { op, operand: Box::new(expr) };
        }
        Ok(expr)
    }

    fn postfix(&self, pair: Pair<Rule>) -> Result<Expr> {
        let mut children = pair.into_inner();
        let mut receiver = self.next_expression(&mut children)?;
        for call in children {
            let mut parts = call.into_inner();
            let name = parts.next().map(|n| n.as_str().to_string()).unwrap_or_default();
            let args = match parts.next() {
                Some(arguments) => self.arguments(arguments)?,
                None => Vec::new(),
            };
            receiver = Expr::Method { receiver: Box::new(receiver), name, args };
        }
        Ok(receiver)
    }

    fn arguments(&self, pair: Pair<Rule>) -> Result<Vec<Expr>> {
        pair.into_inner().map(|p| self.expression(p)).collect()
    }

    fn literal(&self, pair: Pair<Rule>) -> Result<Expr> {
        let literal = match pair.as_rule() {
            Rule::number => {
                let text = pair.as_str();
                match text.parse::<i64>() {
                    Ok(i) => Literal::Integer(i),
                    Err(_) => Literal::Decimal(
                        BigDecimal::from_str(text).map_err(|_| self.error(&pair, format!("bad number {}", text)))?,
                    ),
                }
            }
            Rule::string => Literal::Text(self.string(pair)?),
            Rule::boolean => Literal::Boolean(pair.as_str() == "true"),
            Rule::null => Literal::Null,
            Rule::regex => return self.regex(pair),
            _ => return Err(self.error(&pair, "unexpected literal")),
        };
        Ok(Expr::Literal(literal))
    }

    fn string(&self, pair: Pair<Rule>) -> Result<String> {
        let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
        Ok(unescape(raw))
    }

    fn regex(&self, pair: Pair<Rule>) -> Result<Expr> {
        let mut body = "";
        let mut flags = "";
        for part in pair.clone().into_inner() {
            match part.as_rule() {
                Rule::regex_body => body = part.as_str(),
                Rule::regex_flags => flags = part.as_str(),
                _ => {}
            }
        }
        let regex = RegexBuilder::new(body)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .build()
            .map_err(|e| self.error(&pair, format!("bad regular expression: {}", e)))?;
        Ok(Expr::Regex { regex, global: flags.contains('g') })
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Compiles a pattern given as text, as used when a method receives a string
/// where a regular expression is expected.
pub fn pattern(text: &str) -> Result<Regex> {
    Regex::new(text).map_err(|e| VartabError::InvalidArgument(format!("bad regular expression '{}': {}", text, e)))
}
