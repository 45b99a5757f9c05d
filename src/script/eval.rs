//! Tree-walking evaluation of compiled programs.
use std::collections::HashMap;

use crate::construct::Variable;
use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods;
use crate::script::dependency::LookupKind;
use crate::script::parser::{BinaryOp, Expr, Literal, Program, Statement, UnaryOp};
use crate::script::value::{Env, ScriptValue};

/// Answers the lookups of a running script.
pub trait Resolver {
    fn value(&self, kind: LookupKind, name: &str) -> Result<ScriptValue>;
    fn variable(&self, name: &str) -> Result<Variable>;
}

/// Runs `program` in a fresh scope. Returns the value of the last statement,
/// or null when the program ends with a declaration or is empty.
pub fn run(program: &Program, resolver: &dyn Resolver, env: &Env) -> Result<ScriptValue> {
    let mut scope = Scope { locals: HashMap::new(), resolver, env };
    let mut last = ScriptValue::Null;
    for statement in program.statements() {
        last = match statement {
            Statement::Declare { name, value } => {
                let value = scope.eval(value)?;
                scope.locals.insert(name.clone(), value);
                ScriptValue::Null
            }
            Statement::Expression(expr) => scope.eval(expr)?,
        };
    }
    Ok(last)
}

struct Scope<'r> {
    locals: HashMap<String, ScriptValue>,
    resolver: &'r dyn Resolver,
    env: &'r Env,
}

impl Scope<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<ScriptValue> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Null => ScriptValue::Null,
                Literal::Boolean(b) => ScriptValue::boolean(*b),
                Literal::Integer(i) => ScriptValue::of(Value::integer(*i)),
                Literal::Decimal(d) => ScriptValue::of(Value::decimal(d.clone())),
                Literal::Text(s) => ScriptValue::text(s.clone()),
            }),
            Expr::Regex { regex, global } => Ok(ScriptValue::Regex(regex.clone(), *global)),
            Expr::Local(name) => self
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| VartabError::Evaluation(format!("'{}' is not defined", name))),
            Expr::Lookup { kind, args } => {
                let name = match args.first() {
                    Some(arg) => self.eval(arg)?,
                    None => return Err(VartabError::Evaluation(String::from("lookup without a variable name"))),
                };
                let name = name
                    .value()
                    .and_then(|v| v.render())
                    .ok_or_else(|| VartabError::Evaluation(String::from("variable name must be a text")))?;
                match kind {
                    LookupKind::Variable => Ok(ScriptValue::Variable(Box::new(self.resolver.variable(&name)?))),
                    _ => self.resolver.value(*kind, &name),
                }
            }
            Expr::Call { name, args } => {
                let args = self.eval_all(args)?;
                methods::call(name, &args, self.env)
            }
            Expr::Method { receiver, name, args } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_all(args)?;
                methods::invoke(&receiver, name, &args, self.env)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => match operand.value() {
                        Some(v) if v.value_type() == ValueType::Boolean => {
                            methods::invoke(&operand, "not", &[], self.env)
                        }
                        _ => Ok(ScriptValue::boolean(!operand.is_truthy())),
                    },
                    UnaryOp::Negate if operand.is_null() => Ok(operand),
                    UnaryOp::Negate => methods::invoke(&operand, "negate", &[], self.env),
                }
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                if !self.eval(left)?.is_truthy() {
                    return Ok(ScriptValue::boolean(false));
                }
                Ok(ScriptValue::boolean(self.eval(right)?.is_truthy()))
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                if self.eval(left)?.is_truthy() {
                    return Ok(ScriptValue::boolean(true));
                }
                Ok(ScriptValue::boolean(self.eval(right)?.is_truthy()))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Ternary { condition, then, otherwise } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Array(items) => Ok(ScriptValue::Array(self.eval_all(items)?)),
            Expr::Object(entries) => {
                let mut evaluated = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    evaluated.push((key.clone(), self.eval(value)?));
                }
                Ok(ScriptValue::Object(evaluated))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<ScriptValue>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    /// Operators are sugar for the equivalent methods.
    fn binary(&self, op: BinaryOp, left: ScriptValue, right: ScriptValue) -> Result<ScriptValue> {
        let method = match op {
            BinaryOp::Eq => "eq",
            BinaryOp::NotEq => {
                let equal = methods::invoke(&left, "eq", &[right], self.env)?;
                return Ok(ScriptValue::boolean(!equal.is_truthy()));
            }
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Add if left.is_text() || right.is_text() => "concat",
            BinaryOp::Add => "plus",
            BinaryOp::Sub => "minus",
            BinaryOp::Mul => "multiply",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "modulo",
            BinaryOp::And | BinaryOp::Or => {
                return Err(VartabError::Evaluation(String::from("logical operators are evaluated lazily")));
            }
        };
        if matches!(left, ScriptValue::Null) && method != "eq" {
            return Ok(ScriptValue::Null);
        }
        methods::invoke(&left, method, &[right], self.env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::compile;

    struct Fixed;

    impl Resolver for Fixed {
        fn value(&self, kind: LookupKind, name: &str) -> Result<ScriptValue> {
            match (kind, name) {
                (LookupKind::Value, "weight") => Ok(ScriptValue::with_unit(Value::integer(80), Some("kg"))),
                (LookupKind::Value, "missing") => Ok(ScriptValue::of(ValueType::Decimal.null_value())),
                _ => Err(VartabError::NoSuchVariable { name: name.to_string(), owner: String::from("fixed") }),
            }
        }
        fn variable(&self, name: &str) -> Result<Variable> {
            Variable::builder(name, ValueType::Integer, "Participant").unit("kg").build()
        }
    }

    fn eval(source: &str) -> Result<ScriptValue> {
        let program = compile("test", source)?;
        run(&program, &Fixed, &Env::new())
    }

    fn rendered(source: &str) -> Option<String> {
        eval(source).expect("evaluates").value().and_then(|v| v.render())
    }

    #[test]
    fn arithmetic_follows_precedence() {
        assert_eq!(rendered("1 + 2 * 3").as_deref(), Some("7"));
        assert_eq!(rendered("(1 + 2) * 3").as_deref(), Some("9"));
        assert_eq!(rendered("7 % 4").as_deref(), Some("3"));
    }

    #[test]
    fn locals_are_visible_to_later_statements() {
        assert_eq!(rendered("var w = $('weight'); var f = 2; w * f").as_deref(), Some("160"));
    }

    #[test]
    fn undefined_locals_fail() {
        assert!(matches!(eval("nope + 1"), Err(VartabError::Evaluation(_))));
    }

    #[test]
    fn text_addition_concatenates() {
        assert_eq!(rendered("'w=' + $('weight')").as_deref(), Some("w=80"));
    }

    #[test]
    fn nulls_propagate_through_operators() {
        assert!(eval("$('missing') * 2").expect("evaluates").is_null());
        assert!(eval("null + 1").expect("evaluates").is_null());
        assert_eq!(rendered("$('missing') == null").as_deref(), Some("true"));
    }

    #[test]
    fn logic_and_ternaries_use_truthiness() {
        assert_eq!(rendered("$('weight') > 70 && true ? 'heavy' : 'light'").as_deref(), Some("heavy"));
        assert_eq!(rendered("!$('missing')").as_deref(), Some("true"));
        assert_eq!(rendered("$('weight') != 80").as_deref(), Some("false"));
    }

    #[test]
    fn variable_metadata_is_available() {
        assert_eq!(rendered("$var('weight').unit()").as_deref(), Some("kg"));
    }

    #[test]
    fn unknown_lookups_fail() {
        assert!(matches!(eval("$('height')"), Err(VartabError::NoSuchVariable { .. })));
    }

    #[test]
    fn trailing_declaration_yields_null() {
        assert!(eval("var x = 1;").expect("evaluates").is_null());
    }
}
