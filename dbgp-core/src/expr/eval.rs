//! Expression evaluator
//!
//! Walks the AST, resolving variables and members against the engine through
//! the [`Session`]. Every lookup is a round trip, so evaluation is async and
//! strictly sequential; call arguments are evaluated one at a time.

use std::cmp::Ordering;
use std::sync::Arc;

use async_recursion::async_recursion;
use tracing::debug;

use super::ast::{AssignOp, BinaryOp, DerefPart, Expr, IncDec, NumberKind, Scope, UnaryOp};
use super::builtins::{self, compile_regex, integer_key, regex_position};
use super::ci_map::CiMap;
use super::error::EvalError;
use super::parser::parse_expr;
use super::value::{parse_number, Number, ObjectRef, Value};
use crate::dbgp::property::{child_full_name, Context, Property};
use crate::dbgp::types::StackFrame;
use crate::dbgp::Session;
use crate::dialect::Dialect;

/// Longest `<base>` chain followed when looking up an inherited member.
pub const MAX_INHERITANCE_DEPTH: usize = 32;

type EvalResult<T> = Result<T, EvalError>;

/// Where an assignment writes.
struct WriteTarget {
    context: Arc<Context>,
    full_name: String,
}

/// Expression evaluator bound to one session and stack frame
pub struct Evaluator<'a> {
    session: &'a Session,
    dialect: Dialect,
    frame: Option<StackFrame>,
    meta: &'a CiMap<Value>,
    /// Contexts of the frame, fetched on first use.
    contexts: Option<Vec<Arc<Context>>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(session: &'a Session, frame: Option<StackFrame>, meta: &'a CiMap<Value>) -> Self {
        Self {
            session,
            dialect: session.dialect(),
            frame,
            meta,
            contexts: None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse and evaluate `source`.
    pub async fn eval(&mut self, source: &str) -> EvalResult<Value> {
        let expr = parse_expr(source, self.dialect)?;
        self.eval_expr(&expr).await
    }

    /// Evaluate an expression
    #[async_recursion]
    pub async fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Sequence(items) => {
                let mut last = Value::empty();
                for item in items {
                    last = self.eval_expr(item).await?;
                }
                Ok(last)
            }
            Expr::Identifier(name) => self.eval_identifier(name).await,
            Expr::StringLiteral(s) => Ok(Value::string(s.clone())),
            Expr::NumberLiteral { raw, kind } => Ok(self.number_literal(raw, *kind)),
            Expr::Dereferences(parts) => {
                let name = self.dereference_name(parts).await?;
                self.eval_identifier(&name).await
            }
            Expr::PropertyAccess { object, property } => {
                let base = self.eval_expr(object).await?;
                let keys = self.property_keys(property);
                self.member(&base, &keys).await
            }
            Expr::DereferencePropertyAccess { object, property } => {
                let base = self.eval_expr(object).await?;
                let name = self.eval_expr(property).await?.to_text(self.dialect);
                let keys = self.property_keys(&name);
                self.member(&base, &keys).await
            }
            Expr::ElementAccess { object, indices } => {
                let mut current = self.eval_expr(object).await?;
                for index in indices {
                    let key = self.eval_expr(index).await?;
                    let keys = self.element_keys(&key)?;
                    current = self.member(&current, &keys).await?;
                }
                Ok(current)
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right).await,
            Expr::Unary { op, operand } => {
                if matches!(op, UnaryOp::AddressOf | UnaryOp::Deref) {
                    return Err(EvalError::unsupported_operator(op.as_str()));
                }
                let value = self.eval_expr(operand).await?;
                Ok(apply_unary(*op, &value))
            }
            Expr::PrefixUnary { op, operand } => self.increment(operand, *op, true).await,
            Expr::PostfixUnary { op, operand } => self.increment(operand, *op, false).await,
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if self.eval_expr(condition).await?.is_truthy() {
                    self.eval_expr(then).await
                } else {
                    self.eval_expr(otherwise).await
                }
            }
            Expr::Assignment {
                scope,
                target,
                op,
                value,
            } => self.assign(*scope, target, *op, value).await,
            Expr::Call { callee, args } => self.call(callee, args).await,
        }
    }

    // Variables

    async fn contexts(&mut self) -> EvalResult<Vec<Arc<Context>>> {
        if let Some(contexts) = &self.contexts {
            return Ok(contexts.clone());
        }
        let frame = self.frame.clone().unwrap_or_else(StackFrame::top);
        let contexts = self.session.context_names(&frame).await?;
        self.contexts = Some(contexts.clone());
        Ok(contexts)
    }

    /// First defined property named `name`, searching contexts in engine order.
    async fn lookup_variable(&mut self, name: &str) -> EvalResult<Option<Property>> {
        for context in self.contexts().await? {
            match self.session.property_get(&context, name).await {
                Ok(property) if !property.is_undefined() => return Ok(Some(property)),
                Ok(_) => continue,
                Err(err) if err.is_property_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    async fn eval_identifier(&mut self, name: &str) -> EvalResult<Value> {
        if name.is_empty() {
            return Ok(Value::Undefined);
        }
        match self.lookup_variable(name).await? {
            Some(property) => Ok(Value::from_property(property)),
            None if name.eq_ignore_ascii_case("true") => Ok(Value::integer(1)),
            None if name.eq_ignore_ascii_case("false") => Ok(Value::integer(0)),
            None => Ok(Value::Undefined),
        }
    }

    async fn dereference_name(&mut self, parts: &[DerefPart]) -> EvalResult<String> {
        let mut name = String::new();
        for part in parts {
            match part {
                DerefPart::Name(piece) => name.push_str(piece),
                DerefPart::Expr(expr) => {
                    let value = self.eval_expr(expr).await?;
                    name.push_str(&value.to_text(self.dialect));
                }
            }
        }
        Ok(name)
    }

    fn number_literal(&self, raw: &str, kind: NumberKind) -> Value {
        match (kind, self.dialect) {
            // v1 keeps float literals as numeric strings.
            (NumberKind::Float | NumberKind::Scientific, Dialect::V1) => Value::string(raw),
            _ => parse_number(raw)
                .map(Value::Number)
                .unwrap_or_else(|| Value::string(raw)),
        }
    }

    // Members

    /// DBGP child names a property access may match, most likely first.
    fn property_keys(&self, name: &str) -> Vec<String> {
        match self.dialect {
            Dialect::V1 => vec![name.to_string(), self.quoted_key(name)],
            Dialect::V2 => vec![name.to_string()],
        }
    }

    /// DBGP child names an element access may match, most likely first.
    fn element_keys(&self, key: &Value) -> EvalResult<Vec<String>> {
        let text = match key {
            Value::Number(Number::Integer(i)) => return Ok(vec![format!("[{}]", i)]),
            Value::Object(_) => return Err(EvalError::unsupported("object used as a key")),
            other => other.to_text(self.dialect),
        };
        if let Some(i) = integer_key(&text) {
            return Ok(vec![format!("[{}]", i), self.quoted_key(&text)]);
        }
        Ok(match self.dialect {
            Dialect::V1 => vec![text.clone(), self.quoted_key(&text)],
            Dialect::V2 => vec![self.quoted_key(&text), text],
        })
    }

    /// `["key"]` with the quote escaped the way the dialect spells it.
    fn quoted_key(&self, key: &str) -> String {
        let escaped = match self.dialect {
            Dialect::V1 => key.replace('"', "\"\""),
            Dialect::V2 => key.replace('`', "``").replace('"', "`\""),
        };
        format!("[\"{}\"]", escaped)
    }

    async fn member(&mut self, base: &Value, keys: &[String]) -> EvalResult<Value> {
        match base {
            Value::Object(object) => self.fetch_inherited_property(object, keys).await,
            _ => Ok(Value::Undefined),
        }
    }

    /// Look `keys` up on `object`: eager children first, then a direct
    /// `property_get` of the child, then along the `<base>` chain.
    pub async fn fetch_inherited_property(
        &mut self,
        object: &ObjectRef,
        keys: &[String],
    ) -> EvalResult<Value> {
        let mut current = object.clone();
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if current.is_partial() {
                current = self.refetch(&current).await?;
            }

            if let Some(child) = keys.iter().find_map(|key| current.child(key)) {
                return self.materialize(child.clone()).await;
            }

            for key in keys {
                let full_name = child_full_name(&current.full_name, key);
                match self.session.property_get(&current.context, &full_name).await {
                    Ok(property) if !property.is_undefined() => {
                        return self.materialize(property).await;
                    }
                    Ok(_) => {}
                    Err(err) if err.is_property_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
            }

            match current.base() {
                Some(base) => current = Arc::new(base.clone()),
                None => return Ok(Value::Undefined),
            }
        }
        debug!(
            object = %object.full_name,
            "inheritance chain longer than {}", MAX_INHERITANCE_DEPTH
        );
        Ok(Value::Undefined)
    }

    /// Fetch an object again by full name, for its children.
    async fn refetch(&mut self, object: &ObjectRef) -> EvalResult<ObjectRef> {
        match self
            .session
            .property_get(&object.context, &object.full_name)
            .await
        {
            Ok(Property::Object(fetched)) => Ok(Arc::new(fetched)),
            Ok(Property::Primitive(_)) => Ok(object.clone()),
            Err(err) if err.is_property_not_found() => Ok(object.clone()),
            Err(err) => Err(err.into()),
        }
    }

    async fn materialize(&mut self, property: Property) -> EvalResult<Value> {
        match property {
            Property::Object(object) if object.is_partial() => {
                let object = Arc::new(object);
                Ok(Value::Object(self.refetch(&object).await?))
            }
            other => Ok(Value::from_property(other)),
        }
    }

    // Operators

    async fn eval_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> EvalResult<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lhs = self.eval_expr(left).await?;
                let short_circuit = match op {
                    BinaryOp::And => !lhs.is_truthy(),
                    _ => lhs.is_truthy(),
                };
                let result = if short_circuit {
                    lhs
                } else {
                    self.eval_expr(right).await?
                };
                Ok(match self.dialect {
                    Dialect::V1 => Value::bool(result.is_truthy()),
                    Dialect::V2 => result,
                })
            }
            _ => {
                let lhs = self.eval_expr(left).await?;
                let rhs = self.eval_expr(right).await?;
                apply_binary(op, &lhs, &rhs, self.dialect)
            }
        }
    }

    async fn increment(&mut self, operand: &Expr, op: IncDec, prefix: bool) -> EvalResult<Value> {
        let target = self.write_target(None, operand).await?;
        let old = self.eval_expr(operand).await?;
        let Some(number) = old.as_number() else {
            return Ok(Value::empty());
        };
        let delta = match op {
            IncDec::Increment => 1,
            IncDec::Decrement => -1,
        };
        let new = match number {
            Number::Integer(i) => Value::integer(i.wrapping_add(delta)),
            Number::Float(f) => Value::float(f + delta as f64),
        };
        self.write(&target, &new).await?;
        Ok(if prefix { new } else { Value::Number(number) })
    }

    // Assignment

    async fn assign(
        &mut self,
        scope: Option<Scope>,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
    ) -> EvalResult<Value> {
        let destination = self.write_target(scope, target).await?;
        let value = match op.binary_op() {
            None => self.eval_expr(value).await?,
            Some(binary) => {
                let current = self.eval_expr(target).await?;
                let rhs = self.eval_expr(value).await?;
                apply_binary(binary, &current, &rhs, self.dialect)?
            }
        };
        self.write(&destination, &value).await?;
        Ok(value)
    }

    async fn write(&self, target: &WriteTarget, value: &Value) -> EvalResult<()> {
        let type_name = self
            .dialect
            .write_type(value)
            .ok_or_else(|| EvalError::unsupported("assigning an object"))?;
        debug!(name = %target.full_name, type_name, "writing property");
        self.session
            .property_set(
                &target.context,
                &target.full_name,
                &value.to_text(self.dialect),
                type_name,
            )
            .await?;
        Ok(())
    }

    /// Resolve the context and full name an assignment to `target` writes.
    async fn write_target(&mut self, scope: Option<Scope>, target: &Expr) -> EvalResult<WriteTarget> {
        match target {
            Expr::Identifier(name) => self.variable_target(scope, name).await,
            Expr::Dereferences(parts) => {
                let name = self.dereference_name(parts).await?;
                if name.is_empty() {
                    return Err(EvalError::InvalidTarget("empty variable name".to_string()));
                }
                self.variable_target(scope, &name).await
            }
            Expr::PropertyAccess { object, property } => {
                let object = self.target_object(object).await?;
                Ok(WriteTarget {
                    full_name: child_full_name(&object.full_name, property),
                    context: object.context.clone(),
                })
            }
            Expr::DereferencePropertyAccess { object, property } => {
                let object = self.target_object(object).await?;
                let name = self.eval_expr(property).await?.to_text(self.dialect);
                Ok(WriteTarget {
                    full_name: child_full_name(&object.full_name, &name),
                    context: object.context.clone(),
                })
            }
            Expr::ElementAccess { object, indices } => {
                let Some((last, init)) = indices.split_last() else {
                    return Err(EvalError::InvalidTarget("empty index".to_string()));
                };
                let mut current = self.eval_expr(object).await?;
                for index in init {
                    let key = self.eval_expr(index).await?;
                    let keys = self.element_keys(&key)?;
                    current = self.member(&current, &keys).await?;
                }
                let object = match current {
                    Value::Object(object) => object,
                    other => {
                        return Err(EvalError::InvalidTarget(format!(
                            "{} is not an object",
                            other.type_name()
                        )))
                    }
                };
                let key = self.eval_expr(last).await?;
                let key = self.write_key(&key)?;
                Ok(WriteTarget {
                    full_name: child_full_name(&object.full_name, &key),
                    context: object.context.clone(),
                })
            }
            other => Err(EvalError::InvalidTarget(format!("{:?}", other))),
        }
    }

    async fn target_object(&mut self, object: &Expr) -> EvalResult<ObjectRef> {
        match self.eval_expr(object).await? {
            Value::Object(object) => Ok(object),
            other => Err(EvalError::InvalidTarget(format!(
                "{} is not an object",
                other.type_name()
            ))),
        }
    }

    /// Child name used when writing an element.
    fn write_key(&self, key: &Value) -> EvalResult<String> {
        if key.as_object().is_some() {
            return Err(EvalError::unsupported("object used as a key"));
        }
        let text = key.to_text(self.dialect);
        if matches!(key, Value::Number(Number::Integer(_))) || integer_key(&text).is_some() {
            return Ok(format!("[{}]", text.trim()));
        }
        let plain_name = !text.is_empty()
            && text
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '@' | '#'));
        Ok(match self.dialect {
            Dialect::V1 if plain_name => text,
            _ => self.quoted_key(&text),
        })
    }

    async fn variable_target(&mut self, scope: Option<Scope>, name: &str) -> EvalResult<WriteTarget> {
        let contexts = self.contexts().await?;
        let context = match scope {
            Some(scope) => contexts
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(scope.context_name()))
                .cloned()
                .ok_or_else(|| EvalError::UnknownScope {
                    scope: scope.context_name().to_string(),
                })?,
            None => match self.lookup_variable(name).await? {
                Some(property) => property.context().clone(),
                None => contexts.first().cloned().ok_or_else(|| EvalError::UnknownScope {
                    scope: "Local".to_string(),
                })?,
            },
        };
        Ok(WriteTarget {
            context,
            full_name: name.to_string(),
        })
    }

    // Calls

    async fn call(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Value> {
        let name = match callee {
            Expr::Identifier(name) => name,
            Expr::PropertyAccess { .. } | Expr::DereferencePropertyAccess { .. } => {
                return Err(EvalError::unsupported("method call"))
            }
            _ => return Err(EvalError::unsupported("dynamic function call")),
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg).await?);
        }

        if name.eq_ignore_ascii_case("GetVar") {
            let [target] = values.as_slice() else {
                return Err(EvalError::builtin("GetVar", "expected 1 argument"));
            };
            let raw = target.to_text(self.dialect);
            return Ok(match self.lookup_variable(&raw).await? {
                Some(property) => Value::from_property(property),
                None => Value::Undefined,
            });
        }
        if name.eq_ignore_ascii_case("GetMetaVar") {
            let [key] = values.as_slice() else {
                return Err(EvalError::builtin("GetMetaVar", "expected 1 argument"));
            };
            return Ok(self
                .meta
                .get(&key.to_text(self.dialect))
                .cloned()
                .unwrap_or(Value::Undefined));
        }

        let builtin = builtins::lookup(self.dialect, name)
            .ok_or_else(|| EvalError::UnknownFunction { name: name.clone() })?;
        builtin.invoke(&values, self.dialect)
    }
}

fn apply_unary(op: UnaryOp, value: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::bool(!value.is_truthy()),
        UnaryOp::Plus => value
            .as_number()
            .map(Value::Number)
            .unwrap_or_else(Value::empty),
        UnaryOp::Minus => match value.as_number() {
            Some(Number::Integer(i)) => Value::integer(i.wrapping_neg()),
            Some(Number::Float(f)) => Value::float(-f),
            None => Value::empty(),
        },
        UnaryOp::BitNot => value
            .as_number()
            .map(|n| Value::integer(!n.as_i64()))
            .unwrap_or_else(Value::empty),
        UnaryOp::AddressOf | UnaryOp::Deref => Value::empty(),
    }
}

/// Apply a non-short-circuit binary operator.
pub fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value, dialect: Dialect) -> EvalResult<Value> {
    let value = match op {
        BinaryOp::LooseEq => Value::bool(equals(lhs, rhs, false, dialect)),
        BinaryOp::LooseNe => Value::bool(!equals(lhs, rhs, false, dialect)),
        BinaryOp::StrictEq => Value::bool(equals(lhs, rhs, true, dialect)),
        BinaryOp::StrictNe => Value::bool(!equals(lhs, rhs, true, dialect)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let ordering = compare(lhs, rhs, dialect);
            Value::bool(match op {
                BinaryOp::Lt => ordering == Some(Ordering::Less),
                BinaryOp::Gt => ordering == Some(Ordering::Greater),
                BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            })
        }
        BinaryOp::RegexMatch => {
            let regex = compile_regex(&rhs.to_text(dialect))?;
            Value::integer(regex_position(&lhs.to_text(dialect), &regex, 1))
        }
        BinaryOp::Concat => {
            let mut text = lhs.to_text(dialect);
            text.push_str(&rhs.to_text(dialect));
            Value::String(text)
        }
        BinaryOp::FloorDiv => return Err(EvalError::unsupported_operator(op.as_str())),
        BinaryOp::And | BinaryOp::Or => {
            let result = match op {
                BinaryOp::And => lhs.is_truthy() && rhs.is_truthy(),
                _ => lhs.is_truthy() || rhs.is_truthy(),
            };
            Value::bool(result)
        }
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => arithmetic(op, a, b),
            _ => Value::empty(),
        },
    };
    Ok(value)
}

fn equals(lhs: &Value, rhs: &Value, strict: bool, dialect: Dialect) -> bool {
    match (lhs, rhs) {
        (Value::Object(a), Value::Object(b)) => return a.same_object(b),
        (Value::Object(_), _) | (_, Value::Object(_)) => return false,
        (Value::Number(a), Value::Number(b)) => return a.numeric_eq(b),
        _ => {}
    }
    if !strict {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return a.numeric_eq(&b);
        }
    }
    let (a, b) = (lhs.to_text(dialect), rhs.to_text(dialect));
    if strict {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

fn compare(lhs: &Value, rhs: &Value, dialect: Dialect) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return a.numeric_cmp(&b);
    }
    let (a, b) = (lhs.to_text(dialect), rhs.to_text(dialect));
    Some(match dialect {
        Dialect::V1 => a.to_lowercase().cmp(&b.to_lowercase()),
        Dialect::V2 => a.cmp(&b),
    })
}

fn arithmetic(op: BinaryOp, a: Number, b: Number) -> Value {
    use Number::{Float, Integer};

    let float = |f: f64| {
        if f.is_finite() {
            Value::float(f)
        } else {
            Value::empty()
        }
    };
    let bits = |f: fn(i64, i64) -> Option<i64>| {
        f(a.as_i64(), b.as_i64())
            .map(Value::integer)
            .unwrap_or_else(Value::empty)
    };

    match (op, a, b) {
        (BinaryOp::Add, Integer(x), Integer(y)) => Value::integer(x.wrapping_add(y)),
        (BinaryOp::Sub, Integer(x), Integer(y)) => Value::integer(x.wrapping_sub(y)),
        (BinaryOp::Mul, Integer(x), Integer(y)) => Value::integer(x.wrapping_mul(y)),
        (BinaryOp::Add, _, _) => float(a.as_f64() + b.as_f64()),
        (BinaryOp::Sub, _, _) => float(a.as_f64() - b.as_f64()),
        (BinaryOp::Mul, _, _) => float(a.as_f64() * b.as_f64()),
        (BinaryOp::Div, _, _) if b.is_zero() => Value::empty(),
        (BinaryOp::Div, _, _) => float(a.as_f64() / b.as_f64()),
        (BinaryOp::Pow, Integer(x), Integer(y)) if y >= 0 => u32::try_from(y)
            .map(|y| Value::integer(x.wrapping_pow(y)))
            .unwrap_or_else(|_| float((x as f64).powf(y as f64))),
        (BinaryOp::Pow, _, _) => float(a.as_f64().powf(b.as_f64())),
        (BinaryOp::BitOr, _, _) => bits(|x, y| Some(x | y)),
        (BinaryOp::BitXor, _, _) => bits(|x, y| Some(x ^ y)),
        (BinaryOp::BitAnd, _, _) => bits(|x, y| Some(x & y)),
        (BinaryOp::Shl, _, _) => bits(|x, y| u32::try_from(y).ok().and_then(|y| x.checked_shl(y))),
        (BinaryOp::Shr, _, _) => bits(|x, y| u32::try_from(y).ok().and_then(|y| x.checked_shr(y))),
        (BinaryOp::UShr, _, _) => bits(|x, y| {
            u32::try_from(y)
                .ok()
                .and_then(|y| (x as u64).checked_shr(y))
                .map(|v| v as i64)
        }),
        _ => Value::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbgp::mock::{MockEngine, MockValue};

    async fn eval(session: &Session, source: &str) -> EvalResult<Value> {
        session.eval(source, None, None).await
    }

    fn offline(op: BinaryOp, lhs: Value, rhs: Value, dialect: Dialect) -> Value {
        apply_binary(op, &lhs, &rhs, dialect).unwrap()
    }

    #[tokio::test]
    async fn test_arithmetic_precedence() {
        let (session, _engine) = MockEngine::new("2.0.11").connect().await.unwrap();
        assert_eq!(
            eval(&session, "1 + (2 + 3) * 4 ** 5").await.unwrap(),
            Value::integer(5121)
        );
        assert_eq!(eval(&session, "7 / 2").await.unwrap(), Value::float(3.5));
        assert_eq!(eval(&session, "2 ** -1").await.unwrap(), Value::float(0.5));
    }

    #[tokio::test]
    async fn test_logical_operators_per_dialect() {
        let (v1, _e1) = MockEngine::new("1.1.36.02").connect().await.unwrap();
        let (v2, _e2) = MockEngine::new("2.0.11").connect().await.unwrap();

        assert_eq!(eval(&v1, "true && true").await.unwrap(), Value::integer(1));
        assert_eq!(eval(&v1, r#""a" && "b""#).await.unwrap(), Value::integer(1));
        assert_eq!(eval(&v2, r#""a" && "b""#).await.unwrap(), Value::string("b"));
        assert_eq!(eval(&v2, r#""" || "c""#).await.unwrap(), Value::string("c"));
        assert_eq!(eval(&v2, "not 0").await.unwrap(), Value::integer(1));
    }

    #[tokio::test]
    async fn test_true_variable_wins_over_fallback() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_global("true", MockValue::string("yes"))
            .connect()
            .await
            .unwrap();
        assert_eq!(
            eval(&session, "true && true").await.unwrap(),
            Value::string("yes")
        );
    }

    #[test]
    fn test_equality() {
        let eq = |op, a: &str, b: &str| offline(op, Value::string(a), Value::string(b), Dialect::V2);
        assert_eq!(eq(BinaryOp::LooseEq, "abc", "ABC"), Value::integer(1));
        assert_eq!(eq(BinaryOp::StrictEq, "abc", "ABC"), Value::integer(0));
        assert_eq!(eq(BinaryOp::LooseEq, "1.0", "1"), Value::integer(1));
        assert_eq!(eq(BinaryOp::StrictEq, "1.0", "1"), Value::integer(0));
        assert_eq!(eq(BinaryOp::LooseNe, "a", "b"), Value::integer(1));
        assert_eq!(
            offline(BinaryOp::StrictEq, Value::integer(2), Value::float(2.0), Dialect::V2),
            Value::integer(1)
        );
    }

    #[test]
    fn test_relational_case_rules() {
        let lt = |a: &str, b: &str, dialect| {
            offline(BinaryOp::Lt, Value::string(a), Value::string(b), dialect)
        };
        // Ordinal: upper case sorts first.
        assert_eq!(lt("B", "a", Dialect::V2), Value::integer(1));
        assert_eq!(lt("B", "a", Dialect::V1), Value::integer(0));
        assert_eq!(lt("10", "9", Dialect::V1), Value::integer(0));
    }

    #[test]
    fn test_arithmetic_edge_cases() {
        let v = |op, a, b| offline(op, a, b, Dialect::V2);
        assert_eq!(v(BinaryOp::Div, Value::integer(5), Value::integer(0)), Value::empty());
        assert_eq!(v(BinaryOp::Add, Value::string("x"), Value::integer(1)), Value::empty());
        assert_eq!(
            v(BinaryOp::Add, Value::integer(i64::MAX), Value::integer(1)),
            Value::integer(i64::MIN)
        );
        assert_eq!(v(BinaryOp::Pow, Value::integer(0), Value::integer(-1)), Value::empty());
        assert_eq!(v(BinaryOp::UShr, Value::integer(-1), Value::integer(60)), Value::integer(15));
        assert!(matches!(
            apply_binary(BinaryOp::FloorDiv, &Value::integer(1), &Value::integer(2), Dialect::V2),
            Err(EvalError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_regex_match_position() {
        let m = |hay: &str, pattern: &str| {
            offline(BinaryOp::RegexMatch, Value::string(hay), Value::string(pattern), Dialect::V2)
        };
        assert_eq!(m("hello world", "wor"), Value::integer(7));
        assert_eq!(m("hello", "i)HEL"), Value::integer(1));
        assert_eq!(m("hello", "xyz"), Value::integer(0));
    }

    #[tokio::test]
    async fn test_division_by_zero_variable() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("num", MockValue::Integer(10))
            .connect()
            .await
            .unwrap();
        assert_eq!(eval(&session, "num / 0").await.unwrap(), Value::empty());
        assert_eq!(eval(&session, "num / 4").await.unwrap(), Value::float(2.5));
    }

    #[tokio::test]
    async fn test_float_literals_per_dialect() {
        let (v1, _e1) = MockEngine::new("1.1.36.02").connect().await.unwrap();
        let (v2, _e2) = MockEngine::new("2.0.11").connect().await.unwrap();

        assert_eq!(eval(&v1, "1.5").await.unwrap(), Value::string("1.5"));
        assert_eq!(
            eval(&v1, "1.5 + 1").await.unwrap().to_text(Dialect::V1),
            "2.500000"
        );
        assert_eq!(eval(&v2, "1.5 + 1").await.unwrap().to_string(), "2.5");
        assert_eq!(eval(&v2, "1.0 * 3").await.unwrap().to_string(), "3.0");
    }

    #[tokio::test]
    async fn test_identifiers_search_contexts_in_order() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("x", MockValue::Integer(1))
            .with_global("x", MockValue::Integer(2))
            .with_global("g", MockValue::string("global"))
            .connect()
            .await
            .unwrap();
        assert_eq!(eval(&session, "x").await.unwrap(), Value::integer(1));
        assert_eq!(eval(&session, "g").await.unwrap(), Value::string("global"));
        assert_eq!(eval(&session, "missing").await.unwrap(), Value::Undefined);
    }

    #[tokio::test]
    async fn test_concatenation() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("name", MockValue::string("world"))
            .with_local("obj", MockValue::object("Object", 1, vec![]))
            .connect()
            .await
            .unwrap();
        assert_eq!(
            eval(&session, r#""hello " name"#).await.unwrap(),
            Value::string("hello world")
        );
        assert_eq!(
            eval(&session, r#""<" . obj . ">""#).await.unwrap(),
            Value::string("<>")
        );
    }

    #[tokio::test]
    async fn test_members_and_elements() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local(
                "obj",
                MockValue::object(
                    "Object",
                    10,
                    vec![
                        ("name", MockValue::string("box")),
                        (
                            "inner",
                            MockValue::object("Object", 11, vec![("depth", MockValue::Integer(2))]),
                        ),
                    ],
                ),
            )
            .with_local(
                "arr",
                MockValue::array(20, vec![MockValue::Integer(5), MockValue::Integer(6)]),
            )
            .with_local("key", MockValue::string("name"))
            .connect()
            .await
            .unwrap();

        assert_eq!(eval(&session, "obj.name").await.unwrap(), Value::string("box"));
        assert_eq!(eval(&session, "obj.NAME").await.unwrap(), Value::string("box"));
        // Beyond the eager level, the child is fetched by full name.
        assert_eq!(eval(&session, "obj.inner.depth").await.unwrap(), Value::integer(2));
        assert_eq!(eval(&session, "obj.%key%").await.unwrap(), Value::string("box"));
        assert_eq!(eval(&session, "arr[2]").await.unwrap(), Value::integer(6));
        assert_eq!(eval(&session, "arr[3]").await.unwrap(), Value::Undefined);
        assert_eq!(eval(&session, "key.length").await.unwrap(), Value::Undefined);
        assert_eq!(eval(&session, "obj = obj").await.unwrap(), Value::integer(1));
    }

    #[tokio::test]
    async fn test_inheritance_chain() {
        let proto = MockValue::object("Prototype", 31, vec![("greet", MockValue::string("hi"))])
            .with_base(MockValue::object("Object", 32, vec![]));
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local(
                "obj",
                MockValue::object("Derived", 30, vec![("own", MockValue::Integer(1))]).with_base(proto),
            )
            .connect()
            .await
            .unwrap();

        assert_eq!(eval(&session, "obj.greet").await.unwrap(), Value::string("hi"));
        assert_eq!(eval(&session, "obj.nothing").await.unwrap(), Value::Undefined);
    }

    #[tokio::test]
    async fn test_dereference() {
        let (v1, _e1) = MockEngine::new("1.1.36.02")
            .with_local("which", MockValue::string("target"))
            .with_local("target", MockValue::Integer(7))
            .with_local("item2", MockValue::string("second"))
            .with_local("i", MockValue::Integer(2))
            .connect()
            .await
            .unwrap();
        assert_eq!(eval(&v1, "%which%").await.unwrap(), Value::integer(7));
        assert_eq!(eval(&v1, "item%i%").await.unwrap(), Value::string("second"));
    }

    #[tokio::test]
    async fn test_assignment_writes_through() {
        let (session, engine) = MockEngine::new("2.0.11")
            .with_local("n", MockValue::Integer(1))
            .with_global("g", MockValue::Integer(5))
            .with_local(
                "obj",
                MockValue::object("Object", 40, vec![("x", MockValue::Integer(1))]),
            )
            .connect()
            .await
            .unwrap();

        assert_eq!(eval(&session, "n := 10").await.unwrap(), Value::integer(10));
        assert_eq!(engine.variable("Local", "n").await, Some(MockValue::Integer(10)));

        // Existing globals are written in their own context.
        assert_eq!(eval(&session, "g += 2").await.unwrap(), Value::integer(7));
        assert_eq!(engine.variable("Global", "g").await, Some(MockValue::Integer(7)));

        eval(&session, "global fresh := \"new\"").await.unwrap();
        assert_eq!(
            engine.variable("Global", "fresh").await,
            Some(MockValue::string("new"))
        );

        eval(&session, "obj.x := 2.5").await.unwrap();
        assert_eq!(engine.variable("Local", "obj.x").await, Some(MockValue::Float(2.5)));

        assert!(matches!(
            eval(&session, "static s := 1").await,
            Err(EvalError::UnknownScope { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_only_assignment_is_rejected() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("A_Index", MockValue::Integer(1))
            .with_read_only("A_Index")
            .connect()
            .await
            .unwrap();
        assert!(matches!(
            eval(&session, "A_Index := 3").await,
            Err(EvalError::WriteRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let (session, engine) = MockEngine::new("2.0.11")
            .with_local("i", MockValue::Integer(5))
            .with_local("s", MockValue::string("abc"))
            .connect()
            .await
            .unwrap();

        assert_eq!(eval(&session, "i++").await.unwrap(), Value::integer(5));
        assert_eq!(eval(&session, "++i").await.unwrap(), Value::integer(7));
        assert_eq!(eval(&session, "--i").await.unwrap(), Value::integer(6));
        assert_eq!(engine.variable("Local", "i").await, Some(MockValue::Integer(6)));

        let writes = engine.count_commands("property_set").await;
        assert_eq!(eval(&session, "s++").await.unwrap(), Value::empty());
        assert_eq!(engine.count_commands("property_set").await, writes);
    }

    #[tokio::test]
    async fn test_v1_writes_floats_as_strings() {
        let (session, engine) = MockEngine::new("1.1.36.02")
            .with_local("f", MockValue::Integer(0))
            .connect()
            .await
            .unwrap();
        eval(&session, "f := 1 / 4").await.unwrap();
        assert_eq!(
            engine.variable("Local", "f").await,
            Some(MockValue::string("0.250000"))
        );
    }

    #[tokio::test]
    async fn test_calls() {
        let (session, _engine) = MockEngine::new("2.0.11")
            .with_local("s", MockValue::string("  padded  "))
            .with_local(
                "obj",
                MockValue::object("Object", 50, vec![("v", MockValue::Integer(3))]),
            )
            .connect()
            .await
            .unwrap();

        assert_eq!(eval(&session, "strlen(Trim(s))").await.unwrap(), Value::integer(6));
        assert_eq!(eval(&session, "GetVar(\"obj.v\")").await.unwrap(), Value::integer(3));
        assert_eq!(eval(&session, "Type(obj)").await.unwrap(), Value::string("Object"));
        assert!(matches!(
            eval(&session, "obj.method()").await,
            Err(EvalError::UnsupportedExpression { .. })
        ));
        assert!(matches!(
            eval(&session, "NoSuchFunction(1)").await,
            Err(EvalError::UnknownFunction { .. })
        ));
    }

    #[tokio::test]
    async fn test_meta_variables() {
        let (session, _engine) = MockEngine::new("2.0.11").connect().await.unwrap();
        let mut meta = CiMap::new();
        meta.insert("hitCount", Value::integer(3));

        let value = session
            .eval_with_meta("GetMetaVar(\"hitcount\") * 2", None, None, &meta)
            .await
            .unwrap();
        assert_eq!(value, Value::integer(6));
        let missing = session
            .eval_with_meta("GetMetaVar(\"other\")", None, None, &meta)
            .await
            .unwrap();
        assert_eq!(missing, Value::Undefined);
    }

    #[tokio::test]
    async fn test_unsupported_and_parse_errors_keep_session_usable() {
        let (session, _engine) = MockEngine::new("2.0.11").connect().await.unwrap();
        assert!(matches!(
            eval(&session, "&x").await,
            Err(EvalError::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            eval(&session, "7 // 2").await,
            Err(EvalError::UnsupportedOperator { .. })
        ));
        assert!(matches!(eval(&session, "(1 +").await, Err(EvalError::Parse(_))));
        assert_eq!(eval(&session, "1, 2, 3").await.unwrap(), Value::integer(3));
        assert_eq!(eval(&session, "0 ? \"a\" : \"b\"").await.unwrap(), Value::string("b"));
    }

    #[tokio::test]
    async fn test_deeply_nested_expression_is_a_parse_error() {
        let (session, _engine) = MockEngine::new("2.0.11").connect().await.unwrap();
        let deep = format!("{}1{}", "(".repeat(1500), ")".repeat(1500));
        assert!(matches!(eval(&session, &deep).await, Err(EvalError::Parse(_))));
        let shallow = format!("{}1{}", "(".repeat(25), ")".repeat(25));
        assert_eq!(eval(&session, &shallow).await.unwrap(), Value::integer(1));
    }
}
