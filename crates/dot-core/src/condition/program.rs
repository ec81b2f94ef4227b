use std::{cmp::Ordering, collections::HashMap, fmt};

use dot_model::VarValue;

use super::{
    ConditionError,
    parse::{CmpOp, Expr, LogicOp, parse},
};

/// Evaluation environment: variable name to typed value.
pub type Environment = HashMap<String, VarValue>;

/// Static type of a condition sub-expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    Str,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Type::Bool => "bool",
            Type::Number => "number",
            Type::Str => "string",
        })
    }
}

fn type_of(v: &VarValue) -> Type {
    match v {
        VarValue::Bool(_) => Type::Bool,
        VarValue::Int(_) | VarValue::Float(_) => Type::Number,
        VarValue::Str(_) => Type::Str,
    }
}

/// A parsed and type-checked condition.
#[derive(Debug, Clone)]
pub struct Program {
    expr: Expr,
}

impl Program {
    /// Parse `src` and check it against the types in `env`.
    ///
    /// Unknown variables, operand type mismatches and a non-boolean result are all
    /// rejected here, before anything runs.
    pub fn compile(src: &str, env: &Environment) -> Result<Self, ConditionError> {
        let expr = parse(src)?;
        match check(&expr, env)? {
            Type::Bool => Ok(Self { expr }),
            other => Err(ConditionError::NotBoolean(other)),
        }
    }

    pub fn eval(&self, env: &Environment) -> Result<bool, ConditionError> {
        match eval(&self.expr, env)? {
            VarValue::Bool(b) => Ok(b),
            other => Err(ConditionError::NotBoolean(type_of(&other))),
        }
    }
}

fn check(expr: &Expr, env: &Environment) -> Result<Type, ConditionError> {
    match expr {
        Expr::Lit(v) => Ok(type_of(v)),
        Expr::Var(name) => env
            .get(name)
            .map(type_of)
            .ok_or_else(|| ConditionError::UnknownVariable(name.clone())),
        Expr::Not(inner) => expect(check(inner, env)?, Type::Bool, "!").map(|_| Type::Bool),
        Expr::Neg(inner) => expect(check(inner, env)?, Type::Number, "-").map(|_| Type::Number),
        Expr::Logic(op, lhs, rhs) => {
            let symbol = match op {
                LogicOp::And => "&&",
                LogicOp::Or => "||",
            };
            expect(check(lhs, env)?, Type::Bool, symbol)?;
            expect(check(rhs, env)?, Type::Bool, symbol)?;
            Ok(Type::Bool)
        }
        Expr::Cmp(op, lhs, rhs) => {
            let (l, r) = (check(lhs, env)?, check(rhs, env)?);
            let ordered = !matches!(op, CmpOp::Eq | CmpOp::Ne);
            if l != r || (ordered && l == Type::Bool) {
                return Err(ConditionError::TypeMismatch {
                    op: op.symbol(),
                    left: l,
                    right: r,
                });
            }
            Ok(Type::Bool)
        }
    }
}

fn expect(found: Type, want: Type, op: &'static str) -> Result<Type, ConditionError> {
    if found == want {
        Ok(found)
    } else {
        Err(ConditionError::TypeMismatch {
            op,
            left: want,
            right: found,
        })
    }
}

fn eval(expr: &Expr, env: &Environment) -> Result<VarValue, ConditionError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Var(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ConditionError::UnknownVariable(name.clone())),
        Expr::Not(inner) => Ok(VarValue::Bool(!as_bool(eval(inner, env)?, "!")?)),
        Expr::Neg(inner) => match eval(inner, env)? {
            VarValue::Int(i) => i
                .checked_neg()
                .map(VarValue::Int)
                .ok_or(ConditionError::Overflow),
            VarValue::Float(x) => Ok(VarValue::Float(-x)),
            other => Err(ConditionError::TypeMismatch {
                op: "-",
                left: Type::Number,
                right: type_of(&other),
            }),
        },
        Expr::Logic(LogicOp::And, lhs, rhs) => {
            if !as_bool(eval(lhs, env)?, "&&")? {
                return Ok(VarValue::Bool(false));
            }
            Ok(VarValue::Bool(as_bool(eval(rhs, env)?, "&&")?))
        }
        Expr::Logic(LogicOp::Or, lhs, rhs) => {
            if as_bool(eval(lhs, env)?, "||")? {
                return Ok(VarValue::Bool(true));
            }
            Ok(VarValue::Bool(as_bool(eval(rhs, env)?, "||")?))
        }
        Expr::Cmp(op, lhs, rhs) => {
            let (l, r) = (eval(lhs, env)?, eval(rhs, env)?);
            compare(*op, &l, &r).map(VarValue::Bool)
        }
    }
}

fn as_bool(v: VarValue, op: &'static str) -> Result<bool, ConditionError> {
    match v {
        VarValue::Bool(b) => Ok(b),
        other => Err(ConditionError::TypeMismatch {
            op,
            left: Type::Bool,
            right: type_of(&other),
        }),
    }
}

fn compare(op: CmpOp, l: &VarValue, r: &VarValue) -> Result<bool, ConditionError> {
    let ordering = match (l, r) {
        (VarValue::Int(a), VarValue::Int(b)) => Some(a.cmp(b)),
        (VarValue::Int(a), VarValue::Float(b)) => (*a as f64).partial_cmp(b),
        (VarValue::Float(a), VarValue::Int(b)) => a.partial_cmp(&(*b as f64)),
        (VarValue::Float(a), VarValue::Float(b)) => a.partial_cmp(b),
        (VarValue::Str(a), VarValue::Str(b)) => Some(a.cmp(b)),
        (VarValue::Bool(a), VarValue::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => {
            Some(a.cmp(b))
        }
        _ => {
            return Err(ConditionError::TypeMismatch {
                op: op.symbol(),
                left: type_of(l),
                right: type_of(r),
            });
        }
    };

    // NaN compares unequal to everything.
    let Some(ordering) = ordering else {
        return Ok(op == CmpOp::Ne);
    };
    Ok(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}
