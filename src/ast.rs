//! Expression and statement tree consumed by the code generator.
//!
//! The tree is produced outside this crate (preprocessor, parser and type
//! checker are separate collaborators).  Nodes carry no spans; diagnostics are
//! reported as `(code, message)` pairs.
//!
//! # Design Principles
//!
//! - **Closed**: expressions and statements are plain enums; the generator
//!   matches them exhaustively.
//! - **No lifetimes**: all names are owned `String`s so a tree can be built in
//!   code (tests, the demo binary) and moved freely.
//! - **Declared types only**: declarations carry their [`CType`]; the static
//!   type of any other node is derived by the generator on demand.

use crate::types::{CType, FunctionType};

// ─────────────────────────────────────────────────────────────────────────────
// Translation unit
// ─────────────────────────────────────────────────────────────────────────────

/// One compiled source file: file-scope variables and function definitions.
///
/// Declaration order is significant: it fixes global slot offsets and
/// function table indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslationUnit {
    pub globals: Vec<GlobalDeclaration>,
    pub functions: Vec<FunctionDefinition>,
}

impl TranslationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, global: GlobalDeclaration) -> Self {
        self.globals.push(global);
        self
    }

    pub fn function(mut self, function: FunctionDefinition) -> Self {
        self.functions.push(function);
        self
    }
}

/// `T name = initializer;` at file scope.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDeclaration {
    pub name: String,
    pub ty: CType,
    pub initializer: Option<Expression>,
}

impl GlobalDeclaration {
    pub fn new(name: impl Into<String>, ty: CType, initializer: Option<Expression>) -> Self {
        GlobalDeclaration {
            name: name.into(),
            ty,
            initializer,
        }
    }
}

/// `R name(params) { body }`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub ty: FunctionType,
    pub body: Vec<Statement>,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, ty: FunctionType, body: Vec<Statement>) -> Self {
        FunctionDefinition {
            name: name.into(),
            ty,
            body,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `-x`
    Negate,
    /// `!x`
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// `&&`, short-circuiting.
    LogicalAnd,
    /// `||`, short-circuiting.
    LogicalOr,
}

impl BinaryOperator {
    /// Comparisons and logical operators always produce `int` 0 or 1.
    pub fn is_boolean(self) -> bool {
        !matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
        )
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Integer literal with its literal type (`42`, `42L`, `'a'`).
    Constant { value: i64, ty: CType },
    /// A bare identifier.
    Variable(String),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `target = value`; evaluates to the stored value.
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    /// `&operand`
    AddressOf(Box<Expression>),
    /// `*operand`
    Dereference(Box<Expression>),
    /// `array[index]`
    Index {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    /// `function(arguments...)`
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// `(ty) operand`
    Cast { ty: CType, operand: Box<Expression> },
}

impl Expression {
    /// An `int` literal.
    pub fn int(value: i64) -> Self {
        Expression::Constant {
            value,
            ty: CType::int(),
        }
    }

    pub fn constant(value: i64, ty: CType) -> Self {
        Expression::Constant { value, ty }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expression::Variable(name.into())
    }

    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn assign(target: Expression, value: Expression) -> Self {
        Expression::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn address_of(operand: Expression) -> Self {
        Expression::AddressOf(Box::new(operand))
    }

    pub fn deref(operand: Expression) -> Self {
        Expression::Dereference(Box::new(operand))
    }

    pub fn index(array: Expression, index: Expression) -> Self {
        Expression::Index {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    pub fn call(function: Expression, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            function: Box::new(function),
            arguments,
        }
    }

    pub fn cast(ty: CType, operand: Expression) -> Self {
        Expression::Cast {
            ty,
            operand: Box::new(operand),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

/// A statement node inside a function body.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// An expression evaluated for its side effects.
    Expression(Expression),
    /// `T name = initializer;` at block scope.
    Declaration {
        name: String,
        ty: CType,
        initializer: Option<Expression>,
    },
    /// `{ ... }` opening a new lexical scope.
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    /// `for (init; condition; next) body`; a missing condition loops forever.
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        next: Option<Expression>,
        body: Box<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
}

impl Statement {
    pub fn expr(expression: Expression) -> Self {
        Statement::Expression(expression)
    }

    pub fn declare(name: impl Into<String>, ty: CType, initializer: Option<Expression>) -> Self {
        Statement::Declaration {
            name: name.into(),
            ty,
            initializer,
        }
    }

    pub fn if_else(condition: Expression, then_branch: Statement, else_branch: Option<Statement>) -> Self {
        Statement::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        }
    }

    pub fn while_loop(condition: Expression, body: Statement) -> Self {
        Statement::While {
            condition,
            body: Box::new(body),
        }
    }

    pub fn for_loop(
        init: Option<Statement>,
        condition: Option<Expression>,
        next: Option<Expression>,
        body: Statement,
    ) -> Self {
        Statement::For {
            init: init.map(Box::new),
            condition,
            next,
            body: Box::new(body),
        }
    }

    pub fn ret(value: Expression) -> Self {
        Statement::Return(Some(value))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_expected_nodes() {
        let e = Expression::assign(Expression::var("x"), Expression::int(1));
        assert_eq!(
            e,
            Expression::Assign {
                target: Box::new(Expression::Variable("x".into())),
                value: Box::new(Expression::Constant {
                    value: 1,
                    ty: CType::int()
                }),
            }
        );
    }

    #[test]
    fn test_boolean_operators() {
        assert!(BinaryOperator::LessThan.is_boolean());
        assert!(BinaryOperator::LogicalOr.is_boolean());
        assert!(!BinaryOperator::Modulo.is_boolean());
    }

    #[test]
    fn test_translation_unit_keeps_declaration_order() {
        let unit = TranslationUnit::new()
            .global(GlobalDeclaration::new("a", CType::int(), None))
            .global(GlobalDeclaration::new("b", CType::int(), None));
        let names: Vec<_> = unit.globals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
