use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiteralKind {
    Int,
    Decimal,
    String,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclarationKind {
    Let,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    PrefixIncrement,
    PrefixDecrement,
    PostfixIncrement,
    PostfixDecrement,
    Negate,
    Not,
    Plus,
}

impl UnaryOperator {
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            UnaryOperator::PrefixIncrement
                | UnaryOperator::PrefixDecrement
                | UnaryOperator::PostfixIncrement
                | UnaryOperator::PostfixDecrement
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::PrefixIncrement | UnaryOperator::PostfixIncrement => "++",
            UnaryOperator::PrefixDecrement | UnaryOperator::PostfixDecrement => "--",
            UnaryOperator::Negate => "-",
            UnaryOperator::Not => "!",
            UnaryOperator::Plus => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    Or,
    And,
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Exponent => "^",
            BinaryOperator::Or => "||",
            BinaryOperator::And => "&&",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::LessThan => "<",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::LessThanOrEqual => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,
    ExponentAssign,
}

impl AssignmentOperator {
    /// The binary operator a compound assignment applies; `None` for plain `=`.
    pub fn binary(self) -> Option<BinaryOperator> {
        match self {
            AssignmentOperator::Assign => None,
            AssignmentOperator::AddAssign => Some(BinaryOperator::Add),
            AssignmentOperator::SubtractAssign => Some(BinaryOperator::Subtract),
            AssignmentOperator::MultiplyAssign => Some(BinaryOperator::Multiply),
            AssignmentOperator::DivideAssign => Some(BinaryOperator::Divide),
            AssignmentOperator::ModuloAssign => Some(BinaryOperator::Modulo),
            AssignmentOperator::ExponentAssign => Some(BinaryOperator::Exponent),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AssignmentOperator::Assign => "=",
            AssignmentOperator::AddAssign => "+=",
            AssignmentOperator::SubtractAssign => "-=",
            AssignmentOperator::MultiplyAssign => "*=",
            AssignmentOperator::DivideAssign => "/=",
            AssignmentOperator::ModuloAssign => "%=",
            AssignmentOperator::ExponentAssign => "^=",
        }
    }
}

/// A parsed expression. Nodes are built bottom-up by the parser and never
/// mutated afterwards; upward navigation goes through [`Expression::parent_of`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    Constant {
        value: String,
        kind: LiteralKind,
    },
    Variable {
        name: String,
    },
    VariableDeclaration {
        name: String,
        kind: DeclarationKind,
    },
    Group {
        expression: Box<Expression>,
    },
    Unary {
        operand: Box<Expression>,
        operator: UnaryOperator,
    },
    Binary {
        left: Box<Expression>,
        operator: BinaryOperator,
        right: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
    Assignment {
        left: Box<Expression>,
        operator: AssignmentOperator,
        right: Box<Expression>,
    },
    FunctionCall {
        name: String,
        arguments: Vec<Expression>,
    },
    /// `member` is always a `Variable` (property) or a `FunctionCall` (method).
    MemberAccess {
        target: Box<Expression>,
        member: Box<Expression>,
    },
    ArrayAccess {
        target: Box<Expression>,
        index: Box<Expression>,
    },
}

impl Expression {
    /// Places a value can be written to.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Expression::Variable { .. }
                | Expression::MemberAccess { .. }
                | Expression::ArrayAccess { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Expression::Constant { .. } => "Constant",
            Expression::Variable { .. } => "Variable",
            Expression::VariableDeclaration { .. } => "VariableDeclaration",
            Expression::Group { .. } => "Group",
            Expression::Unary { .. } => "Unary",
            Expression::Binary { .. } => "Binary",
            Expression::Ternary { .. } => "Ternary",
            Expression::Assignment { .. } => "Assignment",
            Expression::FunctionCall { .. } => "FunctionCall",
            Expression::MemberAccess { .. } => "MemberAccess",
            Expression::ArrayAccess { .. } => "ArrayAccess",
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Constant { .. }
            | Expression::Variable { .. }
            | Expression::VariableDeclaration { .. } => vec![],
            Expression::Group { expression } => vec![expression.as_ref()],
            Expression::Unary { operand, .. } => vec![operand.as_ref()],
            Expression::Binary { left, right, .. } | Expression::Assignment { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Expression::Ternary {
                condition,
                if_true,
                if_false,
            } => vec![condition.as_ref(), if_true.as_ref(), if_false.as_ref()],
            Expression::FunctionCall { arguments, .. } => arguments.iter().collect(),
            Expression::MemberAccess { target, member } => vec![target.as_ref(), member.as_ref()],
            Expression::ArrayAccess { target, index } => vec![target.as_ref(), index.as_ref()],
        }
    }

    /// Finds the node that directly owns `child`, searching from `self`.
    /// Nodes are compared by identity, so `child` must be borrowed from this tree.
    pub fn parent_of(&self, child: &Expression) -> Option<&Expression> {
        let children = self.children();
        if children.iter().any(|c| std::ptr::eq(*c, child)) {
            return Some(self);
        }
        children.into_iter().find_map(|c| c.parent_of(child))
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Constant {
                value,
                kind: LiteralKind::String,
            } => write!(f, "{value:?}"),
            Expression::Constant { value, .. } => write!(f, "{value}"),
            Expression::Variable { name } => write!(f, "{name}"),
            Expression::VariableDeclaration { name, kind } => match kind {
                DeclarationKind::Let => write!(f, "(let {name})"),
                DeclarationKind::Const => write!(f, "(const {name})"),
            },
            Expression::Group { expression } => write!(f, "(group {expression})"),
            Expression::Unary { operand, operator } => match operator {
                UnaryOperator::PostfixIncrement | UnaryOperator::PostfixDecrement => {
                    write!(f, "(post{} {operand})", operator.symbol())
                }
                _ => write!(f, "({} {operand})", operator.symbol()),
            },
            Expression::Binary {
                left,
                operator,
                right,
            } => write!(f, "({} {left} {right})", operator.symbol()),
            Expression::Ternary {
                condition,
                if_true,
                if_false,
            } => write!(f, "(? {condition} {if_true} {if_false})"),
            Expression::Assignment {
                left,
                operator,
                right,
            } => write!(f, "({} {left} {right})", operator.symbol()),
            Expression::FunctionCall { name, arguments } => {
                write!(f, "(call {name}")?;
                for argument in arguments {
                    write!(f, " {argument}")?;
                }
                write!(f, ")")
            }
            Expression::MemberAccess { target, member } => write!(f, "(. {target} {member})"),
            Expression::ArrayAccess { target, index } => write!(f, "([] {target} {index})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: &str) -> Expression {
        Expression::Constant {
            value: value.to_string(),
            kind: LiteralKind::Int,
        }
    }

    fn variable(name: &str) -> Expression {
        Expression::Variable {
            name: name.to_string(),
        }
    }

    #[test]
    fn parent_lookup_by_identity() {
        let tree = Expression::Binary {
            left: Box::new(int("1")),
            operator: BinaryOperator::Add,
            right: Box::new(Expression::Group {
                expression: Box::new(variable("x")),
            }),
        };

        let Expression::Binary { left, right, .. } = &tree else {
            unreachable!()
        };
        let Expression::Group { expression } = right.as_ref() else {
            unreachable!()
        };

        assert!(std::ptr::eq(tree.parent_of(left).unwrap(), &tree));
        assert!(std::ptr::eq(tree.parent_of(expression).unwrap(), right.as_ref()));
        assert!(tree.parent_of(&tree).is_none());

        // equal but not the same node
        assert!(tree.parent_of(&variable("x")).is_none());
    }

    #[test]
    fn prefix_display() {
        let tree = Expression::Assignment {
            left: Box::new(Expression::VariableDeclaration {
                name: "x".to_string(),
                kind: DeclarationKind::Let,
            }),
            operator: AssignmentOperator::Assign,
            right: Box::new(Expression::FunctionCall {
                name: "f".to_string(),
                arguments: vec![int("1"), variable("y")],
            }),
        };
        assert_eq!(tree.to_string(), "(= (let x) (call f 1 y))");
    }

    #[test]
    fn json_keeps_tags_and_operator_names() {
        let tree = Expression::Unary {
            operand: Box::new(variable("i")),
            operator: UnaryOperator::PostfixIncrement,
        };
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "Unary",
                "operand": { "type": "Variable", "name": "i" },
                "operator": "PostfixIncrement",
            })
        );
        let back: Expression = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn compound_assignment_maps_to_binary() {
        assert_eq!(AssignmentOperator::Assign.binary(), None);
        assert_eq!(
            AssignmentOperator::ExponentAssign.binary(),
            Some(BinaryOperator::Exponent)
        );
    }
}
