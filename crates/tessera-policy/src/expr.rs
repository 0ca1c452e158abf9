//! Boolean policy expressions over attribute labels.
//!
//! Grammar: `expr := term ("or" term)*`, `term := factor ("and" factor)*`,
//! `factor := label | "(" expr ")"`. Keywords are case-insensitive; labels
//! are `VALUE@A<n>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tessera_core::AttributeLabel;

use crate::error::{PolicyError, PolicyResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyExpr {
    Leaf(AttributeLabel),
    And(Box<PolicyExpr>, Box<PolicyExpr>),
    Or(Box<PolicyExpr>, Box<PolicyExpr>),
}

impl PolicyExpr {
    pub fn leaf(label: AttributeLabel) -> Self {
        PolicyExpr::Leaf(label)
    }

    pub fn and(left: PolicyExpr, right: PolicyExpr) -> Self {
        PolicyExpr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: PolicyExpr, right: PolicyExpr) -> Self {
        PolicyExpr::Or(Box::new(left), Box::new(right))
    }

    /// All labels the policy mentions.
    pub fn labels(&self) -> BTreeSet<AttributeLabel> {
        let mut set = BTreeSet::new();
        self.collect_labels(&mut set);
        set
    }

    fn collect_labels(&self, set: &mut BTreeSet<AttributeLabel>) {
        match self {
            PolicyExpr::Leaf(label) => {
                set.insert(label.clone());
            }
            PolicyExpr::And(l, r) | PolicyExpr::Or(l, r) => {
                l.collect_labels(set);
                r.collect_labels(set);
            }
        }
    }

    pub fn is_satisfied_by(&self, held: &BTreeSet<AttributeLabel>) -> bool {
        match self {
            PolicyExpr::Leaf(label) => held.contains(label),
            PolicyExpr::And(l, r) => l.is_satisfied_by(held) && r.is_satisfied_by(held),
            PolicyExpr::Or(l, r) => l.is_satisfied_by(held) || r.is_satisfied_by(held),
        }
    }

    /// Labels that would be needed to satisfy the policy given what is held:
    /// for an unsatisfied policy, a minimal branch's missing leaves.
    pub fn missing_labels(&self, held: &BTreeSet<AttributeLabel>) -> Vec<AttributeLabel> {
        if self.is_satisfied_by(held) {
            return Vec::new();
        }
        match self {
            PolicyExpr::Leaf(label) => vec![label.clone()],
            PolicyExpr::And(l, r) => {
                let mut missing = l.missing_labels(held);
                missing.extend(r.missing_labels(held));
                missing
            }
            PolicyExpr::Or(l, r) => {
                // Report the branch that is closer to satisfaction
                let left = l.missing_labels(held);
                let right = r.missing_labels(held);
                if left.len() <= right.len() {
                    left
                } else {
                    right
                }
            }
        }
    }
}

impl fmt::Display for PolicyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyExpr::Leaf(label) => write!(f, "{label}"),
            PolicyExpr::And(l, r) => write!(f, "({l} and {r})"),
            PolicyExpr::Or(l, r) => write!(f, "({l} or {r})"),
        }
    }
}

impl Serialize for PolicyExpr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PolicyExpr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Label(String),
}

fn tokenize(input: &str) -> PolicyResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let token = match word.to_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            _ => Token::Label(std::mem::take(word)),
        };
        word.clear();
        tokens.push(token);
    };
    for c in input.chars() {
        match c {
            '(' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Close);
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens);
    if tokens.is_empty() {
        return Err(PolicyError::Parse("empty policy".into()));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> PolicyResult<PolicyExpr> {
        let mut left = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.term()?;
            left = PolicyExpr::or(left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> PolicyResult<PolicyExpr> {
        let mut left = self.factor()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.factor()?;
            left = PolicyExpr::and(left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> PolicyResult<PolicyExpr> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(PolicyError::Parse("unbalanced parentheses".into())),
                }
            }
            Some(Token::Label(raw)) => {
                let label: AttributeLabel = raw
                    .parse()
                    .map_err(|e| PolicyError::Parse(format!("{e}")))?;
                Ok(PolicyExpr::Leaf(label))
            }
            other => Err(PolicyError::Parse(format!(
                "expected label or '(': {other:?}"
            ))),
        }
    }
}

impl FromStr for PolicyExpr {
    type Err = PolicyError;

    fn from_str(s: &str) -> PolicyResult<Self> {
        let tokens = tokenize(s)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(PolicyError::Parse(format!(
                "trailing tokens after expression in: {s}"
            )));
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::AuthorityId;

    fn label(s: &str) -> AttributeLabel {
        s.parse().unwrap()
    }

    fn held(labels: &[&str]) -> BTreeSet<AttributeLabel> {
        labels.iter().map(|s| label(s)).collect()
    }

    #[test]
    fn test_parse_leaf() {
        let expr: PolicyExpr = "MANUFACTURER@A1".parse().unwrap();
        assert_eq!(
            expr,
            PolicyExpr::Leaf(AttributeLabel::new("MANUFACTURER", AuthorityId(1)))
        );
    }

    #[test]
    fn test_parse_or() {
        let expr: PolicyExpr = "(MANUFACTURER@A1 or CUSTOMS@A1)".parse().unwrap();
        assert_eq!(
            expr,
            PolicyExpr::or(
                PolicyExpr::leaf(label("MANUFACTURER@A1")),
                PolicyExpr::leaf(label("CUSTOMS@A1")),
            )
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr: PolicyExpr = "A@A1 or B@A1 and C@A2".parse().unwrap();
        assert_eq!(
            expr,
            PolicyExpr::or(
                PolicyExpr::leaf(label("A@A1")),
                PolicyExpr::and(PolicyExpr::leaf(label("B@A1")), PolicyExpr::leaf(label("C@A2"))),
            )
        );
    }

    #[test]
    fn test_parens_override_precedence() {
        let expr: PolicyExpr = "(A@A1 or B@A1) and C@A2".parse().unwrap();
        assert_eq!(
            expr,
            PolicyExpr::and(
                PolicyExpr::or(PolicyExpr::leaf(label("A@A1")), PolicyExpr::leaf(label("B@A1"))),
                PolicyExpr::leaf(label("C@A2")),
            )
        );
    }

    #[test]
    fn test_display_parse_roundtrip() {
        for input in [
            "MANUFACTURER@A1",
            "(MANUFACTURER@A1 or CUSTOMS@A1)",
            "((A@A1 and B@A2) or C@A3)",
        ] {
            let expr: PolicyExpr = input.parse().unwrap();
            let back: PolicyExpr = expr.to_string().parse().unwrap();
            assert_eq!(back, expr);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<PolicyExpr>().is_err());
        assert!("(A@A1".parse::<PolicyExpr>().is_err());
        assert!("A@A1 or".parse::<PolicyExpr>().is_err());
        assert!("A@A1 B@A2".parse::<PolicyExpr>().is_err());
        assert!("and".parse::<PolicyExpr>().is_err());
        assert!("NOAUTHORITY".parse::<PolicyExpr>().is_err());
    }

    #[test]
    fn test_satisfaction() {
        let expr: PolicyExpr = "(MANUFACTURER@A1 or CUSTOMS@A1)".parse().unwrap();
        assert!(expr.is_satisfied_by(&held(&["MANUFACTURER@A1"])));
        assert!(expr.is_satisfied_by(&held(&["CUSTOMS@A1"])));
        assert!(!expr.is_satisfied_by(&held(&["LOGISTIC@A1"])));

        let expr: PolicyExpr = "(A@A1 and B@A2)".parse().unwrap();
        assert!(!expr.is_satisfied_by(&held(&["A@A1"])));
        assert!(expr.is_satisfied_by(&held(&["A@A1", "B@A2"])));
    }

    #[test]
    fn test_missing_labels() {
        let expr: PolicyExpr = "(A@A1 and B@A2)".parse().unwrap();
        assert_eq!(expr.missing_labels(&held(&["A@A1"])), vec![label("B@A2")]);
        assert!(expr.missing_labels(&held(&["A@A1", "B@A2"])).is_empty());

        let expr: PolicyExpr = "((A@A1 and B@A2) or C@A3)".parse().unwrap();
        // The OR reports the branch closest to satisfaction
        assert_eq!(expr.missing_labels(&held(&[])), vec![label("C@A3")]);
    }

    #[test]
    fn test_labels_collected() {
        let expr: PolicyExpr = "((A@A1 and B@A2) or A@A1)".parse().unwrap();
        let labels = expr.labels();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_serde_as_string() {
        let expr: PolicyExpr = "(A@A1 or B@A2)".parse().unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        let back: PolicyExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
    }
}
