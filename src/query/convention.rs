//! Parameter-convention translation for procedure-call templates.
//!
//! Templates are written in a canonical form, a single call whose arguments are
//! parameter slots: `call ackq_claim(:now, :deadline)`. Backends disagree on how
//! those slots are spelled, so a template is rewritten into one of:
//!
//! - [`CallConvention::Placeholder`]: `call ackq_claim(?,?)`
//! - [`CallConvention::Numbered`]: `call ackq_claim($1,$2)`
//! - [`CallConvention::Named`]: unchanged
//!
//! Translation is fail-open: a statement that is not exactly one well-formed call
//! with nothing but parameters for arguments is returned untouched. Templates are validated when a queue is built (see
//! [`Statements::prepare`](super::Statements::prepare)), never at call time.

use std::borrow::Cow;

use itertools::Itertools;
use pom::utf8::{call, end, is_a, none_of, sym, Parser};
use serde::Deserialize;
use strum::{Display, EnumString};

/// How a backend expects bound parameters to be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallConvention {
    /// Statements are used exactly as written.
    #[default]
    #[serde(alias = "auto")]
    #[strum(serialize = "verbatim", serialize = "auto")]
    Verbatim,
    /// Sequential `?` placeholders (MySQL, SQLite).
    Placeholder,
    /// Numbered `$1..$N` parameters (PostgreSQL).
    Numbered,
    /// Named `:name` tokens, kept as written.
    Named,
}

/// A statement split around its single call's argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallShape<'a> {
    /// Everything up to and including the called name.
    pub head: &'a str,
    /// The top-level argument slots, as written.
    pub args: Vec<&'a str>,
    /// Everything after the closing parenthesis.
    pub tail: &'a str,
}

impl CallShape<'_> {
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    fn render(&self, slots: impl Iterator<Item = String>) -> String {
        format!("{}({}){}", self.head, slots.format(","), self.tail)
    }
}

/// A parenthesised group, nested groups included.
fn group<'a>() -> Parser<'a, ()> {
    (sym('(') * call(nested) - sym(')')).discard()
}

fn nested<'a>() -> Parser<'a, ()> {
    (none_of("()").discard() | call(group)).repeat(0..).discard()
}

/// One argument: any text up to a top-level comma or the closing parenthesis.
fn slot<'a>() -> Parser<'a, &'a str> {
    (none_of("(),").discard() | group()).repeat(0..).collect()
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A bound parameter: `:name`, `$n` or `?`.
fn parameter<'a>() -> Parser<'a, &'a str> {
    let named = sym(':') * is_a(is_word).repeat(1..);
    let numbered = sym('$') * is_a(|c: char| c.is_ascii_digit()).repeat(1..);

    (named.discard() | numbered.discard() | sym('?').discard()).collect()
}

fn is_parameter(slot: &str) -> bool {
    (parameter() - end()).parse(slot.trim().as_bytes()).is_ok()
}

/// Whether `text` binds a parameter anywhere. `::` casts are not parameters.
fn mentions_parameter(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();

    chars.iter().enumerate().any(|(i, &c)| {
        let next = chars.get(i + 1).copied();
        match c {
            '?' => true,
            '$' => next.is_some_and(|n| n.is_ascii_digit()),
            ':' => i.checked_sub(1).map(|p| chars[p]) != Some(':') && next.is_some_and(is_word),
            _ => false,
        }
    })
}

fn arguments<'a>() -> Parser<'a, Vec<&'a str>> {
    (slot() + (sym(',') * slot()).repeat(0..)).map(|(first, rest)| {
        std::iter::once(first).chain(rest).collect()
    })
}

fn call_shape<'a>() -> Parser<'a, CallShape<'a>> {
    let head = none_of("()").repeat(1..).collect();
    let tail = none_of("()").repeat(0..).collect();

    (head - sym('(') + arguments() - sym(')') + tail - end())
        .map(|((head, args), tail)| CallShape { head, args, tail })
        .name("call")
}

/// Splits `statement` into a single `name( ... )` call, or `None` if it has any
/// other shape: no call, unbalanced parentheses, more than one call, no name
/// directly before the parenthesis, an argument that is not a lone parameter,
/// or a parameter outside the argument list.
pub fn parse_call(statement: &str) -> Option<CallShape<'_>> {
    let mut shape = call_shape().parse(statement.as_bytes()).ok()?;

    if !shape.head.ends_with(is_word) {
        return None;
    }

    match shape.args.as_slice() {
        [only] if only.trim().is_empty() => shape.args.clear(),
        args if !args.iter().all(|arg| is_parameter(arg)) => return None,
        _ => {}
    }

    if mentions_parameter(shape.head) || mentions_parameter(shape.tail) {
        return None;
    }

    Some(shape)
}

/// Rewrites the parameter slots of `statement` into `convention`.
///
/// Returns the input unchanged for [`CallConvention::Verbatim`] and
/// [`CallConvention::Named`], and for any statement [`parse_call`] rejects.
pub fn translate(statement: &str, convention: CallConvention) -> Cow<'_, str> {
    let numbered = match convention {
        CallConvention::Verbatim | CallConvention::Named => return Cow::Borrowed(statement),
        CallConvention::Placeholder => false,
        CallConvention::Numbered => true,
    };

    let Some(shape) = parse_call(statement) else {
        return Cow::Borrowed(statement);
    };

    let slots = (1..=shape.arity()).map(|n| {
        if numbered {
            format!("${n}")
        } else {
            "?".to_owned()
        }
    });

    Cow::Owned(shape.render(slots))
}
