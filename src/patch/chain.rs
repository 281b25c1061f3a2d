//! Stack-safe traversal of `AndThen` trees.
//!
//! Patches built by folding `combine` nest one level per step, so a long
//! fork/join history yields trees far deeper than the thread stack. The
//! derived `Drop`, `Clone`, `Debug` and `PartialEq` all recurse; these
//! helpers walk the tree with a heap work list instead.

use std::fmt;

/// A patch tree whose inner nodes compose two sub-patches.
pub(crate) trait Chain: Default + Sized {
    /// The two halves, if this node is a composition.
    fn halves(&self) -> Option<(&Self, &Self)>;

    /// Moves the halves out, leaving empty patches in their place.
    fn take_halves(&mut self) -> Option<(Self, Self)>;

    /// Builds the composition of `first` then `second`.
    fn join(first: Self, second: Self) -> Self;

    /// Clones a node that is not a composition.
    fn clone_leaf(&self) -> Self;

    /// Formats a node that is not a composition.
    fn fmt_leaf(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Empties `root`, dropping its descendants one at a time.
pub(crate) fn unlink<P: Chain>(root: &mut P) {
    let mut work: Vec<P> = Vec::new();
    let mut halves = root.take_halves();
    loop {
        if let Some((first, second)) = halves {
            for half in [first, second] {
                if half.halves().is_some() {
                    work.push(half);
                }
            }
        }
        let Some(mut node) = work.pop() else {
            return;
        };
        halves = node.take_halves();
    }
}

/// Clones `root` node by node, keeping its shape.
pub(crate) fn clone<P: Chain>(root: &P) -> P {
    enum Frame<'a, N> {
        Visit(&'a N),
        Join,
    }

    let mut work = vec![Frame::Visit(root)];
    let mut built: Vec<P> = Vec::new();
    while let Some(frame) = work.pop() {
        match frame {
            Frame::Visit(node) => match node.halves() {
                Some((first, second)) => {
                    work.push(Frame::Join);
                    work.push(Frame::Visit(second));
                    work.push(Frame::Visit(first));
                }
                None => built.push(node.clone_leaf()),
            },
            Frame::Join => {
                let second = built.pop().unwrap_or_default();
                let first = built.pop().unwrap_or_default();
                built.push(P::join(first, second));
            }
        }
    }
    built.pop().unwrap_or_default()
}

/// Renders `root` as nested `AndThen(first, second)` text.
pub(crate) fn fmt<P: Chain>(root: &P, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    enum Token<'a, N> {
        Node(&'a N),
        Text(&'static str),
    }

    let mut work = vec![Token::Node(root)];
    while let Some(token) = work.pop() {
        match token {
            Token::Text(text) => f.write_str(text)?,
            Token::Node(node) => match node.halves() {
                Some((first, second)) => {
                    f.write_str("AndThen(")?;
                    work.push(Token::Text(")"));
                    work.push(Token::Node(second));
                    work.push(Token::Text(", "));
                    work.push(Token::Node(first));
                }
                None => node.fmt_leaf(f)?,
            },
        }
    }
    Ok(())
}

/// Structural equality; leaves are compared with `leaf_eq`.
pub(crate) fn eq<P: Chain>(left: &P, right: &P, leaf_eq: impl Fn(&P, &P) -> bool) -> bool {
    let mut work = vec![(left, right)];
    while let Some((left, right)) = work.pop() {
        match (left.halves(), right.halves()) {
            (Some((l1, l2)), Some((r1, r2))) => {
                work.push((l2, r2));
                work.push((l1, r1));
            }
            (None, None) => {
                if !leaf_eq(left, right) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}
