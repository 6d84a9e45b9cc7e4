//! Quasiquote template expansion.
//!
//! A template is copied as data except where `unquote` / `unquote-splicing`
//! appear at the current nesting level. Each nested `quasiquote` raises the
//! level by one and each `unquote` lowers it, so only forms at level 1 are
//! evaluated; deeper ones are rebuilt with their markers intact.

use crate::Error;
use crate::ast::Node;
use crate::evaluator::{Arity, Interpreter};
use crate::heap::{EnvRef, ValueRef};

enum Piece {
    Single(ValueRef),
    Splice(Vec<ValueRef>),
}

/// Expand `template` at nesting `depth` (1 for the outermost quasiquote).
pub fn expand(
    interp: &mut Interpreter,
    template: &Node,
    env: EnvRef,
    depth: usize,
) -> Result<ValueRef, Error> {
    let Node::List { elements, tail } = template else {
        return interp.quote_node(template);
    };

    if let Some((head, operands)) = template.as_form() {
        match head {
            "unquote" => {
                let inner = single_operand(head, operands)?;
                return if depth == 1 {
                    interp.evaluate(inner, env)
                } else {
                    let expanded = expand(interp, inner, env, depth - 1)?;
                    wrap(interp, head, expanded)
                };
            }
            "unquote-splicing" => {
                let inner = single_operand(head, operands)?;
                if depth == 1 {
                    return Err(Error::StructuralError(
                        "unquote-splicing outside of a list context".to_owned(),
                    ));
                }
                let expanded = expand(interp, inner, env, depth - 1)?;
                return wrap(interp, head, expanded);
            }
            "quasiquote" => {
                let inner = single_operand(head, operands)?;
                let expanded = expand(interp, inner, env, depth + 1)?;
                return wrap(interp, head, expanded);
            }
            _ => {}
        }
    }

    let tail_value = match tail.as_deref() {
        None => interp.heap.nil(),
        Some(tail) => {
            if depth == 1 && matches!(tail.as_form(), Some(("unquote-splicing", _))) {
                return Err(Error::StructuralError(
                    "unquote-splicing cannot appear in dotted tail position".to_owned(),
                ));
            }
            expand(interp, tail, env, depth)?
        }
    };

    let mut pieces = Vec::with_capacity(elements.len());
    for element in elements {
        match element.as_form() {
            Some(("unquote-splicing", operands)) if depth == 1 => {
                let inner = single_operand("unquote-splicing", operands)?;
                let spliced = interp.evaluate(inner, env)?;
                let items = interp.heap.list_to_vec(spliced).map_err(|_| {
                    Error::StructuralError(format!(
                        "unquote-splicing expected proper list, got: {}",
                        interp.display(spliced)
                    ))
                })?;
                pieces.push(Piece::Splice(items));
            }
            _ => pieces.push(Piece::Single(expand(interp, element, env, depth)?)),
        }
    }

    let mut result = tail_value;
    for piece in pieces.into_iter().rev() {
        match piece {
            Piece::Single(value) => result = interp.heap.cons(value, result),
            Piece::Splice(items) => result = interp.heap.list_with_tail(&items, result),
        }
    }
    Ok(result)
}

fn single_operand<'a>(head: &str, operands: &'a [Node]) -> Result<&'a Node, Error> {
    match operands {
        [inner] => Ok(inner),
        _ => Err(Error::arity_error_with_expr(
            Arity::Exact(1),
            operands.len(),
            head.to_owned(),
        )),
    }
}

/// `(marker expanded)` as data
fn wrap(interp: &mut Interpreter, marker: &str, expanded: ValueRef) -> Result<ValueRef, Error> {
    let symbol = interp.intern(marker)?;
    let marker = interp.heap.symbol(symbol);
    Ok(interp.heap.list(&[marker, expanded]))
}

#[cfg(all(test, feature = "reader"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use crate::Interpreter;

    fn eval_to_string(interp: &mut Interpreter, source: &str) -> Result<String, String> {
        match interp.eval_str(source) {
            Ok(value) => Ok(interp.display(value).to_string()),
            Err(err) => Err(err.to_string()),
        }
    }

    #[test]
    fn test_quasiquote_expansion() {
        let mut interp = Interpreter::new().unwrap();
        interp
            .eval_str("(define x 5) (define xs (list 1 2 3)) (define empty '())")
            .unwrap();

        let cases = vec![
            ("`x", "x"),
            ("`5", "5"),
            ("`()", "()"),
            ("`(a b c)", "(a b c)"),
            ("`(a ,x c)", "(a 5 c)"),
            ("`(1 ,(+ 1 1) ,@(list 3 4))", "(1 2 3 4)"),
            ("`(0 ,@xs 4)", "(0 1 2 3 4)"),
            ("`(,@xs)", "(1 2 3)"),
            ("`(a ,@empty b)", "(a b)"),
            ("`(,@xs ,@xs)", "(1 2 3 1 2 3)"),
            ("`(a . ,x)", "(a . 5)"),
            ("`(a b . c)", "(a b . c)"),
            ("`(,@xs . tail)", "(1 2 3 . tail)"),
            ("`(nested (deep ,x))", "(nested (deep 5))"),
            ("`,x", "5"),
            ("(quasiquote (1 (unquote (* x 2))))", "(1 10)"),
        ];
        for (source, expected) in cases {
            assert_eq!(
                eval_to_string(&mut interp, source).as_deref(),
                Ok(expected),
                "{source}"
            );
        }
    }

    #[test]
    fn test_nested_quasiquote_levels() {
        let mut interp = Interpreter::new().unwrap();
        interp.eval_str("(define x 5)").unwrap();

        let cases = vec![
            // inner unquote belongs to the inner quasiquote
            ("``(a ,x)", "(quasiquote (a (unquote x)))"),
            // two unquotes reach level 1
            ("``(a ,,x)", "(quasiquote (a (unquote 5)))"),
            ("``(a ,@,x)", "(quasiquote (a (unquote-splicing 5)))"),
            ("``(a ,@xs)", "(quasiquote (a (unquote-splicing xs)))"),
        ];
        for (source, expected) in cases {
            assert_eq!(
                eval_to_string(&mut interp, source).as_deref(),
                Ok(expected),
                "{source}"
            );
        }
    }

    #[test]
    fn test_quasiquote_errors() {
        let mut interp = Interpreter::new().unwrap();
        interp.eval_str("(define x 5) (define pair (cons 1 2))").unwrap();

        let cases = vec![
            ("`,@x", "outside of a list"),
            ("`(a . ,@x)", "dotted tail"),
            ("`(a ,@x)", "expected proper list"),
            ("`(a ,@pair)", "expected proper list"),
            ("`(a ,undefined)", "Unbound symbol: undefined"),
            ("`(a (unquote 1 2))", "ArityError"),
            ("(quasiquote)", "ArityError"),
            ("(quasiquote a b)", "ArityError"),
        ];
        for (source, expected) in cases {
            match eval_to_string(&mut interp, source) {
                Err(message) => assert!(
                    message.contains(expected),
                    "{source}: '{message}' should contain '{expected}'"
                ),
                Ok(printed) => panic!("{source}: expected error, got {printed}"),
            }
        }
    }

    #[test]
    fn test_quasiquote_in_macro() {
        let mut interp = Interpreter::new().unwrap();
        interp
            .eval_str("(defmacro my-when (c body) `(if ,c ,body '()))")
            .unwrap();
        assert_eq!(
            eval_to_string(&mut interp, "(my-when (< 1 2) (+ 40 2))").as_deref(),
            Ok("42")
        );
        assert_eq!(
            eval_to_string(&mut interp, "(my-when #f (car '()))").as_deref(),
            Ok("()")
        );
    }
}
