//! The front end of the engine, turning Aurion source text into an [`Ast`].
//!
//! Parsing happens in two phases. The [`lexer`] produces tokens and the
//! [`parser`] assembles them into a tree. Both phases recover from errors, so
//! [`parse_recovering`] always returns a tree alongside every diagnostic it
//! found, and never panics regardless of its input.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use aurion_errors::{location::LineIndex, syntax::SyntaxDiagnostic};
use chumsky::Parser as _;

use crate::syntax::{ast::Ast, lexer::lexer, parser::Parser};

/// The result of parsing a file while recovering from errors.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParseOutcome {
    /// The tree for every declaration that could be parsed.
    pub ast: Ast,

    /// The diagnostics, ordered by where they occur in the source.
    pub diagnostics: Vec<SyntaxDiagnostic>,
}

impl ParseOutcome {
    /// Checks if the file parsed without any diagnostics.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Converts the outcome into the tree if there were no diagnostics.
    ///
    /// # Errors
    ///
    /// - Every diagnostic, if there was at least one.
    pub fn into_result(self) -> Result<Ast, Vec<SyntaxDiagnostic>> {
        if self.diagnostics.is_empty() {
            Ok(self.ast)
        } else {
            Err(self.diagnostics)
        }
    }
}

/// Parses `source`, recovering from errors where possible.
#[must_use]
pub fn parse_recovering(source: &str) -> ParseOutcome {
    let index = LineIndex::new(source);
    let (tokens, lex_errors) = lexer().parse_recovery(source);

    let mut diagnostics = lex_errors
        .iter()
        .map(|error| {
            let span = error.span();
            SyntaxDiagnostic::new(lexer::describe(error), index.location(span.start), span)
        })
        .collect::<Vec<_>>();

    let tokens = tokens.unwrap_or_default();
    let (ast, parse_diagnostics) = Parser::new(&tokens, &index).parse_program();
    diagnostics.extend(parse_diagnostics);
    diagnostics.sort_by_key(|diagnostic| diagnostic.span.start);

    ParseOutcome { ast, diagnostics }
}

/// Parses `source` into a tree.
///
/// # Errors
///
/// - Every syntax diagnostic found in the file, if there is at least one.
pub fn parse(source: &str) -> Result<Ast, Vec<SyntaxDiagnostic>> {
    parse_recovering(source).into_result()
}

#[cfg(test)]
mod test {
    use crate::syntax::{parse, parse_recovering};

    #[test]
    fn empty_source_is_an_empty_program() -> anyhow::Result<()> {
        let ast = parse("   // nothing here\n").map_err(|d| anyhow::anyhow!("{d:?}"))?;
        assert!(ast.contracts.is_empty());

        Ok(())
    }

    #[test]
    fn lexer_and_parser_errors_are_merged_in_order() {
        let outcome = parse_recovering("contract A {\n  x: u64 $\n  y: u9\n}");

        assert_eq!(outcome.diagnostics.len(), 2);
        assert!(outcome.diagnostics[0].message.contains('$'));
        assert_eq!(outcome.diagnostics[0].location.line, 2);
        assert!(outcome.diagnostics[1].message.contains("Unknown type `u9`"));
        assert_eq!(outcome.diagnostics[1].location.line, 3);
        assert!(!outcome.is_ok());
    }
}
