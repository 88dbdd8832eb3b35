//! Rendering of diagnostics for human consumption using
//! [`ariadne`](https://docs.rs/ariadne).

use ariadne::{Config, Label, Report, ReportKind, Source};

use crate::{
    location::Span,
    semantic::SemanticError,
    syntax::SyntaxDiagnostic,
};

/// Anything that can be rendered against the source text it refers to.
pub trait Diagnostic {
    /// The headline message of the diagnostic.
    fn message(&self) -> String;

    /// The characters the diagnostic is about.
    fn span(&self) -> Span;

    /// An optional piece of help to show beneath the source excerpt.
    fn hint(&self) -> Option<String> {
        None
    }
}

impl Diagnostic for SyntaxDiagnostic {
    fn message(&self) -> String {
        self.message.clone()
    }

    fn span(&self) -> Span {
        self.span.clone()
    }

    fn hint(&self) -> Option<String> {
        self.hint.clone()
    }
}

impl Diagnostic for SemanticError {
    fn message(&self) -> String {
        self.kind.to_string()
    }

    fn span(&self) -> Span {
        self.span.clone()
    }

    fn hint(&self) -> Option<String> {
        self.function
            .as_ref()
            .map(|f| format!("while lowering `{}::{f}`", self.contract))
    }
}

/// Renders every diagnostic in `diagnostics` as an error report against the
/// `source` text found at `path`.
///
/// Colour is only used when `color` is set, which keeps the output stable for
/// tests and for writing into files.
#[must_use]
pub fn render<D: Diagnostic>(path: &str, source: &str, diagnostics: &[D], color: bool) -> String {
    let mut out = Vec::new();
    for diagnostic in diagnostics {
        let span = diagnostic.span();
        let label = Label::new((path.to_string(), span.clone())).with_message(diagnostic.message());
        let mut builder = Report::<(String, Span)>::build(ReportKind::Error, path.to_string(), span.start)
            .with_config(Config::default().with_color(color))
            .with_message(diagnostic.message())
            .with_label(label);
        if let Some(hint) = diagnostic.hint() {
            builder = builder.with_help(hint);
        }

        // Writing into an in-memory buffer only fails if the source cache cannot
        // resolve the span, in which case we fall back to the bare message.
        if builder
            .finish()
            .write((path.to_string(), Source::from(source)), &mut out)
            .is_err()
        {
            out.extend_from_slice(format!("error: {}\n", diagnostic.message()).as_bytes());
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod test {
    use crate::{location::Location, report::render, syntax::SyntaxDiagnostic};

    #[test]
    fn renders_message_and_path() {
        let source = "contract A {\n  x: u65\n}\n";
        let diagnostic = SyntaxDiagnostic::new("Unknown type `u65`", Location::new(2, 6), 18..21)
            .with_hint("expected one of u8, u16, u32, u64, u128, bool, address");
        let rendered = render("a.aur", source, &[diagnostic], false);

        assert!(rendered.contains("Unknown type `u65`"));
        assert!(rendered.contains("a.aur"));
        assert!(rendered.contains("expected one of"));
    }

    #[test]
    fn renders_nothing_for_no_diagnostics() {
        let rendered = render::<SyntaxDiagnostic>("a.aur", "", &[], false);
        assert!(rendered.is_empty());
    }
}
